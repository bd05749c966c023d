use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Local};

/// Time source for event timestamps and alert debouncing.
pub trait Clock: Send + Sync {
    /// Wall time, for what events report.
    fn now(&self) -> DateTime<Local>;

    /// Milliseconds on a clock that never steps backwards. Only differences
    /// between readings mean anything.
    fn monotonic_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn monotonic_ms(&self) -> i64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let elapsed = ORIGIN.get_or_init(Instant::now).elapsed();
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to. Both readings share one value.
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set_ms(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis)
            .unwrap_or_default()
            .with_timezone(&Local)
    }

    fn monotonic_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
