use std::collections::HashMap;

/// Rate-limits emitted alerts to one per `min_interval_ms` per stream.
///
/// Streams are independent: a firing on one camera never suppresses another.
#[derive(Debug, Clone)]
pub struct AlertDebouncer {
    min_interval_ms: i64,
    last_fired_at: HashMap<String, i64>,
}

impl AlertDebouncer {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms: i64::try_from(min_interval_ms).unwrap_or(i64::MAX),
            last_fired_at: HashMap::new(),
        }
    }

    /// Returns true, and records `now_ms` as the last firing, when the stream
    /// has never fired or its last firing is at least `min_interval_ms` old.
    pub fn should_fire(&mut self, stream_key: &str, now_ms: i64) -> bool {
        let due = match self.last_fired_at.get(stream_key) {
            None => true,
            Some(&last) => now_ms.saturating_sub(last) >= self.min_interval_ms,
        };
        if due {
            self.last_fired_at.insert(stream_key.to_string(), now_ms);
        }
        due
    }

    pub fn last_fired_at(&self, stream_key: &str) -> Option<i64> {
        self.last_fired_at.get(stream_key).copied()
    }

    /// Forgets a stream so its next violation fires immediately.
    pub fn reset(&mut self, stream_key: &str) {
        self.last_fired_at.remove(stream_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const INTERVAL: u64 = 5000;

    #[test]
    fn test_first_call_fires() {
        let mut d = AlertDebouncer::new(INTERVAL);
        assert!(d.should_fire("cam", 0));
        assert_eq!(d.last_fired_at("cam"), Some(0));
    }

    #[rstest]
    #[case::just_inside_window(4999, false)]
    #[case::exactly_at_interval(5000, true)]
    #[case::well_after(12_000, true)]
    #[case::same_instant(0, false)]
    fn test_second_call(#[case] offset: i64, #[case] expected: bool) {
        let mut d = AlertDebouncer::new(INTERVAL);
        let t = 1_000_000;
        assert!(d.should_fire("cam", t));
        assert_eq!(d.should_fire("cam", t + offset), expected);
    }

    #[test]
    fn test_suppressed_call_does_not_extend_window() {
        let mut d = AlertDebouncer::new(INTERVAL);
        assert!(d.should_fire("cam", 0));
        assert!(!d.should_fire("cam", 3000));
        // Window is measured from the last firing (0), not the suppressed call.
        assert!(d.should_fire("cam", 5000));
    }

    #[test]
    fn test_streams_debounce_independently() {
        let mut d = AlertDebouncer::new(INTERVAL);
        assert!(d.should_fire("north", 0));
        assert!(d.should_fire("south", 100));
        assert!(!d.should_fire("north", 200));
        assert!(!d.should_fire("south", 300));
    }

    #[test]
    fn test_reset_allows_immediate_fire() {
        let mut d = AlertDebouncer::new(INTERVAL);
        assert!(d.should_fire("cam", 0));
        d.reset("cam");
        assert!(d.should_fire("cam", 1));
    }

    #[test]
    fn test_zero_interval_always_fires() {
        let mut d = AlertDebouncer::new(0);
        assert!(d.should_fire("cam", 10));
        assert!(d.should_fire("cam", 10));
    }
}
