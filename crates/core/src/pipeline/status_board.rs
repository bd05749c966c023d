use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::classification::domain::ppe_classifier::ClassificationResult;

/// Camera feed badge shown next to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    #[default]
    Safe,
    Warning,
    Danger,
}

/// What a dashboard shows for one stream right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "personDetected")]
    pub person_detected: bool,
    #[serde(rename = "helmetDetected")]
    pub helmet_detected: bool,
    /// 0-100.
    pub confidence: f64,
    pub workers: usize,
    pub feed: FeedStatus,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            person_detected: false,
            helmet_detected: true,
            confidence: 0.0,
            workers: 0,
            feed: FeedStatus::Safe,
        }
    }
}

impl StatusSnapshot {
    pub fn from_result(result: &ClassificationResult) -> Self {
        let feed = if result.is_violation() {
            FeedStatus::Danger
        } else if result.warning.is_some() {
            FeedStatus::Warning
        } else {
            FeedStatus::Safe
        };
        Self {
            person_detected: result.person_detected,
            helmet_detected: result.helmet_detected,
            confidence: result.confidence,
            workers: result.person_count,
            feed,
        }
    }

    /// A cycle that produced no verdict (capture or inference failed).
    pub fn cycle_failed() -> Self {
        Self {
            feed: FeedStatus::Warning,
            ..Self::default()
        }
    }

    pub fn is_violation(&self) -> bool {
        self.person_detected && !self.helmet_detected
    }
}

#[derive(Default)]
struct Slots {
    push: Option<StatusSnapshot>,
    poll: Option<StatusSnapshot>,
}

/// Latest status from the two producers: the detection loop pushes, the
/// status poller polls. A live push result always wins over a polled one.
#[derive(Default)]
pub struct StatusBoard {
    slots: Mutex<Slots>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_push(&self, status: StatusSnapshot) {
        self.lock().push = Some(status);
    }

    /// Called when the detection loop stops; polled status shows through again.
    pub fn clear_push(&self) {
        self.lock().push = None;
    }

    pub fn publish_poll(&self, status: StatusSnapshot) {
        self.lock().poll = Some(status);
    }

    pub fn push(&self) -> Option<StatusSnapshot> {
        self.lock().push.clone()
    }

    pub fn poll(&self) -> Option<StatusSnapshot> {
        self.lock().poll.clone()
    }

    pub fn current(&self) -> StatusSnapshot {
        let slots = self.lock();
        slots
            .push
            .as_ref()
            .or(slots.poll.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
