use std::collections::VecDeque;
use std::sync::Mutex;

use crate::alerting::domain::alert_sink::{Alert, AlertSink, SinkError};
use crate::alerting::domain::detection_event::DetectionEvent;

/// Events kept by `InMemoryAlertSink::new`.
pub const DEFAULT_RETAINED_EVENTS: usize = 100;

/// Keeps the most recent emitted events in memory and logs each one.
///
/// Used when no alert backend is configured, and as the sink in tests.
pub struct InMemoryAlertSink {
    retain: usize,
    events: Mutex<VecDeque<DetectionEvent>>,
}

impl Default for InMemoryAlertSink {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_EVENTS)
    }
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `retain` events, dropping the oldest first.
    pub fn with_retention(retain: usize) -> Self {
        let retain = retain.max(1);
        Self {
            retain,
            events: Mutex::new(VecDeque::with_capacity(retain)),
        }
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DetectionEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl AlertSink for InMemoryAlertSink {
    fn emit(&self, event: &DetectionEvent) -> Result<(), SinkError> {
        log::warn!(
            "{} in {} ({}, {:.0}% confidence) at {} {}",
            event.kind,
            event.zone,
            event.severity,
            event.confidence,
            event.date,
            event.time
        );
        let mut events = self.lock();
        if events.len() == self.retain {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }

    fn fetch_recent(&self) -> Result<Vec<Alert>, SinkError> {
        Ok(self.lock().iter().map(Alert::from).collect())
    }
}
