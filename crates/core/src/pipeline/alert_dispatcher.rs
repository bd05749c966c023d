use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};

use crate::alerting::domain::alert_sink::AlertSink;
use crate::alerting::domain::detection_event::DetectionEvent;

/// Alerts waiting for the sender thread before new ones are dropped.
pub const ALERT_QUEUE_CAPACITY: usize = 16;

/// Delivers detection events to an `AlertSink` on its own thread.
///
/// `dispatch` never blocks: a full queue drops the event with a warning.
/// Dropping the dispatcher (or calling `shutdown`) closes the queue and
/// waits for the events already queued to be delivered.
pub struct AlertDispatcher {
    tx: Option<Sender<DetectionEvent>>,
    sender: Option<JoinHandle<()>>,
}

impl AlertDispatcher {
    pub fn spawn(sink: Arc<dyn AlertSink>, capacity: usize) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<DetectionEvent>(capacity.max(1));
        let sender = thread::Builder::new()
            .name("alert-sender".into())
            .spawn(move || {
                for event in rx {
                    if let Err(e) = sink.emit(&event) {
                        log::warn!("Failed to deliver alert: {e}");
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            sender: Some(sender),
        })
    }

    /// Queues `event` for delivery. Returns false if it was dropped.
    pub fn dispatch(&self, event: DetectionEvent) -> bool {
        let Some(ref tx) = self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!(
                    "Alert queue full; dropping {} alert for {}",
                    event.kind,
                    event.stream
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("Alert sender thread is gone");
                false
            }
        }
    }

    /// Closes the queue and waits for pending deliveries.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        drop(self.tx.take());
        if let Some(sender) = self.sender.take() {
            if sender.join().is_err() {
                log::error!("Alert sender thread panicked");
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
