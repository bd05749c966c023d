use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::alerting::domain::alert_sink::{Alert, AlertSink, SinkError};
use crate::pipeline::status_board::{FeedStatus, StatusBoard, StatusSnapshot};

/// Confidence reported for polled status; the backend doesn't keep scores.
pub const POLLED_CONFIDENCE: f64 = 90.0;

/// Status implied by the most recent alert on the backend.
pub fn status_from_alert(alert: &Alert) -> StatusSnapshot {
    let violation = alert.is_helmet_violation();
    StatusSnapshot {
        person_detected: true,
        helmet_detected: !violation,
        confidence: POLLED_CONFIDENCE,
        workers: 0,
        feed: if violation {
            FeedStatus::Danger
        } else {
            FeedStatus::Safe
        },
    }
}

struct Running {
    stop_tx: Sender<()>,
    worker: JoinHandle<()>,
}

/// Mirrors the alert backend into the status board on a fixed interval,
/// independently of any detection loop.
pub struct StatusPoller {
    sink: Arc<dyn AlertSink>,
    board: Arc<StatusBoard>,
    interval: Duration,
    polls: Arc<AtomicUsize>,
    running: Mutex<Option<Running>>,
}

impl StatusPoller {
    pub fn new(sink: Arc<dyn AlertSink>, board: Arc<StatusBoard>, interval: Duration) -> Self {
        Self {
            sink,
            board,
            interval,
            polls: Arc::new(AtomicUsize::new(0)),
            running: Mutex::new(None),
        }
    }

    /// Fetches once and publishes the result. An empty alert list leaves the
    /// previous status in place.
    pub fn poll_once(&self) -> Result<Option<StatusSnapshot>, SinkError> {
        poll(self.sink.as_ref(), &self.board)
    }

    /// Starts polling on a background thread; a no-op when already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let sink = Arc::clone(&self.sink);
        let board = Arc::clone(&self.board);
        let polls = Arc::clone(&self.polls);
        let ticker = crossbeam_channel::tick(self.interval);

        let worker = thread::Builder::new()
            .name("status-poller".into())
            .spawn(move || loop {
                match poll(sink.as_ref(), &board) {
                    Ok(_) => {}
                    Err(e) => log::warn!("Status poll failed: {e}"),
                }
                polls.fetch_add(1, Ordering::SeqCst);
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {}
                }
            })?;
        *running = Some(Running { stop_tx, worker });
        log::debug!("Status poller started ({:?} interval)", self.interval);
        Ok(())
    }

    /// Stops the background thread. Safe to call repeatedly.
    pub fn stop(&self) {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Running { stop_tx, worker }) = taken {
            let _ = stop_tx.try_send(());
            drop(stop_tx);
            if worker.join().is_err() {
                log::error!("Status poller thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Poll attempts made by the background thread, successful or not.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll(sink: &dyn AlertSink, board: &StatusBoard) -> Result<Option<StatusSnapshot>, SinkError> {
    let alerts = sink.fetch_recent()?;
    let Some(latest) = alerts.last() else {
        return Ok(None);
    };
    let status = status_from_alert(latest);
    board.publish_poll(status.clone());
    Ok(Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::domain::detection_event::DetectionEvent;
    use rstest::rstest;
    use std::time::Instant;

    /// Serves a fixed alert list, or fails every fetch.
    struct ScriptedSink {
        alerts: Mutex<Result<Vec<Alert>, String>>,
    }

    impl ScriptedSink {
        fn with(kinds: &[&str]) -> Self {
            Self {
                alerts: Mutex::new(Ok(kinds.iter().map(|k| alert(k)).collect())),
            }
        }

        fn fail(&self) {
            *self.alerts.lock().unwrap() = Err("backend down".into());
        }
    }

    impl AlertSink for ScriptedSink {
        fn emit(&self, _event: &DetectionEvent) -> Result<(), SinkError> {
            Ok(())
        }

        fn fetch_recent(&self) -> Result<Vec<Alert>, SinkError> {
            self.alerts
                .lock()
                .unwrap()
                .clone()
                .map_err(SinkError::Unavailable)
        }
    }

    fn alert(kind: &str) -> Alert {
        Alert {
            kind: kind.to_string(),
            zone: None,
            confidence: None,
            severity: None,
        }
    }

    fn poller(sink: Arc<ScriptedSink>) -> (StatusPoller, Arc<StatusBoard>) {
        let board = Arc::new(StatusBoard::new());
        (
            StatusPoller::new(sink, board.clone(), Duration::from_millis(10)),
            board,
        )
    }

    #[rstest]
    #[case("no_helmet", false)]
    #[case("NO_HELMET", false)]
    #[case("Helmet Missing", false)]
    #[case("helmet_missing", false)]
    #[case("fire", true)]
    #[case("vest_missing", true)]
    fn test_status_from_alert(#[case] kind: &str, #[case] helmet: bool) {
        let status = status_from_alert(&alert(kind));
        assert!(status.person_detected);
        assert_eq!(status.helmet_detected, helmet);
        assert_eq!(status.confidence, POLLED_CONFIDENCE);
    }

    #[test]
    fn test_poll_uses_latest_alert() {
        let (poller, board) = poller(Arc::new(ScriptedSink::with(&["no_helmet", "fire"])));
        let status = poller.poll_once().unwrap().unwrap();
        assert!(status.helmet_detected);
        assert_eq!(board.poll(), Some(status));
    }

    #[test]
    fn test_empty_list_keeps_previous_status() {
        let (poller, board) = poller(Arc::new(ScriptedSink::with(&[])));
        board.publish_poll(status_from_alert(&alert("no_helmet")));

        assert_eq!(poller.poll_once().unwrap(), None);
        assert!(board.current().is_violation());
    }

    #[test]
    fn test_failed_fetch_keeps_previous_status() {
        let sink = Arc::new(ScriptedSink::with(&["no_helmet"]));
        let (poller, board) = poller(sink.clone());
        poller.poll_once().unwrap();

        sink.fail();
        assert!(poller.poll_once().is_err());
        assert!(board.current().is_violation());
    }

    #[test]
    fn test_background_polling_and_idempotent_stop() {
        let (poller, board) = poller(Arc::new(ScriptedSink::with(&["no_helmet"])));
        poller.start().unwrap();
        poller.start().unwrap();
        assert!(poller.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while poller.polls() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        poller.stop();
        poller.stop();

        assert!(poller.polls() >= 3);
        assert!(!poller.is_running());
        assert!(board.current().is_violation());
    }

    #[test]
    fn test_background_polling_survives_failures() {
        let sink = Arc::new(ScriptedSink::with(&[]));
        sink.fail();
        let (poller, _) = poller(sink);
        poller.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while poller.polls() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(poller.polls() >= 2);
        poller.stop();
    }
}
