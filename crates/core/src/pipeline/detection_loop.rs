use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::alerting::domain::alert_debouncer::AlertDebouncer;
use crate::detection::domain::model_manager::ModelLoadError;
use crate::detection::domain::object_detector::DetectorFactory;
use crate::pipeline::alert_dispatcher::{AlertDispatcher, ALERT_QUEUE_CAPACITY};
use crate::pipeline::detection_cycle::{CycleContext, DetectionCycle};
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::shared::config::MonitorConfig;
use crate::video::domain::frame_source::{FrameSource, FrameSourceError};

/// Lifecycle of a detection loop.
///
/// `Idle → Starting → Running → Stopping → Idle`, with `Starting` or
/// `Running` dropping to `Error` when the model fails to load or the frame
/// source is lost. `Error` leaves through `stop()` or a new `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoopError {
    #[error("detection loop is already {0:?}")]
    AlreadyRunning(LoopState),
    #[error("detector unavailable: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Source(#[from] FrameSourceError),
    #[error("failed to spawn detection worker: {0}")]
    Spawn(String),
    #[error("detection worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub interval: Duration,
    pub alert_debounce_ms: u64,
}

impl From<&MonitorConfig> for LoopSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            interval: config.detection_interval(),
            alert_debounce_ms: config.alert_debounce_ms,
        }
    }
}

struct Status {
    state: LoopState,
    last_error: Option<LoopError>,
    cycles: usize,
    skipped_ticks: usize,
}

/// State observed by callers and updated by the worker.
struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F: FnOnce(&mut Status)>(&self, f: F) {
        f(&mut self.lock());
        self.changed.notify_all();
    }

    fn set(&self, state: LoopState) {
        self.update(|s| s.state = state);
    }

    /// Moves `from → to` only if the loop is still in `from`.
    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        let mut moved = false;
        self.update(|s| {
            if s.state == from {
                s.state = to;
                moved = true;
            }
        });
        moved
    }

    /// Records `err`; enters `Error` unless a stop is already under way.
    fn fail(&self, err: LoopError) {
        self.update(|s| {
            if matches!(s.state, LoopState::Starting | LoopState::Running) {
                s.state = LoopState::Error;
            }
            s.last_error = Some(err);
        });
    }
}

/// Pieces that survive across runs and travel into the worker thread.
struct WorkerParts {
    logger: Box<dyn PipelineLogger>,
    debouncer: AlertDebouncer,
}

struct RunHandle {
    stop_tx: Sender<()>,
    worker: JoinHandle<WorkerParts>,
}

#[derive(Default)]
struct RunSlot {
    handle: Option<RunHandle>,
    parts: Option<WorkerParts>,
}

struct Inner {
    factory: Arc<dyn DetectorFactory>,
    ctx: CycleContext,
    settings: LoopSettings,
    shared: Arc<Shared>,
    run: Mutex<RunSlot>,
}

/// Samples a frame source on a fixed interval, classifies each frame and
/// raises debounced helmet alerts.
///
/// One worker thread per running loop. Cycles never overlap: a tick that
/// comes due while a cycle is still running is skipped and counted.
pub struct DetectionLoop {
    inner: Arc<Inner>,
}

/// Stops the loop it came from. Cloneable; stopping twice is harmless.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<Inner>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl DetectionLoop {
    pub fn new(
        factory: Arc<dyn DetectorFactory>,
        ctx: CycleContext,
        settings: LoopSettings,
        logger: Box<dyn PipelineLogger>,
    ) -> Self {
        let parts = WorkerParts {
            logger,
            debouncer: AlertDebouncer::new(settings.alert_debounce_ms),
        };
        Self {
            inner: Arc::new(Inner {
                factory,
                ctx,
                settings,
                shared: Arc::new(Shared {
                    status: Mutex::new(Status {
                        state: LoopState::Idle,
                        last_error: None,
                        cycles: 0,
                        skipped_ticks: 0,
                    }),
                    changed: Condvar::new(),
                }),
                run: Mutex::new(RunSlot {
                    handle: None,
                    parts: Some(parts),
                }),
            }),
        }
    }

    /// Spawns the worker and returns immediately in `Starting`; the model is
    /// loaded on the worker.
    pub fn start(&self, source: Box<dyn FrameSource>) -> Result<StopHandle, LoopError> {
        self.inner.start(source)?;
        Ok(StopHandle {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Stops the worker, releases the frame source and returns to `Idle`.
    /// Blocks until the worker exits, including an in-flight model load and
    /// delivery of alerts already queued.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn state(&self) -> LoopState {
        self.inner.shared.lock().state
    }

    pub fn last_error(&self) -> Option<LoopError> {
        self.inner.shared.lock().last_error.clone()
    }

    /// Cycles completed since the last `start`.
    pub fn cycles(&self) -> usize {
        self.inner.shared.lock().cycles
    }

    /// Ticks dropped since the last `start` because a cycle overran.
    pub fn skipped_ticks(&self) -> usize {
        self.inner.shared.lock().skipped_ticks
    }

    /// Blocks until `pred` holds for the current state or `timeout` passes.
    /// Returns whether the predicate held.
    pub fn wait_for_state<P>(&self, pred: P, timeout: Duration) -> bool
    where
        P: Fn(LoopState) -> bool,
    {
        let shared = &self.inner.shared;
        let (status, _) = shared
            .changed
            .wait_timeout_while(shared.lock(), timeout, |s| !pred(s.state))
            .unwrap_or_else(PoisonError::into_inner);
        pred(status.state)
    }

    /// Like `wait_for_state`, for a cycle count.
    pub fn wait_for_cycles(&self, cycles: usize, timeout: Duration) -> bool {
        let shared = &self.inner.shared;
        let (status, _) = shared
            .changed
            .wait_timeout_while(shared.lock(), timeout, |s| {
                s.cycles < cycles && !matches!(s.state, LoopState::Error | LoopState::Idle)
            })
            .unwrap_or_else(PoisonError::into_inner);
        status.cycles >= cycles
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl Inner {
    fn lock_run(&self) -> MutexGuard<'_, RunSlot> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, source: Box<dyn FrameSource>) -> Result<(), LoopError> {
        let mut slot = self.lock_run();
        let state = self.shared.lock().state;
        if matches!(
            state,
            LoopState::Starting | LoopState::Running | LoopState::Stopping
        ) {
            return Err(LoopError::AlreadyRunning(state));
        }

        // A run that ended in Error still has a finished worker to reap.
        if let Some(handle) = slot.handle.take() {
            slot.parts = Some(self.join(handle));
        }
        let parts = slot.parts.take().unwrap_or_else(|| self.fresh_parts());

        self.shared.update(|s| {
            s.state = LoopState::Starting;
            s.last_error = None;
            s.cycles = 0;
            s.skipped_ticks = 0;
        });
        log::info!("Starting detection loop on {}", source.describe());

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
            ctx: self.ctx.clone(),
            interval: self.settings.interval,
        };
        let spawned = thread::Builder::new()
            .name("detection-loop".into())
            .spawn(move || worker.run(source, parts, stop_rx));
        match spawned {
            Ok(handle) => {
                slot.handle = Some(RunHandle {
                    stop_tx,
                    worker: handle,
                });
                Ok(())
            }
            Err(e) => {
                let err = LoopError::Spawn(e.to_string());
                self.shared.update(|s| {
                    s.state = LoopState::Idle;
                    s.last_error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    fn stop(&self) {
        let mut slot = self.lock_run();
        let Some(handle) = slot.handle.take() else {
            self.shared.set(LoopState::Idle);
            return;
        };

        self.shared.update(|s| {
            if matches!(s.state, LoopState::Starting | LoopState::Running) {
                s.state = LoopState::Stopping;
            }
        });
        let _ = handle.stop_tx.try_send(());
        slot.parts = Some(self.join(handle));

        self.ctx.board.clear_push();
        self.shared.set(LoopState::Idle);
        log::info!("Detection loop stopped");
    }

    fn join(&self, handle: RunHandle) -> WorkerParts {
        drop(handle.stop_tx);
        match handle.worker.join() {
            Ok(parts) => parts,
            Err(_) => {
                log::error!("Detection worker panicked; alert history was reset");
                self.fresh_parts()
            }
        }
    }

    fn fresh_parts(&self) -> WorkerParts {
        WorkerParts {
            logger: Box::new(NullPipelineLogger),
            debouncer: AlertDebouncer::new(self.settings.alert_debounce_ms),
        }
    }
}

/// Everything the worker thread owns for one run.
struct Worker {
    shared: Arc<Shared>,
    factory: Arc<dyn DetectorFactory>,
    ctx: CycleContext,
    interval: Duration,
}

/// Flags the loop as failed if the worker unwinds.
struct PanicGuard<'a>(&'a Shared);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail(LoopError::WorkerPanicked);
        }
    }
}

impl Worker {
    fn run(
        self,
        mut source: Box<dyn FrameSource>,
        parts: WorkerParts,
        stop_rx: Receiver<()>,
    ) -> WorkerParts {
        let _guard = PanicGuard(&self.shared);
        let WorkerParts {
            mut logger,
            debouncer,
        } = parts;

        let detector = match self.factory.create() {
            Ok(detector) => detector,
            Err(e) => {
                log::error!("Detection loop failed to start: {e}");
                self.shared.fail(e.into());
                release(source.as_mut());
                return WorkerParts { logger, debouncer };
            }
        };
        let alerts = match AlertDispatcher::spawn(Arc::clone(&self.ctx.sink), ALERT_QUEUE_CAPACITY) {
            Ok(alerts) => alerts,
            Err(e) => {
                log::error!("Failed to start alert sender: {e}");
                self.shared.fail(LoopError::Spawn(e.to_string()));
                release(source.as_mut());
                return WorkerParts { logger, debouncer };
            }
        };
        let mut cycle = DetectionCycle::new(detector, debouncer, alerts, self.ctx.clone());
        if !self
            .shared
            .transition(LoopState::Starting, LoopState::Running)
        {
            // Stopped while the model was loading
            release(source.as_mut());
            return WorkerParts {
                logger,
                debouncer: cycle.finish(),
            };
        }
        log::info!("Detection loop running every {:?}", self.interval);

        let ticker = crossbeam_channel::tick(self.interval);
        let mut pending = Some(Instant::now());
        let mut last_end: Option<Instant> = None;
        let mut completed = 0usize;

        loop {
            let scheduled = match pending.take() {
                Some(at) => at,
                None => crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> tick => match tick {
                        Ok(at) => at,
                        Err(_) => break,
                    },
                },
            };
            if last_end.is_some_and(|end| scheduled < end) {
                logger.metric("skipped_ticks", 1.0);
                self.shared.update(|s| s.skipped_ticks += 1);
                continue;
            }

            if let Err(e) = cycle.run(source.as_mut(), logger.as_mut()) {
                log::error!("Frame source {} lost: {e}", source.describe());
                self.shared.fail(e.into());
                break;
            }
            completed += 1;
            logger.cycle(completed);
            self.shared.update(|s| s.cycles = completed);
            last_end = Some(Instant::now());
        }

        release(source.as_mut());
        self.ctx.board.clear_push();
        logger.summary();
        WorkerParts {
            logger,
            debouncer: cycle.finish(),
        }
    }
}

fn release(source: &mut dyn FrameSource) {
    if let Err(e) = source.release() {
        log::warn!("Failed to release {}: {e}", source.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::domain::alert_sink::{Alert, AlertSink, SinkError};
    use crate::alerting::domain::detection_event::DetectionEvent;
    use crate::alerting::infrastructure::in_memory_alert_sink::InMemoryAlertSink;
    use crate::detection::domain::detection::Detection;
    use crate::detection::domain::object_detector::{DetectionError, ObjectDetector};
    use crate::pipeline::status_board::StatusBoard;
    use crate::shared::bbox::BoundingBox;
    use crate::shared::clock::SystemClock;
    use crate::shared::frame::Frame;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    struct SleepyDetector(Duration);

    impl ObjectDetector for SleepyDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
            thread::sleep(self.0);
            Ok(vec![Detection::new(
                "person",
                0.8,
                BoundingBox::new(0.0, 0.0, 20.0, 40.0),
            )])
        }
    }

    struct StubFactory {
        load_delay: Duration,
        detect_delay: Duration,
        fail: bool,
    }

    impl StubFactory {
        fn ok() -> Self {
            Self {
                load_delay: Duration::ZERO,
                detect_delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    impl DetectorFactory for StubFactory {
        fn create(&self) -> Result<Box<dyn ObjectDetector>, ModelLoadError> {
            thread::sleep(self.load_delay);
            if self.fail {
                return Err(ModelLoadError::NotFound("yolo11n.onnx".into()));
            }
            Ok(Box::new(SleepyDetector(self.detect_delay)))
        }
    }

    /// Counts captures and releases; disconnects after `fail_after` frames.
    #[derive(Clone, Default)]
    struct SourceTracker {
        captures: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    struct TrackedSource {
        tracker: SourceTracker,
        fail_after: Option<usize>,
    }

    impl FrameSource for TrackedSource {
        fn current_frame(&mut self) -> Result<Frame, FrameSourceError> {
            let n = self.tracker.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(FrameSourceError::Disconnected("cable pulled".into()));
            }
            Ok(Frame::filled(64, 64, [90, 60, 40], n))
        }

        fn release(&mut self) -> Result<(), FrameSourceError> {
            self.tracker.released.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "tracked".into()
        }
    }

    fn source(tracker: &SourceTracker, fail_after: Option<usize>) -> Box<dyn FrameSource> {
        Box::new(TrackedSource {
            tracker: tracker.clone(),
            fail_after,
        })
    }

    fn detection_loop(factory: StubFactory, interval_ms: u64) -> (DetectionLoop, Arc<StatusBoard>) {
        detection_loop_with(factory, interval_ms, Arc::new(InMemoryAlertSink::new()), 5000)
    }

    fn detection_loop_with(
        factory: StubFactory,
        interval_ms: u64,
        sink: Arc<dyn AlertSink>,
        alert_debounce_ms: u64,
    ) -> (DetectionLoop, Arc<StatusBoard>) {
        let board = Arc::new(StatusBoard::new());
        let ctx = CycleContext::from_config(
            &MonitorConfig::default(),
            sink,
            board.clone(),
            Arc::new(SystemClock),
            None,
        );
        let settings = LoopSettings {
            interval: Duration::from_millis(interval_ms),
            alert_debounce_ms,
        };
        (
            DetectionLoop::new(Arc::new(factory), ctx, settings, Box::new(NullPipelineLogger)),
            board,
        )
    }

    #[test]
    fn test_start_runs_cycles_and_stop_returns_to_idle() {
        let (dl, board) = detection_loop(StubFactory::ok(), 10);
        let tracker = SourceTracker::default();
        assert_eq!(dl.state(), LoopState::Idle);

        let handle = dl.start(source(&tracker, None)).unwrap();
        assert!(dl.wait_for_cycles(3, WAIT));
        assert_eq!(dl.state(), LoopState::Running);
        assert!(board.push().is_some());

        handle.stop();
        assert_eq!(dl.state(), LoopState::Idle);
        assert!(tracker.released.load(Ordering::SeqCst));
        assert!(board.push().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (dl, _) = detection_loop(StubFactory::ok(), 10);
        dl.stop();
        let handle = dl.start(source(&SourceTracker::default(), None)).unwrap();
        assert!(dl.wait_for_state(|s| s == LoopState::Running, WAIT));

        handle.stop();
        handle.stop();
        dl.stop();
        assert_eq!(dl.state(), LoopState::Idle);
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let (dl, _) = detection_loop(StubFactory::ok(), 10);
        dl.start(source(&SourceTracker::default(), None)).unwrap();
        assert!(dl.wait_for_state(|s| s == LoopState::Running, WAIT));

        let second = dl.start(source(&SourceTracker::default(), None));
        assert!(matches!(
            second,
            Err(LoopError::AlreadyRunning(LoopState::Running))
        ));
        dl.stop();
    }

    #[test]
    fn test_start_is_observable_as_starting() {
        let factory = StubFactory {
            load_delay: Duration::from_millis(200),
            ..StubFactory::ok()
        };
        let (dl, _) = detection_loop(factory, 10);
        dl.start(source(&SourceTracker::default(), None)).unwrap();
        assert_eq!(dl.state(), LoopState::Starting);
        assert!(matches!(
            dl.start(source(&SourceTracker::default(), None)),
            Err(LoopError::AlreadyRunning(LoopState::Starting))
        ));
        assert!(dl.wait_for_state(|s| s == LoopState::Running, WAIT));
        dl.stop();
    }

    #[test]
    fn test_stop_during_starting_ends_idle_without_cycles() {
        let factory = StubFactory {
            load_delay: Duration::from_millis(100),
            ..StubFactory::ok()
        };
        let (dl, _) = detection_loop(factory, 10);
        let tracker = SourceTracker::default();
        dl.start(source(&tracker, None)).unwrap();

        dl.stop();

        assert_eq!(dl.state(), LoopState::Idle);
        assert_eq!(tracker.captures.load(Ordering::SeqCst), 0);
        assert!(tracker.released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_model_failure_enters_error() {
        let factory = StubFactory {
            fail: true,
            ..StubFactory::ok()
        };
        let (dl, _) = detection_loop(factory, 10);
        let tracker = SourceTracker::default();
        dl.start(source(&tracker, None)).unwrap();

        assert!(dl.wait_for_state(|s| s == LoopState::Error, WAIT));
        assert!(matches!(
            dl.last_error(),
            Some(LoopError::ModelLoad(ModelLoadError::NotFound(_)))
        ));
        assert!(tracker.released.load(Ordering::SeqCst));

        dl.stop();
        assert_eq!(dl.state(), LoopState::Idle);
        assert!(dl.last_error().is_some());
    }

    #[test]
    fn test_lost_source_enters_error_and_restart_recovers() {
        let (dl, _) = detection_loop(StubFactory::ok(), 10);
        dl.start(source(&SourceTracker::default(), Some(2))).unwrap();

        assert!(dl.wait_for_state(|s| s == LoopState::Error, WAIT));
        assert!(matches!(
            dl.last_error(),
            Some(LoopError::Source(FrameSourceError::Disconnected(_)))
        ));
        assert_eq!(dl.cycles(), 2);

        dl.start(source(&SourceTracker::default(), None)).unwrap();
        assert!(dl.wait_for_cycles(1, WAIT));
        assert!(dl.last_error().is_none());
        dl.stop();
    }

    #[test]
    fn test_overrunning_cycles_skip_ticks() {
        let factory = StubFactory {
            detect_delay: Duration::from_millis(60),
            ..StubFactory::ok()
        };
        let (dl, _) = detection_loop(factory, 20);
        dl.start(source(&SourceTracker::default(), None)).unwrap();

        assert!(dl.wait_for_cycles(3, WAIT));
        dl.stop();
        assert!(dl.skipped_ticks() > 0);
    }

    #[test]
    fn test_drop_stops_worker() {
        let tracker = SourceTracker::default();
        {
            let (dl, _) = detection_loop(StubFactory::ok(), 10);
            dl.start(source(&tracker, None)).unwrap();
            assert!(dl.wait_for_cycles(1, WAIT));
        }
        assert!(tracker.released.load(Ordering::SeqCst));
    }

    /// Backend that times out on every send.
    #[derive(Default)]
    struct TimingOutSink {
        attempts: AtomicUsize,
    }

    impl AlertSink for TimingOutSink {
        fn emit(&self, _event: &DetectionEvent) -> Result<(), SinkError> {
            thread::sleep(Duration::from_millis(100));
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Unavailable("request timed out".into()))
        }

        fn fetch_recent(&self) -> Result<Vec<Alert>, SinkError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_failing_sink_keeps_cycles_on_schedule() {
        let sink = Arc::new(TimingOutSink::default());
        let (dl, board) = detection_loop_with(StubFactory::ok(), 10, sink.clone(), 0);
        dl.start(source(&SourceTracker::default(), None)).unwrap();

        // Every cycle alerts; delivered inline that would take 2s.
        assert!(dl.wait_for_cycles(20, Duration::from_millis(1500)));
        assert_eq!(dl.state(), LoopState::Running);
        assert!(board.current().is_violation());

        dl.stop();
        assert_eq!(dl.state(), LoopState::Idle);
        assert!(dl.last_error().is_none());
        assert!(sink.attempts.load(Ordering::SeqCst) >= 1);
    }
}
