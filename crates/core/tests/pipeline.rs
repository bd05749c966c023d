use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hardhat_core::alerting::domain::alert_sink::{Alert, AlertSink, SinkError};
use hardhat_core::alerting::domain::detection_event::DetectionEvent;
use hardhat_core::alerting::infrastructure::in_memory_alert_sink::InMemoryAlertSink;
use hardhat_core::detection::domain::detection::Detection;
use hardhat_core::detection::domain::model_manager::{ModelLoadError, ModelManager};
use hardhat_core::detection::domain::object_detector::{
    DetectionError, DetectorFactory, ObjectDetector,
};
use hardhat_core::pipeline::detection_cycle::CycleContext;
use hardhat_core::pipeline::detection_loop::{DetectionLoop, LoopSettings, LoopState};
use hardhat_core::pipeline::pipeline_logger::NullPipelineLogger;
use hardhat_core::pipeline::status_board::{FeedStatus, StatusBoard};
use hardhat_core::pipeline::status_poller::StatusPoller;
use hardhat_core::shared::bbox::BoundingBox;
use hardhat_core::shared::clock::SystemClock;
use hardhat_core::shared::config::MonitorConfig;
use hardhat_core::shared::frame::Frame;
use hardhat_core::video::domain::snapshot_writer::SnapshotWriter;
use hardhat_core::video::infrastructure::annotated_snapshot_writer::AnnotatedSnapshotWriter;
use hardhat_core::video::infrastructure::image_file_source::ImageFileSource;

const WAIT: Duration = Duration::from_secs(5);

/// Stands in for the YOLO model: one person at a fixed spot.
struct FixedPersonModel {
    person: BoundingBox,
}

struct FixedPersonDetector(Arc<FixedPersonModel>);

impl ObjectDetector for FixedPersonDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if frame.is_unreadable() {
            return Err(DetectionError::empty_frame(frame));
        }
        Ok(vec![Detection::new("person", 0.88, self.0.person)])
    }
}

struct SharedModelFactory(Arc<ModelManager<FixedPersonModel>>);

impl DetectorFactory for SharedModelFactory {
    fn create(&self) -> Result<Box<dyn ObjectDetector>, ModelLoadError> {
        Ok(Box::new(FixedPersonDetector(self.0.ensure_loaded()?)))
    }
}

/// 200x200 scene with a person whose head region (115..145, 20..70) is
/// painted `head`.
fn write_scene(dir: &Path, head: [u8; 3]) {
    let mut img = image::RgbImage::from_pixel(200, 200, image::Rgb([70, 90, 110]));
    for y in 20..70 {
        for x in 115..145 {
            img.put_pixel(x, y, image::Rgb(head));
        }
    }
    img.save(dir.join("frame.png")).unwrap();
}

struct Setup {
    detection_loop: DetectionLoop,
    manager: Arc<ModelManager<FixedPersonModel>>,
    sink: Arc<InMemoryAlertSink>,
    board: Arc<StatusBoard>,
}

fn setup(snapshots: Option<Arc<dyn SnapshotWriter>>) -> Setup {
    let manager = Arc::new(ModelManager::new(|| {
        Ok(FixedPersonModel {
            person: BoundingBox::new(100.0, 20.0, 60.0, 200.0),
        })
    }));
    let sink = Arc::new(InMemoryAlertSink::new());
    let board = Arc::new(StatusBoard::new());
    let config = MonitorConfig {
        detection_interval_ms: 20,
        stream_key: "gate-2".into(),
        zone: "Loading Dock".into(),
        ..MonitorConfig::default()
    };
    let ctx = CycleContext::from_config(
        &config,
        sink.clone(),
        board.clone(),
        Arc::new(SystemClock),
        snapshots,
    );
    let detection_loop = DetectionLoop::new(
        Arc::new(SharedModelFactory(manager.clone())),
        ctx,
        LoopSettings::from(&config),
        Box::new(NullPipelineLogger),
    );
    Setup {
        detection_loop,
        manager,
        sink,
        board,
    }
}

#[test]
fn bare_head_raises_one_debounced_alert() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), [150, 110, 90]);
    let snaps = dir.path().join("snaps");
    let writer: Arc<dyn SnapshotWriter> = Arc::new(AnnotatedSnapshotWriter::new(&snaps));
    let s = setup(Some(writer));

    let source = ImageFileSource::open(&dir.path().join("frame.png")).unwrap();
    let stop = s.detection_loop.start(Box::new(source)).unwrap();
    assert!(s.detection_loop.wait_for_cycles(5, WAIT));

    let status = s.board.current();
    assert_eq!(status.feed, FeedStatus::Danger);
    assert_eq!(status.workers, 1);

    stop.stop();
    stop.stop();
    assert_eq!(s.detection_loop.state(), LoopState::Idle);
    assert!(s.board.push().is_none());

    let events = s.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "Helmet Missing");
    assert_eq!(events[0].zone, "Loading Dock");
    assert_eq!(events[0].stream, "gate-2");
    assert_eq!(std::fs::read_dir(&snaps).unwrap().count(), 1);
}

#[test]
fn yellow_helmet_raises_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), [255, 215, 0]);
    let s = setup(None);

    let source = ImageFileSource::open(dir.path()).unwrap();
    s.detection_loop.start(Box::new(source)).unwrap();
    assert!(s.detection_loop.wait_for_cycles(3, WAIT));

    assert_eq!(s.board.current().feed, FeedStatus::Safe);
    s.detection_loop.stop();
    assert!(s.sink.is_empty());
}

#[test]
fn restarts_reuse_the_loaded_model() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), [150, 110, 90]);
    let s = setup(None);

    for _ in 0..3 {
        let source = ImageFileSource::open(dir.path()).unwrap();
        s.detection_loop.start(Box::new(source)).unwrap();
        assert!(s.detection_loop.wait_for_cycles(1, WAIT));
        s.detection_loop.stop();
    }

    assert_eq!(s.manager.load_count(), 1);
    // Alert history survives restarts, so the 5s debounce still holds
    assert_eq!(s.sink.len(), 1);
}

#[test]
fn poller_mirrors_emitted_alerts_once_loop_stops() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), [150, 110, 90]);
    let s = setup(None);

    let source = ImageFileSource::open(dir.path()).unwrap();
    s.detection_loop.start(Box::new(source)).unwrap();
    assert!(s.detection_loop.wait_for_cycles(1, WAIT));
    s.detection_loop.stop();
    assert!(!s.board.current().is_violation());

    let poller = StatusPoller::new(s.sink.clone(), s.board.clone(), Duration::from_millis(10));
    let status = poller.poll_once().unwrap().unwrap();

    assert!(status.is_violation());
    assert!(s.board.current().is_violation());
}

#[test]
fn missing_model_leaves_loop_in_error() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), [150, 110, 90]);
    let manager: Arc<ModelManager<FixedPersonModel>> = Arc::new(ModelManager::new(|| {
        Err(ModelLoadError::NotFound("yolo11n.onnx".into()))
    }));
    let board = Arc::new(StatusBoard::new());
    let ctx = CycleContext::from_config(
        &MonitorConfig::default(),
        Arc::new(InMemoryAlertSink::new()),
        board,
        Arc::new(SystemClock),
        None,
    );
    let detection_loop = DetectionLoop::new(
        Arc::new(SharedModelFactory(manager)),
        ctx,
        LoopSettings::from(&MonitorConfig::default()),
        Box::new(NullPipelineLogger),
    );

    let source = ImageFileSource::open(dir.path()).unwrap();
    detection_loop.start(Box::new(source)).unwrap();
    assert!(detection_loop.wait_for_state(|s| s == LoopState::Error, WAIT));
    assert!(detection_loop.last_error().is_some());

    detection_loop.stop();
    assert_eq!(detection_loop.state(), LoopState::Idle);
}

/// Alert backend that hangs for a while and then refuses every request.
struct HangingBackend;

impl AlertSink for HangingBackend {
    fn emit(&self, _event: &DetectionEvent) -> Result<(), SinkError> {
        std::thread::sleep(Duration::from_millis(1500));
        Err(SinkError::Unavailable("502 Bad Gateway".into()))
    }

    fn fetch_recent(&self) -> Result<Vec<Alert>, SinkError> {
        Err(SinkError::Unavailable("502 Bad Gateway".into()))
    }
}

#[test]
fn unreachable_backend_does_not_stall_detection() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), [150, 110, 90]);
    let manager = Arc::new(ModelManager::new(|| {
        Ok(FixedPersonModel {
            person: BoundingBox::new(100.0, 20.0, 60.0, 200.0),
        })
    }));
    let board = Arc::new(StatusBoard::new());
    let config = MonitorConfig {
        detection_interval_ms: 20,
        ..MonitorConfig::default()
    };
    let ctx = CycleContext::from_config(
        &config,
        Arc::new(HangingBackend),
        board.clone(),
        Arc::new(SystemClock),
        None,
    );
    let detection_loop = DetectionLoop::new(
        Arc::new(SharedModelFactory(manager)),
        ctx,
        LoopSettings::from(&config),
        Box::new(NullPipelineLogger),
    );

    let source = ImageFileSource::open(dir.path()).unwrap();
    detection_loop.start(Box::new(source)).unwrap();
    assert!(detection_loop.wait_for_cycles(10, Duration::from_millis(1000)));
    assert_eq!(board.current().feed, FeedStatus::Danger);

    detection_loop.stop();
    assert_eq!(detection_loop.state(), LoopState::Idle);
    assert!(detection_loop.last_error().is_none());
}
