use std::sync::Arc;
use std::time::Instant;

use crate::alerting::domain::alert_debouncer::AlertDebouncer;
use crate::alerting::domain::alert_sink::AlertSink;
use crate::alerting::domain::detection_event::{DetectionEvent, Severity};
use crate::classification::domain::head_region_classifier::{
    HeadRegionClassifier, HeadRegionParams,
};
use crate::classification::domain::ppe_classifier::{ClassificationResult, PpeClassifier};
use crate::detection::domain::object_detector::ObjectDetector;
use crate::pipeline::alert_dispatcher::AlertDispatcher;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::status_board::{StatusBoard, StatusSnapshot};
use crate::shared::clock::Clock;
use crate::shared::config::MonitorConfig;
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, FrameSourceError};
use crate::video::domain::snapshot_writer::SnapshotWriter;

/// How emitted events describe their origin.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLabels {
    pub zone: String,
    pub worker: String,
    pub stream_key: String,
    pub severity: Severity,
}

impl From<&MonitorConfig> for EventLabels {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            zone: config.zone.clone(),
            worker: config.worker.clone(),
            stream_key: config.stream_key.clone(),
            severity: config.severity,
        }
    }
}

/// Everything a cycle needs besides the detector, shared across restarts.
#[derive(Clone)]
pub struct CycleContext {
    pub classifier: PpeClassifier,
    pub labels: EventLabels,
    pub sink: Arc<dyn AlertSink>,
    pub board: Arc<StatusBoard>,
    pub clock: Arc<dyn Clock>,
    pub snapshots: Option<Arc<dyn SnapshotWriter>>,
}

impl CycleContext {
    pub fn from_config(
        config: &MonitorConfig,
        sink: Arc<dyn AlertSink>,
        board: Arc<StatusBoard>,
        clock: Arc<dyn Clock>,
        snapshots: Option<Arc<dyn SnapshotWriter>>,
    ) -> Self {
        Self {
            classifier: PpeClassifier::new(HeadRegionClassifier::new(HeadRegionParams::from(
                config,
            ))),
            labels: EventLabels::from(config),
            sink,
            board,
            clock,
            snapshots,
        }
    }
}

/// What one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub result: ClassificationResult,
    /// The event queued for the sink, when the violation passed the debouncer.
    pub event: Option<DetectionEvent>,
    /// Why the cycle produced no verdict, if it didn't.
    pub failure: Option<String>,
}

impl CycleReport {
    fn failed(reason: String) -> Self {
        Self {
            result: ClassificationResult::empty(),
            event: None,
            failure: Some(reason),
        }
    }
}

/// One capture → detect → classify → publish → alert pass.
///
/// Clock-driven so it can be exercised without a loop; the detection loop
/// calls `run` once per tick. Alerts leave through the dispatcher, so a slow
/// sink never holds up the next cycle.
pub struct DetectionCycle {
    detector: Box<dyn ObjectDetector>,
    debouncer: AlertDebouncer,
    alerts: AlertDispatcher,
    ctx: CycleContext,
}

impl DetectionCycle {
    pub fn new(
        detector: Box<dyn ObjectDetector>,
        debouncer: AlertDebouncer,
        alerts: AlertDispatcher,
        ctx: CycleContext,
    ) -> Self {
        Self {
            detector,
            debouncer,
            alerts,
            ctx,
        }
    }

    /// Waits for queued alerts to be delivered and hands the debouncer back
    /// so alert history outlives this run.
    pub fn finish(self) -> AlertDebouncer {
        self.alerts.shutdown();
        self.debouncer
    }

    /// Runs one cycle. Only a lost frame source is an error; every other
    /// failure is reported in the returned `CycleReport`.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        logger: &mut dyn PipelineLogger,
    ) -> Result<CycleReport, FrameSourceError> {
        let t0 = Instant::now();
        let frame = match source.current_frame() {
            Ok(frame) => frame,
            Err(FrameSourceError::Unavailable(reason)) => {
                log::warn!("No frame from {}: {reason}", source.describe());
                self.ctx.board.publish_push(StatusSnapshot::cycle_failed());
                return Ok(CycleReport::failed(reason));
            }
            Err(e) => return Err(e),
        };
        logger.timing("capture", elapsed_ms(t0));

        let t0 = Instant::now();
        let detections = match self.detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Detection failed on frame {}: {e}", frame.index());
                self.ctx.board.publish_push(StatusSnapshot::cycle_failed());
                return Ok(CycleReport::failed(e.to_string()));
            }
        };
        logger.timing("detect", elapsed_ms(t0));

        let t0 = Instant::now();
        let result = self.ctx.classifier.classify(&frame, detections);
        logger.timing("classify", elapsed_ms(t0));
        logger.metric("persons", result.person_count as f64);
        if let Some(ratio) = result.head_color_ratio {
            logger.metric("head_color_ratio", ratio);
        }

        self.ctx.board.publish_push(StatusSnapshot::from_result(&result));

        let event = self.alert_if_due(&frame, &result);
        logger.metric("alerts", if event.is_some() { 1.0 } else { 0.0 });

        Ok(CycleReport {
            result,
            event,
            failure: None,
        })
    }

    fn alert_if_due(&mut self, frame: &Frame, result: &ClassificationResult) -> Option<DetectionEvent> {
        if !result.is_violation() {
            return None;
        }
        let labels = &self.ctx.labels;
        if !self
            .debouncer
            .should_fire(&labels.stream_key, self.ctx.clock.monotonic_ms())
        {
            log::debug!("Helmet violation on {} suppressed by debounce", labels.stream_key);
            return None;
        }

        let now = self.ctx.clock.now();
        let event = DetectionEvent::helmet_missing(
            &labels.zone,
            &labels.worker,
            &labels.stream_key,
            labels.severity,
            result.confidence,
            now,
        );
        self.alerts.dispatch(event.clone());

        if let Some(ref writer) = self.ctx.snapshots {
            let name = format!(
                "{}-{}",
                sanitize(&labels.stream_key),
                now.timestamp_millis()
            );
            match writer.write(&name, frame, &result.detections) {
                Ok(path) => log::info!("Violation snapshot saved to {}", path.display()),
                Err(e) => log::warn!("Failed to save violation snapshot: {e}"),
            }
        }
        Some(event)
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
