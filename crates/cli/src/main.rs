use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use hardhat_core::alerting::domain::alert_debouncer::AlertDebouncer;
use hardhat_core::alerting::domain::alert_sink::AlertSink;
use hardhat_core::alerting::domain::detection_event::Severity;
use hardhat_core::alerting::infrastructure::http_alert_sink::HttpAlertSink;
use hardhat_core::alerting::infrastructure::in_memory_alert_sink::InMemoryAlertSink;
use hardhat_core::detection::domain::object_detector::DetectorFactory;
use hardhat_core::detection::infrastructure::onnx_yolo_detector::{
    onnx_model_manager, OnnxDetectorFactory,
};
use hardhat_core::pipeline::alert_dispatcher::{AlertDispatcher, ALERT_QUEUE_CAPACITY};
use hardhat_core::pipeline::detection_cycle::{CycleContext, DetectionCycle};
use hardhat_core::pipeline::detection_loop::{DetectionLoop, LoopSettings, LoopState};
use hardhat_core::pipeline::pipeline_logger::StatsPipelineLogger;
use hardhat_core::pipeline::status_board::{StatusBoard, StatusSnapshot};
use hardhat_core::pipeline::status_poller::StatusPoller;
use hardhat_core::shared::clock::SystemClock;
use hardhat_core::shared::config::MonitorConfig;
use hardhat_core::shared::constants::YOLO_MODEL_NAME;
use hardhat_core::video::domain::frame_source::FrameSource;
use hardhat_core::video::domain::snapshot_writer::SnapshotWriter;
use hardhat_core::video::infrastructure::annotated_snapshot_writer::AnnotatedSnapshotWriter;
use hardhat_core::video::infrastructure::http_snapshot_source::HttpSnapshotSource;
use hardhat_core::video::infrastructure::image_file_source::ImageFileSource;

/// Live helmet detection over camera snapshots or image folders.
#[derive(Parser)]
#[command(name = "hardhat")]
struct Cli {
    /// Frame source: an image, a directory of images, or an http(s) snapshot URL.
    source: Option<String>,

    /// JSON config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// YOLO model file name or path.
    #[arg(long, default_value = YOLO_MODEL_NAME)]
    model: String,

    /// URL to download the model from when it isn't cached.
    #[arg(long)]
    model_url: Option<String>,

    /// Person detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Milliseconds between detection cycles.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Minimum milliseconds between alerts for one stream.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Milliseconds between alert backend polls.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Helmet-color pixel ratio above which a helmet is assumed (0.0-1.0).
    #[arg(long)]
    threshold: Option<f64>,

    /// Zone name reported in alerts.
    #[arg(long)]
    zone: Option<String>,

    /// Worker name reported in alerts.
    #[arg(long)]
    worker: Option<String>,

    /// Stream key used for debouncing and snapshot names.
    #[arg(long)]
    stream: Option<String>,

    /// Alert severity: low, medium, high or critical.
    #[arg(long)]
    severity: Option<Severity>,

    /// Alert backend base URL; alerts are only logged when omitted.
    #[arg(long)]
    sink_url: Option<String>,

    /// Save an annotated PNG here for every alert.
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Run a single detection cycle and print the result as JSON.
    #[arg(long, conflicts_with = "poll_only")]
    once: bool,

    /// Only mirror the alert backend's status; no local detection.
    #[arg(long)]
    poll_only: bool,

    /// Stop after this many seconds (runs until the source fails otherwise).
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let sink = build_sink(cli.sink_url.as_deref())?;
    let board = Arc::new(StatusBoard::new());
    let deadline = cli
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    if cli.poll_only {
        if cli.sink_url.is_none() {
            return Err("--poll-only needs --sink-url".into());
        }
        return run_poll_only(sink, board, &config, deadline);
    }

    let input = cli
        .source
        .as_deref()
        .ok_or("A frame source is required unless --poll-only is used")?;
    let source = open_source(input)?;

    log::info!("Using model: {}", cli.model);
    let manager = Arc::new(onnx_model_manager(
        cli.model.clone(),
        config.model_url.clone(),
    ));
    let factory: Arc<dyn DetectorFactory> =
        Arc::new(OnnxDetectorFactory::new(manager, config.confidence));
    let snapshots = config.snapshot_dir.as_ref().map(|dir| {
        Arc::new(AnnotatedSnapshotWriter::new(dir.clone())) as Arc<dyn SnapshotWriter>
    });
    let ctx = CycleContext::from_config(
        &config,
        Arc::clone(&sink),
        Arc::clone(&board),
        Arc::new(SystemClock),
        snapshots,
    );

    if cli.once {
        run_once(factory.as_ref(), ctx, &config, source)
    } else {
        let poller = cli
            .sink_url
            .is_some()
            .then(|| StatusPoller::new(sink, Arc::clone(&board), config.status_poll_interval()));
        run_monitor(factory, ctx, &config, source, board, poller, deadline)
    }
}

/// Defaults < config file < `HARDHAT_*` environment < flags.
fn build_config(cli: &Cli) -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    let mut config = MonitorConfig::load(cli.config.as_deref())?;

    if let Some(v) = cli.confidence {
        config.confidence = v;
    }
    if let Some(v) = cli.interval_ms {
        config.detection_interval_ms = v;
    }
    if let Some(v) = cli.debounce_ms {
        config.alert_debounce_ms = v;
    }
    if let Some(v) = cli.poll_interval_ms {
        config.status_poll_interval_ms = v;
    }
    if let Some(v) = cli.threshold {
        config.helmet_color_ratio_threshold = v;
    }
    if let Some(ref v) = cli.zone {
        config.zone = v.clone();
    }
    if let Some(ref v) = cli.worker {
        config.worker = v.clone();
    }
    if let Some(ref v) = cli.stream {
        config.stream_key = v.clone();
    }
    if let Some(v) = cli.severity {
        config.severity = v;
    }
    if let Some(ref v) = cli.model_url {
        config.model_url = Some(v.clone());
    }
    if let Some(ref v) = cli.snapshots {
        config.snapshot_dir = Some(v.clone());
    }

    config.validate()?;
    Ok(config)
}

fn build_sink(url: Option<&str>) -> Result<Arc<dyn AlertSink>, Box<dyn std::error::Error>> {
    match url {
        Some(url) => {
            let sink = HttpAlertSink::new(url)?;
            log::info!("Sending alerts to {}", sink.alerts_url());
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(InMemoryAlertSink::new())),
    }
}

fn open_source(input: &str) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    if input.starts_with("http://") || input.starts_with("https://") {
        Ok(Box::new(HttpSnapshotSource::new(input)?))
    } else {
        Ok(Box::new(ImageFileSource::open(Path::new(input))?))
    }
}

fn run_once(
    factory: &dyn DetectorFactory,
    ctx: CycleContext,
    config: &MonitorConfig,
    mut source: Box<dyn FrameSource>,
) -> Result<(), Box<dyn std::error::Error>> {
    let detector = factory.create()?;
    let alerts = AlertDispatcher::spawn(Arc::clone(&ctx.sink), ALERT_QUEUE_CAPACITY)?;
    let mut cycle = DetectionCycle::new(
        detector,
        AlertDebouncer::new(config.alert_debounce_ms),
        alerts,
        ctx,
    );
    let mut logger = StatsPipelineLogger::default();
    let report = cycle.run(source.as_mut(), &mut logger);
    cycle.finish();
    if let Err(e) = source.release() {
        log::warn!("Failed to release {}: {e}", source.describe());
    }
    let report = report?;

    if let Some(reason) = report.failure {
        return Err(format!("Detection cycle failed: {reason}").into());
    }
    println!("{}", serde_json::to_string_pretty(&report.result)?);
    Ok(())
}

fn run_monitor(
    factory: Arc<dyn DetectorFactory>,
    ctx: CycleContext,
    config: &MonitorConfig,
    source: Box<dyn FrameSource>,
    board: Arc<StatusBoard>,
    poller: Option<StatusPoller>,
    deadline: Option<Instant>,
) -> Result<(), Box<dyn std::error::Error>> {
    let detection_loop = DetectionLoop::new(
        factory,
        ctx,
        LoopSettings::from(config),
        Box::new(StatsPipelineLogger::default()),
    );
    if let Some(ref poller) = poller {
        poller.start()?;
    }
    let stop = detection_loop.start(source)?;

    let check = config.detection_interval();
    let mut last_status: Option<StatusSnapshot> = None;
    let outcome = loop {
        if detection_loop.wait_for_state(|s| s == LoopState::Error, check) {
            break Err(detection_loop
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Detection loop failed".into()));
        }
        report_status(&board, &mut last_status);
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break Ok(());
        }
    };

    stop.stop();
    if let Some(ref poller) = poller {
        poller.stop();
    }
    log::info!(
        "Ran {} cycles ({} ticks skipped)",
        detection_loop.cycles(),
        detection_loop.skipped_ticks()
    );
    outcome.map_err(Into::into)
}

fn run_poll_only(
    sink: Arc<dyn AlertSink>,
    board: Arc<StatusBoard>,
    config: &MonitorConfig,
    deadline: Option<Instant>,
) -> Result<(), Box<dyn std::error::Error>> {
    let poller = StatusPoller::new(sink, Arc::clone(&board), config.status_poll_interval());
    poller.start()?;

    let mut last_status: Option<StatusSnapshot> = None;
    while deadline.map_or(true, |d| Instant::now() < d) {
        std::thread::sleep(config.status_poll_interval());
        report_status(&board, &mut last_status);
    }
    poller.stop();
    Ok(())
}

/// Prints the board's status as a JSON line whenever it changes.
fn report_status(board: &StatusBoard, last: &mut Option<StatusSnapshot>) {
    let current = board.current();
    if last.as_ref() == Some(&current) {
        return;
    }
    match serde_json::to_string(&current) {
        Ok(line) => println!("{line}"),
        Err(e) => log::warn!("Failed to serialize status: {e}"),
    }
    *last = Some(current);
}
