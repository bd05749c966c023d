use std::collections::BTreeMap;
use std::time::Instant;

/// Receives per-cycle measurements from the detection loop.
pub trait PipelineLogger: Send {
    /// Cycle `cycle` (1-based, counted per run) completed.
    fn cycle(&mut self, cycle: usize);

    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Per-cycle values such as `persons`, `head_color_ratio` or `alerts`.
    fn metric(&mut self, name: &str, value: f64);

    /// Called once when a run ends.
    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn cycle(&mut self, _cycle: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
}

/// Count, sum and peak of one series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    pub count: usize,
    pub total: f64,
    pub max: f64,
}

impl RunningStat {
    fn record(&mut self, value: f64) {
        if self.count == 0 || value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.total += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Aggregates stage timings and cycle metrics in constant memory and
/// reports them through `log`.
///
/// Logs a progress line every `report_every` cycles and a summary when the
/// run ends.
pub struct StatsPipelineLogger {
    report_every: usize,
    started: Instant,
    cycles: usize,
    stages: BTreeMap<String, RunningStat>,
    metrics: BTreeMap<String, RunningStat>,
}

impl StatsPipelineLogger {
    pub fn new(report_every: usize) -> Self {
        Self {
            report_every: report_every.max(1),
            started: Instant::now(),
            cycles: 0,
            stages: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn stage_stats(&self, stage: &str) -> Option<RunningStat> {
        self.stages.get(stage).copied()
    }

    pub fn metric_stats(&self, name: &str) -> Option<RunningStat> {
        self.metrics.get(name).copied()
    }

    /// `None` until something was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.stages.is_empty() && self.metrics.is_empty() {
            return None;
        }
        let secs = self.started.elapsed().as_secs_f64();
        let alerts = self.metrics.get("alerts").map_or(0.0, |s| s.total);
        let mut lines = vec![format!(
            "Detection run: {} cycles in {secs:.1}s, {alerts:.0} alerts",
            self.cycles
        )];
        for (stage, stat) in &self.stages {
            lines.push(format!(
                "  {stage:10} avg {:6.1}ms  max {:6.1}ms",
                stat.mean(),
                stat.max
            ));
        }
        for (name, stat) in self.metrics.iter().filter(|(name, _)| name.as_str() != "alerts") {
            lines.push(format!("  {name}: avg {:.2}  max {:.2}", stat.mean(), stat.max));
        }
        Some(lines.join("\n"))
    }
}

impl Default for StatsPipelineLogger {
    fn default() -> Self {
        Self::new(30)
    }
}

impl PipelineLogger for StatsPipelineLogger {
    fn cycle(&mut self, cycle: usize) {
        self.cycles = cycle;
        if cycle % self.report_every == 0 {
            let detect = self.stages.get("detect").map_or(0.0, RunningStat::mean);
            log::info!("{cycle} detection cycles, detect avg {detect:.1}ms");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.stages
            .entry(stage.to_string())
            .or_default()
            .record(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().record(value);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("{text}");
        }
    }
}
