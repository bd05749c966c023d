use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::shared::constants::HELMET_MISSING_EVENT_TYPE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "severity must be one of: low, medium, high, critical, got '{other}'"
            )),
        }
    }
}

/// A PPE violation that passed the debounce gate, as handed to the alert sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub zone: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub worker: String,
    /// Person detection confidence, 0-100.
    pub confidence: f64,
    /// Local wall time, e.g. `09:41 AM`.
    pub time: String,
    /// Local date, e.g. `Oct 19, 2026`.
    pub date: String,
    pub timestamp: DateTime<Local>,
    pub stream: String,
}

impl DetectionEvent {
    pub fn helmet_missing(
        zone: &str,
        worker: &str,
        stream: &str,
        severity: Severity,
        confidence: f64,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            zone: zone.to_string(),
            kind: HELMET_MISSING_EVENT_TYPE.to_string(),
            severity,
            worker: worker.to_string(),
            confidence,
            time: at.format("%I:%M %p").to_string(),
            date: at.format("%b %-d, %Y").to_string(),
            timestamp: at,
            stream: stream.to_string(),
        }
    }
}
