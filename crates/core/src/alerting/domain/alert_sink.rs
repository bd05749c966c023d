use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alerting::domain::detection_event::DetectionEvent;
use crate::shared::constants::HELMET_VIOLATION_TYPES;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("alert request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("malformed alert payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),
}

/// An alert as reported back by the sink. Only `type` is required; the rest
/// is whatever the backend chose to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl Alert {
    pub fn is_helmet_violation(&self) -> bool {
        HELMET_VIOLATION_TYPES
            .iter()
            .any(|t| self.kind.trim().eq_ignore_ascii_case(t))
    }
}

impl From<&DetectionEvent> for Alert {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            kind: event.kind.clone(),
            zone: Some(event.zone.clone()),
            confidence: Some(event.confidence),
            severity: Some(event.severity.to_string()),
        }
    }
}

/// Destination for detection events and source of recent alerts.
///
/// Shared between the detection loop and the status poller, hence `&self`.
/// Delivery is best-effort; callers log failures and move on.
pub trait AlertSink: Send + Sync {
    fn emit(&self, event: &DetectionEvent) -> Result<(), SinkError>;

    /// Recent alerts, oldest first.
    fn fetch_recent(&self) -> Result<Vec<Alert>, SinkError>;
}
