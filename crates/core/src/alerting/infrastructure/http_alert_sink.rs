use std::time::Duration;

use serde::Deserialize;

use crate::alerting::domain::alert_sink::{Alert, AlertSink, SinkError};
use crate::alerting::domain::detection_event::DetectionEvent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Alert backend reached over HTTP: `POST {base}/alerts` to report,
/// `GET {base}/alerts` to read back.
pub struct HttpAlertSink {
    client: reqwest::blocking::Client,
    alerts_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AlertsResponse {
    Wrapped { data: Vec<Alert> },
    Bare(Vec<Alert>),
}

impl HttpAlertSink {
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let alerts_url = alerts_url(base_url);
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Http {
                url: alerts_url.clone(),
                source: e,
            })?;
        Ok(Self { client, alerts_url })
    }

    pub fn alerts_url(&self) -> &str {
        &self.alerts_url
    }

    fn http_error(&self, source: reqwest::Error) -> SinkError {
        SinkError::Http {
            url: self.alerts_url.clone(),
            source,
        }
    }
}

impl AlertSink for HttpAlertSink {
    fn emit(&self, event: &DetectionEvent) -> Result<(), SinkError> {
        self.client
            .post(&self.alerts_url)
            .json(event)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.http_error(e))?;
        Ok(())
    }

    fn fetch_recent(&self) -> Result<Vec<Alert>, SinkError> {
        let body = self
            .client
            .get(&self.alerts_url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| self.http_error(e))?;
        parse_alerts(&body)
    }
}

fn alerts_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/alerts") {
        base.to_string()
    } else {
        format!("{base}/alerts")
    }
}

/// Accepts both `{"data": [...]}` and a bare JSON array.
fn parse_alerts(body: &str) -> Result<Vec<Alert>, SinkError> {
    let parsed: AlertsResponse = serde_json::from_str(body)?;
    Ok(match parsed {
        AlertsResponse::Wrapped { data } => data,
        AlertsResponse::Bare(alerts) => alerts,
    })
}
