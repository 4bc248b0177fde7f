use chrono::{DateTime, TimeDelta, Utc};
use progress_core::{JobStatus, StatusSnapshot};
use serde::Deserialize;

use crate::StatusError;

/// JSON body served by the job-status endpoint.
#[derive(Debug, Deserialize)]
struct WireStatus {
    status: String,
    #[serde(default)]
    completed: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    percentage: Option<f64>,
    #[serde(default, alias = "current_label")]
    current_company: Option<String>,
    /// Epoch seconds of the last backend-side change.
    #[serde(default)]
    last_update: Option<f64>,
    #[serde(default)]
    time_since_update: Option<SecondsSince>,
    #[serde(default)]
    error: Option<String>,
}

/// The backend sends either a bare number or a display string like `"3.2秒"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecondsSince {
    Number(f64),
    Text(String),
}

impl SecondsSince {
    fn seconds(&self) -> Option<f64> {
        match self {
            SecondsSince::Number(value) => Some(*value),
            SecondsSince::Text(text) => leading_number(text),
        }
    }
}

/// Decodes a status response body received at `now`.
pub fn decode_status(body: &[u8], now: DateTime<Utc>) -> Result<StatusSnapshot, StatusError> {
    let wire: WireStatus = serde_json::from_slice(body)
        .map_err(|err| StatusError::protocol(format!("malformed status body: {err}")))?;

    let status = JobStatus::from_token(&wire.status)
        .ok_or_else(|| StatusError::protocol(format!("unknown status {:?}", wire.status)))?;

    let since = wire
        .time_since_update
        .as_ref()
        .and_then(SecondsSince::seconds)
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0);

    let last_update = match (wire.last_update, since) {
        (Some(epoch), _) => epoch_to_datetime(epoch)?,
        (None, Some(seconds)) => TimeDelta::try_milliseconds((seconds * 1000.0) as i64)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| StatusError::protocol("time_since_update out of range"))?,
        (None, None) => return Err(StatusError::protocol("missing last_update")),
    };

    let mut snapshot =
        StatusSnapshot::new(status, last_update).with_counts(wire.completed, wire.total);
    if let Some(percentage) = wire.percentage {
        snapshot = snapshot.with_percentage(percentage);
    }
    if let Some(label) = wire.current_company.filter(|label| !label.trim().is_empty()) {
        snapshot = snapshot.with_label(label);
    }
    if let Some(seconds) = since {
        snapshot = snapshot.with_seconds_since_update(seconds);
    }
    if let Some(detail) = wire.error.filter(|detail| !detail.trim().is_empty()) {
        snapshot = snapshot.with_error(detail);
    }
    Ok(snapshot)
}

fn epoch_to_datetime(epoch: f64) -> Result<DateTime<Utc>, StatusError> {
    if !epoch.is_finite() || epoch < 0.0 {
        return Err(StatusError::protocol(format!("invalid last_update {epoch}")));
    }
    DateTime::from_timestamp_millis((epoch * 1000.0).round() as i64)
        .ok_or_else(|| StatusError::protocol(format!("invalid last_update {epoch}")))
}

fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..end].parse().ok()
}
