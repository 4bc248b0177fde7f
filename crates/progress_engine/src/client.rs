use std::time::Duration;

use chrono::Utc;
use progress_core::StatusSnapshot;

use crate::{decode_status, StatusError, TransportFailure};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
}

impl ClientSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/api/scraper-progress".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_bytes: 64 * 1024,
        }
    }
}

/// Queries the job-status endpoint once. Retry policy belongs to the caller.
#[async_trait::async_trait]
pub trait JobStatusClient: Send + Sync {
    async fn fetch_status(&self) -> Result<StatusSnapshot, StatusError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestStatusClient {
    settings: ClientSettings,
    client: reqwest::Client,
}

impl ReqwestStatusClient {
    pub fn new(settings: ClientSettings) -> Result<Self, StatusError> {
        reqwest::Url::parse(&settings.endpoint).map_err(|err| {
            StatusError::Transport(TransportFailure::InvalidUrl(err.to_string()))
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| StatusError::Transport(TransportFailure::Network(err.to_string())))?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

#[async_trait::async_trait]
impl JobStatusClient for ReqwestStatusClient {
    async fn fetch_status(&self) -> Result<StatusSnapshot, StatusError> {
        let response = self
            .client
            .get(&self.settings.endpoint)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatusError::Transport(TransportFailure::HttpStatus(
                status.as_u16(),
            )));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(StatusError::protocol(format!(
                    "status body too large ({content_len} bytes)"
                )));
            }
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        if body.len() as u64 > self.settings.max_bytes {
            return Err(StatusError::protocol(format!(
                "status body too large ({} bytes)",
                body.len()
            )));
        }

        decode_status(&body, Utc::now())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> StatusError {
    if err.is_timeout() {
        return StatusError::Transport(TransportFailure::Timeout);
    }
    StatusError::Transport(TransportFailure::Network(err.to_string()))
}
