//! Request/response side of a job: starting it and reading back its results.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use shared::{
    domain::{DisasterKind, GeoPoint, JobId, JobMode, SessionId, Severity},
    error::RejectionBody,
    protocol::{JobStatusReport, PlanDocument, TriggerRequest, TriggerResponse},
};
use tracing::{info, warn};
use url::Url;

use crate::error::TriggerError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A job the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedJob {
    pub job_id: JobId,
    /// Pipeline the server chose; echoed back when subscribing.
    pub mode: Option<JobMode>,
}

impl StartedJob {
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Starts disaster jobs and retrieves their plans.
///
/// Implementations make exactly one request per call and never retry;
/// at-most-one-in-flight is enforced by the job state machine.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    async fn start(&self) -> Result<StartedJob, TriggerError>;
    async fn fetch_plan(&self, job_id: &JobId) -> Result<PlanDocument, TriggerError>;
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusReport, TriggerError>;
}

#[derive(Debug, Clone)]
pub struct TriggerOptions {
    pub kind: DisasterKind,
    pub location: GeoPoint,
    pub severity: Severity,
    pub use_real_apis: bool,
    pub metadata: Option<Value>,
    pub request_timeout: Duration,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            kind: DisasterKind::default(),
            location: GeoPoint::default(),
            severity: Severity::default(),
            use_real_apis: false,
            metadata: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub struct HttpJobTrigger {
    http: Client,
    server_url: Url,
    session_id: SessionId,
    options: TriggerOptions,
}

impl HttpJobTrigger {
    pub fn new(
        server_url: impl Into<String>,
        session_id: SessionId,
        options: TriggerOptions,
    ) -> Result<Self, TriggerError> {
        let raw = server_url.into();
        let server_url = Url::parse(&raw).map_err(|err| TriggerError::InvalidUrl {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        if server_url.cannot_be_a_base() {
            return Err(TriggerError::InvalidUrl {
                url: raw,
                reason: "not a base url".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            http,
            server_url,
            session_id,
            options,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn health(&self) -> Result<HealthStatus, TriggerError> {
        let response = self.http.get(self.endpoint(&["api", "health"])?).send().await?;
        decode(accept(response).await?).await
    }

    /// `segments` are percent-encoded as needed.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TriggerError> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|()| TriggerError::InvalidUrl {
                url: self.server_url.to_string(),
                reason: "not a base url".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn trigger_request(&self) -> TriggerRequest {
        TriggerRequest {
            session_id: self.session_id,
            kind: self.options.kind,
            location: self.options.location,
            severity: self.options.severity,
            use_real_apis: self.options.use_real_apis,
            metadata: self.options.metadata.clone(),
        }
    }
}

#[async_trait]
impl JobTrigger for HttpJobTrigger {
    async fn start(&self) -> Result<StartedJob, TriggerError> {
        let response = self
            .http
            .post(self.endpoint(&["api", "disaster", "trigger"])?)
            .json(&self.trigger_request())
            .send()
            .await?;
        let body: TriggerResponse = decode(accept(response).await?).await?;
        if body.job_id.is_blank() {
            return Err(TriggerError::rejected("server returned an empty job id"));
        }

        info!(
            job_id = %body.job_id,
            session_id = %self.session_id,
            status = body.status.as_deref().unwrap_or("unknown"),
            mode = ?body.mode,
            "disaster job accepted"
        );
        Ok(StartedJob {
            job_id: body.job_id,
            mode: body.mode,
        })
    }

    async fn fetch_plan(&self, job_id: &JobId) -> Result<PlanDocument, TriggerError> {
        let url = self.endpoint(&["api", "disaster", job_id.as_str(), "plan"])?;
        let response = self.http.get(url).send().await?;
        decode(accept(response).await?).await
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusReport, TriggerError> {
        let url = self.endpoint(&["api", "disaster", job_id.as_str()])?;
        let response = self.http.get(url).send().await?;
        decode(accept(response).await?).await
    }
}

async fn accept(response: Response) -> Result<Response, TriggerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = rejection_reason(status, &body);
    warn!(status = status.as_u16(), %reason, "server rejected request");
    Err(TriggerError::Rejected { reason })
}

/// A 2xx body that does not parse is reported as a rejection.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TriggerError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|err| {
        warn!(%err, "undecodable response body");
        TriggerError::rejected(format!("unexpected response from server: {err}"))
    })
}

fn rejection_reason(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<RejectionBody>(body) {
        Ok(rejection) if !rejection.reason.trim().is_empty() => rejection.reason,
        _ => format!("request rejected with HTTP {}", status.as_u16()),
    }
}

#[cfg(test)]
#[path = "tests/trigger_tests.rs"]
mod tests;
