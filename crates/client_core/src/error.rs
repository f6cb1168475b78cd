use thiserror::Error;

/// Failure to start a job. Surfaces as the job's error while it is Starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{reason}")]
    Rejected { reason: String },
    #[error("invalid server url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl TriggerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for TriggerError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}

/// Push-channel trouble. Always transient from the job's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid channel url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect channel {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("channel disconnected: {0}")]
    Disconnected(String),
    #[error("failed to send on channel: {0}")]
    Send(String),
}

/// Anything that moves a job to Failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("{reason}")]
    ServerFailed { reason: String },
    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

impl JobError {
    pub fn server_failed(reason: Option<String>) -> Self {
        let reason = reason
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| "job failed without a reason".to_string());
        Self::ServerFailed { reason }
    }
}
