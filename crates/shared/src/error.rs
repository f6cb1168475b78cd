use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body returned by the trigger endpoint when it refuses to start a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    #[serde(alias = "error")]
    pub reason: String,
}

impl RejectionBody {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("malformed channel frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("channel frame is missing a job id")]
    MissingJobId,
}
