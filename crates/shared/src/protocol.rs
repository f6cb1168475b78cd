use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{DisasterKind, GeoPoint, JobId, JobMode, SessionId, Severity},
    error::FrameDecodeError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: DisasterKind,
    pub location: GeoPoint,
    pub severity: Severity,
    #[serde(rename = "use_real_apis")]
    pub use_real_apis: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    #[serde(alias = "disaster_id", alias = "job_id")]
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<JobMode>,
}

/// Emergency plan produced by a finished job. Rendering is left to the
/// plan viewer, so the document is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanDocument(pub Value);

impl PlanDocument {
    pub fn executive_summary(&self) -> Option<&str> {
        self.0.get("executive_summary").and_then(Value::as_str)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.0.get("confidence").and_then(Value::as_f64)
    }

    pub fn route_count(&self) -> usize {
        self.0
            .pointer("/evacuation_plan/routes")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// One push-channel message about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    #[serde(rename = "jobId", alias = "job_id", alias = "disaster_id")]
    pub job_id: JobId,
    #[serde(flatten)]
    pub event: FrameEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameEvent {
    Progress {
        #[serde(default, alias = "progress", skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Pipeline stage name, sent instead of a message by older servers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
    #[serde(alias = "disaster_complete")]
    Completed {
        #[serde(default, alias = "plan", skip_serializing_if = "Option::is_none")]
        payload: Option<PlanDocument>,
    },
    #[serde(alias = "disaster_error")]
    Failed {
        #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ChannelFrame {
    pub fn progress(job_id: impl Into<JobId>, value: f64, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            event: FrameEvent::Progress {
                value: Some(value),
                message: Some(message.into()),
                phase: None,
            },
        }
    }

    pub fn completed(job_id: impl Into<JobId>, payload: Option<PlanDocument>) -> Self {
        Self {
            job_id: job_id.into(),
            event: FrameEvent::Completed { payload },
        }
    }

    pub fn failed(job_id: impl Into<JobId>, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            event: FrameEvent::Failed {
                reason: Some(reason.into()),
            },
        }
    }

    pub fn decode(text: &str) -> Result<Self, FrameDecodeError> {
        let frame: ChannelFrame = serde_json::from_str(text)?;
        if frame.job_id.is_blank() {
            return Err(FrameDecodeError::MissingJobId);
        }
        Ok(frame)
    }

    pub fn kind(&self) -> &'static str {
        match self.event {
            FrameEvent::Progress { .. } => "progress",
            FrameEvent::Completed { .. } => "completed",
            FrameEvent::Failed { .. } => "failed",
        }
    }
}

/// Messages the client sends over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChannelRequest {
    Subscribe {
        #[serde(rename = "jobId")]
        job_id: JobId,
        /// Lets the server pick the real or simulated pipeline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<JobMode>,
    },
}

impl ChannelRequest {
    pub fn subscribe(job_id: impl Into<JobId>, mode: Option<JobMode>) -> Self {
        Self::Subscribe {
            job_id: job_id.into(),
            mode,
        }
    }
}

/// Server-side record of a job, as returned by `GET /api/disaster/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusReport {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
