//! Read model for presentation consumers: what the banners should show.

use std::sync::Arc;

use shared::protocol::PlanDocument;

use crate::{
    channel::ConnectionState,
    job::{JobPhase, JobSnapshot},
};

pub const READY_LABEL: &str = "System Ready";
pub const CONNECTING_LABEL: &str = "Connecting...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressBanner {
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub connected: bool,
    pub trigger_enabled: bool,
    pub progress: Option<ProgressBanner>,
    pub error: Option<String>,
    pub plan: Option<Arc<PlanDocument>>,
}

impl JobView {
    pub fn new(snapshot: &JobSnapshot, connection: ConnectionState) -> Self {
        let progress = snapshot.phase.is_active().then(|| ProgressBanner {
            percent: snapshot.progress,
            message: snapshot.status_message.clone(),
        });
        let error = match snapshot.phase {
            JobPhase::Failed => snapshot.error.clone(),
            _ => None,
        };
        let plan = match snapshot.phase {
            JobPhase::Succeeded => snapshot.result.clone(),
            _ => None,
        };

        Self {
            connected: connection != ConnectionState::Disconnected,
            trigger_enabled: !snapshot.phase.is_active(),
            progress,
            error,
            plan,
        }
    }

    pub fn connection_label(&self) -> &'static str {
        if self.connected {
            READY_LABEL
        } else {
            CONNECTING_LABEL
        }
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
