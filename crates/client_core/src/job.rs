//! Pure job state machine.
//!
//! Reconciles the trigger call and the push channel into one `JobSnapshot`.
//! The machine performs no I/O: each input returns at most one `JobEffect`
//! for the owner to execute.

use std::sync::Arc;

use shared::{
    domain::{JobId, JobMode},
    protocol::{ChannelFrame, FrameEvent, JobStatusReport, PlanDocument},
};
use tracing::{debug, warn};

use crate::{
    error::{JobError, TriggerError},
    trigger::StartedJob,
};

const STARTING_MESSAGE: &str = "Submitting disaster trigger";
const ACCEPTED_MESSAGE: &str = "Job accepted; waiting for progress";
const RETRIEVING_PLAN_MESSAGE: &str = "Retrieving emergency plan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Immutable copy of the job state handed to presentation consumers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobSnapshot {
    pub phase: JobPhase,
    pub job_id: Option<JobId>,
    pub progress: u8,
    pub status_message: String,
    pub result: Option<Arc<PlanDocument>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEffect {
    /// Drop any existing subscription, then call the job trigger. The
    /// response must be fed back with the same generation.
    Start { generation: u64 },
    Watch { job_id: JobId, mode: Option<JobMode> },
    Unwatch,
    FetchPlan(JobId),
    /// Ask the server where the job stands; frames may have been missed.
    FetchStatus(JobId),
}

#[derive(Debug, Default)]
pub struct JobMachine {
    state: JobSnapshot,
    generation: u64,
    plan_requested: bool,
    status_requested: bool,
}

impl JobMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.clone()
    }

    pub fn state(&self) -> &JobSnapshot {
        &self.state
    }

    pub fn trigger(&mut self) -> Option<JobEffect> {
        if self.state.phase.is_active() {
            debug!(phase = ?self.state.phase, "trigger ignored: a job is already active");
            return None;
        }

        self.generation += 1;
        self.plan_requested = false;
        self.status_requested = false;
        self.state = JobSnapshot {
            phase: JobPhase::Starting,
            status_message: STARTING_MESSAGE.to_string(),
            ..JobSnapshot::default()
        };
        Some(JobEffect::Start {
            generation: self.generation,
        })
    }

    pub fn start_resolved(
        &mut self,
        generation: u64,
        outcome: Result<StartedJob, TriggerError>,
    ) -> Option<JobEffect> {
        if generation != self.generation || self.state.phase != JobPhase::Starting {
            debug!(generation, "discarding start response for an abandoned job");
            return None;
        }

        match outcome {
            Ok(StartedJob { job_id, mode }) => {
                self.state.phase = JobPhase::Running;
                self.state.job_id = Some(job_id.clone());
                self.state.progress = 0;
                self.state.status_message = ACCEPTED_MESSAGE.to_string();
                Some(JobEffect::Watch { job_id, mode })
            }
            Err(err) => {
                self.fail(JobError::from(err));
                None
            }
        }
    }

    pub fn apply_frame(&mut self, frame: ChannelFrame) -> Option<JobEffect> {
        if !self.accepts(&frame.job_id) {
            debug!(job_id = %frame.job_id, kind = frame.kind(), "discarding frame");
            return None;
        }

        match frame.event {
            FrameEvent::Progress {
                value,
                message,
                phase,
            } => {
                if let Some(value) = value {
                    self.state.progress = self.state.progress.max(clamp_progress(value));
                }
                if let Some(message) = message.or(phase) {
                    self.state.status_message = message;
                }
                None
            }
            FrameEvent::Completed {
                payload: Some(plan),
            } => {
                self.succeed(plan);
                None
            }
            FrameEvent::Completed { payload: None } => {
                if self.plan_requested {
                    return None;
                }
                self.request_plan(frame.job_id)
            }
            FrameEvent::Failed { reason } => {
                self.fail(JobError::server_failed(reason));
                None
            }
        }
    }

    pub fn plan_resolved(&mut self, job_id: &JobId, outcome: Result<PlanDocument, TriggerError>) {
        if !self.plan_requested || !self.accepts(job_id) {
            debug!(%job_id, "discarding plan response");
            return;
        }

        self.plan_requested = false;
        match outcome {
            Ok(plan) => self.succeed(plan),
            Err(err) => self.fail(JobError::from(err)),
        }
    }

    /// The push channel came back. Frames sent while it was down are lost,
    /// so a running job is checked against the server's record.
    pub fn channel_reconnected(&mut self) -> Option<JobEffect> {
        if self.state.phase != JobPhase::Running || self.status_requested {
            return None;
        }
        let job_id = self.state.job_id.clone()?;
        self.status_requested = true;
        Some(JobEffect::FetchStatus(job_id))
    }

    pub fn status_resolved(
        &mut self,
        job_id: &JobId,
        outcome: Result<JobStatusReport, TriggerError>,
    ) -> Option<JobEffect> {
        if !self.status_requested || !self.accepts(job_id) {
            debug!(%job_id, "discarding status response");
            return None;
        }

        self.status_requested = false;
        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                warn!(%job_id, %err, "status resync failed; waiting for frames");
                return None;
            }
        };

        if report.is_error() {
            self.fail(JobError::server_failed(report.error));
            return None;
        }
        if !report.is_complete() {
            return None;
        }
        match report.plan {
            Some(plan) => {
                self.succeed(plan);
                None
            }
            None if self.plan_requested => None,
            None => self.request_plan(job_id.clone()),
        }
    }

    /// Back to Idle from any phase. An in-flight start or plan request is
    /// abandoned: its response will no longer match.
    pub fn clear(&mut self) -> Option<JobEffect> {
        let had_job = self.state.job_id.is_some();
        self.generation += 1;
        self.plan_requested = false;
        self.status_requested = false;
        self.state = JobSnapshot::default();
        had_job.then_some(JobEffect::Unwatch)
    }

    fn accepts(&self, job_id: &JobId) -> bool {
        self.state.phase == JobPhase::Running && self.state.job_id.as_ref() == Some(job_id)
    }

    fn request_plan(&mut self, job_id: JobId) -> Option<JobEffect> {
        self.plan_requested = true;
        self.state.status_message = RETRIEVING_PLAN_MESSAGE.to_string();
        Some(JobEffect::FetchPlan(job_id))
    }

    fn succeed(&mut self, plan: PlanDocument) {
        self.state.phase = JobPhase::Succeeded;
        self.state.progress = 100;
        self.state.result = Some(Arc::new(plan));
        self.state.error = None;
    }

    fn fail(&mut self, err: JobError) {
        self.state.phase = JobPhase::Failed;
        self.state.result = None;
        self.state.error = Some(err.to_string());
    }
}

fn clamp_progress(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
#[path = "tests/job_tests.rs"]
mod tests;
