//! Single-writer task that drives the job state machine.

use std::sync::Arc;

use shared::{
    domain::JobId,
    protocol::{JobStatusReport, PlanDocument},
};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelClient, ConnectionState},
    error::TriggerError,
    job::{JobEffect, JobMachine, JobPhase, JobSnapshot},
    trigger::{JobTrigger, StartedJob},
};

#[derive(Debug)]
enum JobCommand {
    Trigger,
    Clear,
}

enum Outcome {
    Started {
        generation: u64,
        result: Result<StartedJob, TriggerError>,
    },
    PlanFetched {
        job_id: JobId,
        result: Result<PlanDocument, TriggerError>,
    },
    StatusFetched {
        job_id: JobId,
        result: Result<JobStatusReport, TriggerError>,
    },
}

/// Handle to the task that owns the job state machine.
///
/// Every mutation happens on that task, one input at a time; handles only
/// send commands and read snapshots.
#[derive(Clone)]
pub struct JobController {
    commands: mpsc::UnboundedSender<JobCommand>,
    snapshots: watch::Receiver<JobSnapshot>,
    connection: watch::Receiver<ConnectionState>,
}

impl JobController {
    pub fn spawn(trigger: Arc<dyn JobTrigger>, channel: ChannelClient) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(JobSnapshot::default());
        let connection = channel.watch_connection();

        let worker = JobWorker {
            machine: JobMachine::new(),
            trigger,
            channel,
            connection: connection.clone(),
            commands: commands_rx,
            outcomes_tx,
            outcomes: outcomes_rx,
            snapshots: snapshots_tx,
        };
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            snapshots: snapshots_rx,
            connection,
        }
    }

    /// Start a new job. Ignored while a job is Starting or Running.
    pub fn trigger(&self) {
        self.send(JobCommand::Trigger);
    }

    /// Reset to Idle, abandoning any active job.
    pub fn clear(&self) {
        self.send(JobCommand::Clear);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.snapshots.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    fn send(&self, command: JobCommand) {
        if self.commands.send(command).is_err() {
            warn!("job controller stopped; command dropped");
        }
    }
}

struct JobWorker {
    machine: JobMachine,
    trigger: Arc<dyn JobTrigger>,
    channel: ChannelClient,
    connection: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedReceiver<JobCommand>,
    outcomes_tx: mpsc::UnboundedSender<Outcome>,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
    snapshots: watch::Sender<JobSnapshot>,
}

impl JobWorker {
    async fn run(mut self) {
        let mut frames = self.channel.frames();
        self.connection.borrow_and_update();

        loop {
            let effect = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(JobCommand::Trigger) => self.machine.trigger(),
                    Some(JobCommand::Clear) => self.machine.clear(),
                    None => break,
                },
                Some(outcome) = self.outcomes.recv() => match outcome {
                    Outcome::Started { generation, result } => {
                        if let Err(err) = &result {
                            warn!(%err, "failed to start disaster job");
                        }
                        self.machine.start_resolved(generation, result)
                    }
                    Outcome::PlanFetched { job_id, result } => {
                        self.machine.plan_resolved(&job_id, result);
                        None
                    }
                    Outcome::StatusFetched { job_id, result } => {
                        self.machine.status_resolved(&job_id, result)
                    }
                },
                Some(frame) = frames.next() => self.machine.apply_frame(frame),
                // Only real transitions are published, so a change that
                // lands on Connected is always a fresh connection.
                Ok(()) = self.connection.changed() => {
                    if self.connection.borrow_and_update().is_connected() {
                        self.machine.channel_reconnected()
                    } else {
                        None
                    }
                }
            };

            if let Some(effect) = effect {
                self.execute(effect);
            }
            self.publish();
        }

        debug!("job controller stopped");
    }

    fn execute(&self, effect: JobEffect) {
        match effect {
            JobEffect::Start { generation } => {
                info!(generation, "starting disaster job");
                self.channel.unwatch_job();
                let trigger = Arc::clone(&self.trigger);
                let outcomes = self.outcomes_tx.clone();
                tokio::spawn(async move {
                    let result = trigger.start().await;
                    let _ = outcomes.send(Outcome::Started { generation, result });
                });
            }
            JobEffect::Watch { job_id, mode } => self.channel.watch_job(job_id, mode),
            JobEffect::Unwatch => self.channel.unwatch_job(),
            JobEffect::FetchPlan(job_id) => {
                info!(%job_id, "completion frame carried no plan; fetching it");
                let trigger = Arc::clone(&self.trigger);
                let outcomes = self.outcomes_tx.clone();
                tokio::spawn(async move {
                    let result = trigger.fetch_plan(&job_id).await;
                    let _ = outcomes.send(Outcome::PlanFetched { job_id, result });
                });
            }
            JobEffect::FetchStatus(job_id) => {
                info!(%job_id, "channel reconnected; checking job status");
                let trigger = Arc::clone(&self.trigger);
                let outcomes = self.outcomes_tx.clone();
                tokio::spawn(async move {
                    let result = trigger.fetch_status(&job_id).await;
                    let _ = outcomes.send(Outcome::StatusFetched { job_id, result });
                });
            }
        }
    }

    fn publish(&self) {
        let next = self.machine.state();
        self.snapshots.send_if_modified(|current| {
            if current == next {
                return false;
            }
            if current.phase != next.phase {
                log_transition(current.phase, next);
            }
            *current = next.clone();
            true
        });
    }
}

fn log_transition(from: JobPhase, to: &JobSnapshot) {
    let job_id = to.job_id.as_ref().map(JobId::as_str).unwrap_or("-");
    match to.phase {
        JobPhase::Failed => warn!(
            job_id,
            ?from,
            error = to.error.as_deref().unwrap_or_default(),
            "job failed"
        ),
        phase => info!(job_id, ?from, to = ?phase, progress = to.progress, "job phase changed"),
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
