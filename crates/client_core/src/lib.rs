//! Client-side orchestration for disaster simulation jobs.
//!
//! A [`JobController`] owns the job state machine and reconciles two
//! sources: the [`JobTrigger`] request/response call that starts a job and
//! the [`ChannelClient`] push connection that reports its progress.

pub mod backoff;
pub mod channel;
pub mod controller;
pub mod error;
pub mod job;
pub mod transport;
pub mod trigger;
pub mod view;

pub use backoff::{Backoff, ReconnectPolicy};
pub use channel::{ChannelClient, ChannelConfig, ConnectionState};
pub use controller::JobController;
pub use error::{ChannelError, JobError, TriggerError};
pub use job::{JobEffect, JobMachine, JobPhase, JobSnapshot};
pub use transport::{FrameConnection, FrameTransport, WsTransport};
pub use trigger::{HealthStatus, HttpJobTrigger, JobTrigger, StartedJob, TriggerOptions};
pub use view::{JobView, ProgressBanner};
