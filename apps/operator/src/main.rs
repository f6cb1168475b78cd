use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ChannelClient, HttpJobTrigger, JobController, JobPhase, JobTrigger, JobView, WsTransport,
};
use shared::domain::{DisasterKind, JobId, SessionId, Severity};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{load_settings, Settings};
use render::{plan_summary, BannerPrinter};

#[derive(Parser, Debug)]
#[command(about = "Trigger disaster simulations and follow their progress")]
struct Cli {
    /// Overrides the configured server base URL.
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Settings file; defaults to ./operator.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a job and follow it until it finishes.
    Run {
        #[arg(long)]
        disaster_type: Option<DisasterKind>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long)]
        real_apis: bool,
    },
    /// Probe the server health endpoint.
    Health,
    /// Fetch the plan of a finished job.
    Plan { job_id: String },
    /// Show the server's record of a job.
    Status { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(url) = cli.server_url {
        settings.server_url = url;
    }

    match cli.command {
        Command::Run {
            disaster_type,
            severity,
            real_apis,
        } => {
            if let Some(kind) = disaster_type {
                settings.disaster_type = kind;
            }
            if let Some(severity) = severity {
                settings.severity = severity;
            }
            settings.use_real_apis |= real_apis;
            run_job(&settings).await
        }
        Command::Health => {
            let trigger = http_trigger(&settings, SessionId::generate())?;
            let health = trigger.health().await?;
            match health.message {
                Some(message) => println!("{}: {message}", health.status),
                None => println!("{}", health.status),
            }
            Ok(())
        }
        Command::Plan { job_id } => {
            let trigger = http_trigger(&settings, SessionId::generate())?;
            let plan = trigger.fetch_plan(&JobId::new(job_id)).await?;
            println!("{}", plan_summary(&plan));
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Command::Status { job_id } => {
            let trigger = http_trigger(&settings, SessionId::generate())?;
            let report = trigger.fetch_status(&JobId::new(job_id)).await?;
            match (&report.error, &report.plan) {
                (Some(error), _) => println!("{}: {error}", report.status),
                (None, Some(plan)) => println!("{}: {}", report.status, plan_summary(plan)),
                (None, None) => println!("{}", report.status),
            }
            Ok(())
        }
    }
}

fn http_trigger(settings: &Settings, session_id: SessionId) -> Result<HttpJobTrigger> {
    HttpJobTrigger::new(&settings.server_url, session_id, settings.trigger_options())
        .context("failed to build HTTP client")
}

async fn run_job(settings: &Settings) -> Result<()> {
    let session_id = SessionId::generate();
    info!(%session_id, server_url = %settings.server_url, "starting operator session");

    let channel_config = settings.channel_config();
    let trigger = Arc::new(http_trigger(settings, session_id)?);
    let transport = Arc::new(WsTransport::new(
        &settings.server_url,
        &channel_config.path,
        session_id,
        channel_config.keepalive,
    )?);
    let channel = ChannelClient::spawn(transport, &channel_config);
    let controller = JobController::spawn(trigger, channel.clone());

    let mut snapshots = controller.subscribe();
    let mut connection = controller.watch_connection();
    let mut printer = BannerPrinter::default();
    let deadline = Instant::now() + settings.job_timeout();

    controller.trigger();

    let outcome = loop {
        let snapshot = snapshots.borrow_and_update().clone();
        let view = JobView::new(&snapshot, *connection.borrow_and_update());
        for line in printer.changed_lines(&view) {
            println!("{line}");
        }

        match snapshot.phase {
            JobPhase::Succeeded => break Ok(()),
            JobPhase::Failed => {
                let reason = snapshot.error.unwrap_or_else(|| "job failed".to_string());
                break Err(anyhow::anyhow!(reason));
            }
            _ => {}
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break Err(anyhow::anyhow!("job controller stopped"));
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    warn!("channel state no longer available");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; clearing job");
                controller.clear();
                break Ok(());
            }
            _ = tokio::time::sleep_until(deadline) => {
                controller.clear();
                break Err(anyhow::anyhow!(
                    "job did not finish within {}s",
                    settings.job_timeout().as_secs()
                ));
            }
        }
    };

    channel.shutdown();
    outcome
}
