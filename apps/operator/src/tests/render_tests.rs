use std::sync::Arc;

use client_core::{ConnectionState, JobPhase, JobSnapshot, JobView};
use serde_json::json;
use shared::{domain::JobId, protocol::PlanDocument};

use super::*;

fn running(progress: u8, message: &str) -> JobSnapshot {
    JobSnapshot {
        phase: JobPhase::Running,
        job_id: Some(JobId::from("job-1")),
        progress,
        status_message: message.to_string(),
        ..JobSnapshot::default()
    }
}

#[test]
fn idle_view_only_shows_connection_label() {
    let view = JobView::new(&JobSnapshot::default(), ConnectionState::Connecting);
    assert_eq!(render_lines(&view), vec!["[System Ready]".to_string()]);

    let view = JobView::new(&JobSnapshot::default(), ConnectionState::Disconnected);
    assert_eq!(render_lines(&view), vec!["[Connecting...]".to_string()]);
}

#[test]
fn running_view_shows_progress_banner() {
    let view = JobView::new(&running(42, "Analysing"), ConnectionState::Connected);
    assert_eq!(
        render_lines(&view),
        vec!["[System Ready]".to_string(), " 42% Analysing".to_string()]
    );
}

#[test]
fn failed_view_shows_error() {
    let snapshot = JobSnapshot {
        phase: JobPhase::Failed,
        error: Some("server busy".into()),
        ..JobSnapshot::default()
    };
    let view = JobView::new(&snapshot, ConnectionState::Connected);
    assert_eq!(render_lines(&view)[1], "error: server busy");
}

#[test]
fn plan_summary_reads_known_fields() {
    let plan = PlanDocument(json!({
        "executive_summary": "Evacuate sector 4",
        "confidence": 0.87,
        "evacuation_plan": { "routes": [{}, {}] }
    }));
    assert_eq!(
        plan_summary(&plan),
        "plan ready: Evacuate sector 4 (confidence 87%, 2 routes)"
    );

    let bare = PlanDocument(json!({}));
    assert_eq!(plan_summary(&bare), "plan ready: (no summary) (0 routes)");
}

#[test]
fn succeeded_view_includes_plan_line() {
    let snapshot = JobSnapshot {
        phase: JobPhase::Succeeded,
        progress: 100,
        result: Some(Arc::new(PlanDocument(json!({ "executive_summary": "ok" })))),
        ..JobSnapshot::default()
    };
    let view = JobView::new(&snapshot, ConnectionState::Connected);
    let lines = render_lines(&view);
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("plan ready: ok"));
}

#[test]
fn printer_emits_only_changed_lines() {
    let mut printer = BannerPrinter::default();

    let first = JobView::new(&running(10, "Working"), ConnectionState::Connected);
    assert_eq!(printer.changed_lines(&first).len(), 2);
    assert!(printer.changed_lines(&first).is_empty());

    let second = JobView::new(&running(20, "Working"), ConnectionState::Connected);
    assert_eq!(printer.changed_lines(&second), vec![" 20% Working".to_string()]);

    let dropped = JobView::new(&running(20, "Working"), ConnectionState::Disconnected);
    assert_eq!(printer.changed_lines(&dropped), vec!["[Connecting...]".to_string()]);
}
