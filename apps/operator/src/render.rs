use client_core::JobView;
use shared::protocol::PlanDocument;

/// Lines describing a view, one per visible banner.
pub fn render_lines(view: &JobView) -> Vec<String> {
    let mut lines = vec![format!("[{}]", view.connection_label())];
    if let Some(banner) = &view.progress {
        lines.push(format!("{:>3}% {}", banner.percent, banner.message));
    }
    if let Some(error) = &view.error {
        lines.push(format!("error: {error}"));
    }
    if let Some(plan) = &view.plan {
        lines.push(plan_summary(plan));
    }
    lines
}

pub fn plan_summary(plan: &PlanDocument) -> String {
    let summary = plan.executive_summary().unwrap_or("(no summary)");
    match plan.confidence() {
        Some(confidence) => format!(
            "plan ready: {summary} (confidence {:.0}%, {} routes)",
            confidence * 100.0,
            plan.route_count()
        ),
        None => format!("plan ready: {summary} ({} routes)", plan.route_count()),
    }
}

/// Suppresses lines already printed for the previous view.
#[derive(Debug, Default)]
pub struct BannerPrinter {
    last: Vec<String>,
}

impl BannerPrinter {
    pub fn changed_lines(&mut self, view: &JobView) -> Vec<String> {
        let lines = render_lines(view);
        let fresh = lines
            .iter()
            .filter(|line| !self.last.contains(line))
            .cloned()
            .collect();
        self.last = lines;
        fresh
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
