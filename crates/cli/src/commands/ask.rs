//! `ragflow ask` — Answer one question and print the step report.

use std::fmt::Write as _;

use ragflow_config::AppConfig;
use ragflow_core::{Query, SessionId, StepState, StepStatus};
use ragflow_workflow::StatusReport;
use tokio_util::sync::CancellationToken;

use crate::bootstrap;

pub async fn run(
    config: AppConfig,
    question: String,
    json: bool,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = session.map(SessionId::from).unwrap_or_default();
    let query = Query::new(question, session)?;
    let engine = bootstrap::build_engine(&config).await?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let report = engine.ask(&query, cancel).await;
    ctrl_c.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }

    if report.is_completed() {
        Ok(())
    } else {
        let reason = report.error.unwrap_or_else(|| "unknown error".into());
        Err(format!("Query failed: {reason}").into())
    }
}

fn format_step(status: &StepStatus) -> String {
    let mark = match status.status {
        StepState::Done => "✓",
        StepState::Failed => "✗",
        StepState::Pending => "…",
    };

    let mut details = Vec::new();
    if let Some(n) = status.docs_found {
        details.push(format!("docs_found: {n}"));
    }
    if let Some(clarify) = status.clarify {
        details.push(format!("clarify: {clarify}"));
    }
    if let Some(d) = status.best_distance {
        details.push(format!("best_distance: {d:.3}"));
    }
    if let Some(n) = status.attempts {
        details.push(format!("attempts: {n}"));
    }

    let mut line = format!("  {mark} {}", status.step);
    if !details.is_empty() {
        let _ = write!(line, " ({})", details.join(", "));
    }
    if let Some(error) = &status.error {
        let _ = write!(line, ": {error}");
    }
    line
}

/// Human-readable rendering of a status report.
pub fn format_report(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session: {}", report.session_id);

    let _ = writeln!(out, "Steps:");
    for status in &report.steps {
        let _ = writeln!(out, "{}", format_step(status));
    }

    if !report.documents.is_empty() {
        let _ = writeln!(out, "Documents:");
        for (i, doc) in report.documents.iter().enumerate() {
            let _ = writeln!(out, "  {}. {} (distance: {:.3})", i + 1, doc.source, doc.score);
        }
    }

    if !report.answer.is_empty() {
        let _ = writeln!(out, "Answer:\n{}", report.answer.trim());
    }
    if let Some(error) = &report.error {
        let _ = writeln!(out, "Error ({}): {error}", report.error_kind.as_deref().unwrap_or("unknown"));
    }
    out
}
