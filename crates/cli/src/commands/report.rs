use std::fmt::Write as _;

use aictx_core::app::AppContext;
use aictx_core::errors::Result;
use aictx_core::managers::{Report, build_report};
use aictx_core::repository::Entity;
use serde_json::{Value, json};
use yansi::Paint;

use crate::args::{ReportArgs, ReportFormat};

async fn load(app: &AppContext) -> Result<Report> {
  let tasks = app.task_manager()?;
  let sessions = app.session_manager()?;
  let feedback = app.feedback_manager()?;
  let adapter = app.adapter("report", "ReportManager")?;
  adapter
    .call("build_report", json!({}), || build_report(&tasks, &sessions, &feedback))
    .await
}

fn str_of<'a>(v: &'a Value, key: &str) -> &'a str {
  v.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn field<'a>(entity: &'a Entity, key: &str) -> &'a str {
  entity.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn session_line(report: &Report) -> String {
  match (&report.active_session, &report.last_session) {
    (Some(s), _) => format!(
      "session: {} active since {}{}",
      s.session_id,
      s.started_at,
      s.focus_task.as_ref().map(|t| format!(" (focus {t})")).unwrap_or_default()
    ),
    (None, Some(s)) => format!(
      "session: none active; last {} ended {}",
      s.session_id,
      s.ended_at.as_deref().unwrap_or("-")
    ),
    (None, None) => "session: none".to_string(),
  }
}

/// Short overview used by `status`.
pub fn render_status(report: &Report) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{}", session_line(report));
  let _ = writeln!(out, "focus: {}", report.current_focus.as_deref().unwrap_or("-"));
  let _ = writeln!(out, "{:<5} {:<12} {:<15} {:<3} TITLE", "ID", "STATUS", "PROGRESS", "PRI");
  for t in &report.task_list {
    let _ = writeln!(
      out,
      "{:<5} {:<12} {:<15} {:<3} {}",
      field(t, "id"),
      field(t, "status"),
      field(t, "progress_state"),
      t.get("priority").map(Value::to_string).unwrap_or_else(|| "-".into()),
      field(t, "title"),
    );
  }
  let _ = write!(out, "open feedback: {}", report.open_feedback.len());
  out
}

/// Full plain-text report.
pub fn render_text(report: &Report) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{}", "Project report".bold());
  let _ = writeln!(out, "generated: {}", report.generated_at);
  let _ = writeln!(out);
  let _ = writeln!(out, "{}", "Tasks".bold());
  let _ = writeln!(out, "total: {}", report.tasks.total);
  for (status, count) in &report.tasks.by_status {
    let _ = writeln!(out, "  {status}: {count}");
  }
  let _ = writeln!(out, "progress:");
  for (state, count) in &report.tasks.by_progress {
    let _ = writeln!(out, "  {state}: {count}");
  }
  let _ = writeln!(out);
  let _ = writeln!(out, "{}", "Session".bold());
  let _ = writeln!(out, "{}", session_line(report));
  if let Some(s) = &report.last_session {
    for c in &s.commits {
      let _ = writeln!(out, "  {} {}", c.short_hash, c.message.lines().next().unwrap_or_default());
    }
  }
  let _ = writeln!(out);
  let _ = writeln!(out, "{}", "Open feedback".bold());
  if report.open_feedback.is_empty() {
    let _ = writeln!(out, "none");
  }
  for f in &report.open_feedback {
    let lp = f.get("feedback_loop").cloned().unwrap_or(Value::Null);
    let _ = writeln!(
      out,
      "  {} [{}] {}: {}",
      field(f, "feedback_id"),
      str_of(&lp, "severity"),
      str_of(&lp, "task_id"),
      str_of(&lp, "content"),
    );
  }
  out
}

pub async fn report(app: &AppContext, args: ReportArgs) -> Result<String> {
  let report = load(app).await?;
  let body = match args.format {
    ReportFormat::Text => render_text(&report),
    ReportFormat::Json => serde_json::to_string_pretty(&report)?,
  };
  match args.output {
    Some(path) => {
      std::fs::write(&path, &body)?;
      Ok(format!("report written to {}", path.display()))
    }
    None => Ok(body.trim_end().to_string()),
  }
}

pub async fn status(app: &AppContext) -> Result<String> {
  Ok(render_status(&load(app).await?))
}
