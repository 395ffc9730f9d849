use aictx_core::app::AppContext;
use aictx_core::domain::SessionHandover;
use aictx_core::errors::Result;
use serde_json::json;

use crate::args::{EndSessionArgs, StartSessionArgs};

pub async fn start_session(app: &AppContext, args: StartSessionArgs) -> Result<String> {
  let sessions = app.session_manager()?;
  let adapter = app.adapter("session", "SessionManager")?;
  let focus = args.focus.as_deref();
  let session: SessionHandover = adapter
    .call("start", json!({"focus": focus}), || sessions.start(focus))
    .await?;
  let mut out = format!("started session {}", session.session_id);
  if let Some(task) = &session.focus_task {
    out.push_str(&format!(" (focus {task})"));
  }
  Ok(out)
}

pub async fn end_session(app: &AppContext, args: EndSessionArgs) -> Result<String> {
  let sessions = app.session_manager()?;
  let adapter = app.adapter("session", "SessionManager")?;
  let summary = args.summary.as_deref();
  let session: SessionHandover = adapter
    .call("end", json!({"summary": summary}), || sessions.end(summary))
    .await?;
  let tasks = if session.task_ids.is_empty() {
    "none".to_string()
  } else {
    session.task_ids.join(", ")
  };
  Ok(format!(
    "ended session {}: {} commit(s), tasks: {tasks}",
    session.session_id,
    session.commits.len()
  ))
}
