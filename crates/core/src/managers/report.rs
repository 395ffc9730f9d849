use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::SessionHandover;
use crate::errors::Result;
use crate::events::now_iso;
use crate::repository::Entity;

use super::{FeedbackManager, SessionManager, TaskManager};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
  pub total: usize,
  pub by_status: BTreeMap<String, usize>,
  pub by_progress: BTreeMap<String, usize>,
}

/// Project snapshot for `status` and `report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
  pub generated_at: String,
  pub tasks: TaskCounts,
  pub current_focus: Option<String>,
  pub active_session: Option<SessionHandover>,
  pub last_session: Option<SessionHandover>,
  pub open_feedback: Vec<Entity>,
  pub task_list: Vec<Entity>,
}

fn tally(tasks: &[Entity], field: &str) -> BTreeMap<String, usize> {
  let mut counts = BTreeMap::new();
  for t in tasks {
    let key = t.get(field).and_then(Value::as_str).unwrap_or("unknown");
    *counts.entry(key.to_string()).or_default() += 1;
  }
  counts
}

pub async fn build_report(tasks: &TaskManager, sessions: &SessionManager, feedback: &FeedbackManager) -> Result<Report> {
  let task_list = tasks.list_tasks(None).await?;
  let latest = sessions.latest().await?;
  let (active_session, last_session) = match latest {
    Some(s) if s.active => (Some(s), None),
    other => (None, other),
  };
  Ok(Report {
    generated_at: now_iso(),
    tasks: TaskCounts {
      total: task_list.len(),
      by_status: tally(&task_list, "status"),
      by_progress: tally(&task_list, "progress_state"),
    },
    current_focus: tasks.repository().current_focus().await?,
    active_session,
    last_session,
    open_feedback: feedback.open_items().await?,
    task_list,
  })
}
