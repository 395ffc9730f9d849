use std::fs;
use std::path::{Path, PathBuf};

pub const TASKS_FILE: &str = "current-tasks.json";
pub const TASK_HISTORY_DIR: &str = "task-history";
pub const SESSION_FILE: &str = "latest-session.json";
pub const SESSION_HISTORY_DIR: &str = "session-history";
pub const FEEDBACK_FILE: &str = "pending-feedback.json";
pub const FEEDBACK_HISTORY_DIR: &str = "feedback-history";

/// Return path to the context folder (`ai-context` by default) inside the project root
pub fn context_dir(project_root: &Path, dir_name: &str) -> PathBuf {
  project_root.join(dir_name)
}

/// Standard subpaths under the context folder
pub fn logs_path(context_dir: &Path) -> PathBuf {
  context_dir.join("logs.jsonl")
}

pub fn tasks_dir(context_dir: &Path) -> PathBuf {
  context_dir.join("tasks")
}

pub fn sessions_dir(context_dir: &Path) -> PathBuf {
  context_dir.join("sessions")
}

pub fn feedback_dir(context_dir: &Path) -> PathBuf {
  context_dir.join("feedback")
}

pub fn session_history_dir(context_dir: &Path) -> PathBuf {
  sessions_dir(context_dir).join(SESSION_HISTORY_DIR)
}

/// Ensure the context layout exists (directories are created if missing)
pub fn ensure_layout(context_dir: &Path) -> std::io::Result<()> {
  fs::create_dir_all(tasks_dir(context_dir).join(TASK_HISTORY_DIR))?;
  fs::create_dir_all(session_history_dir(context_dir))?;
  fs::create_dir_all(feedback_dir(context_dir).join(FEEDBACK_HISTORY_DIR))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layout_paths() {
    let td = tempfile::tempdir().unwrap();
    let ctx = context_dir(td.path(), "ai-context");
    assert_eq!(ctx, td.path().join("ai-context"));
    assert_eq!(logs_path(&ctx), td.path().join("ai-context/logs.jsonl"));
    assert_eq!(tasks_dir(&ctx), td.path().join("ai-context/tasks"));
    assert_eq!(session_history_dir(&ctx), td.path().join("ai-context/sessions/session-history"));
  }

  #[test]
  fn ensure_layout_creates_dirs() {
    let td = tempfile::tempdir().unwrap();
    let ctx = context_dir(td.path(), "ai-context");
    ensure_layout(&ctx).unwrap();
    assert!(tasks_dir(&ctx).join(TASK_HISTORY_DIR).is_dir());
    assert!(session_history_dir(&ctx).is_dir());
    assert!(feedback_dir(&ctx).join(FEEDBACK_HISTORY_DIR).is_dir());
  }
}
