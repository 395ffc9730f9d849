use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::task::TaskRepository;
use crate::adapters::fs::{SESSION_FILE, session_history_dir, sessions_dir};
use crate::adapters::git::{CommitInfo, GitService};
use crate::error_handler::{ErrorHandler, HandleOptions};
use crate::errors::{AppError, Result};
use crate::events::{EventBus, TraceIds, now_iso};
use crate::storage::StorageService;

/// The `session_handover` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandover {
  pub session_id: String,
  pub active: bool,
  pub started_at: String,
  #[serde(default)]
  pub ended_at: Option<String>,
  #[serde(default)]
  pub focus_task: Option<String>,
  #[serde(default)]
  pub start_commit: Option<String>,
  #[serde(default)]
  pub end_commit: Option<String>,
  #[serde(default)]
  pub commits: Vec<CommitInfo>,
  #[serde(default)]
  pub task_ids: Vec<String>,
  #[serde(default)]
  pub summary: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
  session_handover: SessionHandover,
}

/// `S` followed by a compact UTC timestamp.
pub fn new_session_id() -> String {
  format!("S{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Work sessions in `sessions/latest-session.json`, with ended sessions copied
/// to `session-history/session-<id>.json`.
pub struct SessionStore {
  storage: Arc<dyn StorageService>,
  dir: PathBuf,
  history_dir: PathBuf,
  tasks: Arc<TaskRepository>,
  git: Option<Arc<dyn GitService>>,
  bus: Option<EventBus>,
  error_handler: Option<Arc<ErrorHandler>>,
}

impl SessionStore {
  pub async fn open(storage: Arc<dyn StorageService>, context_dir: &Path, tasks: Arc<TaskRepository>) -> Result<Self> {
    let dir = sessions_dir(context_dir);
    let history_dir = session_history_dir(context_dir);
    storage.ensure_directory_exists(&dir).await?;
    storage.ensure_directory_exists(&history_dir).await?;
    Ok(Self {
      storage,
      dir,
      history_dir,
      tasks,
      git: None,
      bus: None,
      error_handler: None,
    })
  }

  pub fn with_git(mut self, git: Arc<dyn GitService>) -> Self {
    self.git = Some(git);
    self
  }

  pub fn with_event_bus(mut self, bus: EventBus) -> Self {
    self.bus = Some(bus);
    self
  }

  pub fn with_error_handler(mut self, handler: Arc<ErrorHandler>) -> Self {
    self.error_handler = Some(handler);
    self
  }

  pub fn history_dir(&self) -> &Path {
    &self.history_dir
  }

  async fn fail<T: serde::de::DeserializeOwned>(&self, operation: &str, err: AppError, ids: &TraceIds) -> Result<T> {
    let Some(handler) = &self.error_handler else {
      return Err(err);
    };
    let handled = handler
      .handle(err.clone(), "SessionStore", operation, HandleOptions::with_ids(ids))
      .await?;
    handled.into_result(err)
  }

  fn emit(&self, action: &str, mut payload: Value, ids: &TraceIds) {
    let Some(bus) = &self.bus else { return };
    if let Value::Object(map) = &mut payload {
      ids.write_into(map);
    }
    bus.emit_standardized("session", action, payload);
  }

  /// The latest session, active or not.
  pub async fn latest(&self) -> Result<Option<SessionHandover>> {
    let Some(doc) = self.storage.read_json(&self.dir, SESSION_FILE).await? else {
      return Ok(None);
    };
    match serde_json::from_value::<SessionDocument>(doc) {
      Ok(doc) => Ok(Some(doc.session_handover)),
      Err(e) => {
        warn!(event = "session_document_invalid", error = %e, "ignoring malformed session document");
        Ok(None)
      }
    }
  }

  /// The active session, if any.
  pub async fn current(&self) -> Result<Option<SessionHandover>> {
    Ok(self.latest().await?.filter(|s| s.active))
  }

  async fn write_latest(&self, handover: &SessionHandover) -> Result<()> {
    let doc = serde_json::to_value(SessionDocument {
      session_handover: handover.clone(),
    })?;
    self.storage.write_json(&self.dir, SESSION_FILE, &doc).await?;
    Ok(())
  }

  fn head_commit(&self, when: &str) -> Option<String> {
    let Some(git) = &self.git else {
      warn!(event = "session_git_unavailable", when, "no git service; commit hash left empty");
      return None;
    };
    match git.get_current_commit_hash() {
      Ok(hash) => Some(hash),
      Err(e) => {
        warn!(event = "session_git_unavailable", when, error = %e, "could not read HEAD; commit hash left empty");
        None
      }
    }
  }

  async fn start_inner(&self, focus_task: Option<&str>, ids: &TraceIds) -> Result<SessionHandover> {
    if let Some(active) = self.current().await? {
      return Err(
        AppError::state(format!("session {} is already active", active.session_id))
          .with_context("sessionId", active.session_id),
      );
    }
    if let Some(task) = focus_task {
      self.tasks.set_current_focus(task).await?;
    }
    let handover = SessionHandover {
      session_id: new_session_id(),
      active: true,
      started_at: now_iso(),
      ended_at: None,
      focus_task: focus_task.map(str::to_string),
      start_commit: self.head_commit("start"),
      end_commit: None,
      commits: Vec::new(),
      task_ids: Vec::new(),
      summary: None,
    };
    self.write_latest(&handover).await?;
    info!(event = "session_started", id = %handover.session_id, focus = ?focus_task, "session started");
    self.emit(
      "started",
      json!({
        "id": handover.session_id,
        "focusTask": handover.focus_task,
        "startCommit": handover.start_commit,
      }),
      ids,
    );
    Ok(handover)
  }

  /// Begin a session; fails with a `StateError` while another is active.
  pub async fn start(&self, focus_task: Option<&str>) -> Result<SessionHandover> {
    let ids = TraceIds::generate();
    match self.start_inner(focus_task, &ids).await {
      Ok(s) => Ok(s),
      Err(e) => self.fail("start", e, &ids).await,
    }
  }

  fn commits_since(&self, start: Option<&str>, end: Option<&str>) -> Vec<CommitInfo> {
    let (Some(git), Some(start), Some(end)) = (&self.git, start, end) else {
      return Vec::new();
    };
    match git.get_commits_between(Some(start), end) {
      Ok(commits) => commits,
      Err(e) => {
        warn!(event = "session_commit_scan_failed", error = %e, "could not list session commits");
        Vec::new()
      }
    }
  }

  /// Link every task id mentioned in `commits` to the commit. Unknown ids are skipped.
  pub async fn link_commits(&self, commits: &[CommitInfo]) -> Result<Vec<String>> {
    let mut linked: Vec<String> = Vec::new();
    for commit in commits {
      let mentioned = match &self.git {
        Some(git) => git.extract_task_ids_from_commit_message(&commit.message),
        None => crate::adapters::git::extract_task_ids(&commit.message),
      };
      for id in mentioned {
        if self.tasks.get(&id).await?.is_none() {
          debug!(event = "session_unknown_task", id = %id, hash = %commit.short_hash, "commit mentions unknown task");
          continue;
        }
        self.tasks.link_commit(&id, &commit.hash).await?;
        if !linked.contains(&id) {
          linked.push(id);
        }
      }
    }
    Ok(linked)
  }

  async fn end_inner(&self, summary: Option<&str>, ids: &TraceIds) -> Result<SessionHandover> {
    let Some(mut handover) = self.current().await? else {
      return Err(AppError::state("no active session to end"));
    };
    handover.end_commit = self.head_commit("end");
    handover.commits = self.commits_since(handover.start_commit.as_deref(), handover.end_commit.as_deref());
    handover.task_ids = self.link_commits(&handover.commits).await?;
    handover.ended_at = Some(now_iso());
    handover.summary = summary.map(str::to_string);
    handover.active = false;

    let file = format!("session-{}.json", handover.session_id);
    let doc = serde_json::to_value(SessionDocument {
      session_handover: handover.clone(),
    })?;
    self.storage.write_json(&self.history_dir, &file, &doc).await?;
    self.write_latest(&handover).await?;
    info!(
      event = "session_ended",
      id = %handover.session_id,
      commits = handover.commits.len(),
      tasks = handover.task_ids.len(),
      "session ended"
    );
    self.emit(
      "ended",
      json!({
        "id": handover.session_id,
        "commitCount": handover.commits.len(),
        "taskIds": handover.task_ids,
        "endCommit": handover.end_commit,
      }),
      ids,
    );
    Ok(handover)
  }

  /// Close the active session: collect its commits, link tasks, archive it.
  pub async fn end(&self, summary: Option<&str>) -> Result<SessionHandover> {
    let ids = TraceIds::generate();
    match self.end_inner(summary, &ids).await {
      Ok(s) => Ok(s),
      Err(e) => self.fail("end", e, &ids).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::git::Git2Service;
  use crate::domain::task::NewTask;
  use crate::storage::FileStorageService;
  use test_support::{TempWorkspace, commit_file};

  async fn stores(root: &Path, git: bool) -> (Arc<TaskRepository>, SessionStore) {
    let storage: Arc<dyn StorageService> = Arc::new(FileStorageService::new());
    let ctx = root.join("ai-context");
    let tasks = Arc::new(TaskRepository::open(storage.clone(), &ctx, None, None).await.unwrap());
    let mut sessions = SessionStore::open(storage, &ctx, Arc::clone(&tasks)).await.unwrap();
    if git {
      sessions = sessions.with_git(Arc::new(Git2Service::new(root)));
    }
    (tasks, sessions)
  }

  #[test]
  fn session_ids_are_compact() {
    let id = new_session_id();
    assert!(id.starts_with('S'));
    assert_eq!(id.len(), 17);
    assert!(!id.contains(':'));
  }

  #[tokio::test]
  async fn start_and_end_collect_commits() {
    let ws = TempWorkspace::new();
    let repo = ws.init_git();
    let (tasks, sessions) = stores(&ws.path(), true).await;
    tasks
      .create_task(NewTask {
        id: Some("T001".into()),
        title: "a".into(),
        ..Default::default()
      })
      .await
      .unwrap();

    let started = sessions.start(Some("T001")).await.unwrap();
    assert!(started.start_commit.is_some());
    assert_eq!(tasks.current_focus().await.unwrap().as_deref(), Some("T001"));
    let err = sessions.start(None).await.unwrap_err();
    assert_eq!(err.name(), "StateError");

    let hash = commit_file(&repo, "a.txt", "a", "feat: work on #T001 and T999");
    let ended = sessions.end(Some("done")).await.unwrap();
    assert!(!ended.active);
    assert_eq!(ended.end_commit.as_deref(), Some(hash.as_str()));
    assert_eq!(ended.commits.len(), 1);
    assert_eq!(ended.task_ids, vec!["T001"]);
    assert_eq!(
      tasks.get("T001").await.unwrap().unwrap()["related_commits"],
      json!([hash])
    );
    assert!(sessions.current().await.unwrap().is_none());
    assert!(
      sessions
        .history_dir()
        .join(format!("session-{}.json", ended.session_id))
        .is_file()
    );
    let latest = ws.read_context_json("sessions/latest-session.json");
    assert_eq!(latest["session_handover"]["active"], false);

    let err = sessions.end(None).await.unwrap_err();
    assert_eq!(err.name(), "StateError");
  }

  #[tokio::test]
  async fn works_without_git() {
    let ws = TempWorkspace::new();
    let (_, sessions) = stores(&ws.path(), false).await;
    let started = sessions.start(None).await.unwrap();
    assert_eq!(started.start_commit, None);
    let ended = sessions.end(None).await.unwrap();
    assert_eq!(ended.end_commit, None);
    assert!(ended.commits.is_empty());
  }
}
