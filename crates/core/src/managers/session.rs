use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapters::git::GitService;
use crate::domain::{SessionHandover, SessionStore};
use crate::errors::{AppError, Result};
use crate::locks::LockManager;

use super::{SESSIONS_RESOURCE, TASKS_RESOURCE, locker_id};

/// Outcome of [`SessionManager::sync`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
  pub since: Option<String>,
  pub head: String,
  pub commits_scanned: usize,
  pub linked_tasks: Vec<String>,
}

pub struct SessionManager {
  sessions: Arc<SessionStore>,
  git: Option<Arc<dyn GitService>>,
  locks: Arc<LockManager>,
  locker: String,
}

impl SessionManager {
  pub fn new(sessions: Arc<SessionStore>, git: Option<Arc<dyn GitService>>, locks: Arc<LockManager>) -> Self {
    Self {
      sessions,
      git,
      locks,
      locker: locker_id("session-manager"),
    }
  }

  /// Starting may record the focus task, so both collections are held.
  /// Locks are always taken sessions first, then tasks.
  pub async fn start(&self, focus_task: Option<&str>) -> Result<SessionHandover> {
    self
      .locks
      .with_lock(SESSIONS_RESOURCE, &self.locker, || {
        self
          .locks
          .with_lock(TASKS_RESOURCE, &self.locker, || self.sessions.start(focus_task))
      })
      .await
  }

  /// Ending links commits into tasks; same lock order as [`Self::start`].
  pub async fn end(&self, summary: Option<&str>) -> Result<SessionHandover> {
    self
      .locks
      .with_lock(SESSIONS_RESOURCE, &self.locker, || {
        self
          .locks
          .with_lock(TASKS_RESOURCE, &self.locker, || self.sessions.end(summary))
      })
      .await
  }

  pub async fn current(&self) -> Result<Option<SessionHandover>> {
    self.sessions.current().await
  }

  pub async fn latest(&self) -> Result<Option<SessionHandover>> {
    self.sessions.latest().await
  }

  /// Link task ids found in commits after `since` (default: the last
  /// session's end commit, else the whole history) up to HEAD.
  pub async fn sync(&self, since: Option<&str>) -> Result<SyncReport> {
    let Some(git) = &self.git else {
      return Err(AppError::git("sync requires a git repository"));
    };
    let since = match since {
      Some(rev) => Some(rev.to_string()),
      None => self.sessions.latest().await?.and_then(|s| s.end_commit.or(s.start_commit)),
    };
    let head = git.get_current_commit_hash()?;
    let commits = git.get_commits_between(since.as_deref(), &head)?;
    let linked = self
      .locks
      .with_lock(TASKS_RESOURCE, &self.locker, || self.sessions.link_commits(&commits))
      .await?;
    info!(event = "sync_completed", since = ?since, commits = commits.len(), linked = linked.len(), "sync completed");
    Ok(SyncReport {
      since,
      head,
      commits_scanned: commits.len(),
      linked_tasks: linked,
    })
  }
}
