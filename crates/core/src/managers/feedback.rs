use std::sync::Arc;

use crate::domain::{FeedbackStatus, FeedbackStore, TaskRepository};
use crate::errors::{AppError, Result};
use crate::locks::LockManager;
use crate::repository::Entity;

use super::{FEEDBACK_RESOURCE, locker_id};

pub struct FeedbackManager {
  feedback: Arc<FeedbackStore>,
  tasks: Arc<TaskRepository>,
  locks: Arc<LockManager>,
  locker: String,
}

impl FeedbackManager {
  pub fn new(feedback: Arc<FeedbackStore>, tasks: Arc<TaskRepository>, locks: Arc<LockManager>) -> Self {
    Self {
      feedback,
      tasks,
      locks,
      locker: locker_id("feedback-manager"),
    }
  }

  /// Record feedback against an existing task.
  pub async fn collect(&self, task_id: &str, content: &str, severity: &str) -> Result<Entity> {
    if self.tasks.get(task_id).await?.is_none() {
      return Err(AppError::not_found(format!("task with ID {task_id} not found")).with_context("id", task_id));
    }
    self
      .locks
      .with_lock(FEEDBACK_RESOURCE, &self.locker, || {
        self.feedback.create(task_id, content, severity)
      })
      .await
  }

  pub async fn set_status(&self, id: &str, status: FeedbackStatus) -> Result<Entity> {
    self
      .locks
      .with_lock(FEEDBACK_RESOURCE, &self.locker, || self.feedback.update_status(id, status))
      .await
  }

  pub async fn resolve(&self, id: &str) -> Result<Entity> {
    self.set_status(id, FeedbackStatus::Resolved).await
  }

  pub async fn list(&self) -> Result<Vec<Entity>> {
    self.feedback.list().await
  }

  /// Items that are neither resolved nor wontfix.
  pub async fn open_items(&self) -> Result<Vec<Entity>> {
    Ok(
      self
        .feedback
        .list()
        .await?
        .into_iter()
        .filter(|f| {
          f["feedback_loop"]["status"]
            .as_str()
            .and_then(|s| s.parse::<FeedbackStatus>().ok())
            .is_some_and(|s| !s.is_closed())
        })
        .collect(),
    )
  }
}
