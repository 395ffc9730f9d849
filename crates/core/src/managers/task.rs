use std::sync::Arc;

use crate::domain::{NewTask, ProgressState, TaskRepository, TaskStatus};
use crate::errors::Result;
use crate::locks::LockManager;
use crate::repository::Entity;

use super::{TASKS_RESOURCE, locker_id};

pub struct TaskManager {
  tasks: Arc<TaskRepository>,
  locks: Arc<LockManager>,
  locker: String,
}

impl TaskManager {
  pub fn new(tasks: Arc<TaskRepository>, locks: Arc<LockManager>) -> Self {
    Self {
      tasks,
      locks,
      locker: locker_id("task-manager"),
    }
  }

  pub fn repository(&self) -> &Arc<TaskRepository> {
    &self.tasks
  }

  pub async fn create_task(&self, input: NewTask) -> Result<Entity> {
    self
      .locks
      .with_lock(TASKS_RESOURCE, &self.locker, || self.tasks.create_task(input))
      .await
  }

  pub async fn update_task(&self, id: &str, changes: Entity) -> Result<Entity> {
    self
      .locks
      .with_lock(TASKS_RESOURCE, &self.locker, || self.tasks.update_task(id, changes))
      .await
  }

  pub async fn update_progress(&self, id: &str, state: ProgressState) -> Result<Entity> {
    self
      .locks
      .with_lock(TASKS_RESOURCE, &self.locker, || self.tasks.update_task_progress(id, state))
      .await
  }

  pub async fn add_dependency(&self, id: &str, dep: &str) -> Result<Entity> {
    self
      .locks
      .with_lock(TASKS_RESOURCE, &self.locker, || self.tasks.add_dependency(id, dep))
      .await
  }

  pub async fn set_focus(&self, id: &str) -> Result<()> {
    self
      .locks
      .with_lock(TASKS_RESOURCE, &self.locker, || self.tasks.set_current_focus(id))
      .await
  }

  pub async fn get_task(&self, id: &str) -> Result<Option<Entity>> {
    self.tasks.get(id).await
  }

  pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Entity>> {
    match status {
      Some(status) => self.tasks.tasks_by_status(status).await,
      None => self.tasks.list().await,
    }
  }
}
