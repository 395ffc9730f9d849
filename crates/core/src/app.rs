//! Process wiring: one [`ServiceContainer`] holding the shared services,
//! stores and managers for a project root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::fs::{context_dir, ensure_layout, logs_path};
use crate::adapters::git::{Git2Service, GitService};
use crate::config::Config;
use crate::container::ServiceContainer;
use crate::domain::{FeedbackStore, SessionStore, TaskRepository};
use crate::error_handler::ErrorHandler;
use crate::errors::Result;
use crate::events::{BusOptions, EventBus, EventCatalog};
use crate::locks::LockManager;
use crate::managers::{FeedbackManager, ManagerAdapter, SessionManager, TaskManager};
use crate::plugins::PluginManager;
use crate::storage::{FileStorageService, StorageService};

pub mod services {
  pub const CONFIG: &str = "config";
  pub const EVENT_BUS: &str = "event_bus";
  pub const ERROR_HANDLER: &str = "error_handler";
  pub const LOCK_MANAGER: &str = "lock_manager";
  pub const PLUGIN_MANAGER: &str = "plugin_manager";
  pub const STORAGE: &str = "storage";
  pub const GIT: &str = "git";
  pub const TASK_REPOSITORY: &str = "task_repository";
  pub const FEEDBACK_STORE: &str = "feedback_store";
  pub const SESSION_STORE: &str = "session_store";
  pub const TASK_MANAGER: &str = "task_manager";
  pub const SESSION_MANAGER: &str = "session_manager";
  pub const FEEDBACK_MANAGER: &str = "feedback_manager";
}

pub struct AppContext {
  root: PathBuf,
  context_dir: PathBuf,
  container: ServiceContainer,
}

impl AppContext {
  /// Create the context layout under `root` and register every service.
  pub async fn bootstrap(root: &Path, config: Config) -> Result<Self> {
    let ctx_dir = context_dir(root, &config.context_dir);
    ensure_layout(&ctx_dir)?;

    let bus = EventBus::with_options(BusOptions {
      keep_history: config.events.keep_history,
      history_limit: config.events.history_limit,
    });
    bus.set_catalog(EventCatalog::with_defaults());
    let handler = Arc::new(
      ErrorHandler::new()
        .with_event_bus(bus.clone())
        .with_stack_traces(config.include_stack_traces)
        .with_default_strategies(),
    );
    let locks = Arc::new(LockManager::new(config.locks).with_event_bus(bus.clone()));
    let plugins = Arc::new(PluginManager::new().with_event_bus(bus.clone()));
    let storage: Arc<dyn StorageService> = Arc::new(FileStorageService::new());

    let git2 = Git2Service::new(root).with_debug(config.debug_git);
    let git: Option<Arc<dyn GitService>> = if git2.is_available() {
      Some(Arc::new(git2))
    } else {
      warn!(event = "git_unavailable", root = %root.display(), "not a git repository; commit tracking disabled");
      None
    };

    let tasks = Arc::new(
      TaskRepository::open(storage.clone(), &ctx_dir, Some(bus.clone()), Some(Arc::clone(&handler))).await?,
    );
    let feedback = Arc::new(
      FeedbackStore::open(storage.clone(), &ctx_dir, Some(bus.clone()), Some(Arc::clone(&handler))).await?,
    );
    let mut sessions = SessionStore::open(storage.clone(), &ctx_dir, Arc::clone(&tasks))
      .await?
      .with_event_bus(bus.clone())
      .with_error_handler(Arc::clone(&handler));
    if let Some(git) = &git {
      sessions = sessions.with_git(Arc::clone(git));
    }

    let container = ServiceContainer::new();
    container.register(services::CONFIG, config);
    container.register(services::EVENT_BUS, bus);
    container.register_arc(services::ERROR_HANDLER, handler);
    container.register_arc(services::LOCK_MANAGER, locks);
    container.register_arc(services::PLUGIN_MANAGER, plugins);
    container.register(services::STORAGE, storage);
    if let Some(git) = git {
      container.register(services::GIT, git);
    }
    container.register_arc(services::TASK_REPOSITORY, tasks);
    container.register_arc(services::FEEDBACK_STORE, feedback);
    container.register_arc(services::SESSION_STORE, Arc::new(sessions));

    container.register_factory(services::TASK_MANAGER, |c| {
      Ok(TaskManager::new(
        c.get::<TaskRepository>(services::TASK_REPOSITORY)?,
        c.get::<LockManager>(services::LOCK_MANAGER)?,
      ))
    });
    container.register_factory(services::SESSION_MANAGER, |c| {
      let git = if c.has(services::GIT) {
        Some(Arc::clone(c.get::<Arc<dyn GitService>>(services::GIT)?.as_ref()))
      } else {
        None
      };
      Ok(SessionManager::new(
        c.get::<SessionStore>(services::SESSION_STORE)?,
        git,
        c.get::<LockManager>(services::LOCK_MANAGER)?,
      ))
    });
    container.register_factory(services::FEEDBACK_MANAGER, |c| {
      Ok(FeedbackManager::new(
        c.get::<FeedbackStore>(services::FEEDBACK_STORE)?,
        c.get::<TaskRepository>(services::TASK_REPOSITORY)?,
        c.get::<LockManager>(services::LOCK_MANAGER)?,
      ))
    });

    info!(event = "app_bootstrapped", root = %root.display(), context_dir = %ctx_dir.display(), "services registered");
    Ok(Self {
      root: root.to_path_buf(),
      context_dir: ctx_dir,
      container,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn context_dir(&self) -> &Path {
    &self.context_dir
  }

  pub fn logs_path(&self) -> PathBuf {
    logs_path(&self.context_dir)
  }

  pub fn container(&self) -> &ServiceContainer {
    &self.container
  }

  pub fn config(&self) -> Result<Arc<Config>> {
    self.container.get(services::CONFIG)
  }

  pub fn event_bus(&self) -> Result<EventBus> {
    Ok(self.container.get::<EventBus>(services::EVENT_BUS)?.as_ref().clone())
  }

  pub fn error_handler(&self) -> Result<Arc<ErrorHandler>> {
    self.container.get(services::ERROR_HANDLER)
  }

  pub fn lock_manager(&self) -> Result<Arc<LockManager>> {
    self.container.get(services::LOCK_MANAGER)
  }

  pub fn plugin_manager(&self) -> Result<Arc<PluginManager>> {
    self.container.get(services::PLUGIN_MANAGER)
  }

  pub fn task_manager(&self) -> Result<Arc<TaskManager>> {
    self.container.get(services::TASK_MANAGER)
  }

  pub fn session_manager(&self) -> Result<Arc<SessionManager>> {
    self.container.get(services::SESSION_MANAGER)
  }

  pub fn feedback_manager(&self) -> Result<Arc<FeedbackManager>> {
    self.container.get(services::FEEDBACK_MANAGER)
  }

  /// Adapter for the façade of `component`, wired to the shared bus and handler.
  pub fn adapter(&self, component: &str, class_name: &str) -> Result<ManagerAdapter> {
    let include_stack = self.config()?.include_stack_traces;
    Ok(
      ManagerAdapter::new(component, class_name, self.event_bus()?)
        .with_error_handler(self.error_handler()?)
        .with_stack_traces(include_stack),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_support::TempWorkspace;

  #[tokio::test]
  async fn bootstrap_registers_services() {
    let ws = TempWorkspace::new();
    ws.init_git();
    let app = AppContext::bootstrap(&ws.path(), Config::default()).await.unwrap();
    assert!(ws.context_path("tasks/task-history").is_dir());
    for name in [services::GIT, services::TASK_MANAGER, services::SESSION_MANAGER, services::FEEDBACK_MANAGER] {
      assert!(app.container().has(name), "{name}");
    }
    let a = app.task_manager().unwrap();
    let b = app.task_manager().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(app.event_bus().unwrap().catalog().is_some());
    assert!(app.session_manager().is_ok());
  }

  #[tokio::test]
  async fn git_is_optional() {
    let ws = TempWorkspace::new();
    let app = AppContext::bootstrap(&ws.path(), Config::default()).await.unwrap();
    assert!(!app.container().has(services::GIT));
    let sessions = app.session_manager().unwrap();
    assert!(sessions.sync(None).await.is_err());
  }
}
