//! Typed error envelope shared by every layer.
//!
//! Every failure that crosses a component boundary is an [`AppError`]: a
//! `name`/`code`/`message` triple plus a JSON `context` map, an optional
//! cause chain and a `recoverable` flag the [`ErrorHandler`](crate::error_handler::ErrorHandler)
//! uses to decide whether a recovery strategy may run.
//!
//! | Kind | Name | Default code | Recoverable |
//! |------|------|--------------|-------------|
//! | Application | `ApplicationError` | `ERR_APPLICATION` | no |
//! | Validation | `ValidationError` | `ERR_VALIDATION` | yes |
//! | State | `StateError` | `ERR_STATE` | no |
//! | DataConsistency | `DataConsistencyError` | `ERR_DATA_CONSISTENCY` | no |
//! | Storage | `StorageError` | `ERR_STORAGE` | yes |
//! | Git | `GitError` | `ERR_GIT` | yes |
//! | Lock | `LockError` | `ERR_LOCK_TIMEOUT` | yes |
//! | Timeout | `TimeoutError` | `ERR_TIMEOUT` | yes |
//! | Configuration | `ConfigurationError` | `ERR_CONFIG` | no |
//! | Dependency | `DependencyError` | `ERR_DEPENDENCY` | yes |
//! | NotFound | `NotFoundError` | `ERR_NOT_FOUND` | yes |
//! | Cli | `CliError` | `ERR_CLI` | no |
//! | Event | `EventError` | `ERR_EVENT` | no |

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Free-form context attached to an error.
pub type Context = Map<String, Value>;

/// Shared, clonable cause.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
  Application,
  Validation,
  State,
  DataConsistency,
  Storage,
  Git,
  Lock,
  Timeout,
  Configuration,
  Dependency,
  NotFound,
  Cli,
  Event,
}

impl ErrorKind {
  pub const ALL: [ErrorKind; 13] = [
    ErrorKind::Application,
    ErrorKind::Validation,
    ErrorKind::State,
    ErrorKind::DataConsistency,
    ErrorKind::Storage,
    ErrorKind::Git,
    ErrorKind::Lock,
    ErrorKind::Timeout,
    ErrorKind::Configuration,
    ErrorKind::Dependency,
    ErrorKind::NotFound,
    ErrorKind::Cli,
    ErrorKind::Event,
  ];

  /// Type name used for strategy lookup, statistics and serialized errors.
  pub fn name(self) -> &'static str {
    match self {
      ErrorKind::Application => "ApplicationError",
      ErrorKind::Validation => "ValidationError",
      ErrorKind::State => "StateError",
      ErrorKind::DataConsistency => "DataConsistencyError",
      ErrorKind::Storage => "StorageError",
      ErrorKind::Git => "GitError",
      ErrorKind::Lock => "LockError",
      ErrorKind::Timeout => "TimeoutError",
      ErrorKind::Configuration => "ConfigurationError",
      ErrorKind::Dependency => "DependencyError",
      ErrorKind::NotFound => "NotFoundError",
      ErrorKind::Cli => "CliError",
      ErrorKind::Event => "EventError",
    }
  }

  pub fn default_code(self) -> &'static str {
    match self {
      ErrorKind::Application => "ERR_APPLICATION",
      ErrorKind::Validation => "ERR_VALIDATION",
      ErrorKind::State => "ERR_STATE",
      ErrorKind::DataConsistency => "ERR_DATA_CONSISTENCY",
      ErrorKind::Storage => "ERR_STORAGE",
      ErrorKind::Git => "ERR_GIT",
      ErrorKind::Lock => "ERR_LOCK_TIMEOUT",
      ErrorKind::Timeout => "ERR_TIMEOUT",
      ErrorKind::Configuration => "ERR_CONFIG",
      ErrorKind::Dependency => "ERR_DEPENDENCY",
      ErrorKind::NotFound => "ERR_NOT_FOUND",
      ErrorKind::Cli => "ERR_CLI",
      ErrorKind::Event => "ERR_EVENT",
    }
  }

  pub fn default_recoverable(self) -> bool {
    matches!(
      self,
      ErrorKind::Validation
        | ErrorKind::Storage
        | ErrorKind::Git
        | ErrorKind::Lock
        | ErrorKind::Timeout
        | ErrorKind::Dependency
        | ErrorKind::NotFound
    )
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|k| k.name() == name)
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// The error envelope: `{ name, message, code, cause?, context, recoverable, stack }`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
  kind: ErrorKind,
  message: String,
  code: String,
  #[source]
  cause: Option<Cause>,
  context: Context,
  recoverable: bool,
  stack: Option<String>,
}

impl AppError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    let backtrace = Backtrace::capture();
    let stack = match backtrace.status() {
      BacktraceStatus::Captured => Some(backtrace.to_string()),
      _ => None,
    };
    Self {
      kind,
      message: message.into(),
      code: kind.default_code().to_string(),
      cause: None,
      context: Context::new(),
      recoverable: kind.default_recoverable(),
      stack,
    }
  }

  pub fn application(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Application, message)
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn state(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::State, message)
  }

  pub fn data_consistency(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::DataConsistency, message)
  }

  pub fn storage(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Storage, message)
  }

  pub fn git(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Git, message)
  }

  pub fn lock(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Lock, message)
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Timeout, message)
  }

  pub fn configuration(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Configuration, message)
  }

  pub fn dependency(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Dependency, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NotFound, message)
  }

  pub fn event(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Event, message)
  }

  /// CLI-facing error; `code` is usually `ERR_CLI_<CLASS>_<OP>`.
  pub fn cli(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Cli, message).with_code(code)
  }

  /// Wrap a foreign error as an `ApplicationError`, keeping it as the cause.
  pub fn wrap<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Self::application(err.to_string()).with_cause(err)
  }

  /// Recover an `AppError` hidden inside an `anyhow::Error`, or wrap it.
  pub fn from_anyhow(err: anyhow::Error) -> Self {
    match err.downcast::<AppError>() {
      Ok(app) => app,
      Err(other) => {
        let message = other.to_string();
        let boxed: Box<dyn StdError + Send + Sync + 'static> = other.into();
        Self::application(message).with_shared_cause(Arc::from(boxed))
      }
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = code.into();
    self
  }

  pub fn with_cause<E>(mut self, cause: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    self.cause = Some(Arc::new(cause));
    self
  }

  pub fn with_shared_cause(mut self, cause: Cause) -> Self {
    self.cause = Some(cause);
    self
  }

  pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.context.insert(key.into(), value.into());
    self
  }

  pub fn with_context_map(mut self, context: Context) -> Self {
    self.context.extend(context);
    self
  }

  pub fn with_recoverable(mut self, recoverable: bool) -> Self {
    self.recoverable = recoverable;
    self
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn name(&self) -> &'static str {
    self.kind.name()
  }

  pub fn code(&self) -> &str {
    &self.code
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn context(&self) -> &Context {
    &self.context
  }

  pub fn context_mut(&mut self) -> &mut Context {
    &mut self.context
  }

  pub fn recoverable(&self) -> bool {
    self.recoverable
  }

  pub fn stack(&self) -> Option<&str> {
    self.stack.as_deref()
  }

  pub fn cause(&self) -> Option<&Cause> {
    self.cause.as_ref()
  }

  pub fn is(&self, kind: ErrorKind) -> bool {
    self.kind == kind
  }

  /// True for the kinds repositories and managers pass through untouched.
  pub fn is_domain_error(&self) -> bool {
    matches!(
      self.kind,
      ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::DataConsistency | ErrorKind::State
    )
  }

  /// Serialized form used in event payloads.
  pub fn to_json(&self, include_stack: bool) -> Value {
    let mut out = json!({
      "name": self.name(),
      "message": self.message,
      "code": self.code,
      "context": Value::Object(self.context.clone()),
      "recoverable": self.recoverable,
    });
    if let Some(cause) = &self.cause {
      let cause_json = match cause.downcast_ref::<AppError>() {
        Some(app) => app.to_json(include_stack),
        None => json!({ "message": cause.to_string() }),
      };
      out["cause"] = cause_json;
    }
    if include_stack && let Some(stack) = &self.stack {
      out["stack"] = Value::String(stack.clone());
    }
    out
  }
}

impl From<std::io::Error> for AppError {
  fn from(err: std::io::Error) -> Self {
    let not_found = err.kind() == std::io::ErrorKind::NotFound;
    let app = AppError::storage(format!("io: {err}")).with_cause(err);
    if not_found {
      app.with_context("ioKind", "not_found")
    } else {
      app
    }
  }
}

impl From<serde_json::Error> for AppError {
  fn from(err: serde_json::Error) -> Self {
    AppError::storage(format!("json: {err}")).with_cause(err)
  }
}

impl From<git2::Error> for AppError {
  fn from(err: git2::Error) -> Self {
    AppError::git(format!("git: {}", err.message())).with_cause(err)
  }
}
