use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::AppError;

/// Log level for the CLI and library logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl LogLevel {
  pub fn as_filter(self) -> &'static str {
    match self {
      LogLevel::Off => "off",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

/// Event bus settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
  /// Retain recent emissions in memory
  pub keep_history: bool,
  /// Ring size when `keep_history` is on (defaults to 100)
  pub history_limit: usize,
}

impl Default for EventsConfig {
  fn default() -> Self {
    Self {
      keep_history: false,
      history_limit: 100,
    }
  }
}

/// Advisory lock settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
  /// Age in milliseconds after which a held lock may be taken over
  pub lock_timeout_ms: u64,
  /// Sleep between acquisition attempts
  pub retry_interval_ms: u64,
  pub max_retries: u32,
  /// Default wall-clock budget for one `acquire_lock` call
  pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      lock_timeout_ms: 30_000,
      retry_interval_ms: 100,
      max_retries: 50,
      acquire_timeout_ms: 5_000,
    }
  }
}

impl LockConfig {
  pub fn lock_timeout(&self) -> Duration {
    Duration::from_millis(self.lock_timeout_ms)
  }

  pub fn retry_interval(&self) -> Duration {
    Duration::from_millis(self.retry_interval_ms)
  }

  pub fn acquire_timeout(&self) -> Duration {
    Duration::from_millis(self.acquire_timeout_ms)
  }
}

/// Effective configuration after merging defaults, global, and project config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub log_level: LogLevel,
  /// Directory (relative to the project root) holding tasks, sessions and feedback
  pub context_dir: String,
  /// Serialize captured stacks into error events
  pub include_stack_traces: bool,
  /// Debug-level tracing around git calls
  pub debug_git: bool,
  pub events: EventsConfig,
  pub locks: LockConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_level: LogLevel::Info,
      context_dir: "ai-context".to_string(),
      include_stack_traces: false,
      debug_git: false,
      events: EventsConfig::default(),
      locks: LockConfig::default(),
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("invalid config value `{field}`: {reason}")]
  Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for AppError {
  fn from(err: ConfigError) -> Self {
    let field = match &err {
      ConfigError::Invalid { field, .. } => Some(*field),
      _ => None,
    };
    let app = AppError::configuration(err.to_string()).with_cause(err);
    match field {
      Some(field) => app.with_context("field", field),
      None => app,
    }
  }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
