use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::paths::{global_config_path, project_config_path};
use super::types::{Config, EventsConfig, LockConfig, LogLevel, Result};
use super::validate::validate;

/// Load configuration by resolving the default global and project paths.
/// Project config overrides global; both override defaults. Environment
/// overrides are applied last.
pub fn load(project_root: Option<&Path>) -> Result<Config> {
  let global = global_config_path();
  let project = project_root.map(project_config_path);
  let cfg = load_from_paths(global.as_deref(), project.as_deref())?;
  let cfg = apply_env_overrides(cfg, |key| env::var(key).ok());
  validate(&cfg)?;
  Ok(cfg)
}

/// Load configuration from explicit file paths (if present), without env overrides.
pub fn load_from_paths(global: Option<&Path>, project: Option<&Path>) -> Result<Config> {
  let mut cfg = Config::default();

  if let Some(g) = global
    && let Ok(s) = fs::read_to_string(g)
  {
    let partial: PartialConfig = toml::from_str(&s)?;
    cfg = partial.merge_over(cfg);
  }

  if let Some(p) = project
    && let Ok(s) = fs::read_to_string(p)
  {
    let partial: PartialConfig = toml::from_str(&s)?;
    cfg = partial.merge_over(cfg);
  }

  validate(&cfg)?;

  Ok(cfg)
}

/// `AICTX_ENV=development` turns on stack traces in error events; a truthy
/// `DEBUG_GIT` turns on git tracing.
pub fn apply_env_overrides<F>(mut cfg: Config, lookup: F) -> Config
where
  F: Fn(&str) -> Option<String>,
{
  if lookup("AICTX_ENV").is_some_and(|v| v.eq_ignore_ascii_case("development")) {
    cfg.include_stack_traces = true;
  }
  if lookup("DEBUG_GIT").is_some_and(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")) {
    cfg.debug_git = true;
  }
  cfg
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialEventsConfig {
  pub keep_history: Option<bool>,
  pub history_limit: Option<usize>,
}

impl PartialEventsConfig {
  fn merge_over(self, base: EventsConfig) -> EventsConfig {
    EventsConfig {
      keep_history: self.keep_history.unwrap_or(base.keep_history),
      history_limit: self.history_limit.unwrap_or(base.history_limit),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialLockConfig {
  pub lock_timeout_ms: Option<u64>,
  pub retry_interval_ms: Option<u64>,
  pub max_retries: Option<u32>,
  pub acquire_timeout_ms: Option<u64>,
}

impl PartialLockConfig {
  fn merge_over(self, base: LockConfig) -> LockConfig {
    LockConfig {
      lock_timeout_ms: self.lock_timeout_ms.unwrap_or(base.lock_timeout_ms),
      retry_interval_ms: self.retry_interval_ms.unwrap_or(base.retry_interval_ms),
      max_retries: self.max_retries.unwrap_or(base.max_retries),
      acquire_timeout_ms: self.acquire_timeout_ms.unwrap_or(base.acquire_timeout_ms),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialConfig {
  pub log_level: Option<LogLevel>,
  pub context_dir: Option<String>,
  pub include_stack_traces: Option<bool>,
  pub debug_git: Option<bool>,
  pub events: Option<PartialEventsConfig>,
  pub locks: Option<PartialLockConfig>,
}

impl PartialConfig {
  fn merge_over(self, base: Config) -> Config {
    let PartialConfig {
      log_level,
      context_dir,
      include_stack_traces,
      debug_git,
      events,
      locks,
    } = self;

    let Config {
      log_level: base_log_level,
      context_dir: base_context_dir,
      include_stack_traces: base_include_stack_traces,
      debug_git: base_debug_git,
      events: base_events,
      locks: base_locks,
    } = base;

    Config {
      log_level: log_level.unwrap_or(base_log_level),
      context_dir: context_dir.unwrap_or(base_context_dir),
      include_stack_traces: include_stack_traces.unwrap_or(base_include_stack_traces),
      debug_git: debug_git.unwrap_or(base_debug_git),
      events: events.unwrap_or_default().merge_over(base_events),
      locks: locks.unwrap_or_default().merge_over(base_locks),
    }
  }
}
