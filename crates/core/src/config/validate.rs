use super::types::{Config, ConfigError, Result};

pub(super) fn validate(cfg: &Config) -> Result<()> {
  if cfg.context_dir.trim().is_empty() {
    return Err(ConfigError::Invalid {
      field: "context_dir",
      reason: "must not be empty".to_string(),
    });
  }
  if cfg.events.history_limit == 0 {
    return Err(ConfigError::Invalid {
      field: "events.history_limit",
      reason: "must be at least 1".to_string(),
    });
  }
  if cfg.locks.retry_interval_ms == 0 {
    return Err(ConfigError::Invalid {
      field: "locks.retry_interval_ms",
      reason: "must be at least 1".to_string(),
    });
  }
  Ok(())
}
