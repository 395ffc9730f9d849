use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::OnceLock;

use crate::config::LogLevel;
use tracing::{info, subscriber::set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured JSON logging to the given `logs.jsonl` path.
/// Idempotent in practice: later calls lose the race for the global default
/// and are ignored. The parent directory is created when missing.
pub fn init(logs_path: &Path, level: LogLevel) -> std::io::Result<()> {
  if let Some(parent) = logs_path.parent() {
    fs::create_dir_all(parent)?;
  }

  let file = OpenOptions::new().create(true).append(true).open(logs_path)?;

  // Non-blocking writer; the guard must outlive every log call.
  let (nb_writer, guard) = tracing_appender::non_blocking(file);
  let _ = WORKER_GUARD.set(guard);

  let json_layer = fmt::layer()
    .with_timer(ChronoUtc::rfc_3339())
    .json()
    .with_current_span(true)
    .with_span_list(true)
    .with_level(true)
    .with_target(false)
    .with_thread_ids(false)
    .with_thread_names(false)
    .with_writer(move || nb_writer.clone());

  let subscriber = Registry::default()
    .with(EnvFilter::new(level.as_filter()))
    .with(json_layer);

  let _ = set_global_default(subscriber);

  info!(
    event = "logging_initialized",
    logs_path = %logs_path.display(),
    level = ?level,
    "logging initialized"
  );
  Ok(())
}

/// Human-readable logging to stderr, used by the CLI's `--verbose`.
pub fn init_stderr(level: LogLevel) {
  let layer = fmt::layer()
    .with_timer(ChronoUtc::rfc_3339())
    .with_target(false)
    .with_writer(std::io::stderr);
  let subscriber = Registry::default()
    .with(EnvFilter::new(level.as_filter()))
    .with(layer);
  let _ = set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;
  use std::fs;
  use std::path::Path;
  use std::time::Duration;
  use test_support::poll_until;
  use tracing::warn;

  fn events(log: &Path) -> Vec<Value> {
    fs::read_to_string(log)
      .unwrap_or_default()
      .lines()
      .filter_map(|l| serde_json::from_str(l).ok())
      .collect()
  }

  fn has_event(lines: &[Value], name: &str) -> bool {
    lines.iter().any(|v| v["fields"]["event"] == name)
  }

  #[tokio::test]
  async fn writes_json_lines_with_event_fields() {
    let td = tempfile::tempdir().unwrap();
    let log = td.path().join("ai-context").join("logs.jsonl");

    init(&log, LogLevel::Info).unwrap();
    warn!(event = "lock_timeout", resource_id = "tasks", attempts = 3, "lock acquisition timed out");

    let flushed = poll_until(Duration::from_secs(2), Duration::from_millis(10), || {
      let lines = events(&log);
      async move { has_event(&lines, "lock_timeout") }
    })
    .await;
    assert!(flushed, "log line never reached the file");

    let lines = events(&log);
    assert!(has_event(&lines, "logging_initialized"));
    let line = lines.iter().find(|v| v["fields"]["event"] == "lock_timeout").unwrap();
    assert_eq!(line["level"], "WARN");
    assert_eq!(line["fields"]["resource_id"], "tasks");
    assert_eq!(line["fields"]["attempts"], 3);
    assert!(line["timestamp"].is_string());
  }
}
