//! Central error reception.
//!
//! [`ErrorHandler::handle`] normalizes any error into an [`AppError`], runs
//! pattern detection, updates counters, evaluates alert thresholds, logs with
//! a severity prefix, emits `error:occurred` and, for recoverable errors, runs
//! the strategy registered under the error's code or, failing that, its type
//! name.

mod stats;
mod strategy;

pub use stats::{DashboardData, ErrorStatistics, ThresholdSummary};
pub use strategy::{
  AlertThreshold, ErrorPattern, RecoveryContext, RecoveryStrategy, storage_recovery_stub, strategy,
  timeout_retry_stub,
};

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::errors::{AppError, Context, ErrorKind, Result};
use crate::events::{EventBus, TraceIds, now_iso};

#[derive(Debug, Clone, Default)]
pub struct HandleOptions {
  pub additional_context: Context,
  pub trace_id: Option<String>,
  pub request_id: Option<String>,
}

impl HandleOptions {
  pub fn with_ids(ids: &TraceIds) -> Self {
    Self {
      trace_id: Some(ids.trace_id.clone()),
      request_id: Some(ids.request_id.clone()),
      ..Self::default()
    }
  }

  pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.additional_context.insert(key.into(), value.into());
    self
  }
}

/// Outcome of [`ErrorHandler::handle`].
#[derive(Debug, Clone)]
pub enum Handled {
  /// A recovery strategy produced this value.
  Recovered(Value),
  /// No strategy applied; the normalized error.
  Unrecovered(AppError),
}

impl Handled {
  /// Use a recovered value as `T`; otherwise fall back to `original`.
  ///
  /// A value reporting `"success": false` or `"recovered": false` did not
  /// recover anything.
  pub fn into_result<T: DeserializeOwned>(self, original: AppError) -> Result<T> {
    match self {
      Handled::Recovered(value) if reports_failure(&value) => Err(original),
      Handled::Recovered(value) => serde_json::from_value(value).map_err(|_| original),
      Handled::Unrecovered(err) => Err(err),
    }
  }
}

fn reports_failure(value: &Value) -> bool {
  ["success", "recovered"]
    .iter()
    .any(|k| value.get(k).and_then(Value::as_bool) == Some(false))
}

/// Log prefix for an error kind.
pub fn severity(kind: ErrorKind) -> &'static str {
  match kind {
    ErrorKind::State | ErrorKind::DataConsistency => "CRITICAL",
    ErrorKind::Configuration | ErrorKind::Dependency => "MAJOR",
    _ => "ERROR",
  }
}

pub struct ErrorHandler {
  bus: Option<EventBus>,
  include_stack: bool,
  strategies: Mutex<BTreeMap<String, RecoveryStrategy>>,
  patterns: Mutex<BTreeMap<String, ErrorPattern>>,
  thresholds: Mutex<BTreeMap<String, AlertThreshold>>,
  stats: Mutex<ErrorStatistics>,
}

impl Default for ErrorHandler {
  fn default() -> Self {
    Self::new()
  }
}

impl ErrorHandler {
  pub fn new() -> Self {
    Self {
      bus: None,
      include_stack: false,
      strategies: Mutex::new(BTreeMap::new()),
      patterns: Mutex::new(BTreeMap::new()),
      thresholds: Mutex::new(BTreeMap::new()),
      stats: Mutex::new(ErrorStatistics::default()),
    }
  }

  pub fn with_event_bus(mut self, bus: EventBus) -> Self {
    self.bus = Some(bus);
    self
  }

  /// Serialize captured stacks into `error:occurred`.
  pub fn with_stack_traces(mut self, include: bool) -> Self {
    self.include_stack = include;
    self
  }

  /// Install the `ERR_TIMEOUT` retry and `ERR_STORAGE` recovery stubs.
  pub fn with_default_strategies(self) -> Self {
    self.register_recovery_strategy("ERR_TIMEOUT", timeout_retry_stub());
    self.register_recovery_strategy("ERR_STORAGE", storage_recovery_stub());
    self
  }

  fn emit(&self, action: &str, payload: Value) {
    if let Some(bus) = &self.bus {
      bus.emit_standardized("error", action, payload);
    }
  }

  fn registry_event(&self, action: &str, registry: &str, name: &str) {
    self.emit(action, json!({ "registry": registry, "name": name }));
  }

  /// Register (or replace) a strategy keyed by error code or type name.
  pub fn register_recovery_strategy(&self, key: &str, strategy: RecoveryStrategy) {
    self.strategies.lock().insert(key.to_string(), strategy);
    info!(event = "recovery_strategy_registered", key, "recovery strategy registered");
    self.registry_event("recovery_strategy_registered", "strategy", key);
  }

  pub fn remove_recovery_strategy(&self, key: &str) -> bool {
    let removed = self.strategies.lock().remove(key).is_some();
    if removed {
      self.registry_event("recovery_strategy_removed", "strategy", key);
    }
    removed
  }

  pub fn register_error_pattern(&self, name: &str, pattern: ErrorPattern) {
    self.patterns.lock().insert(name.to_string(), pattern);
    self.registry_event("recovery_strategy_registered", "pattern", name);
  }

  pub fn remove_error_pattern(&self, name: &str) -> bool {
    let removed = self.patterns.lock().remove(name).is_some();
    if removed {
      self.registry_event("recovery_strategy_removed", "pattern", name);
    }
    removed
  }

  pub fn register_alert_threshold(&self, name: &str, threshold: AlertThreshold) {
    self.thresholds.lock().insert(name.to_string(), threshold);
    self.registry_event("recovery_strategy_registered", "threshold", name);
  }

  pub fn remove_alert_threshold(&self, name: &str) -> bool {
    let removed = self.thresholds.lock().remove(name).is_some();
    if removed {
      self.registry_event("recovery_strategy_removed", "threshold", name);
    }
    removed
  }

  fn normalize(
    &self,
    error: anyhow::Error,
    component: &str,
    operation: &str,
    ids: &TraceIds,
    options: HandleOptions,
  ) -> AppError {
    let mut fields = Context::new();
    fields.insert("component".into(), json!(component));
    fields.insert("operation".into(), json!(operation));
    fields.insert("traceId".into(), json!(ids.trace_id));
    fields.insert("requestId".into(), json!(ids.request_id));
    fields.extend(options.additional_context);

    match error.downcast::<AppError>() {
      Ok(mut app) => {
        let context = app.context_mut();
        for (k, v) in fields {
          context.entry(k).or_insert(v);
        }
        app
      }
      Err(other) => AppError::from_anyhow(other).with_context_map(fields),
    }
  }

  fn detect_patterns(&self, err: &AppError, component: &str, operation: &str) {
    let patterns: Vec<(String, ErrorPattern)> = self
      .patterns
      .lock()
      .iter()
      .map(|(n, p)| (n.clone(), p.clone()))
      .collect();
    for (name, pattern) in patterns {
      if !(pattern.detector)(err, component, operation) {
        continue;
      }
      if let Err(action_err) = (pattern.action)(err) {
        warn!(event = "error_pattern_action_failed", pattern = %name, error = %action_err, "pattern action failed");
      }
      *self.stats.lock().pattern_counts.entry(name.clone()).or_default() += 1;
      self.emit(
        "pattern_detected",
        json!({ "pattern": name, "errorCode": err.code(), "component": component, "operation": operation }),
      );
    }
  }

  fn evaluate_thresholds(&self, err: &AppError) {
    let thresholds: Vec<(String, AlertThreshold)> = self
      .thresholds
      .lock()
      .iter()
      .map(|(n, t)| (n.clone(), t.clone()))
      .collect();
    let snapshot = self.stats.lock().clone();
    for (name, threshold) in thresholds {
      if !(threshold.condition)(&snapshot, err) {
        continue;
      }
      warn!(
        event = "error_alert_triggered",
        threshold = %name,
        severity = %threshold.severity,
        "{}",
        threshold.message
      );
      *self.stats.lock().alert_counts.entry(name.clone()).or_default() += 1;
      self.emit(
        "alert_triggered",
        json!({
          "threshold": name,
          "severity": threshold.severity,
          "message": threshold.message,
          "errorCode": err.code(),
        }),
      );
    }
  }

  fn find_strategy(&self, err: &AppError) -> Option<(String, RecoveryStrategy)> {
    let strategies = self.strategies.lock();
    [err.code(), err.name()]
      .into_iter()
      .find_map(|key| strategies.get(key).map(|s| (key.to_string(), s.clone())))
  }

  /// Normalize, record, log, emit and possibly recover from `error`.
  ///
  /// Returns `Err` only when a recovery strategy itself failed; the error is
  /// then the normalized original with the strategy failure in its context.
  pub async fn handle(
    &self,
    error: impl Into<anyhow::Error>,
    component: &str,
    operation: &str,
    options: HandleOptions,
  ) -> Result<Handled> {
    let ids = TraceIds {
      trace_id: options.trace_id.clone().unwrap_or_else(|| TraceIds::generate().trace_id),
      request_id: options.request_id.clone().unwrap_or_else(|| TraceIds::generate().request_id),
    };
    let err = self.normalize(error.into(), component, operation, &ids, options);

    self.detect_patterns(&err, component, operation);
    self.stats.lock().record(&err, component);
    self.evaluate_thresholds(&err);

    let severity = severity(err.kind());
    error!(
      event = "error_handled",
      severity,
      name = err.name(),
      code = err.code(),
      component,
      operation,
      trace_id = %ids.trace_id,
      request_id = %ids.request_id,
      recoverable = err.recoverable(),
      "{severity}: [{component}.{operation}] {}",
      err.message()
    );

    self.emit(
      "occurred",
      json!({
        "error": err.to_json(self.include_stack),
        "component": component,
        "operation": operation,
        "traceId": ids.trace_id,
        "requestId": ids.request_id,
        "errorCode": err.code(),
        "recoverable": err.recoverable(),
        "timestamp": now_iso(),
      }),
    );

    if !err.recoverable() {
      return Ok(Handled::Unrecovered(err));
    }
    let Some((key, strategy)) = self.find_strategy(&err) else {
      return Ok(Handled::Unrecovered(err));
    };

    self.emit(
      "recovery_started",
      json!({ "strategy": key, "errorCode": err.code(), "component": component, "operation": operation, "traceId": ids.trace_id, "requestId": ids.request_id }),
    );
    let ctx = RecoveryContext {
      component: component.to_string(),
      operation: operation.to_string(),
      trace_id: ids.trace_id.clone(),
      request_id: ids.request_id.clone(),
    };
    match strategy(err.clone(), ctx).await {
      Ok(result) => {
        self.stats.lock().record_recovery(true);
        info!(event = "error_recovered", strategy = %key, code = err.code(), "recovery succeeded");
        self.emit(
          "recovery_succeeded",
          json!({ "strategy": key, "result": result.clone(), "errorCode": err.code(), "traceId": ids.trace_id, "requestId": ids.request_id }),
        );
        Ok(Handled::Recovered(result))
      }
      Err(recovery_err) => {
        self.stats.lock().record_recovery(false);
        error!(event = "error_recovery_failed", strategy = %key, error = %recovery_err, "recovery failed");
        self.emit(
          "recovery_failed",
          json!({ "strategy": key, "error": recovery_err.to_json(self.include_stack), "errorCode": err.code(), "traceId": ids.trace_id, "requestId": ids.request_id }),
        );
        Err(err.with_context("recoveryError", recovery_err.message().to_string()))
      }
    }
  }

  pub fn statistics(&self) -> ErrorStatistics {
    self.stats.lock().clone()
  }

  pub fn reset_statistics(&self) {
    *self.stats.lock() = ErrorStatistics::default();
  }

  pub fn dashboard_data(&self) -> DashboardData {
    DashboardData {
      statistics: self.statistics(),
      patterns: self.patterns.lock().keys().cloned().collect(),
      strategies: self.strategies.lock().keys().cloned().collect(),
      thresholds: self
        .thresholds
        .lock()
        .iter()
        .map(|(name, t)| ThresholdSummary {
          name: name.clone(),
          severity: t.severity.clone(),
          message: t.message.clone(),
        })
        .collect(),
    }
  }
}
