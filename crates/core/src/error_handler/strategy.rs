use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use super::stats::ErrorStatistics;
use crate::errors::{AppError, Result};

/// Where and under which ids an error was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryContext {
  pub component: String,
  pub operation: String,
  pub trace_id: String,
  pub request_id: String,
}

pub type RecoveryStrategy =
  Arc<dyn Fn(AppError, RecoveryContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Box an async closure as a [`RecoveryStrategy`].
pub fn strategy<F, Fut>(f: F) -> RecoveryStrategy
where
  F: Fn(AppError, RecoveryContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value>> + Send + 'static,
{
  Arc::new(move |err, ctx| Box::pin(f(err, ctx)))
}

type Detector = Arc<dyn Fn(&AppError, &str, &str) -> bool + Send + Sync>;
type PatternAction = Arc<dyn Fn(&AppError) -> anyhow::Result<()> + Send + Sync>;

/// A detector over `(error, component, operation)` and the action fired on a match.
#[derive(Clone)]
pub struct ErrorPattern {
  pub(super) detector: Detector,
  pub(super) action: PatternAction,
}

impl ErrorPattern {
  pub fn new<D, A>(detector: D, action: A) -> Self
  where
    D: Fn(&AppError, &str, &str) -> bool + Send + Sync + 'static,
    A: Fn(&AppError) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    Self {
      detector: Arc::new(detector),
      action: Arc::new(action),
    }
  }

  /// Pattern with no side effect beyond counting and the emitted event.
  pub fn detect_only<D>(detector: D) -> Self
  where
    D: Fn(&AppError, &str, &str) -> bool + Send + Sync + 'static,
  {
    Self::new(detector, |_| Ok(()))
  }
}

type Condition = Arc<dyn Fn(&ErrorStatistics, &AppError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AlertThreshold {
  pub(super) condition: Condition,
  pub severity: String,
  pub message: String,
}

impl AlertThreshold {
  pub fn new<C>(severity: impl Into<String>, message: impl Into<String>, condition: C) -> Self
  where
    C: Fn(&ErrorStatistics, &AppError) -> bool + Send + Sync + 'static,
  {
    Self {
      condition: Arc::new(condition),
      severity: severity.into(),
      message: message.into(),
    }
  }
}

/// Placeholder retry for `ERR_TIMEOUT`; reports that nothing was re-run.
pub fn timeout_retry_stub() -> RecoveryStrategy {
  strategy(|err: AppError, ctx: RecoveryContext| async move {
    Ok(json!({
      "strategy": "retry",
      "retried": true,
      "success": false,
      "component": ctx.component,
      "operation": ctx.operation,
      "message": format!("retry not available for: {}", err.message()),
    }))
  })
}

/// Placeholder for `ERR_STORAGE`; reports that no repair was performed.
pub fn storage_recovery_stub() -> RecoveryStrategy {
  strategy(|err: AppError, ctx: RecoveryContext| async move {
    Ok(json!({
      "strategy": "storage_recovery",
      "recovered": false,
      "component": ctx.component,
      "operation": ctx.operation,
      "message": format!("storage recovery not available for: {}", err.message()),
    }))
  })
}
