use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error_handler::{ErrorHandler, HandleOptions};
use crate::errors::{AppError, ErrorKind, Result};
use crate::events::{EventBus, TraceIds, emit_error_event};

/// `ERR_CLI_<CLASS>_<OP>`, e.g. `ERR_CLI_TASKMANAGER_CREATE_TASK`.
pub fn cli_error_code(class_name: &str, operation: &str) -> String {
  let upper = |s: &str| {
    s.chars()
      .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
      .collect::<String>()
  };
  format!("ERR_CLI_{}_{}", upper(class_name), upper(operation))
}

/// Wraps manager calls for the CLI: `<component>:<op>_before` and
/// `<component>:<op>_after` events around the call, and uniform failure
/// handling.
pub struct ManagerAdapter {
  component: String,
  class_name: String,
  bus: EventBus,
  error_handler: Option<Arc<ErrorHandler>>,
  include_stack: bool,
}

impl ManagerAdapter {
  pub fn new(component: &str, class_name: &str, bus: EventBus) -> Self {
    Self {
      component: component.to_string(),
      class_name: class_name.to_string(),
      bus,
      error_handler: None,
      include_stack: false,
    }
  }

  pub fn with_error_handler(mut self, handler: Arc<ErrorHandler>) -> Self {
    self.error_handler = Some(handler);
    self
  }

  pub fn with_stack_traces(mut self, include: bool) -> Self {
    self.include_stack = include;
    self
  }

  /// Keep validation, CLI and domain errors; wrap everything else as a CLI error.
  fn convert(&self, operation: &str, err: AppError) -> AppError {
    if err.is(ErrorKind::Cli) || err.is_domain_error() {
      return err;
    }
    AppError::cli(cli_error_code(&self.class_name, operation), err.message().to_string())
      .with_context_map(err.context().clone())
      .with_context("originalError", err.name())
      .with_context("originalCode", err.code().to_string())
      .with_cause(err)
  }

  /// Run `f` as `operation`; `args` is published with the `_before` event.
  pub async fn call<T, F, Fut>(&self, operation: &str, args: Value, f: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let ids = TraceIds::generate();
    let mut before = json!({ "args": args });
    if let Value::Object(map) = &mut before {
      ids.write_into(map);
    }
    self
      .bus
      .emit_standardized_async(&self.component, &format!("{operation}_before"), before)
      .await;

    match f().await {
      Ok(value) => {
        let mut after = json!({ "result": summarize(serde_json::to_value(&value).unwrap_or(Value::Null)) });
        if let Value::Object(map) = &mut after {
          ids.write_into(map);
        }
        self
          .bus
          .emit_standardized_async(&self.component, &format!("{operation}_after"), after)
          .await;
        Ok(value)
      }
      Err(err) => {
        let err = self.convert(operation, err);
        debug!(event = "adapter_call_failed", component = %self.component, operation, code = %err.code(), "manager call failed");
        emit_error_event(&self.bus, &err, &self.class_name, operation, &ids, self.include_stack);
        let Some(handler) = &self.error_handler else {
          return Err(err);
        };
        let handled = handler
          .handle(err.clone(), &self.class_name, operation, HandleOptions::with_ids(&ids))
          .await?;
        handled.into_result(err)
      }
    }
  }
}

/// Arrays collapse to their length; everything else passes through.
fn summarize(value: Value) -> Value {
  match value {
    Value::Array(items) => json!({ "count": items.len() }),
    other => other,
  }
}
