use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::envelope::{is_valid_segment, split_name};
use crate::errors::AppError;

/// Documentation for one canonical event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub description: String,
  pub category: String,
  #[serde(default)]
  pub schema: Value,
  #[serde(default)]
  pub examples: Vec<Value>,
}

impl CatalogEntry {
  pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
    Self {
      description: description.into(),
      category: category.into(),
      schema: json!({ "type": "object" }),
      examples: Vec::new(),
    }
  }

  /// Object schema listing the payload fields every emission must carry.
  pub fn with_required(mut self, fields: &[&str]) -> Self {
    self.schema = json!({ "type": "object", "required": fields });
    self
  }

  pub fn with_example(mut self, example: Value) -> Self {
    self.examples.push(example);
    self
  }
}

/// Registry of canonical event names and their payload documentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCatalog {
  entries: BTreeMap<String, CatalogEntry>,
}

// (name, category, description, required payload fields)
const DEFAULT_EVENTS: &[(&str, &str, &str, &[&str])] = &[
  ("error:occurred", "error", "An error was received by the error handler", &["error", "component", "operation", "errorCode", "recoverable"]),
  ("error:pattern_detected", "error", "A registered error pattern matched", &["pattern", "errorCode"]),
  ("error:alert_triggered", "error", "An alert threshold condition fired", &["threshold", "severity"]),
  ("error:recovery_started", "error", "A recovery strategy is about to run", &["strategy", "errorCode"]),
  ("error:recovery_succeeded", "error", "A recovery strategy returned a result", &["strategy", "result"]),
  ("error:recovery_failed", "error", "A recovery strategy failed", &["strategy", "error"]),
  ("error:recovery_strategy_registered", "error", "A strategy, pattern or threshold was registered", &["registry", "name"]),
  ("error:recovery_strategy_removed", "error", "A strategy, pattern or threshold was removed", &["registry", "name"]),
  ("plugin:registered", "plugin", "A plugin passed validation and was stored", &["pluginType", "hasInitialize", "hasCleanup"]),
  ("plugin:validation_failed", "plugin", "A plugin registration was rejected", &["pluginType", "error"]),
  ("plugin:initialization_error", "plugin", "A plugin initializer failed", &["pluginType", "error"]),
  ("plugin:method_not_found", "plugin", "An invoked plugin method does not exist", &["pluginType", "methodName"]),
  ("plugin:method_invoked", "plugin", "A plugin method is about to run", &["pluginType", "methodName"]),
  ("plugin:method_completed", "plugin", "A plugin method returned", &["pluginType", "methodName"]),
  ("plugin:method_error", "plugin", "A plugin method failed", &["pluginType", "methodName", "error"]),
  ("plugin:unregistered", "plugin", "A plugin was removed", &["pluginType"]),
  ("plugin:cleanup_error", "plugin", "A plugin cleanup hook failed", &["pluginType", "error"]),
  ("lock:acquired", "lock", "An advisory lock was granted", &["resourceId", "lockerId"]),
  ("lock:released", "lock", "An advisory lock was released", &["resourceId", "lockerId"]),
  ("task:created", "domain", "A task was added to the collection", &["id"]),
  ("task:updated", "domain", "A task was changed", &["id"]),
  ("task:deleted", "domain", "A task was archived and removed", &["id"]),
  ("task:progress_changed", "domain", "A task moved to a new progress state", &["id", "from", "to"]),
  ("session:started", "domain", "A work session began", &["sessionId"]),
  ("session:ended", "domain", "A work session ended", &["sessionId"]),
  ("feedback:created", "domain", "Feedback was collected for a task", &["feedbackId", "taskId"]),
  ("feedback:status_changed", "domain", "A feedback loop changed status", &["feedbackId", "from", "to"]),
  ("app:error", "app", "A manager call failed at the adapter boundary", &["error", "component", "operation"]),
];

impl EventCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Catalog with every event emitted by this crate.
  pub fn with_defaults() -> Self {
    let mut catalog = Self::new();
    for (name, category, description, required) in DEFAULT_EVENTS {
      catalog
        .entries
        .insert((*name).to_string(), CatalogEntry::new(*description, *category).with_required(required));
    }
    catalog
  }

  /// Register or replace an entry. Names must be canonical `component:action`.
  pub fn register(&mut self, name: &str, entry: CatalogEntry) -> Result<(), AppError> {
    match split_name(name) {
      Some((component, action)) if is_valid_segment(component) && is_valid_segment(action) => {
        self.entries.insert(name.to_string(), entry);
        Ok(())
      }
      _ => Err(
        AppError::event(format!("invalid event name '{name}': expected component:action"))
          .with_context("eventName", name),
      ),
    }
  }

  pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
    self.entries.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.entries.contains_key(name)
  }

  pub fn names(&self) -> Vec<String> {
    self.entries.keys().cloned().collect()
  }

  pub fn by_category(&self, category: &str) -> Vec<(&str, &CatalogEntry)> {
    self
      .entries
      .iter()
      .filter(|(_, e)| e.category == category)
      .map(|(n, e)| (n.as_str(), e))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_cover_emitted_events() {
    let catalog = EventCatalog::with_defaults();
    for name in [
      "error:occurred",
      "plugin:method_completed",
      "task:created",
      "app:error",
    ] {
      assert!(catalog.contains(name), "missing {name}");
    }
    let entry = catalog.get("plugin:registered").unwrap();
    assert_eq!(entry.category, "plugin");
    assert_eq!(entry.schema["required"][0], "pluginType");
    assert!(catalog.by_category("lock").len() == 2);
  }

  #[test]
  fn register_rejects_non_canonical_names() {
    let mut catalog = EventCatalog::new();
    assert!(catalog.register("Bad Name", CatalogEntry::new("x", "y")).is_err());
    assert!(catalog.register("nocolon", CatalogEntry::new("x", "y")).is_err());
    catalog
      .register("build:finished", CatalogEntry::new("done", "ci").with_example(json!({"ok": true})))
      .unwrap();
    assert_eq!(catalog.names(), vec!["build:finished".to_string()]);
    assert_eq!(catalog.len(), 1);
  }
}
