//! Plugin registry with per-type capability checks.
//!
//! | Type | Required methods |
//! |------|------------------|
//! | `ci` | `runTests` |
//! | `notification` | `sendNotification` |
//! | `report` | `generateReport` |
//! | `storage` | `save`, `load` |
//!
//! Other types only need to expose something.

mod plugin;

pub use plugin::{
  CiAdapter, CiPlugin, DynamicPlugin, NotificationAdapter, NotificationPlugin, Plugin, ReportAdapter,
  ReportPlugin, StorageAdapter, StoragePlugin,
};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::errors::{AppError, Result};
use crate::events::EventBus;

/// Methods a plugin of `plugin_type` must expose.
pub fn required_methods(plugin_type: &str) -> &'static [&'static str] {
  match plugin_type {
    "ci" => &["runTests"],
    "notification" => &["sendNotification"],
    "report" => &["generateReport"],
    "storage" => &["save", "load"],
    _ => &[],
  }
}

fn validate(plugin_type: &str, plugin: &dyn Plugin) -> Result<()> {
  if plugin_type.trim().is_empty() {
    return Err(AppError::validation("plugin type must be a non-empty string"));
  }
  let properties = plugin.methods().len() + usize::from(plugin.has_initialize()) + usize::from(plugin.has_cleanup());
  if properties == 0 {
    return Err(
      AppError::validation(format!("plugin '{plugin_type}' must expose at least one method"))
        .with_context("pluginType", plugin_type),
    );
  }
  let missing: Vec<&str> = required_methods(plugin_type)
    .iter()
    .copied()
    .filter(|m| !plugin.has_method(m))
    .collect();
  if !missing.is_empty() {
    return Err(
      AppError::validation(format!(
        "plugin '{plugin_type}' is missing required method(s): {}",
        missing.join(", ")
      ))
      .with_context("pluginType", plugin_type)
      .with_context("missingMethods", missing),
    );
  }
  Ok(())
}

#[derive(Default)]
pub struct PluginManager {
  plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
  bus: Option<EventBus>,
}

impl PluginManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_event_bus(mut self, bus: EventBus) -> Self {
    self.bus = Some(bus);
    self
  }

  async fn emit(&self, action: &str, payload: Value) {
    if let Some(bus) = &self.bus {
      bus.emit_standardized_async("plugin", action, payload).await;
    }
  }

  /// Validate and store a plugin, then run its `initialize` hook.
  ///
  /// A failing hook is reported but does not undo the registration.
  pub async fn register_plugin(&self, plugin_type: &str, plugin: Arc<dyn Plugin>) -> Result<()> {
    if let Err(err) = validate(plugin_type, plugin.as_ref()) {
      warn!(event = "plugin_validation_failed", plugin_type, error = %err, "plugin rejected");
      self
        .emit(
          "validation_failed",
          json!({ "pluginType": plugin_type, "error": err.message() }),
        )
        .await;
      return Err(err);
    }

    let has_initialize = plugin.has_initialize();
    let has_cleanup = plugin.has_cleanup();
    if self
      .plugins
      .write()
      .insert(plugin_type.to_string(), Arc::clone(&plugin))
      .is_some()
    {
      warn!(event = "plugin_replaced", plugin_type, "replacing registered plugin");
    }

    if has_initialize && let Err(err) = plugin.initialize().await {
      error!(event = "plugin_initialization_error", plugin_type, error = %err, "plugin initialize failed");
      self
        .emit(
          "initialization_error",
          json!({ "pluginType": plugin_type, "error": err.to_string() }),
        )
        .await;
    }

    info!(event = "plugin_registered", plugin_type, has_initialize, has_cleanup, "plugin registered");
    self
      .emit(
        "registered",
        json!({ "pluginType": plugin_type, "hasInitialize": has_initialize, "hasCleanup": has_cleanup }),
      )
      .await;
    Ok(())
  }

  /// Call `method` on the plugin registered as `plugin_type`.
  ///
  /// Returns `Ok(None)` when the plugin or method does not exist.
  pub async fn invoke_plugin(&self, plugin_type: &str, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
    let plugin = self.plugins.read().get(plugin_type).cloned();
    let Some(plugin) = plugin.filter(|p| p.has_method(method)) else {
      warn!(event = "plugin_method_not_found", plugin_type, method, "plugin method not found");
      self
        .emit(
          "method_not_found",
          json!({ "pluginType": plugin_type, "methodName": method }),
        )
        .await;
      return Ok(None);
    };

    self
      .emit(
        "method_invoked",
        json!({ "pluginType": plugin_type, "methodName": method }),
      )
      .await;
    match plugin.invoke(method, args).await {
      Ok(result) => {
        debug!(event = "plugin_method_completed", plugin_type, method, "plugin method completed");
        self
          .emit(
            "method_completed",
            json!({ "pluginType": plugin_type, "methodName": method }),
          )
          .await;
        Ok(Some(result))
      }
      Err(err) => {
        error!(event = "plugin_method_error", plugin_type, method, error = %err, "plugin method failed");
        self
          .emit(
            "method_error",
            json!({ "pluginType": plugin_type, "methodName": method, "error": err.to_string() }),
          )
          .await;
        Err(
          AppError::from_anyhow(err)
            .with_context("pluginType", plugin_type)
            .with_context("methodName", method),
        )
      }
    }
  }

  /// Run `cleanup` (failures are reported, not fatal) and drop the plugin.
  pub async fn unregister_plugin(&self, plugin_type: &str) -> bool {
    let Some(plugin) = self.plugins.write().remove(plugin_type) else {
      return false;
    };
    if plugin.has_cleanup()
      && let Err(err) = plugin.cleanup().await
    {
      error!(event = "plugin_cleanup_error", plugin_type, error = %err, "plugin cleanup failed");
      self
        .emit(
          "cleanup_error",
          json!({ "pluginType": plugin_type, "error": err.to_string() }),
        )
        .await;
    }
    info!(event = "plugin_unregistered", plugin_type, "plugin unregistered");
    self
      .emit("unregistered", json!({ "pluginType": plugin_type }))
      .await;
    true
  }

  pub fn has_plugin(&self, plugin_type: &str) -> bool {
    self.plugins.read().contains_key(plugin_type)
  }

  pub fn plugin_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.plugins.read().keys().cloned().collect();
    types.sort();
    types
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use parking_lot::Mutex;
  use std::sync::atomic::{AtomicBool, Ordering};

  fn recorded(bus: &EventBus) -> Arc<Mutex<Vec<(String, Value)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on("plugin:*", move |p, name| {
      sink.lock().push((name.to_string(), p.clone()));
      Ok(())
    });
    seen
  }

  fn names(seen: &Mutex<Vec<(String, Value)>>) -> Vec<String> {
    seen.lock().iter().map(|(n, _)| n.clone()).collect()
  }

  #[tokio::test]
  async fn ci_plugin_invocation_path() {
    let bus = EventBus::new();
    let seen = recorded(&bus);
    let pm = PluginManager::new().with_event_bus(bus);
    let ci = DynamicPlugin::new().method("runTests", |_| async { Ok(json!({"ok": true})) });
    pm.register_plugin("ci", Arc::new(ci)).await.unwrap();

    let result = pm.invoke_plugin("ci", "runTests", vec![]).await.unwrap();
    assert_eq!(result, Some(json!({"ok": true})));
    assert_eq!(
      names(&seen),
      vec!["plugin:registered", "plugin:method_invoked", "plugin:method_completed"]
    );
    let seen = seen.lock();
    assert_eq!(seen[1].1["methodName"], "runTests");
    assert!(seen[1].1["traceId"].is_string());
  }

  struct Reporter;
  #[async_trait]
  impl ReportPlugin for Reporter {
    async fn generate_report(&self, args: Vec<Value>) -> anyhow::Result<Value> {
      Ok(json!({ "args": args.len() }))
    }
  }

  struct Runner;
  #[async_trait]
  impl CiPlugin for Runner {
    async fn run_tests(&self, args: Vec<Value>) -> anyhow::Result<Value> {
      Ok(json!({ "suite": args.first().cloned().unwrap_or(Value::Null), "passed": true }))
    }
  }

  #[derive(Default)]
  struct Outbox(Mutex<Vec<Value>>);
  #[async_trait]
  impl NotificationPlugin for Arc<Outbox> {
    async fn send_notification(&self, args: Vec<Value>) -> anyhow::Result<Value> {
      self.0.lock().extend(args);
      Ok(json!("sent"))
    }
  }

  #[derive(Default)]
  struct MemoryStore(Mutex<HashMap<String, Value>>);
  #[async_trait]
  impl StoragePlugin for MemoryStore {
    async fn save(&self, args: Vec<Value>) -> anyhow::Result<Value> {
      let [key, value] = args.as_slice() else {
        anyhow::bail!("save takes a key and a value");
      };
      let key = key.as_str().unwrap_or_default().to_string();
      self.0.lock().insert(key, value.clone());
      Ok(json!(true))
    }

    async fn load(&self, args: Vec<Value>) -> anyhow::Result<Value> {
      let key = args.first().and_then(Value::as_str).unwrap_or_default();
      Ok(self.0.lock().get(key).cloned().unwrap_or(Value::Null))
    }
  }

  #[tokio::test]
  async fn typed_plugins_register_through_adapters() {
    let pm = PluginManager::new();
    let outbox = Arc::new(Outbox::default());
    pm.register_plugin("report", Arc::new(ReportAdapter(Reporter)))
      .await
      .unwrap();
    pm.register_plugin("ci", Arc::new(CiAdapter(Runner))).await.unwrap();
    pm.register_plugin("notification", Arc::new(NotificationAdapter(Arc::clone(&outbox))))
      .await
      .unwrap();
    pm.register_plugin("storage", Arc::new(StorageAdapter(MemoryStore::default())))
      .await
      .unwrap();
    assert_eq!(pm.plugin_types(), vec!["ci", "notification", "report", "storage"]);

    let out = pm
      .invoke_plugin("report", "generateReport", vec![json!(1), json!(2)])
      .await
      .unwrap();
    assert_eq!(out, Some(json!({"args": 2})));

    let out = pm.invoke_plugin("ci", "runTests", vec![json!("unit")]).await.unwrap();
    assert_eq!(out, Some(json!({"suite": "unit", "passed": true})));

    let out = pm
      .invoke_plugin("notification", "sendNotification", vec![json!("T001 done")])
      .await
      .unwrap();
    assert_eq!(out, Some(json!("sent")));
    assert_eq!(*outbox.0.lock(), vec![json!("T001 done")]);

    pm.invoke_plugin("storage", "save", vec![json!("focus"), json!("T001")])
      .await
      .unwrap();
    let loaded = pm.invoke_plugin("storage", "load", vec![json!("focus")]).await.unwrap();
    assert_eq!(loaded, Some(json!("T001")));
    assert!(pm.invoke_plugin("storage", "save", vec![json!("only-key")]).await.is_err());
  }

  #[tokio::test]
  async fn adapters_reject_methods_outside_their_contract() {
    let adapter = StorageAdapter(MemoryStore::default());
    assert_eq!(adapter.methods(), vec!["save", "load"]);
    let err = adapter.invoke("delete", vec![]).await.unwrap_err();
    assert_eq!(err.to_string(), "plugin has no method 'delete'");
    assert!(CiAdapter(Runner).invoke("sendNotification", vec![]).await.is_err());
  }

  #[tokio::test]
  async fn capability_contracts_are_enforced() {
    let bus = EventBus::new();
    let seen = recorded(&bus);
    let pm = PluginManager::new().with_event_bus(bus);

    let half_storage = DynamicPlugin::new().sync_method("save", |_| Ok(Value::Null));
    let err = pm
      .register_plugin("storage", Arc::new(half_storage))
      .await
      .unwrap_err();
    assert_eq!(err.name(), "ValidationError");
    assert!(err.message().contains("load"));

    let err = pm
      .register_plugin("custom", Arc::new(DynamicPlugin::new()))
      .await
      .unwrap_err();
    assert!(err.message().contains("at least one"));

    let err = pm
      .register_plugin("  ", Arc::new(DynamicPlugin::new().sync_method("x", |_| Ok(Value::Null))))
      .await
      .unwrap_err();
    assert!(err.message().contains("non-empty"));

    assert_eq!(names(&seen), vec!["plugin:validation_failed"; 3]);
    assert!(!pm.has_plugin("storage"));

    let hooks_only = DynamicPlugin::new().on_cleanup(|| async { Ok(()) });
    pm.register_plugin("custom", Arc::new(hooks_only)).await.unwrap();
  }

  #[tokio::test]
  async fn failing_initialize_still_registers() {
    let bus = EventBus::new();
    let seen = recorded(&bus);
    let pm = PluginManager::new().with_event_bus(bus);
    let plugin = DynamicPlugin::new()
      .sync_method("sendNotification", |_| Ok(json!("sent")))
      .on_initialize(|| async { Err(anyhow::anyhow!("no token")) });
    pm.register_plugin("notification", Arc::new(plugin)).await.unwrap();
    assert!(pm.has_plugin("notification"));
    assert_eq!(
      names(&seen),
      vec!["plugin:initialization_error", "plugin:registered"]
    );
    assert_eq!(seen.lock()[1].1["hasInitialize"], true);
  }

  #[tokio::test]
  async fn missing_methods_return_none() {
    let bus = EventBus::new();
    let seen = recorded(&bus);
    let pm = PluginManager::new().with_event_bus(bus);
    assert_eq!(pm.invoke_plugin("ci", "runTests", vec![]).await.unwrap(), None);
    pm.register_plugin("ci", Arc::new(DynamicPlugin::new().sync_method("runTests", |_| Ok(Value::Null))))
      .await
      .unwrap();
    assert_eq!(pm.invoke_plugin("ci", "deploy", vec![]).await.unwrap(), None);
    let events = names(&seen);
    assert_eq!(events.iter().filter(|n| *n == "plugin:method_not_found").count(), 2);
  }

  #[tokio::test]
  async fn method_errors_are_reported_and_rethrown() {
    let bus = EventBus::new();
    let seen = recorded(&bus);
    let pm = PluginManager::new().with_event_bus(bus);
    let plugin = DynamicPlugin::new().method("runTests", |_| async {
      Err(anyhow::Error::new(AppError::timeout("tests hung")))
    });
    pm.register_plugin("ci", Arc::new(plugin)).await.unwrap();
    let err = pm.invoke_plugin("ci", "runTests", vec![]).await.unwrap_err();
    assert_eq!(err.name(), "TimeoutError");
    assert_eq!(err.context()["methodName"], "runTests");
    assert_eq!(names(&seen).last().map(String::as_str), Some("plugin:method_error"));
  }

  #[tokio::test]
  async fn unregister_runs_cleanup_even_when_it_fails() {
    let bus = EventBus::new();
    let seen = recorded(&bus);
    let pm = PluginManager::new().with_event_bus(bus);
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cleaned);
    let plugin = DynamicPlugin::new()
      .sync_method("ping", |_| Ok(json!("pong")))
      .on_cleanup(move || {
        flag.store(true, Ordering::SeqCst);
        async { Err(anyhow::anyhow!("cleanup broke")) }
      });
    pm.register_plugin("misc", Arc::new(plugin)).await.unwrap();
    assert!(pm.unregister_plugin("misc").await);
    assert!(!pm.unregister_plugin("misc").await);
    assert!(cleaned.load(Ordering::SeqCst));
    let events = names(&seen);
    assert_eq!(&events[1..], ["plugin:cleanup_error", "plugin:unregistered"]);
    assert!(pm.plugin_types().is_empty());
  }
}
