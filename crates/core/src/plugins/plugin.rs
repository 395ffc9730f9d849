use std::collections::BTreeMap;
use std::future::{Future, ready};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

/// A plugin as seen by the [`PluginManager`](super::PluginManager): a named
/// set of callable methods plus optional lifecycle hooks.
#[async_trait]
pub trait Plugin: Send + Sync {
  /// Callable method names, excluding `initialize` and `cleanup`.
  fn methods(&self) -> Vec<String>;

  fn has_method(&self, name: &str) -> bool {
    self.methods().iter().any(|m| m == name)
  }

  fn has_initialize(&self) -> bool {
    false
  }

  fn has_cleanup(&self) -> bool {
    false
  }

  async fn initialize(&self) -> anyhow::Result<()> {
    Ok(())
  }

  async fn cleanup(&self) -> anyhow::Result<()> {
    Ok(())
  }

  async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait CiPlugin: Send + Sync {
  async fn run_tests(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait NotificationPlugin: Send + Sync {
  async fn send_notification(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait ReportPlugin: Send + Sync {
  async fn generate_report(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait StoragePlugin: Send + Sync {
  async fn save(&self, args: Vec<Value>) -> anyhow::Result<Value>;
  async fn load(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

fn unknown(method: &str) -> anyhow::Error {
  anyhow!("plugin has no method '{method}'")
}

/// Exposes a [`CiPlugin`] as `runTests`.
pub struct CiAdapter<P>(pub P);

#[async_trait]
impl<P: CiPlugin> Plugin for CiAdapter<P> {
  fn methods(&self) -> Vec<String> {
    vec!["runTests".into()]
  }

  async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    match method {
      "runTests" => self.0.run_tests(args).await,
      other => Err(unknown(other)),
    }
  }
}

/// Exposes a [`NotificationPlugin`] as `sendNotification`.
pub struct NotificationAdapter<P>(pub P);

#[async_trait]
impl<P: NotificationPlugin> Plugin for NotificationAdapter<P> {
  fn methods(&self) -> Vec<String> {
    vec!["sendNotification".into()]
  }

  async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    match method {
      "sendNotification" => self.0.send_notification(args).await,
      other => Err(unknown(other)),
    }
  }
}

/// Exposes a [`ReportPlugin`] as `generateReport`.
pub struct ReportAdapter<P>(pub P);

#[async_trait]
impl<P: ReportPlugin> Plugin for ReportAdapter<P> {
  fn methods(&self) -> Vec<String> {
    vec!["generateReport".into()]
  }

  async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    match method {
      "generateReport" => self.0.generate_report(args).await,
      other => Err(unknown(other)),
    }
  }
}

/// Exposes a [`StoragePlugin`] as `save` and `load`.
pub struct StorageAdapter<P>(pub P);

#[async_trait]
impl<P: StoragePlugin> Plugin for StorageAdapter<P> {
  fn methods(&self) -> Vec<String> {
    vec!["save".into(), "load".into()]
  }

  async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    match method {
      "save" => self.0.save(args).await,
      "load" => self.0.load(args).await,
      other => Err(unknown(other)),
    }
  }
}

type MethodFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
type HookFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Plugin assembled from closures, for plugin types without a typed trait
/// and for wiring ad-hoc integrations.
#[derive(Clone, Default)]
pub struct DynamicPlugin {
  methods: BTreeMap<String, MethodFn>,
  initialize: Option<HookFn>,
  cleanup: Option<HookFn>,
}

impl DynamicPlugin {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn method<F, Fut>(mut self, name: &str, f: F) -> Self
  where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
  {
    let f: MethodFn = Arc::new(move |args| Box::pin(f(args)));
    self.methods.insert(name.to_string(), f);
    self
  }

  pub fn sync_method<F>(self, name: &str, f: F) -> Self
  where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
  {
    self.method(name, move |args| ready(f(args)))
  }

  pub fn on_initialize<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.initialize = Some(Arc::new(move || Box::pin(f())));
    self
  }

  pub fn on_cleanup<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.cleanup = Some(Arc::new(move || Box::pin(f())));
    self
  }
}

#[async_trait]
impl Plugin for DynamicPlugin {
  fn methods(&self) -> Vec<String> {
    self.methods.keys().cloned().collect()
  }

  fn has_initialize(&self) -> bool {
    self.initialize.is_some()
  }

  fn has_cleanup(&self) -> bool {
    self.cleanup.is_some()
  }

  async fn initialize(&self) -> anyhow::Result<()> {
    match &self.initialize {
      Some(hook) => hook().await,
      None => Ok(()),
    }
  }

  async fn cleanup(&self) -> anyhow::Result<()> {
    match &self.cleanup {
      Some(hook) => hook().await,
      None => Ok(()),
    }
  }

  async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    match self.methods.get(method) {
      Some(f) => f(args).await,
      None => Err(unknown(method)),
    }
  }
}
