use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::catalog::EventCatalog;
use super::envelope::{
  ERROR_CHANNEL, EVENT_CHANNEL, canonical_name, now_ms, split_name, stamp, violates_grammar,
};
use crate::errors::AppError;

pub type SyncListener = Arc<dyn Fn(&Value, &str) -> anyhow::Result<()> + Send + Sync>;
pub type AsyncListener =
  Arc<dyn Fn(Value, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
enum Handler {
  Sync(SyncListener),
  Async(AsyncListener),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registration {
  id: ListenerId,
  handler: Handler,
}

/// One retained emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
  pub event: String,
  pub data: Value,
  #[serde(rename = "timestampMs")]
  pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOptions {
  pub keep_history: bool,
  pub history_limit: usize,
}

impl Default for BusOptions {
  fn default() -> Self {
    Self {
      keep_history: false,
      history_limit: 100,
    }
  }
}

struct Inner {
  listeners: Mutex<HashMap<String, Vec<Registration>>>,
  next_id: AtomicU64,
  history: Mutex<VecDeque<HistoryEntry>>,
  options: BusOptions,
  catalog: RwLock<Option<Arc<EventCatalog>>>,
}

/// In-process publish/subscribe bus.
///
/// Cloning is cheap; clones share listeners, history and catalog.
#[derive(Clone)]
pub struct EventBus {
  inner: Arc<Inner>,
}

/// Disposer returned by [`EventBus::on`]; call [`Subscription::dispose`] to detach.
pub struct Subscription {
  bus: Weak<Inner>,
  event: String,
  id: ListenerId,
}

impl Subscription {
  pub fn id(&self) -> ListenerId {
    self.id
  }

  pub fn event(&self) -> &str {
    &self.event
  }

  /// Remove the listener. Returns false when it was already gone.
  pub fn dispose(self) -> bool {
    match self.bus.upgrade() {
      Some(inner) => remove_listener(&inner, &self.event, self.id),
      None => false,
    }
  }
}

fn remove_listener(inner: &Inner, event: &str, id: ListenerId) -> bool {
  let mut listeners = inner.listeners.lock();
  let Some(list) = listeners.get_mut(event) else {
    return false;
  };
  let before = list.len();
  list.retain(|r| r.id != id);
  let removed = list.len() != before;
  if list.is_empty() {
    listeners.remove(event);
  }
  removed
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

impl EventBus {
  pub fn new() -> Self {
    Self::with_options(BusOptions::default())
  }

  pub fn with_options(options: BusOptions) -> Self {
    Self {
      inner: Arc::new(Inner {
        listeners: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(1),
        history: Mutex::new(VecDeque::new()),
        options: BusOptions {
          keep_history: options.keep_history,
          history_limit: options.history_limit.max(1),
        },
        catalog: RwLock::new(None),
      }),
    }
  }

  pub fn options(&self) -> BusOptions {
    self.inner.options
  }

  fn add(&self, event: &str, handler: Handler) -> Subscription {
    let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
    self
      .inner
      .listeners
      .lock()
      .entry(event.to_string())
      .or_default()
      .push(Registration { id, handler });
    Subscription {
      bus: Arc::downgrade(&self.inner),
      event: event.to_string(),
      id,
    }
  }

  /// Register a synchronous listener. `event` may be `prefix:*`.
  ///
  /// The listener receives the payload and the actual event name.
  pub fn on<F>(&self, event: &str, listener: F) -> Subscription
  where
    F: Fn(&Value, &str) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.add(event, Handler::Sync(Arc::new(listener)))
  }

  /// Register an async listener. Awaited in order by [`EventBus::emit_async`];
  /// spawned onto the current runtime by [`EventBus::emit`].
  pub fn on_async<F, Fut>(&self, event: &str, listener: F) -> Subscription
  where
    F: Fn(Value, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    let boxed: AsyncListener = Arc::new(move |payload, name| Box::pin(listener(payload, name)));
    self.add(event, Handler::Async(boxed))
  }

  pub fn off(&self, event: &str, id: ListenerId) -> bool {
    remove_listener(&self.inner, event, id)
  }

  /// Drop every listener for `event`, or all listeners when `None`.
  pub fn remove_all_listeners(&self, event: Option<&str>) {
    let mut listeners = self.inner.listeners.lock();
    match event {
      Some(name) => {
        listeners.remove(name);
      }
      None => listeners.clear(),
    }
  }

  /// Number of listeners that would receive an emission of `event`.
  pub fn listener_count(&self, event: &str) -> usize {
    self.matching(event).len()
  }

  /// Exact listeners plus every `prefix:*` listener whose prefix matches, in registration order.
  fn matching(&self, event: &str) -> Vec<Registration> {
    let listeners = self.inner.listeners.lock();
    let mut out: Vec<Registration> = Vec::new();
    for (key, regs) in listeners.iter() {
      let hit = if key == event {
        true
      } else if let Some(prefix) = key.strip_suffix('*') {
        prefix.ends_with(':') && event.starts_with(prefix)
      } else {
        false
      };
      if hit {
        out.extend(regs.iter().cloned());
      }
    }
    out.sort_by_key(|r| r.id);
    out
  }

  fn record(&self, event: &str, data: &Value) {
    if !self.inner.options.keep_history {
      return;
    }
    let mut history = self.inner.history.lock();
    history.push_back(HistoryEntry {
      event: event.to_string(),
      data: data.clone(),
      timestamp_ms: now_ms(),
    });
    while history.len() > self.inner.options.history_limit {
      history.pop_front();
    }
  }

  /// Synchronous emission. Returns whether any listener ran.
  pub fn emit(&self, event: &str, payload: Value) -> bool {
    self.record(event, &payload);
    self.dispatch(event, &payload)
  }

  fn dispatch(&self, event: &str, payload: &Value) -> bool {
    let regs = self.matching(event);
    if regs.is_empty() {
      return false;
    }
    for reg in regs {
      match reg.handler {
        Handler::Sync(listener) => {
          if let Err(err) = listener(payload, event) {
            error!(event = "listener_failed", name = %event, error = %err, "event listener failed");
            if event != ERROR_CHANNEL {
              self.emit(
                ERROR_CHANNEL,
                json!({ "event": event, "error": err.to_string() }),
              );
            }
          }
        }
        Handler::Async(listener) => match tokio::runtime::Handle::try_current() {
          Ok(handle) => {
            let fut = listener(payload.clone(), event.to_string());
            let name = event.to_string();
            handle.spawn(async move {
              if let Err(err) = fut.await {
                error!(event = "listener_failed", name = %name, error = %err, "async event listener failed");
              }
            });
          }
          Err(_) => {
            debug!(event = "listener_skipped", name = %event, "no runtime for async listener");
          }
        },
      }
    }
    true
  }

  /// Await every listener in registration order. A failing listener is
  /// logged and does not stop its siblings.
  pub async fn emit_async(&self, event: &str, payload: Value) -> bool {
    self.record(event, &payload);
    self.dispatch_async(event, &payload).await
  }

  async fn dispatch_async(&self, event: &str, payload: &Value) -> bool {
    let regs = self.matching(event);
    if regs.is_empty() {
      return false;
    }
    for reg in regs {
      let result = match reg.handler {
        Handler::Sync(listener) => listener(payload, event),
        Handler::Async(listener) => listener(payload.clone(), event.to_string()).await,
      };
      if let Err(err) = result {
        error!(event = "listener_failed", name = %event, error = %err, "event listener failed");
      }
    }
    true
  }

  fn standardize(&self, component: &str, action: &str, data: Value) -> (String, Value, Value) {
    if violates_grammar(component, action) {
      warn!(
        event = "event_name_invalid",
        component = %component,
        action = %action,
        "event name does not match component:action grammar"
      );
    }
    let name = canonical_name(component, action);
    let payload = stamp(component, action, data);
    let mut generic = payload.clone();
    generic.insert("type".into(), Value::String(name.clone()));
    (name, Value::Object(payload), Value::Object(generic))
  }

  /// Emit `component:action` with the stamped envelope, and a copy on the
  /// `event` channel carrying `type`. Returns whether any listener ran.
  pub fn emit_standardized(&self, component: &str, action: &str, data: Value) -> bool {
    let (name, payload, generic) = self.standardize(component, action, data);
    let named = self.emit(&name, payload);
    let channel = self.dispatch(EVENT_CHANNEL, &generic);
    named || channel
  }

  pub async fn emit_standardized_async(&self, component: &str, action: &str, data: Value) -> bool {
    let (name, payload, generic) = self.standardize(component, action, data);
    let named = self.emit_async(&name, payload).await;
    let channel = self.dispatch_async(EVENT_CHANNEL, &generic).await;
    named || channel
  }

  pub fn set_catalog(&self, catalog: EventCatalog) {
    *self.inner.catalog.write() = Some(Arc::new(catalog));
  }

  pub fn catalog(&self) -> Option<Arc<EventCatalog>> {
    self.inner.catalog.read().clone()
  }

  /// Emit a name that must be registered in the catalog.
  pub fn emit_cataloged(&self, name: &str, data: Value) -> Result<bool, AppError> {
    let Some(catalog) = self.catalog() else {
      return Err(AppError::event("event catalog is not configured").with_context("eventName", name));
    };
    if !catalog.contains(name) {
      return Err(
        AppError::event(format!("event '{name}' is not registered in the catalog"))
          .with_context("eventName", name),
      );
    }
    let Some((component, action)) = split_name(name) else {
      return Err(AppError::event(format!("event '{name}' is not canonical")).with_context("eventName", name));
    };
    Ok(self.emit_standardized(component, action, data))
  }

  pub fn history(&self) -> Vec<HistoryEntry> {
    self.inner.history.lock().iter().cloned().collect()
  }

  pub fn clear_history(&self) {
    self.inner.history.lock().clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  fn collector(bus: &EventBus, event: &str) -> Arc<Mutex<Vec<(String, Value)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on(event, move |payload, name| {
      sink.lock().push((name.to_string(), payload.clone()));
      Ok(())
    });
    seen
  }

  #[test]
  fn emit_reports_whether_listeners_ran() {
    let bus = EventBus::new();
    assert!(!bus.emit("task:created", json!({})));
    let seen = collector(&bus, "task:created");
    assert!(bus.emit("task:created", json!({"id": "T001"})));
    assert_eq!(seen.lock().len(), 1);
  }

  #[test]
  fn subscription_disposes_listener() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let sub = bus.on("a:b", move |_, _| {
      c.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });
    bus.emit("a:b", json!({}));
    assert!(sub.dispose());
    bus.emit("a:b", json!({}));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.listener_count("a:b"), 0);
  }

  #[test]
  fn off_by_id() {
    let bus = EventBus::new();
    let sub = bus.on("a:b", |_, _| Ok(()));
    let id = sub.id();
    assert!(bus.off("a:b", id));
    assert!(!bus.off("a:b", id));
  }

  #[test]
  fn wildcard_receives_only_matching_prefix_with_actual_name() {
    let bus = EventBus::new();
    let seen = collector(&bus, "plugin:*");
    bus.emit("plugin:registered", json!({}));
    bus.emit("plugins:other", json!({}));
    bus.emit("task:created", json!({}));
    bus.emit("plugin", json!({}));
    bus.emit("plugin:method_invoked", json!({}));
    let names: Vec<String> = seen.lock().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, vec!["plugin:registered", "plugin:method_invoked"]);
  }

  #[test]
  fn listeners_run_in_registration_order_across_exact_and_wildcard() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for (key, tag) in [("x:*", "w1"), ("x:y", "e1"), ("x:*", "w2"), ("x:y", "e2")] {
      let o = Arc::clone(&order);
      bus.on(key, move |_, _| {
        o.lock().push(tag);
        Ok(())
      });
    }
    bus.emit("x:y", json!({}));
    assert_eq!(*order.lock(), vec!["w1", "e1", "w2", "e2"]);
  }

  #[test]
  fn failing_sync_listener_surfaces_on_error_channel_and_siblings_run() {
    let bus = EventBus::new();
    let errors = collector(&bus, ERROR_CHANNEL);
    bus.on("a:b", |_, _| Err(anyhow::anyhow!("listener broke")));
    let after = collector(&bus, "a:b");
    assert!(bus.emit("a:b", json!({})));
    assert_eq!(after.lock().len(), 1);
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1["event"], "a:b");
    assert_eq!(errors[0].1["error"], "listener broke");
  }

  #[tokio::test]
  async fn emit_async_awaits_in_order_and_isolates_failures() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let o1 = Arc::clone(&order);
    bus.on_async("job:done", move |_, _| {
      let o = Arc::clone(&o1);
      async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        o.lock().push(1);
        Ok(())
      }
    });
    bus.on_async("job:done", |_, _| async { Err(anyhow::anyhow!("nope")) });
    let o3 = Arc::clone(&order);
    bus.on("job:done", move |_, _| {
      o3.lock().push(3);
      Ok(())
    });
    assert!(bus.emit_async("job:done", json!({})).await);
    assert_eq!(*order.lock(), vec![1, 3]);
  }

  #[test]
  fn standardized_emission_stamps_and_mirrors_to_event_channel() {
    let bus = EventBus::new();
    let named = collector(&bus, "task:created");
    let generic = collector(&bus, EVENT_CHANNEL);
    assert!(bus.emit_standardized("task", "created", json!({"id": "T001", "trace_id": "t-9"})));

    let named = named.lock();
    let payload = &named[0].1;
    assert_eq!(payload["component"], "task");
    assert_eq!(payload["action"], "created");
    assert_eq!(payload["traceId"], "t-9");
    assert!(payload["requestId"].is_string());
    assert!(payload["timestamp"].is_string());

    let generic = generic.lock();
    assert_eq!(generic[0].0, EVENT_CHANNEL);
    assert_eq!(generic[0].1["type"], "task:created");
    assert_eq!(generic[0].1["traceId"], "t-9");
  }

  #[test]
  fn invalid_names_still_emit() {
    let bus = EventBus::new();
    let seen = collector(&bus, "Bad:Name");
    assert!(bus.emit_standardized("Bad", "Name", json!({})));
    assert_eq!(seen.lock().len(), 1);
  }

  #[test]
  fn cataloged_emission_requires_catalog_and_registration() {
    let bus = EventBus::new();
    let err = bus.emit_cataloged("task:created", json!({})).unwrap_err();
    assert_eq!(err.name(), "EventError");

    bus.set_catalog(EventCatalog::with_defaults());
    let err = bus.emit_cataloged("task:exploded", json!({})).unwrap_err();
    assert!(err.message().contains("not registered"));

    let seen = collector(&bus, "task:created");
    assert!(bus.emit_cataloged("task:created", json!({"id": "T001"})).unwrap());
    assert_eq!(seen.lock()[0].1["id"], "T001");
  }

  #[test]
  fn history_is_bounded_fifo() {
    let bus = EventBus::with_options(BusOptions {
      keep_history: true,
      history_limit: 2,
    });
    bus.emit("a:one", json!(1));
    bus.emit("a:two", json!(2));
    bus.emit("a:three", json!(3));
    let names: Vec<String> = bus.history().into_iter().map(|h| h.event).collect();
    assert_eq!(names, vec!["a:two", "a:three"]);
    bus.clear_history();
    assert!(bus.history().is_empty());
  }

  #[test]
  fn history_disabled_by_default() {
    let bus = EventBus::new();
    bus.emit("a:one", json!(1));
    assert!(bus.history().is_empty());
  }
}
