//! Named service registry with lazily resolved, cached factories.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{AppError, Result};

pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&ServiceContainer) -> Result<Instance> + Send + Sync>;

enum Descriptor {
  Value(Instance),
  Factory {
    factory: Factory,
    cached: Option<Instance>,
  },
}

/// Service container. Factories run once; their result is cached for the
/// container's lifetime.
#[derive(Default)]
pub struct ServiceContainer {
  services: Mutex<HashMap<String, Descriptor>>,
  // Resolution happens synchronously on one thread, so the stack is per thread.
  resolving: Mutex<HashMap<ThreadId, Vec<String>>>,
}

impl ServiceContainer {
  pub fn new() -> Self {
    Self::default()
  }

  fn insert(&self, name: &str, descriptor: Descriptor) {
    if self.services.lock().insert(name.to_string(), descriptor).is_some() {
      debug!(event = "service_replaced", service = %name, "service registration replaced");
    }
  }

  /// Register an eager value.
  pub fn register<T: Any + Send + Sync>(&self, name: &str, value: T) {
    self.insert(name, Descriptor::Value(Arc::new(value)));
  }

  /// Register an already shared value.
  pub fn register_arc<T: Any + Send + Sync>(&self, name: &str, value: Arc<T>) {
    self.insert(name, Descriptor::Value(value));
  }

  /// Register a factory invoked with the container on first `get`.
  pub fn register_factory<T, F>(&self, name: &str, factory: F)
  where
    T: Any + Send + Sync,
    F: Fn(&ServiceContainer) -> Result<T> + Send + Sync + 'static,
  {
    let factory: Factory = Arc::new(move |c| factory(c).map(|v| Arc::new(v) as Instance));
    self.insert(
      name,
      Descriptor::Factory {
        factory,
        cached: None,
      },
    );
  }

  /// Resolve `name` and downcast it to `T`.
  pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
    let instance = self.resolve(name)?;
    instance.downcast::<T>().map_err(|_| {
      AppError::dependency(format!("service '{name}' is not a {}", type_name::<T>()))
        .with_context("service", name)
    })
  }

  /// Resolve `name` without downcasting.
  pub fn resolve(&self, name: &str) -> Result<Instance> {
    let factory = {
      let services = self.services.lock();
      match services.get(name) {
        None => {
          return Err(AppError::dependency(format!("service '{name}' not found")).with_context("service", name));
        }
        Some(Descriptor::Value(v)) => return Ok(Arc::clone(v)),
        Some(Descriptor::Factory { cached: Some(v), .. }) => return Ok(Arc::clone(v)),
        Some(Descriptor::Factory { factory, cached: None }) => Arc::clone(factory),
      }
    };

    self.enter(name)?;
    let result = factory(self);
    self.leave();
    let instance = result?;

    let mut services = self.services.lock();
    if let Some(Descriptor::Factory { cached, .. }) = services.get_mut(name) {
      if let Some(existing) = cached {
        return Ok(Arc::clone(existing));
      }
      *cached = Some(Arc::clone(&instance));
    }
    debug!(event = "service_resolved", service = %name, "factory service resolved");
    Ok(instance)
  }

  fn enter(&self, name: &str) -> Result<()> {
    let mut stacks = self.resolving.lock();
    let stack = stacks.entry(thread::current().id()).or_default();
    if stack.iter().any(|n| n == name) {
      let mut chain = stack.clone();
      chain.push(name.to_string());
      return Err(
        AppError::dependency(format!("circular dependency detected: {}", chain.join(" -> ")))
          .with_context("chain", chain),
      );
    }
    stack.push(name.to_string());
    Ok(())
  }

  fn leave(&self) {
    let mut stacks = self.resolving.lock();
    let id = thread::current().id();
    if let Some(stack) = stacks.get_mut(&id) {
      stack.pop();
      if stack.is_empty() {
        stacks.remove(&id);
      }
    }
  }

  pub fn has(&self, name: &str) -> bool {
    self.services.lock().contains_key(name)
  }

  pub fn remove(&self, name: &str) -> bool {
    self.services.lock().remove(name).is_some()
  }

  pub fn clear(&self) {
    self.services.lock().clear();
  }

  /// Registered names, sorted.
  pub fn registered_service_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.services.lock().keys().cloned().collect();
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn eager_values_resolve_directly() {
    let c = ServiceContainer::new();
    c.register("answer", 42u32);
    assert_eq!(*c.get::<u32>("answer").unwrap(), 42);
    assert!(c.has("answer"));
  }

  #[test]
  fn factories_run_once_and_are_cached() {
    let c = ServiceContainer::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    c.register_factory("svc", move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(String::from("built"))
    });
    let a = c.get::<String>("svc").unwrap();
    let b = c.get::<String>("svc").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn factories_can_depend_on_other_services() {
    let c = ServiceContainer::new();
    c.register("base", 2u64);
    c.register_factory("double", |c| Ok(*c.get::<u64>("base")? * 2));
    assert_eq!(*c.get::<u64>("double").unwrap(), 4);
  }

  #[test]
  fn cycles_fail_with_full_chain() {
    let c = ServiceContainer::new();
    c.register_factory("a", |c| c.get::<u8>("b").map(|v| *v));
    c.register_factory("b", |c| c.get::<u8>("a").map(|v| *v));
    let err = c.get::<u8>("a").unwrap_err();
    assert_eq!(err.name(), "DependencyError");
    assert!(err.message().contains("a -> b -> a"), "{}", err.message());
    // a failed resolution leaves nothing cached and no stale stack
    c.register("b", 1u8);
    assert_eq!(*c.get::<u8>("a").unwrap(), 1);
  }

  #[test]
  fn missing_and_mistyped_services() {
    let c = ServiceContainer::new();
    let err = c.get::<u8>("ghost").unwrap_err();
    assert_eq!(err.message(), "service 'ghost' not found");
    c.register("n", 1u8);
    assert!(c.get::<String>("n").is_err());
  }

  #[test]
  fn remove_clear_and_names() {
    let c = ServiceContainer::new();
    c.register("b", 1u8);
    c.register("a", 2u8);
    assert_eq!(c.registered_service_names(), vec!["a", "b"]);
    assert!(c.remove("a"));
    assert!(!c.remove("a"));
    c.clear();
    assert!(c.registered_service_names().is_empty());
  }
}
