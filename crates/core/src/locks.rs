//! Named advisory locks for one process.
//!
//! Participants must share the same [`LockManager`]; nothing here coordinates
//! across processes.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

use crate::config::LockConfig;
use crate::errors::{AppError, Result};
use crate::events::{EventBus, now_ms};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
  pub resource_id: String,
  pub locker_id: String,
  /// Acquisition (or refresh) time in epoch milliseconds.
  pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
  pub locker_id: String,
  pub timestamp: i64,
  pub age: i64,
  pub is_expired: bool,
}

pub struct LockManager {
  locks: Mutex<HashMap<String, Lock>>,
  config: LockConfig,
  bus: Option<EventBus>,
}

impl LockManager {
  pub fn new(config: LockConfig) -> Self {
    Self {
      locks: Mutex::new(HashMap::new()),
      config,
      bus: None,
    }
  }

  pub fn with_event_bus(mut self, bus: EventBus) -> Self {
    self.bus = Some(bus);
    self
  }

  pub fn config(&self) -> &LockConfig {
    &self.config
  }

  fn is_expired(&self, lock: &Lock, now: i64) -> bool {
    now - lock.timestamp > self.config.lock_timeout_ms as i64
  }

  fn try_acquire(&self, resource_id: &str, locker_id: &str) -> Option<Lock> {
    let now = now_ms();
    let mut locks = self.locks.lock();
    match locks.get(resource_id) {
      Some(existing) if existing.locker_id == locker_id => {
        debug!(event = "lock_refreshed", resource_id, locker_id, "lock refreshed by owner");
      }
      Some(existing) if self.is_expired(existing, now) => {
        warn!(
          event = "lock_expired_overwrite",
          resource_id,
          previous_locker = %existing.locker_id,
          locker_id,
          age_ms = now - existing.timestamp,
          "overwriting expired lock"
        );
      }
      Some(_) => return None,
      None => {}
    }
    let lock = Lock {
      resource_id: resource_id.to_string(),
      locker_id: locker_id.to_string(),
      timestamp: now,
    };
    locks.insert(resource_id.to_string(), lock.clone());
    Some(lock)
  }

  /// Acquire `resource_id` for `locker_id`, retrying every `retry_interval_ms`
  /// until `timeout` (default `acquire_timeout_ms`) elapses or `max_retries`
  /// attempts have failed. Reacquisition by the owner refreshes the lock.
  pub async fn acquire_lock(&self, resource_id: &str, locker_id: &str, timeout: Option<Duration>) -> Result<Lock> {
    let timeout = timeout.unwrap_or(self.config.acquire_timeout());
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
      if let Some(lock) = self.try_acquire(resource_id, locker_id) {
        debug!(event = "lock_acquired", resource_id, locker_id, attempts, "lock acquired");
        if let Some(bus) = &self.bus {
          bus.emit_standardized(
            "lock",
            "acquired",
            json!({ "resourceId": resource_id, "lockerId": locker_id }),
          );
        }
        return Ok(lock);
      }
      attempts += 1;
      if attempts >= self.config.max_retries || started.elapsed() >= timeout {
        break;
      }
      sleep(self.config.retry_interval()).await;
    }

    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    warn!(event = "lock_timeout", resource_id, locker_id, attempts, timeout_ms, "lock acquisition timed out");
    Err(
      AppError::timeout(format!(
        "failed to acquire lock on '{resource_id}' for '{locker_id}' within {timeout_ms} ms"
      ))
      .with_code("ERR_LOCK_TIMEOUT")
      .with_context("resourceId", resource_id)
      .with_context("lockerId", locker_id)
      .with_context("timeout", timeout_ms)
      .with_context("errorType", "LockTimeoutError"),
    )
  }

  /// Release a lock held by `locker_id`. An absent lock counts as released.
  pub fn release_lock(&self, resource_id: &str, locker_id: &str) -> Result<bool> {
    let mut locks = self.locks.lock();
    let Some(existing) = locks.get(resource_id) else {
      debug!(event = "lock_release_absent", resource_id, locker_id, "no lock to release");
      return Ok(true);
    };
    if existing.locker_id != locker_id {
      let owner = existing.locker_id.clone();
      error!(event = "lock_release_denied", resource_id, locker_id, owner = %owner, "lock is owned by another locker");
      return Err(
        AppError::lock(format!("lock on '{resource_id}' is held by '{owner}', not '{locker_id}'"))
          .with_code("ERR_LOCK_OWNERSHIP")
          .with_recoverable(false)
          .with_context("resourceId", resource_id)
          .with_context("lockerId", locker_id)
          .with_context("ownerId", owner),
      );
    }
    locks.remove(resource_id);
    drop(locks);
    debug!(event = "lock_released", resource_id, locker_id, "lock released");
    if let Some(bus) = &self.bus {
      bus.emit_standardized(
        "lock",
        "released",
        json!({ "resourceId": resource_id, "lockerId": locker_id }),
      );
    }
    Ok(true)
  }

  /// Snapshot of every held lock.
  pub fn get_lock_status(&self) -> BTreeMap<String, LockStatus> {
    let now = now_ms();
    self
      .locks
      .lock()
      .iter()
      .map(|(id, lock)| {
        (
          id.clone(),
          LockStatus {
            locker_id: lock.locker_id.clone(),
            timestamp: lock.timestamp,
            age: now - lock.timestamp,
            is_expired: self.is_expired(lock, now),
          },
        )
      })
      .collect()
  }

  pub fn is_locked(&self, resource_id: &str) -> bool {
    let now = now_ms();
    self
      .locks
      .lock()
      .get(resource_id)
      .is_some_and(|l| !self.is_expired(l, now))
  }

  /// Drop expired entries. Returns how many were removed.
  pub fn clear_expired(&self) -> usize {
    let now = now_ms();
    let mut locks = self.locks.lock();
    let before = locks.len();
    locks.retain(|_, l| now - l.timestamp <= self.config.lock_timeout_ms as i64);
    before - locks.len()
  }

  /// Run `f` while holding `resource_id`.
  pub async fn with_lock<F, Fut, T>(&self, resource_id: &str, locker_id: &str, f: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.acquire_lock(resource_id, locker_id, None).await?;
    let result = f().await;
    if let Err(err) = self.release_lock(resource_id, locker_id) {
      warn!(event = "lock_release_failed", resource_id, locker_id, error = %err, "could not release lock");
      if result.is_ok() {
        return Err(err);
      }
    }
    result
  }
}
