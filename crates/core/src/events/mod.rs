//! Standardized in-process event bus.
//!
//! Events are named `component:action`. Every standardized emission carries
//! `component`, `action`, `timestamp`, `traceId` and `requestId`, and is
//! mirrored onto the [`EVENT_CHANNEL`] with a `type` field so that a single
//! subscriber can observe everything. Subscribers of both channels therefore
//! see each standardized emission twice.

mod bus;
mod catalog;
mod envelope;

pub use bus::{AsyncListener, BusOptions, EventBus, HistoryEntry, ListenerId, Subscription, SyncListener};
pub use catalog::{CatalogEntry, EventCatalog};
pub use envelope::{
  ERROR_CHANNEL, EVENT_CHANNEL, TraceIds, canonical_name, into_object, is_valid_segment, now_iso, now_ms,
  split_name, stamp, violates_grammar,
};

use serde_json::{Value, json};

use crate::errors::AppError;

/// Emit `app:error` for a failure at a component boundary.
///
/// The stack is included only when `include_stack` is set.
pub fn emit_error_event(
  bus: &EventBus,
  error: &AppError,
  component: &str,
  operation: &str,
  ids: &TraceIds,
  include_stack: bool,
) -> bool {
  let mut payload = json!({
    "error": error.to_json(include_stack),
    "component": component,
    "operation": operation,
    "errorCode": error.code(),
  });
  if let Value::Object(map) = &mut payload {
    ids.write_into(map);
  }
  bus.emit_standardized("app", "error", payload)
}
