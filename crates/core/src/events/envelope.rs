use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Channel that receives a copy of every standardized emission.
pub const EVENT_CHANNEL: &str = "event";
/// Channel that receives listener failures from synchronous emissions.
pub const ERROR_CHANNEL: &str = "error";

const NAME_ALLOWLIST: [&str; 2] = [EVENT_CHANNEL, ERROR_CHANNEL];

static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();

fn segment_regex() -> &'static Regex {
  SEGMENT_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid regex"))
}

/// `component` and `action` must match `^[a-z][a-z0-9_]*$`.
pub fn is_valid_segment(segment: &str) -> bool {
  segment_regex().is_match(segment)
}

/// Canonical event name `component:action`.
pub fn canonical_name(component: &str, action: &str) -> String {
  format!("{component}:{action}")
}

/// Whether a canonical name breaks the grammar and is not allowlisted.
pub fn violates_grammar(component: &str, action: &str) -> bool {
  let name = canonical_name(component, action);
  if NAME_ALLOWLIST.contains(&name.as_str()) || NAME_ALLOWLIST.contains(&component) {
    return false;
  }
  !(is_valid_segment(component) && is_valid_segment(action))
}

/// Split `component:action` at the first colon.
pub fn split_name(name: &str) -> Option<(&str, &str)> {
  name.split_once(':')
}

pub fn now_iso() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

/// Correlation identifiers carried by every standardized event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIds {
  pub trace_id: String,
  pub request_id: String,
}

impl TraceIds {
  pub fn generate() -> Self {
    Self {
      trace_id: Uuid::new_v4().to_string(),
      request_id: Uuid::new_v4().to_string(),
    }
  }

  /// Reuse ids present on a payload (camelCase first, then snake_case); fill the rest.
  pub fn from_payload(payload: &Map<String, Value>) -> Self {
    let pick = |camel: &str, snake: &str| {
      payload
        .get(camel)
        .or_else(|| payload.get(snake))
        .and_then(Value::as_str)
        .map(str::to_string)
    };
    Self {
      trace_id: pick("traceId", "trace_id").unwrap_or_else(|| Uuid::new_v4().to_string()),
      request_id: pick("requestId", "request_id").unwrap_or_else(|| Uuid::new_v4().to_string()),
    }
  }

  pub fn write_into(&self, payload: &mut Map<String, Value>) {
    payload.insert("traceId".into(), Value::String(self.trace_id.clone()));
    payload.insert("requestId".into(), Value::String(self.request_id.clone()));
  }
}

/// Turn arbitrary data into an object payload; non-objects land under `value`.
pub fn into_object(data: Value) -> Map<String, Value> {
  match data {
    Value::Object(map) => map,
    Value::Null => Map::new(),
    other => {
      let mut map = Map::new();
      map.insert("value".into(), other);
      map
    }
  }
}

/// Build the standardized payload for `component:action`.
///
/// Fields already on the payload win; snake_case ids are mirrored to camelCase.
pub fn stamp(component: &str, action: &str, data: Value) -> Map<String, Value> {
  let mut payload = into_object(data);

  for (snake, camel) in [("trace_id", "traceId"), ("request_id", "requestId")] {
    if !payload.contains_key(camel)
      && let Some(v) = payload.get(snake).cloned()
    {
      payload.insert(camel.into(), v);
    }
  }

  let ids = TraceIds::from_payload(&payload);
  payload
    .entry("traceId")
    .or_insert_with(|| Value::String(ids.trace_id));
  payload
    .entry("requestId")
    .or_insert_with(|| Value::String(ids.request_id));
  payload
    .entry("timestamp")
    .or_insert_with(|| Value::String(now_iso()));
  payload
    .entry("component")
    .or_insert_with(|| Value::String(component.to_string()));
  payload
    .entry("action")
    .or_insert_with(|| Value::String(action.to_string()));
  payload
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use serde_json::json;

  #[test]
  fn stamps_missing_envelope_fields() {
    let p = stamp("task", "created", json!({"id": "T001"}));
    assert_eq!(p["component"], "task");
    assert_eq!(p["action"], "created");
    assert_eq!(p["id"], "T001");
    assert!(p["traceId"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(p["requestId"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(p["timestamp"].as_str().is_some());
  }

  #[test]
  fn preserves_existing_ids_and_mirrors_snake_case() {
    let p = stamp("a", "b", json!({"traceId": "t-1", "request_id": "r-1"}));
    assert_eq!(p["traceId"], "t-1");
    assert_eq!(p["requestId"], "r-1");
    assert_eq!(p["request_id"], "r-1");
  }

  #[test]
  fn non_object_data_is_wrapped() {
    let p = stamp("a", "b", json!(5));
    assert_eq!(p["value"], 5);
    let p = stamp("a", "b", Value::Null);
    assert!(p.get("value").is_none());
  }

  #[test]
  fn grammar_and_allowlist() {
    assert!(!violates_grammar("task", "created"));
    assert!(violates_grammar("Task", "created"));
    assert!(violates_grammar("task", "created-now"));
    assert!(!violates_grammar("error", "Whatever"));
    assert_eq!(split_name("plugin:registered"), Some(("plugin", "registered")));
    assert_eq!(split_name("plain"), None);
  }

  proptest! {
    #[test]
    fn valid_segments_match_grammar(s in "[a-z][a-z0-9_]{0,16}") {
      prop_assert!(is_valid_segment(&s));
    }

    #[test]
    fn leading_digit_or_upper_is_rejected(s in "[0-9A-Z][a-z0-9_]{0,16}") {
      prop_assert!(!is_valid_segment(&s));
    }
  }
}
