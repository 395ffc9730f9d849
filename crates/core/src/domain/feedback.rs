use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use super::task::is_valid_task_id;
use crate::adapters::fs::{FEEDBACK_FILE, FEEDBACK_HISTORY_DIR, feedback_dir};
use crate::error_handler::ErrorHandler;
use crate::errors::{AppError, Result};
use crate::events::{EventBus, TraceIds, into_object, now_iso};
use crate::repository::{CollectionLayout, Entity, Repository, RepositoryOptions, ValidationMode, ValidationOutcome, Validator};
use crate::storage::StorageService;

pub const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
  Open,
  InProgress,
  Resolved,
  Wontfix,
}

impl FeedbackStatus {
  pub const ALL: [FeedbackStatus; 4] = [
    FeedbackStatus::Open,
    FeedbackStatus::InProgress,
    FeedbackStatus::Resolved,
    FeedbackStatus::Wontfix,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      FeedbackStatus::Open => "open",
      FeedbackStatus::InProgress => "in_progress",
      FeedbackStatus::Resolved => "resolved",
      FeedbackStatus::Wontfix => "wontfix",
    }
  }

  /// Resolved and wontfix items are archived.
  pub fn is_closed(self) -> bool {
    matches!(self, FeedbackStatus::Resolved | FeedbackStatus::Wontfix)
  }

  pub fn can_transition(self, to: FeedbackStatus) -> bool {
    use FeedbackStatus::*;
    self == to
      || matches!(
        (self, to),
        (Open, InProgress | Resolved | Wontfix) | (InProgress, Open | Resolved | Wontfix) | (Resolved, Open) | (Wontfix, Open)
      )
  }

  pub fn check_transition(self, to: FeedbackStatus) -> Result<()> {
    if self.can_transition(to) {
      return Ok(());
    }
    Err(
      AppError::state(format!("Transition from {self} to {to} is not allowed"))
        .with_context("field", "status")
        .with_context("from", self.as_str())
        .with_context("to", to.as_str()),
    )
  }
}

impl fmt::Display for FeedbackStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for FeedbackStatus {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|p| p.as_str() == s)
      .ok_or_else(|| AppError::validation(format!("unknown feedback status '{s}'")).with_context("value", s))
  }
}

fn loop_of(entity: &Entity) -> Option<&serde_json::Map<String, Value>> {
  entity.get("feedback_loop").and_then(Value::as_object)
}

fn loop_str<'a>(entity: &'a Entity, field: &str) -> Option<&'a str> {
  loop_of(entity).and_then(|l| l.get(field)).and_then(Value::as_str)
}

pub struct FeedbackValidator;

impl Validator for FeedbackValidator {
  fn validate(&self, entity: &Entity, mode: ValidationMode) -> ValidationOutcome {
    let mut errors = Vec::new();
    match entity.get("feedback_id") {
      Some(Value::String(id)) if !id.is_empty() => {}
      Some(_) => errors.push("feedback_id must be a non-empty string".to_string()),
      None => errors.push("feedback_id is required".to_string()),
    }
    let Some(lp) = loop_of(entity) else {
      if mode == ValidationMode::Create || entity.contains_key("feedback_loop") {
        errors.push("feedback_loop must be an object".to_string());
      }
      return ValidationOutcome::from_errors(errors);
    };
    let required = mode == ValidationMode::Create;
    match lp.get("task_id").and_then(Value::as_str) {
      Some(t) if is_valid_task_id(t) => {}
      None if !required && !lp.contains_key("task_id") => {}
      _ => errors.push("feedback_loop.task_id must be a task id".to_string()),
    }
    match lp.get("status").and_then(Value::as_str) {
      Some(s) if s.parse::<FeedbackStatus>().is_ok() => {}
      None if !required && !lp.contains_key("status") => {}
      _ => errors.push("feedback_loop.status is not a known status".to_string()),
    }
    match lp.get("severity").and_then(Value::as_str) {
      Some(s) if SEVERITIES.contains(&s) => {}
      None if !required && !lp.contains_key("severity") => {}
      _ => errors.push(format!("feedback_loop.severity must be one of {}", SEVERITIES.join(", "))),
    }
    if required && !lp.get("content").is_some_and(|c| c.as_str().is_some_and(|c| !c.trim().is_empty())) {
      errors.push("feedback_loop.content is required".to_string());
    }
    ValidationOutcome::from_errors(errors)
  }

  fn validate_transition(&self, field: &str, from: &str, to: &str) -> Result<()> {
    match field {
      "status" => from.parse::<FeedbackStatus>()?.check_transition(to.parse()?),
      _ => Ok(()),
    }
  }
}

/// Review feedback in `feedback/pending-feedback.json` (a bare array).
pub struct FeedbackStore {
  repo: Repository,
}

impl FeedbackStore {
  pub async fn open(
    storage: Arc<dyn StorageService>,
    context_dir: &Path,
    bus: Option<EventBus>,
    handler: Option<Arc<ErrorHandler>>,
  ) -> Result<Self> {
    let options = RepositoryOptions::new("feedback", feedback_dir(context_dir), FEEDBACK_FILE, FEEDBACK_HISTORY_DIR)
      .id_field("feedback_id")
      .layout(CollectionLayout::BareArray);
    let mut builder = Repository::builder(storage, options).validator(Arc::new(FeedbackValidator));
    if let Some(bus) = bus {
      builder = builder.event_bus(bus);
    }
    if let Some(handler) = handler {
      builder = builder.error_handler(handler);
    }
    Ok(Self {
      repo: builder.build().await?,
    })
  }

  pub fn repository(&self) -> &Repository {
    &self.repo
  }

  pub async fn list(&self) -> Result<Vec<Entity>> {
    self.repo.list().await
  }

  pub async fn get(&self, id: &str) -> Result<Option<Entity>> {
    self.repo.get_by_id(id).await
  }

  pub async fn for_task(&self, task_id: &str) -> Result<Vec<Entity>> {
    self.repo.find(|f| loop_str(f, "task_id") == Some(task_id)).await
  }

  /// Open a new feedback item for `task_id`.
  pub async fn create(&self, task_id: &str, content: &str, severity: &str) -> Result<Entity> {
    let id = format!("FB-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let now = now_iso();
    let data = json!({
      "feedback_id": id,
      "feedback_loop": {
        "task_id": task_id,
        "content": content,
        "severity": severity,
        "status": FeedbackStatus::Open.as_str(),
        "created_at": now,
        "updated_at": now,
      }
    });
    let item = self.repo.create(into_object(data)).await?;
    info!(event = "feedback_created", id = %id, task_id, severity, "feedback created");
    Ok(item)
  }

  async fn status_inner(&self, id: &str, to: FeedbackStatus, ids: &TraceIds) -> Result<Entity> {
    let mut collection = self.repo.load_collection().await?;
    let Some(pos) = collection.position("feedback_id", id) else {
      return Err(AppError::not_found(format!("feedback with ID {id} not found")).with_context("id", id));
    };
    let item = &collection.items[pos];
    let from = loop_str(item, "status")
      .and_then(|s| s.parse::<FeedbackStatus>().ok())
      .unwrap_or(FeedbackStatus::Open);
    from.check_transition(to)?;
    let task_id = loop_str(item, "task_id").unwrap_or_default().to_string();

    let mut item = item.clone();
    if let Some(Value::Object(lp)) = item.get_mut("feedback_loop") {
      let now = now_iso();
      lp.insert("status".into(), Value::String(to.as_str().into()));
      lp.insert("updated_at".into(), Value::String(now.clone()));
      if to.is_closed() {
        lp.insert("resolved_at".into(), Value::String(now));
      } else {
        lp.remove("resolved_at");
      }
    }
    collection.items[pos] = item.clone();
    self.repo.save_collection(&collection).await?;

    let archive = if to.is_closed() && from != to {
      Some(self.archive_closed(&task_id, &item).await?)
    } else {
      None
    };
    info!(event = "feedback_status_changed", id, from = %from, to = %to, "feedback status changed");
    self.repo.emit(
      "status_changed",
      json!({ "id": id, "taskId": task_id, "from": from.as_str(), "to": to.as_str(), "archive": archive }),
      ids,
    );
    Ok(item)
  }

  /// Write `feedback-<taskId>-<attempt>.json`, counting attempts from 1.
  async fn archive_closed(&self, task_id: &str, item: &Entity) -> Result<String> {
    let pattern = Regex::new(&format!(r"^feedback-{}-\d+\.json$", regex::escape(task_id)))
      .map_err(|e| AppError::application(format!("invalid archive pattern: {e}")))?;
    let dir = self.repo.history_dir();
    let attempt = self.repo.storage().list_files(dir, &pattern).await?.len() + 1;
    let file = format!("feedback-{task_id}-{attempt}.json");
    self
      .repo
      .storage()
      .write_json(dir, &file, &Value::Object(item.clone()))
      .await?;
    Ok(file)
  }

  /// Move an item through the status table; closing it archives a snapshot.
  pub async fn update_status(&self, id: &str, to: FeedbackStatus) -> Result<Entity> {
    let ids = TraceIds::generate();
    match self.status_inner(id, to, &ids).await {
      Ok(item) => Ok(item),
      Err(e) => self.repo.fail("update_status", e, &ids).await,
    }
  }
}
