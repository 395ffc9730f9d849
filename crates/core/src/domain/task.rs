use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::adapters::fs::{TASK_HISTORY_DIR, TASKS_FILE, tasks_dir};
use crate::error_handler::ErrorHandler;
use crate::errors::{AppError, Result};
use crate::events::{EventBus, TraceIds, into_object, now_iso};
use crate::repository::{Collection, Entity, Repository, RepositoryOptions, ValidationMode, ValidationOutcome, Validator};
use crate::storage::StorageService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
  NotStarted,
  Planning,
  InDevelopment,
  Testing,
  Blocked,
  Completed,
}

impl ProgressState {
  pub const ALL: [ProgressState; 6] = [
    ProgressState::NotStarted,
    ProgressState::Planning,
    ProgressState::InDevelopment,
    ProgressState::Testing,
    ProgressState::Blocked,
    ProgressState::Completed,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ProgressState::NotStarted => "not_started",
      ProgressState::Planning => "planning",
      ProgressState::InDevelopment => "in_development",
      ProgressState::Testing => "testing",
      ProgressState::Blocked => "blocked",
      ProgressState::Completed => "completed",
    }
  }

  pub fn can_transition(self, to: ProgressState) -> bool {
    use ProgressState::*;
    self == to
      || matches!(
        (self, to),
        (NotStarted, Planning)
          | (NotStarted, InDevelopment)
          | (NotStarted, Blocked)
          | (Planning, InDevelopment)
          | (Planning, Blocked)
          | (Planning, NotStarted)
          | (InDevelopment, Testing)
          | (InDevelopment, Blocked)
          | (InDevelopment, Planning)
          | (Testing, Completed)
          | (Testing, InDevelopment)
          | (Testing, Blocked)
          | (Blocked, NotStarted)
          | (Blocked, Planning)
          | (Blocked, InDevelopment)
          | (Blocked, Testing)
          | (Completed, InDevelopment)
      )
  }

  /// `StateError` naming both states when the move is not in the table.
  pub fn check_transition(self, to: ProgressState) -> Result<()> {
    if self.can_transition(to) {
      return Ok(());
    }
    Err(
      AppError::state(format!("Transition from {self} to {to} is not allowed"))
        .with_context("field", "progress_state")
        .with_context("from", self.as_str())
        .with_context("to", to.as_str()),
    )
  }
}

impl fmt::Display for ProgressState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProgressState {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|p| p.as_str() == s)
      .ok_or_else(|| AppError::validation(format!("unknown progress state '{s}'")).with_context("value", s))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  InProgress,
  Completed,
  Blocked,
  Cancelled,
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 5] = [
    TaskStatus::Pending,
    TaskStatus::InProgress,
    TaskStatus::Completed,
    TaskStatus::Blocked,
    TaskStatus::Cancelled,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::InProgress => "in_progress",
      TaskStatus::Completed => "completed",
      TaskStatus::Blocked => "blocked",
      TaskStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|p| p.as_str() == s)
      .ok_or_else(|| AppError::validation(format!("unknown task status '{s}'")).with_context("value", s))
  }
}

fn task_id_regex() -> &'static Regex {
  static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();
  TASK_ID_RE.get_or_init(|| Regex::new(r"^T[0-9]{3}$").expect("valid regex"))
}

pub fn is_valid_task_id(id: &str) -> bool {
  task_id_regex().is_match(id)
}

fn str_field<'a>(entity: &'a Entity, field: &str) -> Option<&'a str> {
  entity.get(field).and_then(Value::as_str)
}

fn progress_of(entity: &Entity) -> ProgressState {
  str_field(entity, "progress_state")
    .and_then(|s| s.parse().ok())
    .unwrap_or(ProgressState::NotStarted)
}

fn string_list(entity: &Entity, field: &str) -> Vec<String> {
  entity
    .get(field)
    .and_then(Value::as_array)
    .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
    .unwrap_or_default()
}

pub struct TaskValidator;

impl Validator for TaskValidator {
  fn validate(&self, entity: &Entity, mode: ValidationMode) -> ValidationOutcome {
    let mut errors = Vec::new();
    match entity.get("id") {
      Some(Value::String(id)) if is_valid_task_id(id) => {}
      Some(other) => errors.push(format!("id must match T000 format, got {other}")),
      None if mode == ValidationMode::Create => errors.push("id is required".into()),
      None => {}
    }
    match entity.get("title") {
      Some(Value::String(t)) if !t.trim().is_empty() => {}
      Some(_) => errors.push("title must be a non-empty string".into()),
      None if mode == ValidationMode::Create => errors.push("title is required".into()),
      None => {}
    }
    if let Some(d) = entity.get("description")
      && !d.is_string()
    {
      errors.push("description must be a string".into());
    }
    if let Some(p) = entity.get("priority")
      && !p.as_u64().is_some_and(|n| (1..=5).contains(&n))
    {
      errors.push("priority must be an integer between 1 and 5".into());
    }
    if let Some(s) = entity.get("status")
      && !s.as_str().is_some_and(|s| s.parse::<TaskStatus>().is_ok())
    {
      errors.push(format!("status must be one of {}", join(TaskStatus::ALL.map(TaskStatus::as_str))));
    }
    if let Some(s) = entity.get("progress_state")
      && !s.as_str().is_some_and(|s| s.parse::<ProgressState>().is_ok())
    {
      errors.push(format!(
        "progress_state must be one of {}",
        join(ProgressState::ALL.map(ProgressState::as_str))
      ));
    }
    for field in ["dependencies", "related_commits"] {
      if let Some(v) = entity.get(field)
        && !v.as_array().is_some_and(|a| a.iter().all(Value::is_string))
      {
        errors.push(format!("{field} must be an array of strings"));
      }
    }
    if let Some(deps) = entity.get("dependencies").and_then(Value::as_array) {
      for dep in deps.iter().filter_map(Value::as_str) {
        if !is_valid_task_id(dep) {
          errors.push(format!("dependency '{dep}' is not a valid task id"));
        }
      }
    }
    ValidationOutcome::from_errors(errors)
  }

  fn validate_transition(&self, field: &str, from: &str, to: &str) -> Result<()> {
    match field {
      "progress_state" => from.parse::<ProgressState>()?.check_transition(to.parse()?),
      _ => Ok(()),
    }
  }

  fn validate_domain(&self, entity: &Entity, collection: &[Entity]) -> Result<()> {
    let id = str_field(entity, "id").unwrap_or_default();
    for dep in string_list(entity, "dependencies") {
      if dep == id {
        return Err(
          AppError::data_consistency(format!("task {id} cannot depend on itself")).with_context("id", id),
        );
      }
      if !collection.iter().any(|t| str_field(t, "id") == Some(dep.as_str())) {
        return Err(AppError::not_found(format!("task with ID {dep} not found")).with_context("id", dep));
      }
    }
    Ok(())
  }
}

fn join<const N: usize>(items: [&str; N]) -> String {
  items.join(", ")
}

/// Input for [`TaskRepository::create_task`]; unset fields get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
  pub id: Option<String>,
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub priority: Option<u8>,
  #[serde(default)]
  pub dependencies: Vec<String>,
}

/// Tasks in `tasks/current-tasks.json`.
pub struct TaskRepository {
  repo: Repository,
}

impl TaskRepository {
  pub async fn open(
    storage: Arc<dyn StorageService>,
    context_dir: &Path,
    bus: Option<EventBus>,
    handler: Option<Arc<ErrorHandler>>,
  ) -> Result<Self> {
    let options = RepositoryOptions::new("task", tasks_dir(context_dir), TASKS_FILE, TASK_HISTORY_DIR);
    let mut builder = Repository::builder(storage, options).validator(Arc::new(TaskValidator));
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

  /// Next free id after the highest `Txxx` in the collection.
  pub async fn next_task_id(&self) -> Result<String> {
    let max = self
      .repo
      .list()
      .await?
      .iter()
      .filter_map(|t| str_field(t, "id"))
      .filter(|id| is_valid_task_id(id))
      .filter_map(|id| id[1..].parse::<u32>().ok())
      .max()
      .unwrap_or(0);
    if max >= 999 {
      return Err(AppError::data_consistency("task id space T001..T999 is exhausted"));
    }
    Ok(format!("T{:03}", max + 1))
  }

  /// Create a task with defaults for every unset field.
  pub async fn create_task(&self, input: NewTask) -> Result<Entity> {
    let id = match input.id {
      Some(id) => id,
      None => self.next_task_id().await?,
    };
    let now = now_iso();
    let data = json!({
      "id": id,
      "title": input.title,
      "description": input.description,
      "priority": input.priority.unwrap_or(3),
      "status": TaskStatus::Pending.as_str(),
      "progress_state": ProgressState::NotStarted.as_str(),
      "dependencies": input.dependencies,
      "related_commits": [],
      "created_at": now,
      "updated_at": now,
    });
    let task = self.repo.create(into_object(data)).await?;
    info!(event = "task_created", id = %id, "task created");
    Ok(task)
  }

  /// Partial update. A `progress_state` change is checked against the
  /// transition table up front; the previous version is archived only once
  /// the merged task has been saved.
  pub async fn update_task(&self, id: &str, mut changes: Entity) -> Result<Entity> {
    let ids = TraceIds::generate();
    let moved = match self.pending_transition(id, &changes).await {
      Ok(moved) => moved,
      Err(e) => return self.repo.fail("update", e, &ids).await,
    };
    changes.insert("updated_at".into(), Value::String(now_iso()));
    let task = self.repo.update(id, changes).await?;
    if let Some((previous, from, to)) = moved {
      if let Err(e) = self.repo.archive_entity(id, &previous).await {
        return self.repo.fail("update", e, &ids).await;
      }
      info!(event = "task_progress_changed", id, from = %from, to = %to, "task progress changed");
      self.repo.emit(
        "progress_changed",
        json!({ "id": id, "from": from.as_str(), "to": to.as_str() }),
        &ids,
      );
    }
    Ok(task)
  }

  /// Snapshot and endpoints of the progress move requested by `changes`, if any.
  async fn pending_transition(
    &self,
    id: &str,
    changes: &Entity,
  ) -> Result<Option<(Entity, ProgressState, ProgressState)>> {
    let Some(raw) = changes.get("progress_state") else {
      return Ok(None);
    };
    let Some(to) = raw.as_str().and_then(|s| s.parse::<ProgressState>().ok()) else {
      return Err(AppError::validation("progress_state must be a known state").with_context("value", raw.clone()));
    };
    let (collection, pos) = self.load_task(id).await?;
    let previous = collection.items[pos].clone();
    let from = progress_of(&previous);
    if from == to {
      return Ok(None);
    }
    from.check_transition(to)?;
    Ok(Some((previous, from, to)))
  }

  async fn load_task(&self, id: &str) -> Result<(Collection, usize)> {
    let collection = self.repo.load_collection().await?;
    match collection.position("id", id) {
      Some(pos) => Ok((collection, pos)),
      None => Err(AppError::not_found(format!("task with ID {id} not found")).with_context("id", id)),
    }
  }

  async fn progress_inner(&self, id: &str, to: ProgressState, ids: &TraceIds) -> Result<Entity> {
    let (mut collection, pos) = self.load_task(id).await?;
    let from = progress_of(&collection.items[pos]);
    if from == to {
      return Ok(collection.items[pos].clone());
    }
    from.check_transition(to)?;
    self.repo.archive_entity(id, &collection.items[pos]).await?;
    let task = &mut collection.items[pos];
    task.insert("progress_state".into(), Value::String(to.as_str().into()));
    task.insert("updated_at".into(), Value::String(now_iso()));
    let task = task.clone();
    self.repo.save_collection(&collection).await?;
    info!(event = "task_progress_changed", id, from = %from, to = %to, "task progress changed");
    self.repo.emit(
      "progress_changed",
      json!({ "id": id, "from": from.as_str(), "to": to.as_str() }),
      ids,
    );
    Ok(task)
  }

  /// Move `id` to `to`; rejected moves leave the file untouched.
  pub async fn update_task_progress(&self, id: &str, to: ProgressState) -> Result<Entity> {
    let ids = TraceIds::generate();
    match self.progress_inner(id, to, &ids).await {
      Ok(t) => Ok(t),
      Err(e) => self.repo.fail("update_task_progress", e, &ids).await,
    }
  }

  async fn dependency_inner(&self, id: &str, dep: &str, ids: &TraceIds) -> Result<Entity> {
    let (mut collection, pos) = self.load_task(id).await?;
    if collection.position("id", dep).is_none() {
      return Err(AppError::not_found(format!("task with ID {dep} not found")).with_context("id", dep));
    }
    if let Some(path) = dependency_path(&collection.items, dep, id) {
      let chain = std::iter::once(id.to_string()).chain(path).collect::<Vec<_>>();
      return Err(
        AppError::data_consistency(format!("dependency cycle detected: {}", chain.join(" -> ")))
          .with_context("id", id)
          .with_context("dependency", dep)
          .with_context("chain", chain),
      );
    }
    let mut deps = string_list(&collection.items[pos], "dependencies");
    if deps.iter().any(|d| d == dep) {
      return Ok(collection.items[pos].clone());
    }
    deps.push(dep.to_string());
    let task = &mut collection.items[pos];
    task.insert("dependencies".into(), json!(deps));
    task.insert("updated_at".into(), Value::String(now_iso()));
    let task = task.clone();
    self.repo.save_collection(&collection).await?;
    self.repo.emit("updated", self.repo.entity_payload(id, &task), ids);
    Ok(task)
  }

  /// Make `id` depend on `dep`.
  pub async fn add_dependency(&self, id: &str, dep: &str) -> Result<Entity> {
    let ids = TraceIds::generate();
    match self.dependency_inner(id, dep, &ids).await {
      Ok(t) => Ok(t),
      Err(e) => self.repo.fail("add_dependency", e, &ids).await,
    }
  }

  async fn link_inner(&self, id: &str, hash: &str, ids: &TraceIds) -> Result<bool> {
    let (mut collection, pos) = self.load_task(id).await?;
    let mut commits = string_list(&collection.items[pos], "related_commits");
    if commits.iter().any(|c| c == hash) {
      return Ok(false);
    }
    commits.push(hash.to_string());
    let task = &mut collection.items[pos];
    task.insert("related_commits".into(), json!(commits));
    task.insert("updated_at".into(), Value::String(now_iso()));
    let task = task.clone();
    self.repo.save_collection(&collection).await?;
    debug!(event = "task_commit_linked", id, hash, "commit linked");
    self.repo.emit("updated", self.repo.entity_payload(id, &task), ids);
    Ok(true)
  }

  /// Append `hash` to `related_commits`. Returns false when already linked.
  pub async fn link_commit(&self, id: &str, hash: &str) -> Result<bool> {
    let ids = TraceIds::generate();
    match self.link_inner(id, hash, &ids).await {
      Ok(b) => Ok(b),
      Err(e) => self.repo.fail("link_commit", e, &ids).await,
    }
  }

  pub async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Entity>> {
    self
      .repo
      .find(|t| str_field(t, "status") == Some(status.as_str()))
      .await
  }

  async fn focus_inner(&self, id: &str) -> Result<()> {
    let (mut collection, _) = self.load_task(id).await?;
    collection
      .extra
      .insert("current_focus".into(), Value::String(id.to_string()));
    self.repo.save_collection(&collection).await
  }

  /// Record `id` as the top-level `current_focus`.
  pub async fn set_current_focus(&self, id: &str) -> Result<()> {
    let ids = TraceIds::generate();
    match self.focus_inner(id).await {
      Ok(()) => Ok(()),
      Err(e) => self.repo.fail("set_current_focus", e, &ids).await,
    }
  }

  pub async fn current_focus(&self) -> Result<Option<String>> {
    let collection = self.repo.load_collection().await?;
    Ok(
      collection
        .extra
        .get("current_focus")
        .and_then(Value::as_str)
        .map(str::to_string),
    )
  }
}

/// Dependency path from `from` to `target` (inclusive of both), if any.
fn dependency_path(tasks: &[Entity], from: &str, target: &str) -> Option<Vec<String>> {
  let mut stack = vec![vec![from.to_string()]];
  let mut seen = std::collections::HashSet::new();
  while let Some(path) = stack.pop() {
    let last = path.last()?.clone();
    if last == target {
      return Some(path);
    }
    if !seen.insert(last.clone()) {
      continue;
    }
    let Some(task) = tasks.iter().find(|t| str_field(t, "id") == Some(last.as_str())) else {
      continue;
    };
    for dep in string_list(task, "dependencies") {
      let mut next = path.clone();
      next.push(dep);
      stack.push(next);
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::FileStorageService;
  use parking_lot::Mutex;
  use proptest::prelude::*;

  fn entity(v: Value) -> Entity {
    match v {
      Value::Object(m) => m,
      _ => panic!("not an object"),
    }
  }

  async fn repo(ctx: &Path, bus: Option<EventBus>) -> TaskRepository {
    TaskRepository::open(Arc::new(FileStorageService::new()), ctx, bus, None)
      .await
      .unwrap()
  }

  fn new_task(id: &str) -> NewTask {
    NewTask {
      id: Some(id.into()),
      title: format!("task {id}"),
      ..Default::default()
    }
  }

  #[test]
  fn transition_table_is_exhaustive() {
    let allowed = [
      ("not_started", vec!["planning", "in_development", "blocked"]),
      ("planning", vec!["in_development", "blocked", "not_started"]),
      ("in_development", vec!["testing", "blocked", "planning"]),
      ("testing", vec!["completed", "in_development", "blocked"]),
      ("blocked", vec!["not_started", "planning", "in_development", "testing"]),
      ("completed", vec!["in_development"]),
    ];
    for (from, tos) in allowed {
      let from: ProgressState = from.parse().unwrap();
      for to in ProgressState::ALL {
        let expected = from == to || tos.contains(&to.as_str());
        assert_eq!(from.can_transition(to), expected, "{from} -> {to}");
        if !expected {
          let err = from.check_transition(to).unwrap_err();
          assert_eq!(err.name(), "StateError");
          assert_eq!(err.message(), format!("Transition from {from} to {to} is not allowed"));
        }
      }
    }
  }

  proptest! {
    #[test]
    fn task_id_format(n in 0u32..1000, junk in "[a-z]{1,3}") {
      let id = format!("T{n:03}");
      prop_assert!(is_valid_task_id(&id));
      let suffixed = format!("{id}{junk}");
      prop_assert!(!is_valid_task_id(&suffixed));
      prop_assert!(!is_valid_task_id(&id.to_lowercase()));
    }
  }

  #[test]
  fn validator_rules() {
    let v = TaskValidator;
    let ok = entity(json!({"id": "T001", "title": "x", "priority": 3, "status": "pending"}));
    assert!(v.validate(&ok, ValidationMode::Create).valid);

    let missing = v.validate(&entity(json!({"id": "T001"})), ValidationMode::Create);
    assert_eq!(missing.errors, vec!["title is required"]);
    assert!(v.validate(&entity(json!({"id": "T001"})), ValidationMode::Update).valid);

    let bad = v.validate(
      &entity(json!({"id": "X1", "title": "", "priority": 9, "status": "done", "dependencies": ["nope"]})),
      ValidationMode::Create,
    );
    assert_eq!(bad.errors.len(), 5);

    assert!(v.validate_transition("progress_state", "testing", "completed").is_ok());
    assert!(v.validate_transition("progress_state", "not_started", "completed").is_err());
    assert!(v.validate_transition("status", "a", "b").is_ok());
  }

  #[tokio::test]
  async fn create_task_fills_defaults_and_ids() {
    let td = tempfile::tempdir().unwrap();
    let tasks = repo(td.path(), None).await;
    let first = tasks
      .create_task(NewTask {
        title: "write docs".into(),
        ..Default::default()
      })
      .await
      .unwrap();
    assert_eq!(first["id"], "T001");
    assert_eq!(first["priority"], 3);
    assert_eq!(first["status"], "pending");
    assert_eq!(first["progress_state"], "not_started");
    assert_eq!(first["related_commits"], json!([]));
    assert_eq!(tasks.next_task_id().await.unwrap(), "T002");

    let err = tasks
      .create_task(NewTask {
        id: Some("T002".into()),
        title: "x".into(),
        dependencies: vec!["T050".into()],
        ..Default::default()
      })
      .await
      .unwrap_err();
    assert_eq!(err.name(), "NotFoundError");
  }

  #[tokio::test]
  async fn invalid_progress_transition_leaves_file_untouched() {
    let td = tempfile::tempdir().unwrap();
    let tasks = repo(td.path(), None).await;
    tasks.create_task(new_task("T001")).await.unwrap();
    let file = tasks_dir(td.path()).join(TASKS_FILE);
    let before = std::fs::read_to_string(&file).unwrap();

    let err = tasks
      .update_task_progress("T001", ProgressState::Completed)
      .await
      .unwrap_err();
    assert_eq!(err.message(), "Transition from not_started to completed is not allowed");
    assert_eq!(std::fs::read_to_string(&file).unwrap(), before);
  }

  #[tokio::test]
  async fn progress_changes_archive_and_emit() {
    let td = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on("task:progress_changed", move |p, _| {
      sink.lock().push((p["from"].clone(), p["to"].clone()));
      Ok(())
    });
    let tasks = repo(td.path(), Some(bus)).await;
    tasks.create_task(new_task("T001")).await.unwrap();
    tasks
      .update_task_progress("T001", ProgressState::Planning)
      .await
      .unwrap();
    // self transition is a no-op
    tasks
      .update_task_progress("T001", ProgressState::Planning)
      .await
      .unwrap();
    let updated = tasks
      .update_task("T001", entity(json!({"progress_state": "in_development", "priority": 1})))
      .await
      .unwrap();
    assert_eq!(updated["progress_state"], "in_development");
    assert_eq!(updated["priority"], 1);

    assert_eq!(
      *seen.lock(),
      vec![
        (json!("not_started"), json!("planning")),
        (json!("planning"), json!("in_development"))
      ]
    );
    let archived = std::fs::read_dir(tasks.repository().history_dir()).unwrap().count();
    assert_eq!(archived, 2);
  }

  #[tokio::test]
  async fn rejected_update_keeps_progress_unchanged() {
    let td = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let moves = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&moves);
    bus.on("task:progress_changed", move |_, _| {
      *sink.lock() += 1;
      Ok(())
    });
    let tasks = repo(td.path(), Some(bus)).await;
    tasks.create_task(new_task("T001")).await.unwrap();
    let file = tasks_dir(td.path()).join(TASKS_FILE);
    let before = std::fs::read_to_string(&file).unwrap();

    let err = tasks
      .update_task("T001", entity(json!({"progress_state": "planning", "priority": 9})))
      .await
      .unwrap_err();
    assert_eq!(err.name(), "ValidationError");

    assert_eq!(std::fs::read_to_string(&file).unwrap(), before);
    let task = tasks.get("T001").await.unwrap().unwrap();
    assert_eq!(task["progress_state"], "not_started");
    let archived = std::fs::read_dir(tasks.repository().history_dir()).unwrap().count();
    assert_eq!(archived, 0);
    assert_eq!(*moves.lock(), 0);
  }

  #[tokio::test]
  async fn dependencies_reject_unknown_and_cycles() {
    let td = tempfile::tempdir().unwrap();
    let tasks = repo(td.path(), None).await;
    for id in ["T001", "T002", "T003"] {
      tasks.create_task(new_task(id)).await.unwrap();
    }
    tasks.add_dependency("T001", "T002").await.unwrap();
    tasks.add_dependency("T002", "T003").await.unwrap();
    // repeated add is a no-op
    let t = tasks.add_dependency("T001", "T002").await.unwrap();
    assert_eq!(t["dependencies"], json!(["T002"]));

    let err = tasks.add_dependency("T003", "T001").await.unwrap_err();
    assert_eq!(err.name(), "DataConsistencyError");
    assert_eq!(err.message(), "dependency cycle detected: T003 -> T001 -> T002 -> T003");

    let err = tasks.add_dependency("T001", "T404").await.unwrap_err();
    assert_eq!(err.name(), "NotFoundError");
  }

  #[tokio::test]
  async fn commits_status_and_focus() {
    let td = tempfile::tempdir().unwrap();
    let tasks = repo(td.path(), None).await;
    tasks.create_task(new_task("T001")).await.unwrap();
    tasks.create_task(new_task("T002")).await.unwrap();

    assert!(tasks.link_commit("T001", "abc").await.unwrap());
    assert!(!tasks.link_commit("T001", "abc").await.unwrap());
    assert_eq!(tasks.get("T001").await.unwrap().unwrap()["related_commits"], json!(["abc"]));

    tasks
      .update_task("T002", entity(json!({"status": "in_progress"})))
      .await
      .unwrap();
    let active = tasks.tasks_by_status(TaskStatus::InProgress).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], "T002");

    assert_eq!(tasks.current_focus().await.unwrap(), None);
    tasks.set_current_focus("T002").await.unwrap();
    assert_eq!(tasks.current_focus().await.unwrap().as_deref(), Some("T002"));
    // focus survives later writes
    tasks.link_commit("T002", "def").await.unwrap();
    assert_eq!(tasks.current_focus().await.unwrap().as_deref(), Some("T002"));
    assert!(tasks.set_current_focus("T404").await.is_err());
  }
}
