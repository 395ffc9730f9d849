//! JSON-file backed entity collections.
//!
//! A [`Repository`] owns one collection file and its history directory. Every
//! mutation rewrites the whole file through the [`StorageService`]; the
//! repository itself takes no locks. Failures other than validation,
//! not-found and consistency errors are rewrapped with the operation name,
//! and when an [`ErrorHandler`] is attached every failure is routed through
//! it.

mod collection;
mod validator;

pub use collection::{Collection, CollectionLayout};
pub use validator::{Entity, ValidationMode, ValidationOutcome, Validator};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error_handler::{ErrorHandler, HandleOptions};
use crate::errors::{AppError, Result};
use crate::events::{EventBus, TraceIds, now_iso};
use crate::storage::StorageService;

const UNSAFE_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
  /// Singular entity name, used for events, messages and the collection key.
  pub entity_name: String,
  pub directory: PathBuf,
  pub current_file: String,
  /// Relative to `directory`.
  pub history_directory: String,
  pub id_field: String,
  pub layout: CollectionLayout,
}

impl RepositoryOptions {
  pub fn new(
    entity_name: impl Into<String>,
    directory: impl Into<PathBuf>,
    current_file: impl Into<String>,
    history_directory: impl Into<String>,
  ) -> Self {
    Self {
      entity_name: entity_name.into(),
      directory: directory.into(),
      current_file: current_file.into(),
      history_directory: history_directory.into(),
      id_field: "id".to_string(),
      layout: CollectionLayout::Keyed,
    }
  }

  pub fn id_field(mut self, field: impl Into<String>) -> Self {
    self.id_field = field.into();
    self
  }

  pub fn layout(mut self, layout: CollectionLayout) -> Self {
    self.layout = layout;
    self
  }
}

/// Per-id outcome of a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
  pub id: String,
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
  pub error: Option<AppError>,
}

fn serialize_error<S: serde::Serializer>(err: &Option<AppError>, s: S) -> std::result::Result<S::Ok, S::Error> {
  err.as_ref().map(|e| e.to_json(false)).serialize(s)
}

pub struct RepositoryBuilder {
  storage: Arc<dyn StorageService>,
  options: RepositoryOptions,
  bus: Option<EventBus>,
  error_handler: Option<Arc<ErrorHandler>>,
  validator: Option<Arc<dyn Validator>>,
}

impl RepositoryBuilder {
  pub fn event_bus(mut self, bus: EventBus) -> Self {
    self.bus = Some(bus);
    self
  }

  pub fn error_handler(mut self, handler: Arc<ErrorHandler>) -> Self {
    self.error_handler = Some(handler);
    self
  }

  pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
    self.validator = Some(validator);
    self
  }

  /// Create the collection and history directories and return the repository.
  pub async fn build(self) -> Result<Repository> {
    let history_dir = self.options.directory.join(&self.options.history_directory);
    self.storage.ensure_directory_exists(&self.options.directory).await?;
    self.storage.ensure_directory_exists(&history_dir).await?;
    Ok(Repository {
      collection_key: format!("{}s", self.options.entity_name),
      history_dir,
      storage: self.storage,
      options: self.options,
      bus: self.bus,
      error_handler: self.error_handler,
      validator: self.validator,
    })
  }
}

pub struct Repository {
  storage: Arc<dyn StorageService>,
  options: RepositoryOptions,
  collection_key: String,
  history_dir: PathBuf,
  bus: Option<EventBus>,
  error_handler: Option<Arc<ErrorHandler>>,
  validator: Option<Arc<dyn Validator>>,
}

impl Repository {
  pub fn builder(storage: Arc<dyn StorageService>, options: RepositoryOptions) -> RepositoryBuilder {
    RepositoryBuilder {
      storage,
      options,
      bus: None,
      error_handler: None,
      validator: None,
    }
  }

  pub fn entity_name(&self) -> &str {
    &self.options.entity_name
  }

  pub fn collection_key(&self) -> &str {
    &self.collection_key
  }

  pub fn id_field(&self) -> &str {
    &self.options.id_field
  }

  pub fn directory(&self) -> &Path {
    &self.options.directory
  }

  pub fn history_dir(&self) -> &Path {
    &self.history_dir
  }

  pub fn storage(&self) -> &Arc<dyn StorageService> {
    &self.storage
  }

  pub fn event_bus(&self) -> Option<&EventBus> {
    self.bus.as_ref()
  }

  pub fn validator(&self) -> Option<&Arc<dyn Validator>> {
    self.validator.as_ref()
  }

  fn not_found(&self, id: &str) -> AppError {
    AppError::not_found(format!("{} with ID {id} not found", self.options.entity_name))
      .with_context("entity", self.options.entity_name.clone())
      .with_context("id", id)
  }

  /// `{ "id": id, "<entity>": entity }`
  pub fn entity_payload(&self, id: &str, entity: &Entity) -> Value {
    let mut payload = json!({ "id": id });
    payload[self.options.entity_name.as_str()] = Value::Object(entity.clone());
    payload
  }

  /// Publish `<entity>:<action>`.
  pub fn emit(&self, action: &str, mut payload: Value, ids: &TraceIds) {
    let Some(bus) = &self.bus else { return };
    if let Value::Object(map) = &mut payload {
      ids.write_into(map);
    }
    bus.emit_standardized(&self.options.entity_name, action, payload);
  }

  /// Route a failure: rewrap foreign kinds with the operation, then delegate
  /// to the error handler when one is attached.
  pub async fn fail<T: DeserializeOwned>(&self, operation: &str, err: AppError, ids: &TraceIds) -> Result<T> {
    let err = if err.is_domain_error() {
      err
    } else {
      AppError::new(
        err.kind(),
        format!("failed to {operation} {}: {}", self.options.entity_name, err.message()),
      )
      .with_code(err.code().to_string())
      .with_recoverable(err.recoverable())
      .with_context_map(err.context().clone())
      .with_cause(err)
    };
    let Some(handler) = &self.error_handler else {
      return Err(err);
    };
    let options = HandleOptions::with_ids(ids).context("entity", self.options.entity_name.clone());
    match handler.handle(err.clone(), "Repository", operation, options).await {
      Ok(handled) => handled.into_result(err),
      Err(handler_err) => Err(handler_err),
    }
  }

  /// Read and parse the collection file. Absent or unreadable files are empty.
  pub async fn load_collection(&self) -> Result<Collection> {
    let doc = self
      .storage
      .read_json(&self.options.directory, &self.options.current_file)
      .await?;
    Ok(Collection::parse(doc, &self.collection_key, self.options.layout))
  }

  /// Replace the collection file.
  pub async fn save_collection(&self, collection: &Collection) -> Result<()> {
    let doc = collection.to_document(&self.collection_key, self.options.layout);
    self
      .storage
      .write_json(&self.options.directory, &self.options.current_file, &doc)
      .await?;
    debug!(
      event = "collection_saved",
      entity = %self.options.entity_name,
      count = collection.items.len(),
      "collection written"
    );
    Ok(())
  }

  fn validate(&self, entity: &Entity, mode: ValidationMode) -> Result<()> {
    match &self.validator {
      Some(v) => v.validate(entity, mode).into_result(&self.options.entity_name),
      None => Ok(()),
    }
  }

  fn entity_id(&self, entity: &Entity) -> Result<String> {
    match entity.get(&self.options.id_field).and_then(Value::as_str) {
      Some(id) if !id.is_empty() => Ok(id.to_string()),
      _ => Err(AppError::validation(format!(
        "{} requires a string `{}`",
        self.options.entity_name, self.options.id_field
      ))),
    }
  }

  fn reject_unsafe_keys(&self, data: &Entity) -> Result<()> {
    match data.keys().find(|k| UNSAFE_KEYS.contains(&k.as_str())) {
      Some(key) => Err(
        AppError::validation(format!("unsafe key '{key}' is not allowed"))
          .with_context("key", key.clone()),
      ),
      None => Ok(()),
    }
  }

  /// The whole collection document, or an empty collection when absent.
  pub async fn get_all(&self) -> Result<Value> {
    let ids = TraceIds::generate();
    match self.load_collection().await {
      Ok(c) => Ok(c.to_document(&self.collection_key, self.options.layout)),
      Err(e) => self.fail("get_all", e, &ids).await,
    }
  }

  pub async fn list(&self) -> Result<Vec<Entity>> {
    let ids = TraceIds::generate();
    match self.load_collection().await {
      Ok(c) => Ok(c.items),
      Err(e) => self.fail("list", e, &ids).await,
    }
  }

  pub async fn get_by_id(&self, id: &str) -> Result<Option<Entity>> {
    let ids = TraceIds::generate();
    match self.load_collection().await {
      Ok(c) => Ok(c.get(&self.options.id_field, id).cloned()),
      Err(e) => self.fail("get_by_id", e, &ids).await,
    }
  }

  async fn create_inner(&self, data: Entity, ids: &TraceIds) -> Result<Entity> {
    self.reject_unsafe_keys(&data)?;
    self.validate(&data, ValidationMode::Create)?;
    let id = self.entity_id(&data)?;
    let mut collection = self.load_collection().await?;
    if collection.position(&self.options.id_field, &id).is_some() {
      return Err(
        AppError::data_consistency(format!("{} with ID {id} already exists", self.options.entity_name))
          .with_context("entity", self.options.entity_name.clone())
          .with_context("id", id),
      );
    }
    if let Some(v) = &self.validator {
      v.validate_domain(&data, &collection.items)?;
    }
    collection.items.push(data.clone());
    self.save_collection(&collection).await?;
    self.emit("created", self.entity_payload(&id, &data), ids);
    Ok(data)
  }

  /// Validate, reject duplicates, append and persist.
  pub async fn create(&self, data: Entity) -> Result<Entity> {
    let ids = TraceIds::generate();
    match self.create_inner(data, &ids).await {
      Ok(e) => Ok(e),
      Err(e) => self.fail("create", e, &ids).await,
    }
  }

  async fn update_inner(&self, id: &str, data: Entity, ids: &TraceIds) -> Result<Entity> {
    self.reject_unsafe_keys(&data)?;
    let mut combined = data.clone();
    combined.insert(self.options.id_field.clone(), Value::String(id.to_string()));
    self.validate(&combined, ValidationMode::Update)?;

    let mut collection = self.load_collection().await?;
    let Some(pos) = collection.position(&self.options.id_field, id) else {
      return Err(self.not_found(id));
    };
    let mut merged = collection.items[pos].clone();
    for (k, v) in data {
      merged.insert(k, v);
    }
    merged.insert(self.options.id_field.clone(), Value::String(id.to_string()));
    if let Some(v) = &self.validator {
      let others: Vec<Entity> = collection
        .items
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != pos)
        .map(|(_, e)| e.clone())
        .collect();
      v.validate_domain(&merged, &others)?;
    }
    collection.items[pos] = merged.clone();
    self.save_collection(&collection).await?;
    self.emit("updated", self.entity_payload(id, &merged), ids);
    Ok(merged)
  }

  /// Shallow-merge `data` into the entity with `id`; the id is never changed.
  pub async fn update(&self, id: &str, data: Entity) -> Result<Entity> {
    let ids = TraceIds::generate();
    match self.update_inner(id, data, &ids).await {
      Ok(e) => Ok(e),
      Err(e) => self.fail("update", e, &ids).await,
    }
  }

  async fn archive_inner(&self, id: &str) -> Result<PathBuf> {
    let collection = self.load_collection().await?;
    let Some(entity) = collection.get(&self.options.id_field, id) else {
      return Err(self.not_found(id));
    };
    self.archive_entity(id, entity).await
  }

  /// Write `entity` to `<history>/<id>-<timestamp>.json`.
  pub async fn archive_entity(&self, id: &str, entity: &Entity) -> Result<PathBuf> {
    let stamp = now_iso().replace(':', "-");
    let mut file = format!("{id}-{stamp}.json");
    // archives are never overwritten
    let mut n = 1;
    while self.storage.file_exists(&self.history_dir, &file).await {
      file = format!("{id}-{stamp}-{n}.json");
      n += 1;
    }
    self
      .storage
      .write_json(&self.history_dir, &file, &Value::Object(entity.clone()))
      .await?;
    debug!(event = "entity_archived", entity = %self.options.entity_name, id, file = %file, "entity archived");
    Ok(self.history_dir.join(file))
  }

  /// Snapshot the current entity into the history directory.
  pub async fn archive(&self, id: &str) -> Result<PathBuf> {
    let ids = TraceIds::generate();
    match self.archive_inner(id).await {
      Ok(p) => Ok(p),
      Err(e) => self.fail("archive", e, &ids).await,
    }
  }

  async fn delete_inner(&self, id: &str, ids: &TraceIds) -> Result<bool> {
    let mut collection = self.load_collection().await?;
    let Some(pos) = collection.position(&self.options.id_field, id) else {
      return Err(self.not_found(id));
    };
    self.archive_entity(id, &collection.items[pos]).await?;
    collection.items.remove(pos);
    self.save_collection(&collection).await?;
    self.emit("deleted", json!({ "id": id }), ids);
    Ok(true)
  }

  /// Archive, then remove the entity with `id`.
  pub async fn delete(&self, id: &str) -> Result<bool> {
    let ids = TraceIds::generate();
    match self.delete_inner(id, &ids).await {
      Ok(b) => Ok(b),
      Err(e) => self.fail("delete", e, &ids).await,
    }
  }

  pub async fn find<P>(&self, predicate: P) -> Result<Vec<Entity>>
  where
    P: Fn(&Entity) -> bool,
  {
    let ids = TraceIds::generate();
    match self.load_collection().await {
      Ok(c) => Ok(c.items.into_iter().filter(|e| predicate(e)).collect()),
      Err(e) => self.fail("find", e, &ids).await,
    }
  }

  pub async fn find_one<P>(&self, predicate: P) -> Result<Option<Entity>>
  where
    P: Fn(&Entity) -> bool,
  {
    let ids = TraceIds::generate();
    match self.load_collection().await {
      Ok(c) => Ok(c.items.into_iter().find(|e| predicate(e))),
      Err(e) => self.fail("find_one", e, &ids).await,
    }
  }

  pub async fn count(&self) -> Result<usize> {
    Ok(self.list().await?.len())
  }

  pub async fn exists(&self, id: &str) -> Result<bool> {
    Ok(self.get_by_id(id).await?.is_some())
  }

  /// Sequential `create`; stops at the first failure.
  pub async fn create_many(&self, items: Vec<Entity>) -> Result<Vec<Entity>> {
    let mut created = Vec::with_capacity(items.len());
    for item in items {
      created.push(self.create(item).await?);
    }
    Ok(created)
  }

  /// Sequential `update` of `{id, ...changes}` items; stops at the first failure.
  pub async fn update_many(&self, items: Vec<Entity>) -> Result<Vec<Entity>> {
    let ids = TraceIds::generate();
    let mut parsed = Vec::with_capacity(items.len());
    for (index, mut item) in items.into_iter().enumerate() {
      match item.remove(&self.options.id_field) {
        Some(Value::String(id)) if !id.is_empty() => parsed.push((id, item)),
        _ => {
          let err = AppError::validation(format!(
            "update_many item {index} requires a string `{}`",
            self.options.id_field
          ))
          .with_context("index", index);
          return self.fail("update_many", err, &ids).await;
        }
      }
    }
    let mut updated = Vec::with_capacity(parsed.len());
    for (id, changes) in parsed {
      updated.push(self.update(&id, changes).await?);
    }
    Ok(updated)
  }

  /// Delete each id independently; one failure never stops the batch.
  ///
  /// With an error handler attached, each failure is handed to it and then
  /// recorded; if the handler itself fails, the batch is aborted with that
  /// error.
  pub async fn delete_many(&self, ids_to_delete: &[String]) -> Result<Vec<BulkResult>> {
    let mut results = Vec::with_capacity(ids_to_delete.len());
    for id in ids_to_delete {
      let ids = TraceIds::generate();
      match self.delete_inner(id, &ids).await {
        Ok(_) => results.push(BulkResult {
          id: id.clone(),
          success: true,
          error: None,
        }),
        Err(err) => {
          if let Some(handler) = &self.error_handler {
            let options = HandleOptions::with_ids(&ids).context("id", id.clone());
            handler.handle(err.clone(), "Repository", "delete_many", options).await?;
          } else {
            warn!(event = "bulk_delete_failed", entity = %self.options.entity_name, id = %id, error = %err, "delete failed");
          }
          results.push(BulkResult {
            id: id.clone(),
            success: false,
            error: Some(err),
          });
        }
      }
    }
    Ok(results)
  }
}
