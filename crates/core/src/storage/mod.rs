//! Document storage consumed by repositories.

mod file;
mod memory;

pub use file::FileStorageService;
pub use memory::MemoryStorage;

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::errors::Result;

/// JSON document store addressed by `(directory, file name)`.
///
/// Each write replaces one whole document; nothing spans files.
#[async_trait]
pub trait StorageService: Send + Sync {
  async fn ensure_directory_exists(&self, dir: &Path) -> Result<()>;

  async fn file_exists(&self, dir: &Path, file: &str) -> bool;

  /// `None` when the document is absent.
  async fn read_json(&self, dir: &Path, file: &str) -> Result<Option<Value>>;

  async fn write_json(&self, dir: &Path, file: &str, value: &Value) -> Result<bool>;

  async fn write_text(&self, dir: &Path, file: &str, text: &str) -> Result<bool>;

  /// File names in `dir` matching `pattern`, sorted. A missing directory is empty.
  async fn list_files(&self, dir: &Path, pattern: &Regex) -> Result<Vec<String>>;
}
