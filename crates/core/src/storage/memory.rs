use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use super::StorageService;
use crate::errors::{AppError, Result};

/// In-memory implementation for development and testing.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  docs: RwLock<BTreeMap<PathBuf, String>>,
  fail_writes: AtomicBool,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent write fail with a `StorageError`.
  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  pub fn raw(&self, dir: &Path, file: &str) -> Option<String> {
    self.docs.read().get(&dir.join(file)).cloned()
  }

  fn write(&self, dir: &Path, file: &str, body: String) -> Result<bool> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(
        AppError::storage(format!("write to {file} refused"))
          .with_context("directory", dir.display().to_string())
          .with_context("file", file),
      );
    }
    self.docs.write().insert(dir.join(file), body);
    Ok(true)
  }
}

#[async_trait]
impl StorageService for MemoryStorage {
  async fn ensure_directory_exists(&self, _dir: &Path) -> Result<()> {
    Ok(())
  }

  async fn file_exists(&self, dir: &Path, file: &str) -> bool {
    self.docs.read().contains_key(&dir.join(file))
  }

  async fn read_json(&self, dir: &Path, file: &str) -> Result<Option<Value>> {
    Ok(
      self
        .raw(dir, file)
        .and_then(|raw| serde_json::from_str(&raw).ok()),
    )
  }

  async fn write_json(&self, dir: &Path, file: &str, value: &Value) -> Result<bool> {
    let body = serde_json::to_string_pretty(value)?;
    self.write(dir, file, body)
  }

  async fn write_text(&self, dir: &Path, file: &str, text: &str) -> Result<bool> {
    self.write(dir, file, text.to_string())
  }

  async fn list_files(&self, dir: &Path, pattern: &Regex) -> Result<Vec<String>> {
    Ok(
      self
        .docs
        .read()
        .keys()
        .filter(|p| p.parent() == Some(dir))
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .filter(|n| pattern.is_match(n))
        .collect(),
    )
  }
}
