use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use super::StorageService;
use crate::errors::{AppError, Result};

/// [`StorageService`] over the local filesystem.
///
/// Writes go to a sibling temp file that is renamed into place, so readers
/// never observe a half-written document from this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorageService;

impl FileStorageService {
  pub fn new() -> Self {
    Self
  }

  async fn write_bytes(&self, dir: &Path, file: &str, bytes: &[u8]) -> Result<bool> {
    fs::create_dir_all(dir).await.map_err(|e| io_error(e, dir, file))?;
    let target = dir.join(file);
    let tmp = dir.join(format!(".{file}.tmp"));
    fs::write(&tmp, bytes).await.map_err(|e| io_error(e, dir, file))?;
    fs::rename(&tmp, &target).await.map_err(|e| io_error(e, dir, file))?;
    debug!(event = "storage_write", path = %target.display(), bytes = bytes.len(), "document written");
    Ok(true)
  }
}

fn io_error(err: std::io::Error, dir: &Path, file: &str) -> AppError {
  AppError::from(err)
    .with_context("directory", dir.display().to_string())
    .with_context("file", file)
}

#[async_trait]
impl StorageService for FileStorageService {
  async fn ensure_directory_exists(&self, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).await.map_err(|e| io_error(e, dir, ""))
  }

  async fn file_exists(&self, dir: &Path, file: &str) -> bool {
    fs::try_exists(dir.join(file)).await.unwrap_or(false)
  }

  async fn read_json(&self, dir: &Path, file: &str) -> Result<Option<Value>> {
    let path = dir.join(file);
    let raw = match fs::read_to_string(&path).await {
      Ok(raw) => raw,
      Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_error(e, dir, file)),
    };
    match serde_json::from_str(&raw) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        warn!(event = "storage_corrupt_document", path = %path.display(), error = %e, "treating unreadable document as absent");
        Ok(None)
      }
    }
  }

  async fn write_json(&self, dir: &Path, file: &str, value: &Value) -> Result<bool> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    self.write_bytes(dir, file, &bytes).await
  }

  async fn write_text(&self, dir: &Path, file: &str, text: &str) -> Result<bool> {
    self.write_bytes(dir, file, text.as_bytes()).await
  }

  async fn list_files(&self, dir: &Path, pattern: &Regex) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io_error(e, dir, "")),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(e, dir, ""))? {
      let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
      if let Some(name) = entry.file_name().to_str()
        && is_file
        && pattern.is_match(name)
      {
        names.push(name.to_string());
      }
    }
    names.sort();
    Ok(names)
  }
}
