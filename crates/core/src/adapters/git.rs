use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::DateTime;
use git2::{Commit, DiffStatsFormat, Repository, Sort};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
  pub hash: String,
  pub short_hash: String,
  pub message: String,
  pub author: String,
  /// RFC 3339, UTC.
  pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
  pub files_changed: usize,
  pub insertions: usize,
  pub deletions: usize,
}

/// Read-only view of the project's git history.
pub trait GitService: Send + Sync {
  fn get_current_commit_hash(&self) -> Result<String>;

  /// Commits reachable from `end` but not from `start`, oldest first.
  /// Without `start`, the whole history up to `end`.
  fn get_commits_between(&self, start: Option<&str>, end: &str) -> Result<Vec<CommitInfo>>;

  fn get_commit_diff_stats(&self, hash: &str) -> Result<DiffStats>;

  fn get_changed_files_in_commit(&self, hash: &str) -> Result<Vec<String>>;

  fn extract_task_ids_from_commit_message(&self, message: &str) -> Vec<String> {
    extract_task_ids(message)
  }
}

static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();

fn task_id_regex() -> &'static Regex {
  TASK_ID_RE.get_or_init(|| Regex::new(r"#?\bT(\d{3})\b").expect("valid regex"))
}

/// Task ids (`T001`, `#T001`) mentioned in a commit message, normalized and
/// de-duplicated in order of first appearance.
pub fn extract_task_ids(message: &str) -> Vec<String> {
  let mut ids: Vec<String> = Vec::new();
  for caps in task_id_regex().captures_iter(message) {
    let id = format!("T{}", &caps[1]);
    if !ids.contains(&id) {
      ids.push(id);
    }
  }
  ids
}

/// [`GitService`] backed by libgit2. The repository is discovered from `root`
/// on every call.
#[derive(Debug, Clone)]
pub struct Git2Service {
  root: PathBuf,
  debug: bool,
}

impl Git2Service {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      debug: false,
    }
  }

  /// Trace every git call at debug level.
  pub fn with_debug(mut self, debug: bool) -> Self {
    self.debug = debug;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Whether `root` is inside a git repository.
  pub fn is_available(&self) -> bool {
    Repository::discover(&self.root).is_ok()
  }

  fn open(&self, op: &'static str) -> Result<Repository> {
    if self.debug {
      debug!(event = "git_call", op, root = %self.root.display(), "git call");
    }
    Repository::discover(&self.root).map_err(|e| git_error(e, op))
  }
}

fn git_error(err: git2::Error, op: &'static str) -> AppError {
  AppError::from(err).with_context("operation", op)
}

/// Resolve a revision (hash, branch, `HEAD`, ...) to a commit.
fn resolve_commit<'r>(repo: &'r Repository, rev: &str, op: &'static str) -> Result<Commit<'r>> {
  repo
    .revparse_single(rev)
    .and_then(|obj| obj.peel_to_commit())
    .map_err(|e| git_error(e, op).with_context("rev", rev))
}

fn commit_info(commit: &Commit<'_>) -> CommitInfo {
  let hash = commit.id().to_string();
  let timestamp = DateTime::from_timestamp(commit.time().seconds(), 0)
    .map(|t| t.to_rfc3339())
    .unwrap_or_default();
  CommitInfo {
    short_hash: hash.chars().take(7).collect(),
    hash,
    message: commit.message().unwrap_or("").trim_end().to_string(),
    author: commit.author().name().unwrap_or("").to_string(),
    timestamp,
  }
}

impl GitService for Git2Service {
  fn get_current_commit_hash(&self) -> Result<String> {
    let repo = self.open("current_commit")?;
    let commit = resolve_commit(&repo, "HEAD", "current_commit")?;
    Ok(commit.id().to_string())
  }

  fn get_commits_between(&self, start: Option<&str>, end: &str) -> Result<Vec<CommitInfo>> {
    let op = "commits_between";
    let repo = self.open(op)?;
    let end_commit = resolve_commit(&repo, end, op)?;
    let mut walk = repo.revwalk().map_err(|e| git_error(e, op))?;
    walk
      .set_sorting(Sort::TOPOLOGICAL | Sort::TIME | Sort::REVERSE)
      .map_err(|e| git_error(e, op))?;
    walk.push(end_commit.id()).map_err(|e| git_error(e, op))?;
    if let Some(start) = start {
      let start_commit = resolve_commit(&repo, start, op)?;
      walk.hide(start_commit.id()).map_err(|e| git_error(e, op))?;
    }
    let mut commits = Vec::new();
    for oid in walk {
      let oid = oid.map_err(|e| git_error(e, op))?;
      let commit = repo.find_commit(oid).map_err(|e| git_error(e, op))?;
      commits.push(commit_info(&commit));
    }
    if self.debug {
      debug!(event = "git_commits_between", start = ?start, end, count = commits.len(), "walked commits");
    }
    Ok(commits)
  }

  fn get_commit_diff_stats(&self, hash: &str) -> Result<DiffStats> {
    let op = "diff_stats";
    let repo = self.open(op)?;
    let diff = commit_diff(&repo, hash, op)?;
    let stats = diff.stats().map_err(|e| git_error(e, op))?;
    if self.debug {
      let summary = stats
        .to_buf(DiffStatsFormat::SHORT, 80)
        .ok()
        .and_then(|b| b.as_str().map(str::to_string))
        .unwrap_or_default();
      debug!(event = "git_diff_stats", hash, summary = %summary.trim(), "diff stats");
    }
    Ok(DiffStats {
      files_changed: stats.files_changed(),
      insertions: stats.insertions(),
      deletions: stats.deletions(),
    })
  }

  fn get_changed_files_in_commit(&self, hash: &str) -> Result<Vec<String>> {
    let op = "changed_files";
    let repo = self.open(op)?;
    let diff = commit_diff(&repo, hash, op)?;
    Ok(
      diff
        .deltas()
        .filter_map(|d| d.new_file().path().or_else(|| d.old_file().path()).map(|p| p.to_string_lossy().into_owned()))
        .collect(),
    )
  }
}

/// Diff of a commit against its first parent, or the empty tree for a root commit.
fn commit_diff<'r>(repo: &'r Repository, hash: &str, op: &'static str) -> Result<git2::Diff<'r>> {
  let commit = resolve_commit(repo, hash, op)?;
  let tree = commit.tree().map_err(|e| git_error(e, op))?;
  let parent_tree = match commit.parent_count() {
    0 => None,
    _ => Some(
      commit
        .parent(0)
        .and_then(|p| p.tree())
        .map_err(|e| git_error(e, op))?,
    ),
  };
  repo
    .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
    .map_err(|e| git_error(e, op))
}
