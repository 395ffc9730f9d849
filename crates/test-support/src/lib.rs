use std::path::{Path, PathBuf};
use std::time::Duration;

/// Temporary project root for tests.
/// Provides convenience helpers for the context layout and git initialization.
pub struct TempWorkspace {
  pub root: tempfile::TempDir,
}

impl Default for TempWorkspace {
  fn default() -> Self {
    Self::new()
  }
}

impl TempWorkspace {
  pub fn new() -> Self {
    let root = tempfile::tempdir().expect("tempdir");
    Self { root }
  }

  pub fn path(&self) -> PathBuf {
    self.root.path().to_path_buf()
  }

  /// Initialize a git repository with an initial commit on `main`.
  pub fn init_git(&self) -> git2::Repository {
    init_repo_with_initial_commit(self.path())
  }

  /// Path of `rel` inside the default `ai-context` folder.
  pub fn context_path(&self, rel: &str) -> PathBuf {
    self.path().join("ai-context").join(rel)
  }

  /// Parse a JSON document under the context folder.
  pub fn read_context_json(&self, rel: &str) -> serde_json::Value {
    let raw = std::fs::read_to_string(self.context_path(rel)).expect("read context file");
    serde_json::from_str(&raw).expect("valid json")
  }
}

/// Create an empty repository at `path` with a committer identity configured.
pub fn init_repo_only<P: AsRef<Path>>(path: P) -> git2::Repository {
  let repo = git2::Repository::init(path.as_ref()).expect("init git");
  {
    let mut cfg = repo.config().expect("repo config");
    cfg.set_str("user.name", "aictx tests").expect("user.name");
    cfg.set_str("user.email", "tests@aictx.invalid").expect("user.email");
  }
  repo
}

/// Repository whose `main` branch holds a single README commit.
pub fn init_repo_with_initial_commit<P: AsRef<Path>>(path: P) -> git2::Repository {
  let repo = init_repo_only(&path);
  let oid = stage_and_commit(&repo, "README.md", "# fixture\n", "initial commit");
  {
    let head = repo.find_commit(oid).expect("initial commit");
    repo.branch("main", &head, true).expect("main branch");
  }
  repo.set_head("refs/heads/main").expect("point HEAD at main");
  repo
}

/// Write `rel` with `contents` and commit it on HEAD. Returns the new commit hash.
pub fn commit_file(repo: &git2::Repository, rel: &str, contents: &str, message: &str) -> String {
  stage_and_commit(repo, rel, contents, message).to_string()
}

fn stage_and_commit(repo: &git2::Repository, rel: &str, contents: &str, message: &str) -> git2::Oid {
  let file = repo.workdir().expect("non-bare repo").join(rel);
  if let Some(dir) = file.parent() {
    std::fs::create_dir_all(dir).expect("create parent dirs");
  }
  std::fs::write(&file, contents).expect("write fixture file");

  let mut index = repo.index().expect("index");
  index.add_path(Path::new(rel)).expect("stage file");
  index.write().expect("write index");
  let tree = repo
    .find_tree(index.write_tree().expect("write tree"))
    .expect("find tree");
  let sig = repo.signature().expect("signature");
  // An unborn HEAD means this is the root commit.
  let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
  let parents: Vec<&git2::Commit> = parent.iter().collect();
  repo
    .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
    .expect("commit")
}

/// Re-run `check` every `interval` until it yields true. Gives up after `timeout`
/// and reports whether the condition was ever met.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + timeout;
  while !check().await {
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(interval).await;
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn git_init_with_commit_creates_main() {
    let td = tempfile::tempdir().unwrap();
    let repo = init_repo_with_initial_commit(td.path());
    let head = repo.head().unwrap();
    assert_eq!(head.name(), Some("refs/heads/main"));
  }

  #[test]
  fn commit_file_advances_head() {
    let ws = TempWorkspace::new();
    let repo = ws.init_git();
    let hash = commit_file(&repo, "src/a.txt", "a", "add a");
    assert_eq!(repo.head().unwrap().target().unwrap().to_string(), hash);
    assert!(ws.path().join("src/a.txt").is_file());
  }
}
