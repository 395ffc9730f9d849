use std::path::Path;

use super::paths::project_config_path;
use super::types::Config;

/// Write a default project config if it does not exist yet.
/// Returns whether a file was written.
pub fn write_default_project_config(project_root: &Path) -> std::io::Result<bool> {
  let path = project_config_path(project_root);
  if path.exists() {
    return Ok(false);
  }
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let cfg = Config::default();
  let body = toml::to_string_pretty(&cfg).unwrap_or_default();
  let mut s = String::from(
    "# aictx project configuration. Values here override ~/.config/aictx/config.toml.\n\
     # AICTX_ENV=development forces include_stack_traces; DEBUG_GIT=1 forces debug_git.\n\n",
  );
  s.push_str(&body);
  std::fs::write(&path, s)?;
  Ok(true)
}
