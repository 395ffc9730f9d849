use std::path::{Path, PathBuf};

/// Location of the global config file (~/.config/aictx/config.toml)
pub fn global_config_path() -> Option<PathBuf> {
  dirs::config_dir().map(|p| p.join("aictx").join("config.toml"))
}

/// Location of the project config file (./.aictx/config.toml)
pub fn project_config_path(project_root: &Path) -> PathBuf {
  project_root.join(".aictx").join("config.toml")
}
