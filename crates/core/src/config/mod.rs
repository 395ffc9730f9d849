//! Layered TOML configuration: defaults < global < project < environment.

mod load;
mod paths;
mod types;
mod validate;
mod write;

pub use load::{apply_env_overrides, load, load_from_paths};
pub use paths::{global_config_path, project_config_path};
pub use types::{Config, ConfigError, EventsConfig, LockConfig, LogLevel, Result};
pub use write::write_default_project_config;
