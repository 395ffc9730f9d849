use std::path::Path;

use aictx_core::app::AppContext;
use aictx_core::config::{Config, write_default_project_config};
use aictx_core::errors::Result;

/// Write the project config (if missing) and create the context layout.
pub async fn init_project(root: &Path, config: Config) -> Result<String> {
  let wrote = write_default_project_config(root)?;
  let app = AppContext::bootstrap(root, config).await?;
  let mut out = format!("initialized {}", app.context_dir().display());
  if wrote {
    out.push_str("\nwrote .aictx/config.toml");
  }
  Ok(out)
}
