use aictx_core::app::AppContext;
use aictx_core::errors::Result;
use aictx_core::managers::SyncReport;
use serde_json::json;

use crate::args::SyncArgs;

pub async fn sync(app: &AppContext, args: SyncArgs) -> Result<String> {
  let sessions = app.session_manager()?;
  let adapter = app.adapter("session", "SessionManager")?;
  let since = args.since.as_deref();
  let report: SyncReport = adapter
    .call("sync", json!({"since": since}), || sessions.sync(since))
    .await?;
  let linked = if report.linked_tasks.is_empty() {
    "none".to_string()
  } else {
    report.linked_tasks.join(", ")
  };
  Ok(format!("scanned {} commit(s); linked: {linked}", report.commits_scanned))
}
