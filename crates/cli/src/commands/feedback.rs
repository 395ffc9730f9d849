use aictx_core::app::AppContext;
use aictx_core::domain::FeedbackStatus;
use aictx_core::errors::Result;
use aictx_core::repository::Entity;
use serde_json::json;

use crate::args::{CollectFeedbackArgs, ResolveFeedbackArgs};

pub async fn collect_feedback(app: &AppContext, args: CollectFeedbackArgs) -> Result<String> {
  let feedback = app.feedback_manager()?;
  let adapter = app.adapter("feedback", "FeedbackManager")?;
  let payload = json!({"taskId": args.task_id, "severity": args.severity});
  let item: Entity = adapter
    .call("collect", payload, || {
      feedback.collect(&args.task_id, &args.content, &args.severity)
    })
    .await?;
  Ok(format!(
    "recorded feedback {} for {}",
    item["feedback_id"].as_str().unwrap_or_default(),
    args.task_id
  ))
}

pub async fn resolve_feedback(app: &AppContext, args: ResolveFeedbackArgs) -> Result<String> {
  let feedback = app.feedback_manager()?;
  let adapter = app.adapter("feedback", "FeedbackManager")?;
  let status: FeedbackStatus = args.status.parse()?;
  let id = args.feedback_id.as_str();
  let _: Entity = adapter
    .call("set_status", json!({"id": id, "status": status}), || feedback.set_status(id, status))
    .await?;
  Ok(format!("feedback {id} is now {status}"))
}
