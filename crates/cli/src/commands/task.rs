use aictx_core::app::AppContext;
use aictx_core::domain::{NewTask, ProgressState};
use aictx_core::errors::{AppError, Result};
use aictx_core::repository::Entity;
use serde_json::{Value, json};

use crate::args::{CreateTaskArgs, UpdateTaskArgs};

pub async fn create_task(app: &AppContext, args: CreateTaskArgs) -> Result<String> {
  let tasks = app.task_manager()?;
  let adapter = app.adapter("task", "TaskManager")?;
  let input = NewTask {
    id: args.id,
    title: args.title,
    description: args.description,
    priority: args.priority,
    dependencies: args.depends_on,
  };
  let task: Entity = adapter
    .call("create_task", serde_json::to_value(&input)?, || tasks.create_task(input))
    .await?;
  Ok(format!(
    "created task {}: {}",
    task["id"].as_str().unwrap_or_default(),
    task["title"].as_str().unwrap_or_default()
  ))
}

pub async fn update_task(app: &AppContext, args: UpdateTaskArgs) -> Result<String> {
  let tasks = app.task_manager()?;
  let adapter = app.adapter("task", "TaskManager")?;
  let id = args.id.as_str();

  let mut changes = Entity::new();
  if let Some(title) = args.title {
    changes.insert("title".into(), Value::String(title));
  }
  if let Some(description) = args.description {
    changes.insert("description".into(), Value::String(description));
  }
  if let Some(priority) = args.priority {
    changes.insert("priority".into(), json!(priority));
  }
  if let Some(status) = args.status {
    changes.insert("status".into(), Value::String(status));
  }
  let progress = args.progress.map(|p| p.parse::<ProgressState>()).transpose()?;
  if changes.is_empty() && progress.is_none() && args.depends_on.is_empty() && !args.focus {
    return Err(AppError::validation("nothing to update; pass at least one field"));
  }

  let mut task: Option<Entity> = None;
  if let Some(state) = progress {
    task = Some(
      adapter
        .call("update_progress", json!({"id": id, "progress": state}), || {
          tasks.update_progress(id, state)
        })
        .await?,
    );
  }
  for dep in &args.depends_on {
    task = Some(
      adapter
        .call("add_dependency", json!({"id": id, "dependency": dep}), || {
          tasks.add_dependency(id, dep)
        })
        .await?,
    );
  }
  if !changes.is_empty() {
    let args = Value::Object(changes.clone());
    task = Some(
      adapter
        .call("update_task", json!({"id": id, "changes": args}), || tasks.update_task(id, changes))
        .await?,
    );
  }
  if args.focus {
    adapter
      .call("set_focus", json!({"id": id}), || tasks.set_focus(id))
      .await?;
  }

  let mut out = format!("updated task {id}");
  if let Some(task) = task {
    out.push_str(&format!(
      " (status {}, progress {})",
      task["status"].as_str().unwrap_or("-"),
      task["progress_state"].as_str().unwrap_or("-")
    ));
  }
  if args.focus {
    out.push_str(&format!("\nfocus: {id}"));
  }
  Ok(out)
}
