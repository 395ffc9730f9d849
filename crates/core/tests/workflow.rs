use std::time::Duration;

use aictx_core::app::AppContext;
use aictx_core::config::{Config, EventsConfig, LockConfig};
use aictx_core::domain::{FeedbackStatus, NewTask, ProgressState};
use aictx_core::managers::build_report;
use serde_json::{Value, json};
use test_support::{TempWorkspace, commit_file};

fn config() -> Config {
  Config {
    events: EventsConfig {
      keep_history: true,
      history_limit: 500,
    },
    ..Config::default()
  }
}

#[tokio::test]
async fn task_session_feedback_round() {
  let ws = TempWorkspace::new();
  let repo = ws.init_git();
  let app = AppContext::bootstrap(&ws.path(), config()).await.unwrap();
  let tasks = app.task_manager().unwrap();
  let sessions = app.session_manager().unwrap();
  let feedback = app.feedback_manager().unwrap();
  let adapter = app.adapter("task", "TaskManager").unwrap();

  let created: Value = adapter
    .call("create_task", json!({"title": "parser"}), || async {
      tasks
        .create_task(NewTask {
          title: "parser".into(),
          ..Default::default()
        })
        .await
        .map(Value::Object)
    })
    .await
    .unwrap();
  assert_eq!(created["id"], "T001");

  sessions.start(Some("T001")).await.unwrap();
  tasks.update_progress("T001", ProgressState::Planning).await.unwrap();
  let hash = commit_file(&repo, "src/parser.rs", "fn main() {}\n", "feat: parser skeleton #T001");
  let ended = sessions.end(Some("parser started")).await.unwrap();
  assert_eq!(ended.task_ids, vec!["T001"]);

  let item = feedback.collect("T001", "needs tests", "medium").await.unwrap();
  let fid = item["feedback_id"].as_str().unwrap().to_string();
  feedback.set_status(&fid, FeedbackStatus::Wontfix).await.unwrap();
  assert!(ws.context_path("feedback/feedback-history/feedback-T001-1.json").is_file());
  assert!(feedback.collect("T404", "x", "low").await.is_err());

  let stored = ws.read_context_json("tasks/current-tasks.json");
  assert_eq!(stored["tasks"][0]["related_commits"], json!([hash]));
  assert_eq!(stored["current_focus"], "T001");

  let report = build_report(&tasks, &sessions, &feedback).await.unwrap();
  assert_eq!(report.tasks.total, 1);
  assert_eq!(report.tasks.by_progress["planning"], 1);
  assert!(report.active_session.is_none());
  assert_eq!(report.last_session.unwrap().session_id, ended.session_id);
  assert!(report.open_feedback.is_empty());

  let history = app.event_bus().unwrap().history();
  let names: Vec<&str> = history.iter().map(|h| h.event.as_str()).collect();
  for expected in [
    "task:create_task_before",
    "task:created",
    "task:create_task_after",
    "session:started",
    "task:progress_changed",
    "session:ended",
    "feedback:created",
    "feedback:status_changed",
    "lock:acquired",
    "lock:released",
  ] {
    assert!(names.contains(&expected), "missing {expected}");
  }
  let catalog = app.event_bus().unwrap().catalog().unwrap();
  for h in history.iter().filter(|h| h.event != "event" && !h.event.ends_with("_before") && !h.event.ends_with("_after")) {
    assert!(catalog.contains(&h.event), "{} is not cataloged", h.event);
  }
}

#[tokio::test]
async fn sync_links_commits_since_last_session() {
  let ws = TempWorkspace::new();
  let repo = ws.init_git();
  let app = AppContext::bootstrap(&ws.path(), Config::default()).await.unwrap();
  let tasks = app.task_manager().unwrap();
  let sessions = app.session_manager().unwrap();
  for title in ["a", "b"] {
    tasks
      .create_task(NewTask {
        title: title.into(),
        ..Default::default()
      })
      .await
      .unwrap();
  }
  sessions.start(None).await.unwrap();
  sessions.end(None).await.unwrap();

  commit_file(&repo, "a.txt", "a", "fix T002");
  commit_file(&repo, "b.txt", "b", "chore: T002 and #T001");
  let report = sessions.sync(None).await.unwrap();
  assert_eq!(report.commits_scanned, 2);
  assert_eq!(report.linked_tasks, vec!["T002", "T001"]);

  let again = sessions.sync(None).await.unwrap();
  assert_eq!(again.commits_scanned, 2);
  let t2 = tasks.get_task("T002").await.unwrap().unwrap();
  assert_eq!(t2["related_commits"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn adapter_reports_failures_on_app_error() {
  let ws = TempWorkspace::new();
  let app = AppContext::bootstrap(&ws.path(), config()).await.unwrap();
  let tasks = app.task_manager().unwrap();
  let adapter = app.adapter("task", "TaskManager").unwrap();
  let err = adapter
    .call::<Value, _, _>("update_progress", json!({"id": "T404"}), || async {
      tasks
        .update_progress("T404", ProgressState::Testing)
        .await
        .map(Value::Object)
    })
    .await
    .unwrap_err();
  assert_eq!(err.name(), "NotFoundError");

  let history = app.event_bus().unwrap().history();
  let app_error = history.iter().find(|h| h.event == "app:error").unwrap();
  assert_eq!(app_error.data["errorCode"], "ERR_NOT_FOUND");
  assert!(app_error.data["traceId"].is_string());
  assert!(app.error_handler().unwrap().statistics().total_errors >= 1);
}

#[tokio::test]
async fn session_start_and_end_wait_for_the_tasks_lock() {
  let ws = TempWorkspace::new();
  let repo = ws.init_git();
  let cfg = Config {
    locks: LockConfig {
      retry_interval_ms: 10,
      acquire_timeout_ms: 100,
      ..LockConfig::default()
    },
    ..Config::default()
  };
  let app = AppContext::bootstrap(&ws.path(), cfg).await.unwrap();
  let tasks = app.task_manager().unwrap();
  let sessions = app.session_manager().unwrap();
  let locks = app.lock_manager().unwrap();
  tasks
    .create_task(NewTask {
      title: "parser".into(),
      ..Default::default()
    })
    .await
    .unwrap();
  locks.acquire_lock("tasks", "other-writer", None).await.unwrap();
  let err = sessions.start(Some("T001")).await.unwrap_err();
  assert_eq!(err.code(), "ERR_LOCK_TIMEOUT");
  assert!(sessions.current().await.unwrap().is_none());
  locks.release_lock("tasks", "other-writer").unwrap();

  sessions.start(Some("T001")).await.unwrap();
  commit_file(&repo, "src/parser.rs", "// parser\n", "feat: parser #T001");

  locks.acquire_lock("tasks", "other-writer", None).await.unwrap();
  let err = sessions.end(None).await.unwrap_err();
  assert_eq!(err.code(), "ERR_LOCK_TIMEOUT");
  assert!(sessions.current().await.unwrap().is_some());
  assert_eq!(ws.read_context_json("tasks/current-tasks.json")["tasks"][0]["related_commits"], json!([]));
  // the sessions lock was released on the way out
  assert!(locks.acquire_lock("sessions", "status-check", Some(Duration::ZERO)).await.is_ok());
  locks.release_lock("sessions", "status-check").unwrap();

  let release = async {
    tokio::time::sleep(Duration::from_millis(30)).await;
    locks.release_lock("tasks", "other-writer").unwrap();
  };
  let (ended, ()) = tokio::join!(sessions.end(None), release);
  let ended = ended.unwrap();
  assert_eq!(ended.task_ids, vec!["T001"]);
  assert!(sessions.current().await.unwrap().is_none());
}
