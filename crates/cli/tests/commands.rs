use cli::{Output, run_from};
use pretty_assertions::assert_eq;
use serde_json::Value;
use test_support::{TempWorkspace, commit_file};

fn run(ws: &TempWorkspace, args: &[&str]) -> Output {
  let argv = std::iter::once("aictx").chain(args.iter().copied());
  run_from(argv, &ws.path())
}

fn ok(ws: &TempWorkspace, args: &[&str]) -> String {
  let out = run(ws, args);
  assert_eq!(out.code, 0, "{args:?} failed: {}", out.stderr);
  out.stdout
}

#[test]
fn init_writes_config_once() {
  let ws = TempWorkspace::new();
  let first = ok(&ws, &["init"]);
  assert!(first.starts_with("initialized "));
  assert!(first.ends_with("wrote .aictx/config.toml"));
  assert!(ws.context_path("tasks/task-history").is_dir());

  let second = ok(&ws, &["init"]);
  assert!(!second.contains("wrote"));
}

#[test]
fn create_and_update_tasks() {
  let ws = TempWorkspace::new();
  assert_eq!(ok(&ws, &["create-task", "--title", "Parser", "--priority", "2"]), "created task T001: Parser");
  assert_eq!(
    ok(&ws, &["create-task", "--title", "Lexer", "--depends-on", "T001"]),
    "created task T002: Lexer"
  );

  let out = ok(&ws, &["update-task", "T001", "--progress", "planning", "--focus"]);
  assert_eq!(out, "updated task T001 (status pending, progress planning)\nfocus: T001");

  let stored = ws.read_context_json("tasks/current-tasks.json");
  assert_eq!(stored["current_focus"], "T001");
  assert_eq!(stored["tasks"][1]["dependencies"][0], "T001");
  assert_eq!(stored["tasks"][0]["priority"], 2);
}

#[test]
fn rejected_updates_exit_with_user_error() {
  let ws = TempWorkspace::new();
  ok(&ws, &["create-task", "--title", "Parser"]);

  let out = run(&ws, &["update-task", "T001"]);
  assert_eq!(out.code, 1);
  assert!(out.stderr.contains("nothing to update"));

  let out = run(&ws, &["update-task", "T001", "--progress", "completed"]);
  assert_eq!(out.code, 1);
  assert!(out.stderr.starts_with("update-task failed: "));
  assert!(out.stderr.contains("not_started to completed"));

  let out = run(&ws, &["update-task", "T001", "--progress", "shipping"]);
  assert_eq!(out.code, 1);

  let out = run(&ws, &["update-task", "T001", "--depends-on", "T001"]);
  assert_eq!(out.code, 1);

  let stored = ws.read_context_json("tasks/current-tasks.json");
  assert_eq!(stored["tasks"][0]["progress_state"], "not_started");
  assert_eq!(stored["tasks"][0]["dependencies"], serde_json::json!([]));
}

#[test]
fn feedback_collect_and_resolve() {
  let ws = TempWorkspace::new();
  ok(&ws, &["create-task", "--title", "Parser"]);

  let out = ok(&ws, &["collect-feedback", "T001", "--content", "needs tests", "--severity", "high"]);
  let id = out
    .strip_prefix("recorded feedback ")
    .and_then(|rest| rest.strip_suffix(" for T001"))
    .expect("feedback id in output")
    .to_string();
  assert!(id.starts_with("FB-"));

  assert_eq!(ok(&ws, &["resolve-feedback", &id]), format!("feedback {id} is now resolved"));
  assert!(ws.context_path("feedback/feedback-history/feedback-T001-1.json").is_file());

  let out = run(&ws, &["collect-feedback", "T404", "--content", "x"]);
  assert_eq!(out.code, 1);
  let out = run(&ws, &["collect-feedback", "T001", "--content", "x", "--severity", "urgent"]);
  assert_eq!(out.code, 1);
}

#[test]
fn session_lifecycle_without_git() {
  let ws = TempWorkspace::new();
  ok(&ws, &["create-task", "--title", "Parser"]);

  let out = ok(&ws, &["start-session", "--focus", "T001"]);
  assert!(out.starts_with("started session S"));
  assert!(out.ends_with("(focus T001)"));

  let again = run(&ws, &["start-session"]);
  assert_eq!(again.code, 1);

  let out = ok(&ws, &["end-session", "--summary", "done for today"]);
  assert!(out.ends_with(": 0 commit(s), tasks: none"), "{out}");

  let out = run(&ws, &["end-session"]);
  assert_eq!(out.code, 1);
  assert!(out.stderr.contains("no active session"));
}

#[test]
fn sync_links_task_ids_from_commits() {
  let ws = TempWorkspace::new();
  let repo = ws.init_git();
  ok(&ws, &["create-task", "--title", "Parser"]);
  ok(&ws, &["create-task", "--title", "Lexer"]);
  commit_file(&repo, "src/lexer.rs", "// lexer\n", "feat: lexer (T002)");
  let hash = commit_file(&repo, "src/parser.rs", "// parser\n", "fix: parser #T001, refs T404");

  assert_eq!(ok(&ws, &["sync"]), "scanned 3 commit(s); linked: T002, T001");

  let stored = ws.read_context_json("tasks/current-tasks.json");
  assert_eq!(stored["tasks"][0]["related_commits"][0], hash.as_str());
}

#[test]
fn sync_without_git_fails() {
  let ws = TempWorkspace::new();
  let out = run(&ws, &["sync"]);
  assert_eq!(out.code, 1);
  assert!(out.stderr.contains("sync requires a git repository"));
  assert!(out.stderr.contains("trace: "));
}

#[test]
fn status_and_report() {
  let ws = TempWorkspace::new();
  ok(&ws, &["create-task", "--title", "Parser"]);
  ok(&ws, &["update-task", "T001", "--focus"]);
  ok(&ws, &["collect-feedback", "T001", "--content", "naming"]);

  let status = ok(&ws, &["status"]);
  assert!(status.starts_with("session: none\nfocus: T001\n"));
  assert!(status.contains("T001  pending"));
  assert!(status.ends_with("open feedback: 1"));

  let text = ok(&ws, &["report"]);
  assert!(text.contains("total: 1"));
  assert!(text.contains("[medium] T001: naming"));

  let path = ws.path().join("report.json");
  let out = ok(&ws, &["report", "--format", "json", "--output", path.to_str().unwrap()]);
  assert_eq!(out, format!("report written to {}", path.display()));
  let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
  assert_eq!(doc["tasks"]["total"], 1);
  assert_eq!(doc["tasks"]["by_status"]["pending"], 1);
  assert_eq!(doc["current_focus"], "T001");
  assert_eq!(doc["open_feedback"].as_array().unwrap().len(), 1);
}

#[test]
fn unexpected_failures_exit_two() {
  let ws = TempWorkspace::new();
  std::fs::write(ws.path().join("ai-context"), "not a directory").unwrap();
  let out = run(&ws, &["create-task", "--title", "Parser"]);
  assert_eq!(out.code, 2, "{}", out.stderr);
  assert!(out.stderr.starts_with("create-task failed unexpectedly (ERR_STORAGE"), "{}", out.stderr);
}
