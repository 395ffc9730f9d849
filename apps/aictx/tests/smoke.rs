use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use test_support::TempWorkspace;

fn aictx(ws: &TempWorkspace) -> Command {
  let mut cmd = Command::cargo_bin("aictx").expect("compile bin");
  cmd.current_dir(ws.path());
  cmd
}

#[test]
fn help_exits_successfully() {
  let ws = TempWorkspace::new();
  aictx(&ws)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("start-session"));
}

#[test]
fn init_then_create_task() {
  let ws = TempWorkspace::new();
  aictx(&ws)
    .arg("init")
    .assert()
    .success()
    .stdout(predicate::str::contains("initialized"));
  assert!(ws.path().join(".aictx").join("config.toml").is_file());

  aictx(&ws)
    .args(["create-task", "--title", "Wire the bus"])
    .assert()
    .success()
    .stdout(predicate::str::contains("created task T001: Wire the bus"));

  let doc = ws.read_context_json("tasks/current-tasks.json");
  assert_eq!(doc["tasks"][0]["id"], "T001");
  assert!(ws.context_path("logs.jsonl").is_file());
}

#[test]
fn unknown_task_fails_with_user_error() {
  let ws = TempWorkspace::new();
  aictx(&ws)
    .args(["update-task", "T404", "--progress", "planning"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("update-task failed"));
}

#[test]
fn bad_flag_is_usage_error() {
  let ws = TempWorkspace::new();
  aictx(&ws).args(["report", "--format", "xml"]).assert().code(2);
}
