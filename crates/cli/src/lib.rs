pub mod args;
pub mod commands;
pub mod util;

use std::ffi::OsString;
use std::io::{IsTerminal, Write};
use std::path::Path;

use aictx_core::app::AppContext;
use aictx_core::config::{self, Config, LogLevel};
use aictx_core::errors::{AppError, Result};
use aictx_core::logging;
use clap::Parser;
use clap::error::ErrorKind as ClapErrorKind;
use tracing::{error, info};

use args::{Cli, Commands};
use util::errors::{exit_code, render_failure};

/// Result of one CLI invocation, captured so tests can run commands in-process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Output {
  pub code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl Output {
  fn ok(stdout: String) -> Self {
    Self {
      code: 0,
      stdout,
      stderr: String::new(),
    }
  }

  fn failed(code: i32, stderr: String) -> Self {
    Self {
      code,
      stdout: String::new(),
      stderr,
    }
  }
}

fn parse<I, T>(args: I) -> std::result::Result<Cli, Output>
where
  I: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  Cli::try_parse_from(args).map_err(|e| match e.kind() {
    ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => Output::ok(e.to_string()),
    _ => Output::failed(2, e.to_string()),
  })
}

fn command_name(cmd: &Commands) -> &'static str {
  match cmd {
    Commands::Init => "init",
    Commands::CreateTask(_) => "create-task",
    Commands::UpdateTask(_) => "update-task",
    Commands::StartSession(_) => "start-session",
    Commands::EndSession(_) => "end-session",
    Commands::CollectFeedback(_) => "collect-feedback",
    Commands::ResolveFeedback(_) => "resolve-feedback",
    Commands::Report(_) => "report",
    Commands::Status => "status",
    Commands::Sync(_) => "sync",
  }
}

async fn dispatch(cmd: Commands, root: &Path, config: Config) -> Result<String> {
  match cmd {
    Commands::Init => commands::init::init_project(root, config).await,
    cmd => {
      let app = AppContext::bootstrap(root, config).await?;
      with_app(cmd, &app).await
    }
  }
}

async fn with_app(cmd: Commands, app: &AppContext) -> Result<String> {
  match cmd {
    Commands::Init => Ok(format!("initialized {}", app.context_dir().display())),
    Commands::CreateTask(a) => commands::task::create_task(app, a).await,
    Commands::UpdateTask(a) => commands::task::update_task(app, a).await,
    Commands::StartSession(a) => commands::session::start_session(app, a).await,
    Commands::EndSession(a) => commands::session::end_session(app, a).await,
    Commands::CollectFeedback(a) => commands::feedback::collect_feedback(app, a).await,
    Commands::ResolveFeedback(a) => commands::feedback::resolve_feedback(app, a).await,
    Commands::Report(a) => commands::report::report(app, a).await,
    Commands::Status => commands::report::status(app).await,
    Commands::Sync(a) => commands::sync::sync(app, a).await,
  }
}

fn failure(action: &str, err: &AppError) -> Output {
  error!(event = "cli_command_failed", action, code = err.code(), error = %err, "command failed");
  Output::failed(exit_code(err), render_failure(action, err))
}

fn execute(cli: Cli, root: &Path, config: Config) -> Output {
  let Some(cmd) = cli.command else {
    return Output::ok(Cli::help_text());
  };
  let action = command_name(&cmd);
  let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
    Ok(rt) => rt,
    Err(e) => return failure(action, &AppError::from(e)),
  };
  info!(event = "cli_command_started", action, root = %root.display(), "running command");
  match rt.block_on(dispatch(cmd, root, config)) {
    Ok(stdout) => Output::ok(stdout),
    Err(err) => failure(action, &err),
  }
}

/// Parse `args` (including the binary name) and run against the project at `cwd`.
/// Does not install a logger.
pub fn run_from<I, T>(args: I, cwd: &Path) -> Output
where
  I: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  let cli = match parse(args) {
    Ok(cli) => cli,
    Err(out) => return out,
  };
  match config::load(Some(cwd)) {
    Ok(cfg) => execute(cli, cwd, cfg),
    Err(e) => failure("load config", &AppError::from(e)),
  }
}

fn emit(out: &Output) {
  if !out.stdout.is_empty() {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", out.stdout.trim_end());
  }
  if !out.stderr.is_empty() {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", out.stderr.trim_end());
  }
}

pub fn run() {
  let cwd = match std::env::current_dir() {
    Ok(dir) => dir,
    Err(e) => {
      let out = Output::failed(2, format!("cannot resolve working directory: {e}"));
      emit(&out);
      std::process::exit(out.code);
    }
  };
  let cli = match parse(std::env::args_os()) {
    Ok(cli) => cli,
    Err(out) => {
      emit(&out);
      std::process::exit(out.code);
    }
  };
  let cfg = match config::load(Some(&cwd)) {
    Ok(cfg) => cfg,
    Err(e) => {
      let out = failure("load config", &AppError::from(e));
      emit(&out);
      std::process::exit(out.code);
    }
  };

  if cli.verbose {
    logging::init_stderr(LogLevel::Debug);
  } else {
    // Logs only go to the file once the context directory exists.
    let ctx = cwd.join(&cfg.context_dir);
    if ctx.is_dir() || matches!(cli.command, Some(Commands::Init)) {
      let _ = logging::init(&aictx_core::adapters::fs::logs_path(&ctx), cfg.log_level);
    }
  }
  if !std::io::stdout().is_terminal() {
    yansi::disable();
  }

  let out = execute(cli, &cwd, cfg);
  emit(&out);
  std::process::exit(out.code);
}
