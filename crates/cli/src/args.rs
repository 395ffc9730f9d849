use std::path::PathBuf;

use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "aictx", version, about = "AI-assisted development workflow orchestrator", long_about = None, bin_name = "aictx")]
pub struct Cli {
  /// Log to stderr at debug level
  #[arg(long, short, global = true)]
  pub verbose: bool,
  #[command(subcommand)]
  pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Create the context folder and project config
  Init,
  /// Create a new task
  CreateTask(CreateTaskArgs),
  /// Update fields or progress of a task
  UpdateTask(UpdateTaskArgs),
  /// Start a work session
  StartSession(StartSessionArgs),
  /// End the active session and link its commits
  EndSession(EndSessionArgs),
  /// Record review feedback for a task
  CollectFeedback(CollectFeedbackArgs),
  /// Change the status of a feedback item
  ResolveFeedback(ResolveFeedbackArgs),
  /// Print or write a project report
  Report(ReportArgs),
  /// Show tasks, session and open feedback
  Status,
  /// Link task ids mentioned in recent commits
  Sync(SyncArgs),
}

#[derive(Debug, ClapArgs)]
pub struct CreateTaskArgs {
  /// Task title
  #[arg(long)]
  pub title: String,
  /// Explicit id (T001 format); defaults to the next free id
  #[arg(long)]
  pub id: Option<String>,
  #[arg(long, default_value = "")]
  pub description: String,
  /// 1 (highest) to 5
  #[arg(long)]
  pub priority: Option<u8>,
  /// Task this one depends on (repeatable)
  #[arg(long = "depends-on")]
  pub depends_on: Vec<String>,
}

#[derive(Debug, ClapArgs)]
pub struct UpdateTaskArgs {
  pub id: String,
  #[arg(long)]
  pub title: Option<String>,
  #[arg(long)]
  pub description: Option<String>,
  #[arg(long)]
  pub priority: Option<u8>,
  /// pending|in_progress|completed|blocked|cancelled
  #[arg(long)]
  pub status: Option<String>,
  /// not_started|planning|in_development|testing|blocked|completed
  #[arg(long)]
  pub progress: Option<String>,
  /// Add a dependency (repeatable)
  #[arg(long = "depends-on")]
  pub depends_on: Vec<String>,
  /// Make this the current focus
  #[arg(long)]
  pub focus: bool,
}

#[derive(Debug, ClapArgs)]
pub struct StartSessionArgs {
  /// Task to focus on
  #[arg(long)]
  pub focus: Option<String>,
}

#[derive(Debug, ClapArgs)]
pub struct EndSessionArgs {
  #[arg(long)]
  pub summary: Option<String>,
}

#[derive(Debug, ClapArgs)]
pub struct CollectFeedbackArgs {
  pub task_id: String,
  #[arg(long)]
  pub content: String,
  /// low|medium|high|critical
  #[arg(long, default_value = "medium")]
  pub severity: String,
}

#[derive(Debug, ClapArgs)]
pub struct ResolveFeedbackArgs {
  pub feedback_id: String,
  /// open|in_progress|resolved|wontfix
  #[arg(long, default_value = "resolved")]
  pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
  Text,
  Json,
}

#[derive(Debug, ClapArgs)]
pub struct ReportArgs {
  #[arg(long, value_enum, default_value = "text")]
  pub format: ReportFormat,
  /// Write to this file instead of stdout
  #[arg(long)]
  pub output: Option<PathBuf>,
}

#[derive(Debug, ClapArgs)]
pub struct SyncArgs {
  /// Revision to scan from; defaults to the last session's end commit
  #[arg(long)]
  pub since: Option<String>,
}

impl Cli {
  pub fn help_text() -> String {
    Cli::command().render_help().to_string()
  }
}
