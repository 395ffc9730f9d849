//! Domain services used by the CLI façades.
//!
//! Every mutation runs under a [`LockManager`](crate::locks::LockManager)
//! lock on its collection (`tasks`, `sessions`, `feedback`), so callers that
//! share one lock manager never interleave writes to the same file.

mod adapter;
mod feedback;
mod report;
mod session;
mod task;

pub use adapter::{ManagerAdapter, cli_error_code};
pub use feedback::FeedbackManager;
pub use report::{Report, TaskCounts, build_report};
pub use session::{SessionManager, SyncReport};
pub use task::TaskManager;

use uuid::Uuid;

pub const TASKS_RESOURCE: &str = "tasks";
pub const SESSIONS_RESOURCE: &str = "sessions";
pub const FEEDBACK_RESOURCE: &str = "feedback";

fn locker_id(component: &str) -> String {
  format!("{component}-{}", Uuid::new_v4().simple())
}
