//! Task, feedback and session stores built on [`Repository`](crate::repository::Repository).

pub mod feedback;
pub mod session;
pub mod task;

pub use feedback::{FeedbackStatus, FeedbackStore, FeedbackValidator};
pub use session::{SessionHandover, SessionStore};
pub use task::{NewTask, ProgressState, TaskRepository, TaskStatus, TaskValidator};
