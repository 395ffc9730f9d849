pub mod feedback;
pub mod init;
pub mod report;
pub mod session;
pub mod sync;
pub mod task;
