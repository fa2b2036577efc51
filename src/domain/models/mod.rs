pub mod remote_file;
pub mod retry_policy;
pub mod session;

pub use remote_file::RemoteFile;
pub use retry_policy::{RetryPolicy, StopCondition, WaitPolicy};
pub use session::{Session, SessionStatus};
