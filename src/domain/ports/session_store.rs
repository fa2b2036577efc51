use async_trait::async_trait;

use crate::domain::models::RemoteFile;
use crate::error::Result;

///# SessionStore
/// key/value abstraction over the shared session store (spec §4.6). Keys are
/// scoped by `(bank, session_id)`; all mutations are unconditional writes,
/// concurrency correctness relies on the store's atomic increment.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Marks `(bank, session_id)` alive. Presence of the key is the liveness check.
    async fn create_session(&self, bank: &str, session_id: &str) -> Result<()>;

    /// True if the session's alive marker is present.
    async fn is_alive(&self, bank: &str, session_id: &str) -> Result<bool>;

    /// Increment-only counter of completed jobs (success or failure).
    async fn incr_progress(&self, bank: &str, session_id: &str) -> Result<u64>;

    /// Increment-only counter of failed jobs.
    async fn incr_error(&self, bank: &str, session_id: &str) -> Result<u64>;

    /// Append a human-readable error message.
    async fn push_error_info(&self, bank: &str, session_id: &str, message: &str) -> Result<()>;

    async fn error_info(&self, bank: &str, session_id: &str) -> Result<Vec<String>>;

    async fn progress(&self, bank: &str, session_id: &str) -> Result<u64>;

    async fn error_count(&self, bank: &str, session_id: &str) -> Result<u64>;

    /// Serializes and stores the result of a LIST operation.
    async fn set_files(&self, bank: &str, session_id: &str, files: &[RemoteFile]) -> Result<()>;

    async fn files(&self, bank: &str, session_id: &str) -> Result<Vec<RemoteFile>>;

    /// Deletes every key belonging to the session.
    async fn clean(&self, bank: &str, session_id: &str) -> Result<()>;

    /// One-shot flag consumed by the polling client; `set_cancel` is called
    /// by the client, `take_cancel` both reads and clears it.
    async fn set_cancel(&self, bank: &str) -> Result<()>;

    async fn take_cancel(&self, bank: &str) -> Result<bool>;
}
