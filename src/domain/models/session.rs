//! `Session` — `(bank, session_id)` keyed bundle in the shared K/V store (spec §3, §4.6).

use serde::{Deserialize, Serialize};

/// Snapshot of a session's counters, as returned to a polling client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub progress: u64,
    pub errors: u64,
}

impl SessionStatus {
    pub fn has_error(&self) -> bool {
        self.errors > 0
    }

    /// True once every submitted job has completed (success or failure).
    pub fn is_complete(&self, expected: u64) -> bool {
        self.progress >= expected
    }
}

/// A newly created session, as handed back to the client by `create_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub bank: String,
    pub id: String,
}

impl Session {
    pub fn new(bank: impl Into<String>, id: impl Into<String>) -> Self {
        Session {
            bank: bank.into(),
            id: id.into(),
        }
    }
}
