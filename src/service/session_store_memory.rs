//! In-memory `SessionStore` (spec §4.6), `dashmap`-backed. Used by
//! local-mode clients and by tests that should not require a live Redis.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::models::RemoteFile;
use crate::domain::ports::session_store::SessionStore;
use crate::error::Result;

#[derive(Default)]
struct SessionState {
    progress: AtomicU64,
    error: AtomicU64,
    error_info: std::sync::Mutex<Vec<String>>,
    files: std::sync::Mutex<Vec<RemoteFile>>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<(String, String), Arc<SessionState>>,
    cancel: DashMap<String, AtomicBool>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, bank: &str, session_id: &str) -> Arc<SessionState> {
        self.sessions
            .entry((bank.to_string(), session_id.to_string()))
            .or_insert_with(|| Arc::new(SessionState::default()))
            .clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, bank: &str, session_id: &str) -> Result<()> {
        self.entry(bank, session_id);
        Ok(())
    }

    async fn is_alive(&self, bank: &str, session_id: &str) -> Result<bool> {
        Ok(self.sessions.contains_key(&(bank.to_string(), session_id.to_string())))
    }

    async fn incr_progress(&self, bank: &str, session_id: &str) -> Result<u64> {
        let state = self.entry(bank, session_id);
        Ok(state.progress.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn incr_error(&self, bank: &str, session_id: &str) -> Result<u64> {
        let state = self.entry(bank, session_id);
        Ok(state.error.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn push_error_info(&self, bank: &str, session_id: &str, message: &str) -> Result<()> {
        let state = self.entry(bank, session_id);
        state.error_info.lock().unwrap_or_else(|e| e.into_inner()).push(message.to_string());
        Ok(())
    }

    async fn error_info(&self, bank: &str, session_id: &str) -> Result<Vec<String>> {
        let state = self.entry(bank, session_id);
        Ok(state.error_info.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn progress(&self, bank: &str, session_id: &str) -> Result<u64> {
        let state = self.entry(bank, session_id);
        Ok(state.progress.load(Ordering::SeqCst))
    }

    async fn error_count(&self, bank: &str, session_id: &str) -> Result<u64> {
        let state = self.entry(bank, session_id);
        Ok(state.error.load(Ordering::SeqCst))
    }

    async fn set_files(&self, bank: &str, session_id: &str, files: &[RemoteFile]) -> Result<()> {
        let state = self.entry(bank, session_id);
        *state.files.lock().unwrap_or_else(|e| e.into_inner()) = files.to_vec();
        Ok(())
    }

    async fn files(&self, bank: &str, session_id: &str) -> Result<Vec<RemoteFile>> {
        let state = self.entry(bank, session_id);
        Ok(state.files.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn clean(&self, bank: &str, session_id: &str) -> Result<()> {
        self.sessions.remove(&(bank.to_string(), session_id.to_string()));
        Ok(())
    }

    async fn set_cancel(&self, bank: &str) -> Result<()> {
        self.cancel
            .entry(bank.to_string())
            .or_insert_with(|| AtomicBool::new(false))
            .store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn take_cancel(&self, bank: &str) -> Result<bool> {
        match self.cancel.get(bank) {
            Some(flag) => Ok(flag.swap(false, Ordering::SeqCst)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_and_error_counters_increment_independently() {
        let store = MemorySessionStore::new();
        store.create_session("testbank", "s1").await.unwrap();
        assert!(store.is_alive("testbank", "s1").await.unwrap());

        store.incr_progress("testbank", "s1").await.unwrap();
        store.incr_progress("testbank", "s1").await.unwrap();
        store.incr_error("testbank", "s1").await.unwrap();

        assert_eq!(store.progress("testbank", "s1").await.unwrap(), 2);
        assert_eq!(store.error_count("testbank", "s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clean_removes_session_entirely() {
        let store = MemorySessionStore::new();
        store.create_session("testbank", "s1").await.unwrap();
        store.clean("testbank", "s1").await.unwrap();
        assert!(!store.is_alive("testbank", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_flag_is_one_shot() {
        let store = MemorySessionStore::new();
        assert!(!store.take_cancel("testbank").await.unwrap());
        store.set_cancel("testbank").await.unwrap();
        assert!(store.take_cancel("testbank").await.unwrap());
        assert!(!store.take_cancel("testbank").await.unwrap());
    }
}
