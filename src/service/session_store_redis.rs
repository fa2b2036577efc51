//! Redis-backed `SessionStore` (spec §4.6): key layout is
//! `<prefix>:<bank>:session:<sid>[:suffix]`, mutations are unconditional
//! writes relying on Redis's atomic `INCR`/`RPUSH`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::domain::models::RemoteFile;
use crate::domain::ports::session_store::SessionStore;
use crate::error::Result;

pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisSessionStore {
            conn,
            prefix: prefix.into(),
        })
    }

    fn key(&self, bank: &str, session_id: &str, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}:{bank}:session:{session_id}", self.prefix)
        } else {
            format!("{}:{bank}:session:{session_id}:{suffix}", self.prefix)
        }
    }

    fn cancel_key(&self, bank: &str) -> String {
        format!("{}:{bank}:action:cancel", self.prefix)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create_session(&self, bank: &str, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key(bank, session_id, ""), 1).await?;
        Ok(())
    }

    async fn is_alive(&self, bank: &str, session_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.key(bank, session_id, "")).await?;
        Ok(exists)
    }

    async fn incr_progress(&self, bank: &str, session_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let v: u64 = conn.incr(self.key(bank, session_id, "progress"), 1).await?;
        Ok(v)
    }

    async fn incr_error(&self, bank: &str, session_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let v: u64 = conn.incr(self.key(bank, session_id, "error"), 1).await?;
        Ok(v)
    }

    async fn push_error_info(&self, bank: &str, session_id: &str, message: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(self.key(bank, session_id, "error:info"), message).await?;
        Ok(())
    }

    async fn error_info(&self, bank: &str, session_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let v: Vec<String> = conn.lrange(self.key(bank, session_id, "error:info"), 0, -1).await?;
        Ok(v)
    }

    async fn progress(&self, bank: &str, session_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let v: Option<u64> = conn.get(self.key(bank, session_id, "progress")).await?;
        Ok(v.unwrap_or(0))
    }

    async fn error_count(&self, bank: &str, session_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let v: Option<u64> = conn.get(self.key(bank, session_id, "error")).await?;
        Ok(v.unwrap_or(0))
    }

    async fn set_files(&self, bank: &str, session_id: &str, files: &[RemoteFile]) -> Result<()> {
        let bytes = bincode::serialize(files)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key(bank, session_id, "files"), bytes).await?;
        Ok(())
    }

    async fn files(&self, bank: &str, session_id: &str) -> Result<Vec<RemoteFile>> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(self.key(bank, session_id, "files")).await?;
        match bytes {
            Some(b) => Ok(bincode::deserialize(&b)?),
            None => Ok(Vec::new()),
        }
    }

    async fn clean(&self, bank: &str, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys = [
            self.key(bank, session_id, ""),
            self.key(bank, session_id, "progress"),
            self.key(bank, session_id, "error"),
            self.key(bank, session_id, "error:info"),
            self.key(bank, session_id, "files"),
        ];
        let _: () = conn.del(&keys[..]).await?;
        Ok(())
    }

    async fn set_cancel(&self, bank: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.cancel_key(bank), 1).await?;
        Ok(())
    }

    async fn take_cancel(&self, bank: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.cancel_key(bank);
        let existed: bool = conn.exists(&key).await?;
        if existed {
            let _: () = conn.del(&key).await?;
        }
        Ok(existed)
    }
}
