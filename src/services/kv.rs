use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Backend(err.to_string())
    }
}

/// The handful of commands the debounce protocol needs. Any store with
/// TTL'd SET / SET-NX / INCR semantics satisfies it; production uses Redis
/// and tests inject [`MemoryKv`].
#[async_trait]
pub trait Kv: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Atomic test-and-set: stores only when the key is absent. Returns
    /// whether this caller won the set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Remaining TTL, or None when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;
}

/// Redis-backed implementation over a multiplexed connection manager.
#[derive(Clone)]
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(KvError::from)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(reply)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let reply: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(reply)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let mut conn = self.conn.clone();
        let reply: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        if reply < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(reply as u64)))
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<i64>(&mut conn).await?;
        Ok(())
    }
}

/// In-process fake with real expiry semantics, for tests.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| !e.expired()) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().await;
        let next = match entries.get(key) {
            Some(entry) if !entry.expired() => {
                entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| KvError::Backend("INCR on non-integer value".to_string()))?
                    + 1
            }
            _ => 1,
        };
        let expires_at = entries.get(key).filter(|e| !e.expired()).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if !entry.expired() {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.expired())
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn set_nx_wins_only_once() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_ex("k", "first", TTL).await.unwrap());
        assert!(!kv.set_nx_ex("k", "second", TTL).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        // And NX can win again after expiry.
        assert!(kv.set_nx_ex("k", "again", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn incr_counts_from_one_and_keeps_ttl() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("n").await.unwrap(), 1);
        assert_eq!(kv.incr("n").await.unwrap(), 2);
        kv.expire("n", TTL).await.unwrap();
        assert!(kv.ttl("n").await.unwrap().is_some());
        assert_eq!(kv.incr("n").await.unwrap(), 3);
        assert!(kv.ttl("n").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn del_removes_key() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", TTL).await.unwrap();
        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
