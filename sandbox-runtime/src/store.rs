//! Typed accessor over a Redis-like JSON+TTL store (component A).
//!
//! The core treats the store as eventually consistent across reconnects but
//! linearizable per key; no cross-key atomicity is assumed or required.
//! Absence (`None`) is not an error — callers fall back to the operator as
//! source of truth.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Result, SandboxError};

/// `alive:{sandbox_id}` — the SandboxInfo JSON projection, scanned by the reaper.
pub const ALIVE_PREFIX: &str = "alive:";
/// `timeout:{sandbox_id}` — `{auto_clear_time, expire_time}` JSON.
pub const TIMEOUT_PREFIX: &str = "timeout:";

pub fn alive_key(sandbox_id: &str) -> String {
    format!("{ALIVE_PREFIX}{sandbox_id}")
}

pub fn timeout_key(sandbox_id: &str) -> String {
    format!("{TIMEOUT_PREFIX}{sandbox_id}")
}

/// Async client over a Redis connection, used by the manager and reaper only.
///
/// `json_set`/`json_get`/`json_delete` operate on whole-value keys (the `$`
/// root path) — this repo does not need Redis's `JSON.*` module, only plain
/// `SET`/`GET` of a serialized JSON blob, matching what the original
/// Python manager actually does against its Redis client.
#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    /// Connect to `redis_url`, retrying reconnects transparently via
    /// [`ConnectionManager`].
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| SandboxError::Internal(format!("invalid redis url: {err}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| SandboxError::Upstream(format!("redis connect failed: {err}")))?;
        Ok(Self { conn })
    }

    /// Set `key` to the JSON-serialized `value`, with an optional TTL in seconds.
    pub async fn json_set<V: Serialize>(&self, key: &str, value: &V, ttl_secs: Option<u64>) -> Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|err| SandboxError::Internal(format!("serialize {key}: {err}")))?;
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, payload, ttl)
                    .await
                    .map_err(|err| SandboxError::Upstream(format!("redis SETEX {key}: {err}")))?;
            }
            None => {
                let _: () = conn
                    .set(key, payload)
                    .await
                    .map_err(|err| SandboxError::Upstream(format!("redis SET {key}: {err}")))?;
            }
        }
        Ok(())
    }

    /// Get and deserialize `key`; `None` if absent — not an error.
    pub async fn json_get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|err| SandboxError::Upstream(format!("redis GET {key}: {err}")))?;

        match raw {
            None => Ok(None),
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|err| SandboxError::Internal(format!("deserialize {key}: {err}")))?;
                Ok(Some(value))
            }
        }
    }

    /// Delete `key`; a no-op (not an error) if it doesn't exist.
    pub async fn json_delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|err| SandboxError::Upstream(format!("redis DEL {key}: {err}")))?;
        Ok(())
    }

    /// Scan keys matching `prefix*` in batches of `batch`, returning every match.
    ///
    /// Used by the reaper to walk `alive:*` without a blocking `KEYS *`.
    pub async fn scan_iter(&self, prefix: &str, batch: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut iter = conn
            .scan_match::<_, String>(pattern)
            .await
            .map_err(|err| SandboxError::Upstream(format!("redis SCAN {prefix}*: {err}")))?;

        let mut keys = Vec::with_capacity(batch);
        use futures_util::StreamExt;
        while let Some(key) = iter.next().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers_are_prefixed() {
        assert_eq!(alive_key("abc"), "alive:abc");
        assert_eq!(timeout_key("abc"), "timeout:abc");
    }
}
