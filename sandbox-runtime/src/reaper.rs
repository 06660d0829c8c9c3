//! The Reaper (component I): a single background loop per process that
//! enforces per-sandbox TTLs by scanning `alive:*` keys and firing
//! fire-and-forget stops for anything expired (§4.I).
//!
//! The loop never dies on a per-iteration error — it logs and continues, per
//! §7's propagation policy ("the reaper never surfaces errors").

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::manager::SandboxManager;
use crate::metrics::metrics;
use crate::store::{ALIVE_PREFIX, KvStore, timeout_key};
use crate::types::TtlRecord;
use crate::util::now_ts;

pub struct Reaper {
    manager: Arc<SandboxManager>,
    kv: Arc<KvStore>,
    interval: Duration,
    scan_batch: usize,
}

impl Reaper {
    pub fn new(manager: Arc<SandboxManager>, kv: Arc<KvStore>, interval: Duration, scan_batch: usize) -> Self {
        Self { manager, kv, interval, scan_batch }
    }

    /// Run until `shutdown` fires. Intended to be spawned as its own task
    /// tied to the process lifetime (§9's "cancellable task" framing).
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One scan pass: work is bounded by the number of alive sandboxes
    /// (§4.I's cadence note).
    pub async fn tick(&self) {
        let keys = match self.kv.scan_iter(ALIVE_PREFIX, self.scan_batch).await {
            Ok(keys) => keys,
            Err(err) => {
                error!("reaper: failed to scan alive keys: {err}");
                return;
            }
        };

        let now = now_ts();
        for key in keys {
            let sandbox_id = key.trim_start_matches(ALIVE_PREFIX).to_string();

            let ttl: Option<TtlRecord> = match self.kv.json_get(&timeout_key(&sandbox_id)).await {
                Ok(ttl) => ttl,
                Err(err) => {
                    warn!("reaper: failed to read ttl for '{sandbox_id}': {err}");
                    continue;
                }
            };

            // Absent TTL record: treat as already cleared, not an error.
            let Some(ttl) = ttl else { continue };

            if ttl.is_expired(now) {
                let manager = self.manager.clone();
                let id = sandbox_id.clone();
                tokio::spawn(async move {
                    match manager.stop(&id).await {
                        Ok(()) => metrics().record_reaped_idle(),
                        Err(err) => warn!("reaper: failed to stop expired sandbox '{id}': {err}"),
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_alive_prefix() {
        let key = "alive:sbx-123";
        assert_eq!(key.trim_start_matches(ALIVE_PREFIX), "sbx-123");
    }
}
