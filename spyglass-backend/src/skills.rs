//! TTL cache over the skills + last-login joined view.
//!
//! The query behind it touches every skill row and correlates sessions,
//! so results are cached and recomputed at most once per TTL window (or
//! when the session ledger signals a durable change).

use crate::gateway::Gateway;
use serde::Serialize;
use spyglass_db::{Database, SkillEntry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SkillsPayload {
    pub skills: Vec<SkillEntry>,
}

/// Cache observability, served at /api/cache/stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub has_data: bool,
    pub age_secs: Option<u64>,
    pub ttl_secs: u64,
    pub is_expired: bool,
}

struct Slot {
    data: Option<Arc<SkillsPayload>>,
    computed_at: Option<Instant>,
}

pub struct SkillsCache {
    slot: Mutex<Slot>,
    ttl: Duration,
    db: Database,
    gateway: Gateway,
}

impl SkillsCache {
    pub fn new(db: Database, gateway: Gateway, ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(Slot {
                data: None,
                computed_at: None,
            }),
            ttl,
            db,
            gateway,
        }
    }

    /// Return the cached payload, recomputing when expired. The slot lock
    /// is held across the recompute: concurrent misses wait here and then
    /// all take the one freshly computed value (single-flight).
    pub async fn get(&self) -> Arc<SkillsPayload> {
        let mut slot = self.slot.lock().await;

        if let (Some(data), Some(at)) = (&slot.data, slot.computed_at) {
            if at.elapsed() < self.ttl {
                debug!("returning cached skills data");
                return data.clone();
            }
        }

        debug!("fetching fresh skills data from database");
        match self.db.skills_with_last_login().await {
            Ok(skills) => {
                let payload = Arc::new(SkillsPayload { skills });
                slot.data = Some(payload.clone());
                slot.computed_at = Some(Instant::now());

                if self.gateway.count() > 0 {
                    debug!("broadcasting skills update after cache refresh");
                    self.gateway.emit("skills:update", &*payload);
                }
                payload
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch skills data");
                // Stale data beats no data
                slot.data.clone().unwrap_or_else(|| {
                    Arc::new(SkillsPayload { skills: Vec::new() })
                })
            }
        }
    }

    /// Force the next `get()` to recompute regardless of TTL.
    pub async fn invalidate(&self) {
        self.slot.lock().await.computed_at = None;
        debug!("skills cache invalidated");
    }

    /// Invalidate and recompute immediately.
    pub async fn refresh(&self) -> Arc<SkillsPayload> {
        self.invalidate().await;
        self.get().await
    }

    pub async fn stats(&self) -> CacheStats {
        let slot = self.slot.lock().await;
        CacheStats {
            has_data: slot.data.is_some(),
            age_secs: slot.computed_at.map(|at| at.elapsed().as_secs()),
            ttl_secs: self.ttl.as_secs(),
            is_expired: slot
                .computed_at
                .is_none_or(|at| at.elapsed() >= self.ttl),
        }
    }
}
