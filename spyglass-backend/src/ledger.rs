//! The session ledger: one entry per player currently or recently known,
//! reconciling log-derived events with polled roster truth.

use crate::helpers::format_duration;
use crate::skills::SkillsCache;
use scc::hash_map::Entry;
use serde::Serialize;
use spyglass_db::{Database, PlayerName};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    login_time: i64,
    is_online: bool,
    /// Persisted open-session row, when the insert succeeded
    db_id: Option<i64>,
}

/// A roster name enriched with live session info.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerWithSession {
    pub name: String,
    pub session_duration: i64,
    pub session_duration_formatted: String,
    pub login_time: Option<i64>,
}

/// Snapshot of one currently-active in-memory session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub player_name: String,
    pub login_time: i64,
    pub session_duration: i64,
    pub session_duration_formatted: String,
}

pub struct SessionLedger {
    sessions: scc::HashMap<PlayerName, SessionEntry>,
    /// Last known roster; log events and polls both update it so the two
    /// paths never re-synthesize each other's events. The lock is held
    /// across a whole reconcile to keep them ordered.
    known_roster: Mutex<Vec<String>>,
    db: Database,
    cache: Arc<SkillsCache>,
    min_session_secs: i64,
    retention_secs: i64,
}

impl SessionLedger {
    pub fn new(
        db: Database,
        cache: Arc<SkillsCache>,
        min_session: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            sessions: scc::HashMap::new(),
            known_roster: Mutex::new(Vec::new()),
            db,
            cache,
            min_session_secs: min_session.as_secs() as i64,
            retention_secs: retention.as_secs() as i64,
        }
    }

    /// A join observed in the server log.
    pub async fn join(&self, name: &str, now: i64) {
        let mut roster = self.known_roster.lock().await;
        if !roster.iter().any(|n| n == name) {
            roster.push(name.to_string());
        }
        self.apply_join(name, now).await;
    }

    /// A leave observed in the server log.
    pub async fn leave(&self, name: &str, now: i64) {
        let mut roster = self.known_roster.lock().await;
        roster.retain(|n| n != name);
        self.apply_leave(name, now).await;
    }

    /// Reconcile against an authoritative roster snapshot from RCON.
    /// Joins and leaves missed in the log (rotation loss, downtime) are
    /// synthesized here; calling again with the same roster is a no-op.
    /// Returns the names that joined and left.
    pub async fn reconcile_with(&self, current: &[String], now: i64) -> (Vec<String>, Vec<String>) {
        let mut roster = self.known_roster.lock().await;

        let joined: Vec<String> = current
            .iter()
            .filter(|name| !roster.contains(name))
            .cloned()
            .collect();
        let left: Vec<String> = roster
            .iter()
            .filter(|name| !current.contains(name))
            .cloned()
            .collect();
        *roster = current.to_vec();

        for name in &joined {
            self.apply_join(name, now).await;
        }
        for name in &left {
            self.apply_leave(name, now).await;
        }

        (joined, left)
    }

    async fn apply_join(&self, name: &str, now: i64) {
        let Ok(key) = PlayerName::try_from(name) else {
            warn!(name, "player name exceeds 16 characters, ignoring join");
            return;
        };

        // Decide and write the entry without yielding in between, so no
        // interleaved event can ever observe two active sessions.
        let fresh = SessionEntry {
            login_time: now,
            is_online: true,
            db_id: None,
        };
        let displaced = match self.sessions.entry_async(key).await {
            Entry::Occupied(mut entry) => {
                let old = *entry.get();
                *entry.get_mut() = fresh;
                old.is_online.then_some(old)
            }
            Entry::Vacant(entry) => {
                entry.insert_entry(fresh);
                None
            }
        };

        if let Some(old) = displaced {
            debug!(name, "duplicate join, closing the previous session first");
            self.finish_session(name, old, now).await;
        }

        info!(name, "session started");

        match self.db.create_open_session(name.to_string(), now).await {
            Ok(id) => {
                // Attach the handle only if this is still the same session
                self.sessions
                    .update_async(&key, |_, entry| {
                        if entry.is_online && entry.login_time == now {
                            entry.db_id = Some(id);
                        }
                    })
                    .await;
            }
            Err(e) => {
                warn!(name, error = %e, "failed to persist open session, continuing in memory");
            }
        }
    }

    async fn apply_leave(&self, name: &str, now: i64) {
        let Ok(key) = PlayerName::try_from(name) else {
            return;
        };

        let closed = self
            .sessions
            .update_async(&key, |_, entry| {
                if !entry.is_online {
                    return None;
                }
                let snapshot = *entry;
                entry.is_online = false;
                entry.db_id = None;
                Some(snapshot)
            })
            .await;

        // No entry, or already offline: nothing to do
        let Some(Some(old)) = closed else {
            return;
        };

        info!(name, "session ended");
        self.finish_session(name, old, now).await;
    }

    /// Apply the persistence policy to a session that just ended: persist
    /// it when long enough, otherwise make sure no trace remains.
    async fn finish_session(&self, name: &str, old: SessionEntry, now: i64) {
        let duration = now - old.login_time;

        if duration >= self.min_session_secs {
            if let Some(id) = old.db_id {
                match self.db.close_session(id, now).await {
                    Ok(()) => {
                        debug!(name, duration, "session persisted");
                        // Last-seen data changed: rebuild the presence payload
                        self.cache.refresh().await;
                    }
                    Err(e) => warn!(name, error = %e, "failed to close persisted session"),
                }
            }
        } else {
            debug!(name, duration, "session below minimum duration, discarding");
            if let Some(id) = old.db_id {
                if let Err(e) = self.db.delete_session(id).await {
                    warn!(name, error = %e, "failed to delete short session");
                }
            }
        }
    }

    /// Seconds the player has been online, 0 when offline or unknown.
    pub async fn session_duration_of(&self, name: &str, now: i64) -> i64 {
        let Ok(key) = PlayerName::try_from(name) else {
            return 0;
        };
        self.sessions
            .read_async(&key, |_, entry| {
                if entry.is_online {
                    now - entry.login_time
                } else {
                    0
                }
            })
            .await
            .unwrap_or(0)
    }

    async fn login_time_of(&self, name: &str) -> Option<i64> {
        let key = PlayerName::try_from(name).ok()?;
        self.sessions
            .read_async(&key, |_, entry| entry.is_online.then_some(entry.login_time))
            .await
            .flatten()
    }

    /// Map roster names to their live session info.
    pub async fn enrich(&self, names: &[String], now: i64) -> Vec<PlayerWithSession> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let session_duration = self.session_duration_of(name, now).await;
            out.push(PlayerWithSession {
                name: name.clone(),
                session_duration,
                session_duration_formatted: format_duration(session_duration),
                login_time: self.login_time_of(name).await,
            });
        }
        out
    }

    /// Snapshot of all currently-active entries.
    pub async fn active_sessions(&self, now: i64) -> Vec<ActiveSession> {
        let mut out = Vec::new();
        self.sessions
            .iter_async(|key, entry| {
                if entry.is_online {
                    let session_duration = now - entry.login_time;
                    out.push(ActiveSession {
                        player_name: key.to_string(),
                        login_time: entry.login_time,
                        session_duration,
                        session_duration_formatted: format_duration(session_duration),
                    });
                }
                true
            })
            .await;
        out
    }

    /// Drop offline entries older than the retention window to bound
    /// memory. Returns the number removed.
    pub async fn cleanup_old_sessions(&self, now: i64) -> usize {
        let mut stale: Vec<PlayerName> = Vec::new();
        self.sessions
            .iter_async(|key, entry| {
                if !entry.is_online && now - entry.login_time > self.retention_secs {
                    stale.push(*key);
                }
                true
            })
            .await;

        let mut removed = 0;
        for key in stale {
            // Re-check under the entry lock: the player may have rejoined
            if self
                .sessions
                .remove_if_async(&key, |entry| {
                    !entry.is_online && now - entry.login_time > self.retention_secs
                })
                .await
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "cleaned up old ledger entries");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;

    const T0: i64 = 1700000000;

    async fn setup() -> (Database, SessionLedger) {
        let db = Database::open_in_memory().await.unwrap();
        let cache = Arc::new(SkillsCache::new(
            db.clone(),
            Gateway::new(),
            Duration::from_secs(60),
        ));
        let ledger = SessionLedger::new(
            db.clone(),
            cache,
            Duration::from_secs(150),
            Duration::from_secs(86400),
        );
        (db, ledger)
    }

    #[tokio::test]
    async fn test_at_most_one_active_session_per_player() {
        let (db, ledger) = setup().await;

        // Rapid join/join/leave/join flapping
        ledger.join("Alice", T0).await;
        ledger.join("Alice", T0 + 10).await;
        ledger.leave("Alice", T0 + 20).await;
        ledger.join("Alice", T0 + 30).await;

        let active = ledger.active_sessions(T0 + 40).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].player_name, "Alice");
        assert_eq!(active[0].login_time, T0 + 30);

        // The store holds exactly the one surviving open row
        let open = db.active_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].session_start, T0 + 30);
    }

    #[tokio::test]
    async fn test_short_session_never_persisted() {
        let (db, ledger) = setup().await;

        ledger.join("Alice", T0).await;
        ledger.leave("Alice", T0 + 60).await;

        assert!(ledger.active_sessions(T0 + 61).await.is_empty());
        let page = db
            .player_sessions("Alice".to_string(), 1, 50)
            .await
            .unwrap();
        assert!(page.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_long_session_persisted_with_bounds() {
        let (db, ledger) = setup().await;

        ledger.join("Alice", T0).await;
        ledger.leave("Alice", T0 + 200).await;

        let page = db
            .player_sessions("Alice".to_string(), 1, 50)
            .await
            .unwrap();
        assert_eq!(page.sessions.len(), 1);
        let session = &page.sessions[0];
        assert_eq!(session.session_start, T0);
        assert_eq!(session.session_end, Some(T0 + 200));
        assert_eq!(session.duration, Some(200));
        assert!(!session.is_active);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (db, ledger) = setup().await;

        // Leave with no session at all: no-op
        ledger.leave("Ghost", T0).await;
        assert!(ledger.active_sessions(T0).await.is_empty());

        ledger.join("Alice", T0).await;
        ledger.leave("Alice", T0 + 200).await;
        ledger.leave("Alice", T0 + 300).await;

        let page = db
            .player_sessions("Alice".to_string(), 1, 50)
            .await
            .unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session_end, Some(T0 + 200));
    }

    #[tokio::test]
    async fn test_duplicate_join_discards_short_predecessor() {
        let (db, ledger) = setup().await;

        ledger.join("Alice", T0).await;
        ledger.join("Alice", T0 + 60).await;

        // The 60s predecessor was deleted, not closed
        let page = db
            .player_sessions("Alice".to_string(), 1, 50)
            .await
            .unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert!(page.sessions[0].is_active);
        assert_eq!(page.sessions[0].session_start, T0 + 60);
    }

    #[tokio::test]
    async fn test_duplicate_join_persists_long_predecessor() {
        let (db, ledger) = setup().await;

        ledger.join("Alice", T0).await;
        ledger.join("Alice", T0 + 500).await;

        let page = db
            .player_sessions("Alice".to_string(), 1, 50)
            .await
            .unwrap();
        assert_eq!(page.sessions.len(), 2);
        let closed: Vec<_> = page.sessions.iter().filter(|s| !s.is_active).collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].session_end, Some(T0 + 500));
    }

    #[tokio::test]
    async fn test_reconcile_detects_joins_and_leaves() {
        let (_db, ledger) = setup().await;

        let roster = vec!["Alice".to_string(), "Bob".to_string()];
        let (joined, left) = ledger.reconcile_with(&roster, T0).await;
        assert_eq!(joined, vec!["Alice", "Bob"]);
        assert!(left.is_empty());

        // Idempotent on a stable roster
        let (joined, left) = ledger.reconcile_with(&roster, T0 + 10).await;
        assert!(joined.is_empty());
        assert!(left.is_empty());
        let active = ledger.active_sessions(T0 + 10).await;
        assert_eq!(active.len(), 2);

        let (joined, left) = ledger
            .reconcile_with(&["Alice".to_string()], T0 + 20)
            .await;
        assert!(joined.is_empty());
        assert_eq!(left, vec!["Bob"]);
        assert_eq!(ledger.active_sessions(T0 + 20).await.len(), 1);
    }

    #[tokio::test]
    async fn test_log_event_and_poll_stay_consistent() {
        let (_db, ledger) = setup().await;

        // Join seen in the log first; the next poll reports the same name
        ledger.join("Alice", T0).await;
        let (joined, left) = ledger
            .reconcile_with(&["Alice".to_string()], T0 + 5)
            .await;
        assert!(joined.is_empty());
        assert!(left.is_empty());

        // The original session survived untouched
        let active = ledger.active_sessions(T0 + 5).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].login_time, T0);

        // Leave seen in the log; the next poll reports an empty roster
        ledger.leave("Alice", T0 + 300).await;
        let (joined, left) = ledger.reconcile_with(&[], T0 + 310).await;
        assert!(joined.is_empty());
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_and_duration() {
        let (_db, ledger) = setup().await;

        ledger.join("Alice", T0).await;

        assert_eq!(ledger.session_duration_of("Alice", T0 + 3900).await, 3900);
        assert_eq!(ledger.session_duration_of("Bob", T0 + 3900).await, 0);

        let names = vec!["Alice".to_string(), "Bob".to_string()];
        let enriched = ledger.enrich(&names, T0 + 3900).await;
        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[0].session_duration, 3900);
        assert_eq!(enriched[0].session_duration_formatted, "1h 5m");
        assert_eq!(enriched[0].login_time, Some(T0));
        assert_eq!(enriched[1].session_duration, 0);
        assert_eq!(enriched[1].session_duration_formatted, "0m");
        assert_eq!(enriched[1].login_time, None);
    }

    #[tokio::test]
    async fn test_cleanup_old_sessions() {
        let (_db, ledger) = setup().await;

        ledger.join("Old", T0).await;
        ledger.leave("Old", T0 + 300).await;
        ledger.join("Fresh", T0 + 90000).await;

        // "Old" went offline more than 24h before now; "Fresh" is active
        let removed = ledger.cleanup_old_sessions(T0 + 90000).await;
        assert_eq!(removed, 1);
        let active = ledger.active_sessions(T0 + 90000).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].player_name, "Fresh");
    }

    #[tokio::test]
    async fn test_overlong_player_name_ignored() {
        let (_db, ledger) = setup().await;

        ledger.join("ThisNameIsWayTooLongForMinecraft", T0).await;
        assert!(ledger.active_sessions(T0).await.is_empty());
    }
}
