//! Roster polling and player-update broadcasting shared by the poller
//! and the log tailer.

use crate::ledger::PlayerWithSession;
use crate::rcon::Roster;
use crate::{AppState, helpers};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// The players:update payload observers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersPayload {
    pub total: u32,
    pub players: Vec<String>,
    pub players_with_sessions: Vec<PlayerWithSession>,
}

pub(crate) async fn players_payload(state: &AppState, roster: &Roster) -> PlayersPayload {
    let players_with_sessions = state.ledger.enrich(&roster.names, helpers::now()).await;
    PlayersPayload {
        total: roster.total,
        players: roster.names.clone(),
        players_with_sessions,
    }
}

/// Fetch a fresh roster and broadcast it if anything changed.
pub(crate) async fn refresh_and_broadcast_players(state: &Arc<AppState>) {
    let roster = state.rcon.list_online_players().await;
    broadcast_roster(state, roster).await;
}

/// Broadcast a roster, deduplicating against the last push so observers
/// don't see identical updates back to back.
pub(crate) async fn broadcast_roster(state: &Arc<AppState>, roster: Roster) {
    let mut last = state.last_players.lock().await;
    if last.as_ref() == Some(&roster) {
        return;
    }

    let payload = players_payload(state, &roster).await;
    state.gateway.emit("players:update", &payload);
    debug!(total = roster.total, "broadcast player update");
    *last = Some(roster);
}

/// Poll the roster on a fixed interval while observers are connected,
/// reconciling each snapshot into the session ledger.
pub(crate) async fn run_roster_poller(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let activation = state.gateway.activation();
    let mut ticker = tokio::time::interval(state.config.roster_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !*activation.borrow() {
                    continue;
                }

                let roster = state.rcon.list_online_players().await;
                let now = helpers::now();
                let (joined, left) = state.ledger.reconcile_with(&roster.names, now).await;
                if !joined.is_empty() || !left.is_empty() {
                    debug!(?joined, ?left, "roster reconciliation applied");
                }
                broadcast_roster(&state, roster).await;
            }
        }
    }
}

/// Hourly garbage collection of long-offline ledger entries.
pub(crate) async fn run_ledger_gc(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                state.ledger.cleanup_old_sessions(helpers::now()).await;
            }
        }
    }
}
