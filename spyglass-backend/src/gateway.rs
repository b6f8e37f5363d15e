//! Broadcast gateway: fans presence/log/performance deltas out to
//! connected WebSocket observers and gates the tailing/polling work on
//! whether anyone is actually watching.

use crate::{AppState, monitor};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Serialize one outbound event frame.
fn frame(event: &str, data: &impl Serialize) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

/// Cheap cloneable handle shared by every component that broadcasts.
#[derive(Clone)]
pub struct Gateway {
    tx: broadcast::Sender<String>,
    observers: Arc<AtomicUsize>,
    activation: Arc<watch::Sender<bool>>,
}

impl Gateway {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        let (activation, _) = watch::channel(false);
        Self {
            tx,
            observers: Arc::new(AtomicUsize::new(0)),
            activation: Arc::new(activation),
        }
    }

    /// Number of currently connected observers.
    pub fn count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    /// Watch channel that is true while at least one observer is
    /// connected; the tailer and poller subscribe to it.
    pub fn activation(&self) -> watch::Receiver<bool> {
        self.activation.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Fire-and-forget broadcast to every connected observer.
    pub fn emit(&self, event: &str, data: &impl Serialize) {
        // Nobody listening is not an error
        let _ = self.tx.send(frame(event, data));
    }

    pub(crate) fn observer_connected(&self) -> usize {
        let count = self.observers.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            let _ = self.activation.send(true);
        }
        count
    }

    pub(crate) fn observer_disconnected(&self) -> usize {
        let count = self.observers.fetch_sub(1, Ordering::SeqCst) - 1;
        if count == 0 {
            let _ = self.activation.send(false);
        }
        count
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let gateway = state.gateway.clone();
    // Subscribe before counting ourselves in so no broadcast is missed
    let mut rx = gateway.subscribe();
    let observers = gateway.observer_connected();
    info!(observers, "observer connected");

    if send_initial_snapshot(&mut socket, &state).await.is_ok() {
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "observer lagging, dropped broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                inbound = socket.recv() => match inbound {
                    // Observers don't send anything we act on
                    Some(Ok(_)) => {}
                    _ => break,
                },
            }
        }
    }

    let observers = gateway.observer_disconnected();
    info!(observers, "observer disconnected");
}

/// Everything a new observer needs for its first paint: the buffered log
/// history, the current presence payload, and a roster fetched fresh
/// (bypassing any cached value).
async fn send_initial_snapshot(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
) -> Result<(), axum::Error> {
    for line in state.log_buffer.snapshot() {
        socket
            .send(Message::Text(frame("server:log", &line).into()))
            .await?;
    }

    let skills = state.skills_cache.get().await;
    socket
        .send(Message::Text(frame("skills:update", &*skills).into()))
        .await?;

    let roster = state.rcon.list_online_players().await;
    let payload = monitor::players_payload(state, &roster).await;
    socket
        .send(Message::Text(frame("players:update", &payload).into()))
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_transitions_gate_activation() {
        let gateway = Gateway::new();
        let activation = gateway.activation();
        assert!(!*activation.borrow());

        // 0 -> 1 activates
        assert_eq!(gateway.observer_connected(), 1);
        assert!(*activation.borrow());

        // 1 -> 2 changes nothing
        assert_eq!(gateway.observer_connected(), 2);
        assert!(*activation.borrow());

        // back down: only the last disconnect deactivates
        assert_eq!(gateway.observer_disconnected(), 1);
        assert!(*activation.borrow());
        assert_eq!(gateway.observer_disconnected(), 0);
        assert!(!*activation.borrow());
    }

    #[test]
    fn test_emit_without_observers_is_silent() {
        let gateway = Gateway::new();
        gateway.emit("server:log", &"a line");
        assert_eq!(gateway.count(), 0);
    }

    #[test]
    fn test_emit_reaches_subscribers() {
        let gateway = Gateway::new();
        let mut rx = gateway.subscribe();

        gateway.emit("server:log", &"hello");
        let text = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "server:log");
        assert_eq!(value["data"], "hello");
    }
}
