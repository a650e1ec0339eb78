//! WebSocket hub: connection registry, subscriptions, fan-out.
//!
//! The hub is transport-agnostic: each client is an mpsc channel of
//! [`Outbound`] frames. The server's WebSocket task drains the channel
//! onto the socket and reports inbound frames back via
//! [`WebSocketHub::handle_message`] / [`WebSocketHub::touch`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::monitor::FleetView;
use crate::protocol::{ClientMessage, ServerMessage};

/// Outbound channel capacity per client.
const CLIENT_CHANNEL_CAPACITY: usize = 32;
/// Per-send ceiling before a consumer counts as too slow.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);
/// Idle span after which a client is pinged, and the reply window.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Ceiling on fleet lookups triggered by client requests.
const FLEET_LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);

/// A frame queued for one client.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Protocol-level ping; the transport sends a WebSocket ping frame.
    Ping,
    /// A JSON protocol message.
    Message(ServerMessage),
}

struct ClientEntry {
    sender: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    awaiting_pong: bool,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<String, ClientEntry>,
    printer_subscriptions: HashMap<String, HashSet<String>>,
    printer_seq: HashMap<String, u64>,
}

impl HubState {
    fn drop_client(&mut self, client_id: &str) -> bool {
        let Some(entry) = self.clients.remove(client_id) else {
            return false;
        };
        for printer_id in entry.subscriptions {
            if let Some(subscribers) = self.printer_subscriptions.get_mut(&printer_id) {
                subscribers.remove(client_id);
                if subscribers.is_empty() {
                    self.printer_subscriptions.remove(&printer_id);
                }
            }
        }
        true
    }

    fn subscribe(&mut self, client_id: &str, printer_id: &str) {
        if let Some(entry) = self.clients.get_mut(client_id) {
            entry.subscriptions.insert(printer_id.to_string());
            self.printer_subscriptions
                .entry(printer_id.to_string())
                .or_default()
                .insert(client_id.to_string());
        }
    }

    fn unsubscribe(&mut self, client_id: &str, printer_id: &str) {
        if let Some(entry) = self.clients.get_mut(client_id) {
            entry.subscriptions.remove(printer_id);
        }
        if let Some(subscribers) = self.printer_subscriptions.get_mut(printer_id) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                self.printer_subscriptions.remove(printer_id);
            }
        }
    }
}

/// The hub. One instance per process, shared by the server's WebSocket
/// tasks and the monitor.
pub struct WebSocketHub {
    state: Mutex<HubState>,
    fleet: Arc<dyn FleetView>,
}

impl WebSocketHub {
    pub fn new(fleet: Arc<dyn FleetView>) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            fleet,
        }
    }

    /// Accept a client: allocate an id, register the outbound channel,
    /// and queue the `connection_established` greeting.
    pub async fn connect(&self) -> (String, mpsc::Receiver<Outbound>) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let now = Utc::now();

        let greeting = Outbound::Message(ServerMessage::ConnectionEstablished {
            client_id: client_id.clone(),
            timestamp: now.to_rfc3339(),
        });
        let _ = tx.send(greeting).await;

        let mut state = self.state.lock().await;
        state.clients.insert(
            client_id.clone(),
            ClientEntry {
                sender: tx,
                connected_at: now,
                last_activity: now,
                awaiting_pong: false,
                subscriptions: HashSet::new(),
            },
        );
        info!(client_id = %client_id, clients = state.clients.len(), "client connected");
        (client_id, rx)
    }

    /// Remove a client from every map.
    pub async fn disconnect(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        if state.drop_client(client_id) {
            info!(client_id, clients = state.clients.len(), "client disconnected");
        }
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    /// Record transport-level activity (any inbound frame, including
    /// pong frames): resets the liveness window.
    pub async fn touch(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.clients.get_mut(client_id) {
            entry.last_activity = Utc::now();
            entry.awaiting_pong = false;
        }
    }

    /// Handle one inbound protocol message; replies land on the
    /// client's channel.
    pub async fn handle_message(&self, client_id: &str, message: ClientMessage) {
        self.touch(client_id).await;
        match message {
            ClientMessage::SubscribePrinter { printer_id } => {
                let mut state = self.state.lock().await;
                state.subscribe(client_id, &printer_id);
                Self::reply(
                    &mut state,
                    client_id,
                    ServerMessage::SubscriptionConfirmed { printer_id },
                );
            }
            ClientMessage::UnsubscribePrinter { printer_id } => {
                let mut state = self.state.lock().await;
                state.unsubscribe(client_id, &printer_id);
                Self::reply(
                    &mut state,
                    client_id,
                    ServerMessage::UnsubscriptionConfirmed { printer_id },
                );
            }
            ClientMessage::SubscribeAll => {
                let printer_ids: Vec<String> = match tokio::time::timeout(
                    FLEET_LOOKUP_TIMEOUT,
                    self.fleet.list(),
                )
                .await
                {
                    Ok(printers) => printers.into_iter().map(|p| p.id).collect(),
                    Err(_) => {
                        warn!(client_id, "fleet lookup for subscribe_all timed out");
                        let mut state = self.state.lock().await;
                        Self::reply(
                            &mut state,
                            client_id,
                            ServerMessage::Error {
                                message: "fleet lookup timed out".to_string(),
                            },
                        );
                        return;
                    }
                };
                let mut state = self.state.lock().await;
                for printer_id in &printer_ids {
                    state.subscribe(client_id, printer_id);
                }
                Self::reply(
                    &mut state,
                    client_id,
                    ServerMessage::SubscriptionAllConfirmed { printer_ids },
                );
            }
            ClientMessage::Ping => {
                let mut state = self.state.lock().await;
                Self::reply(&mut state, client_id, ServerMessage::Pong);
            }
            ClientMessage::GetInitialData => {
                let printers =
                    match tokio::time::timeout(FLEET_LOOKUP_TIMEOUT, self.fleet.list()).await {
                        Ok(printers) => printers,
                        Err(_) => Vec::new(),
                    };
                let mut state = self.state.lock().await;
                Self::reply(&mut state, client_id, ServerMessage::InitialData { printers });
            }
            ClientMessage::GetStatus => {
                let mut state = self.state.lock().await;
                let connected_clients = state.clients.len();
                let subscriptions = state
                    .clients
                    .get(client_id)
                    .map(|e| {
                        let mut subs: Vec<String> =
                            e.subscriptions.iter().cloned().collect();
                        subs.sort();
                        subs
                    })
                    .unwrap_or_default();
                Self::reply(
                    &mut state,
                    client_id,
                    ServerMessage::StatusResponse {
                        connected_clients,
                        subscriptions,
                    },
                );
            }
            ClientMessage::Unknown => {
                let mut state = self.state.lock().await;
                Self::reply(
                    &mut state,
                    client_id,
                    ServerMessage::Error {
                        message: "unrecognized message type".to_string(),
                    },
                );
            }
        }
    }

    /// Best-effort reply on the client's own channel.
    fn reply(state: &HubState, client_id: &str, message: ServerMessage) {
        if let Some(entry) = state.clients.get(client_id) {
            if entry.sender.try_send(Outbound::Message(message)).is_err() {
                debug!(client_id, "reply dropped: client channel full or closed");
            }
        }
    }

    /// Fan a printer update out to its subscribers, in subscription
    /// order per printer. Slow or closed consumers are dropped.
    pub async fn broadcast_printer_data(&self, printer_id: &str, data: serde_json::Value) {
        let (seq, targets) = {
            let mut state = self.state.lock().await;
            let seq = state
                .printer_seq
                .entry(printer_id.to_string())
                .and_modify(|s| *s += 1)
                .or_insert(1);
            let seq = *seq;
            let Some(subscribers) = state.printer_subscriptions.get(printer_id) else {
                return;
            };
            let targets: Vec<(String, mpsc::Sender<Outbound>)> = subscribers
                .iter()
                .filter_map(|id| {
                    state
                        .clients
                        .get(id)
                        .map(|entry| (id.clone(), entry.sender.clone()))
                })
                .collect();
            (seq, targets)
        };

        let message = ServerMessage::PrinterUpdate {
            printer_id: printer_id.to_string(),
            seq,
            timestamp: Utc::now().to_rfc3339(),
            data,
        };

        let mut dead = Vec::new();
        for (client_id, sender) in targets {
            let send = sender.send_timeout(Outbound::Message(message.clone()), SEND_TIMEOUT);
            if send.await.is_err() {
                warn!(client_id = %client_id, printer_id, "dropping slow or closed subscriber");
                dead.push(client_id);
            }
        }
        if !dead.is_empty() {
            let mut state = self.state.lock().await;
            for client_id in dead {
                state.drop_client(&client_id);
            }
        }
    }

    /// Liveness sweep: ping idle clients, drop those that missed the
    /// previous window. Runs every 30 s until cancelled.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("hub sweeper stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        let now = Utc::now();
        let idle_cutoff = chrono::Duration::seconds(PING_INTERVAL.as_secs() as i64);

        let mut state = self.state.lock().await;
        let mut dead = Vec::new();
        for (client_id, entry) in state.clients.iter_mut() {
            let idle = now - entry.last_activity;
            if entry.awaiting_pong && idle >= idle_cutoff {
                dead.push(client_id.clone());
            } else if idle >= idle_cutoff {
                entry.awaiting_pong = true;
                if entry.sender.try_send(Outbound::Ping).is_err() {
                    dead.push(client_id.clone());
                }
            }
        }
        for client_id in dead {
            warn!(client_id = %client_id, "dropping unresponsive client");
            state.drop_client(&client_id);
        }
    }

    /// Graceful shutdown: clear every map. Dropping the senders ends
    /// each client's receiver, which closes the socket with a close
    /// frame on the transport side.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let clients = state.clients.len();
        state.clients.clear();
        state.printer_subscriptions.clear();
        state.printer_seq.clear();
        info!(clients, "hub shut down");
    }

    /// Seconds since a client connected; None for unknown clients.
    pub async fn connected_for(&self, client_id: &str) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .clients
            .get(client_id)
            .map(|e| (Utc::now() - e.connected_at).num_seconds())
    }
}
