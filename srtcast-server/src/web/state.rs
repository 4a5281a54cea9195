//! Web server shared state: connected control clients and their outbound
//! queues.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Outbound queue capacity per client. A client that cannot drain this many
/// messages is considered stalled and loses further broadcasts until it
/// catches up.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Information about one connected control client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Server-assigned client id.
    pub id: String,
    /// Display name from the connection query, or a generated default.
    pub name: String,
    /// Remote peer address.
    pub remote_addr: String,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
    /// When the last request arrived.
    pub last_message_at: DateTime<Utc>,
    /// Requests handled on this connection.
    pub message_count: u64,
}

struct ClientHandle {
    info: ClientInfo,
    tx: mpsc::Sender<String>,
}

/// Registry of connected control clients. Each client owns a bounded
/// outbound queue; sends never block, and messages to a full queue are
/// dropped so one slow consumer cannot stall the rest of the fleet.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientHandle>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a client and hand back the receiving end of its outbound
    /// queue for the connection's write loop.
    pub async fn register(
        &self,
        id: &str,
        name: &str,
        remote_addr: SocketAddr,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let now = Utc::now();
        let handle = ClientHandle {
            info: ClientInfo {
                id: id.to_string(),
                name: name.to_string(),
                remote_addr: remote_addr.to_string(),
                connected_at: now,
                last_message_at: now,
                message_count: 0,
            },
            tx,
        };
        self.clients.write().await.insert(id.to_string(), handle);
        rx
    }

    /// Remove a client. Safe to call after the connection is gone.
    pub async fn unregister(&self, id: &str) {
        self.clients.write().await.remove(id);
    }

    /// Record an inbound request from a client.
    pub async fn touch(&self, id: &str) {
        if let Some(handle) = self.clients.write().await.get_mut(id) {
            handle.info.last_message_at = Utc::now();
            handle.info.message_count += 1;
        }
    }

    /// Queue a message for one client. Returns false if the client is gone
    /// or its queue is full; the message is dropped either way.
    pub async fn send_to(&self, id: &str, message: String) -> bool {
        let clients = self.clients.read().await;
        match clients.get(id) {
            Some(handle) => match handle.tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Dropping message for slow client {}", id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Client {} queue closed", id);
                    false
                }
            },
            None => false,
        }
    }

    /// Queue a message for every connected client. Slow clients lose the
    /// message rather than delaying the others.
    pub async fn broadcast(&self, message: &str) {
        let clients = self.clients.read().await;
        for (id, handle) in clients.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) =
                handle.tx.try_send(message.to_string())
            {
                warn!("Dropping broadcast for slow client {}", id);
            }
        }
    }

    /// Snapshot of all connected clients.
    pub async fn list(&self) -> Vec<ClientInfo> {
        self.clients
            .read()
            .await
            .values()
            .map(|h| h.info.clone())
            .collect()
    }

    /// Number of connected clients.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Shared state for the web server.
pub struct WebState {
    /// Control engine.
    pub engine: Arc<crate::engine::Engine>,
    /// Connected control clients.
    pub clients: Arc<ClientRegistry>,
}
