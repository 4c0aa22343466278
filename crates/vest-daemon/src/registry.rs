//! Client registry.
//!
//! Each accepted socket gets an opaque [`ClientId`] and a bounded outbound
//! queue drained by its own writer task. Frames are serialized once and
//! shared as `Arc<str>`, so a broadcast is one `try_send` per client and a
//! stalled socket can never hold up the others.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Line queued for one client's writer task.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a client told us about itself, plus where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Client {
    info: ClientInfo,
    seq: u64,
    sender: mpsc::Sender<Outbound>,
}

/// Result of queueing one line for one client.
#[derive(Debug, Clone)]
pub enum Delivery {
    Queued,
    /// The queue is full; the client has been removed.
    Evicted(ClientInfo),
    /// Unknown client, or its writer already went away.
    Dropped,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
    next_seq: u64,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: ClientId,
        sender: mpsc::Sender<Outbound>,
        peer: Option<SocketAddr>,
    ) {
        debug!("Registering client {id} ({peer:?})");
        let seq = self.next_seq;
        self.next_seq += 1;

        let client = Client {
            info: ClientInfo {
                client_id: id.clone(),
                name: None,
                version: None,
                peer,
                connected_at: Utc::now(),
            },
            seq,
            sender,
        };
        self.clients.insert(id, client);
    }

    /// Remove a client. Dropping its sender lets the writer task drain what is
    /// already queued and then close the socket.
    pub fn unregister(&mut self, id: &ClientId) -> Option<ClientInfo> {
        let client = self.clients.remove(id)?;
        debug!("Unregistered client {id}");
        Some(client.info)
    }

    /// Record client-supplied metadata. Returns false for unknown clients.
    pub fn identify(&mut self, id: &ClientId, name: String, version: Option<String>) -> bool {
        let Some(client) = self.clients.get_mut(id) else {
            return false;
        };
        debug!("Client {id} identified as {name}");
        client.info.name = Some(name);
        client.info.version = version;
        true
    }

    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<&ClientInfo> {
        self.clients.get(id).map(|c| &c.info)
    }

    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients in connection order.
    #[must_use]
    pub fn list(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<&Client> = self.clients.values().collect();
        clients.sort_by_key(|c| c.seq);
        clients.into_iter().map(|c| c.info.clone()).collect()
    }

    /// Queue `line` for one client.
    pub fn send(&mut self, id: &ClientId, line: Outbound) -> Delivery {
        let Some(client) = self.clients.get(id) else {
            return Delivery::Dropped;
        };
        match client.sender.try_send(line) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for client {id}, evicting");
                match self.clients.remove(id) {
                    Some(client) => Delivery::Evicted(client.info),
                    None => Delivery::Dropped,
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Client {id} writer is gone, dropping");
                self.clients.remove(id);
                Delivery::Dropped
            }
        }
    }

    /// Queue `line` for every client. Returns the clients evicted for a full
    /// queue; clients whose writer already closed are dropped silently.
    pub fn broadcast(&mut self, line: &Outbound) -> Vec<ClientInfo> {
        let mut evicted = Vec::new();
        let mut closed = Vec::new();

        for (id, client) in &self.clients {
            match client.sender.try_send(Arc::clone(line)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue full for client {id}, evicting");
                    evicted.push(id.clone());
                }
                Err(TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }

        for id in &closed {
            debug!("Client {id} writer is gone, dropping");
            self.clients.remove(id);
        }
        evicted
            .iter()
            .filter_map(|id| self.clients.remove(id).map(|c| c.info))
            .collect()
    }
}
