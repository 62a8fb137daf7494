//! In-process broker used by tests and by the CLI replay command.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use kanban_sync_core::{SyncError, SyncResult};
use tokio::sync::{mpsc, Mutex};

use crate::transport::{BrokerConnection, BrokerFrame, BrokerTransport, ConnectOptions};

#[derive(Debug)]
struct Peer {
    id: u64,
    destinations: HashSet<String>,
    tx: mpsc::UnboundedSender<BrokerFrame>,
}

#[derive(Debug)]
struct Hub {
    online: bool,
    next_peer: u64,
    connect_attempts: usize,
    peers: Vec<Peer>,
}

/// Cloning shares the same broker.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    hub: Arc<Mutex<Hub>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                online: true,
                next_peer: 0,
                connect_attempts: 0,
                peers: Vec::new(),
            })),
        }
    }

    /// Delivers `body` to every connection subscribed to `destination`.
    /// Returns the number of connections reached.
    pub async fn publish(&self, destination: &str, body: impl Into<String>) -> usize {
        let body = body.into();
        let mut hub = self.hub.lock().await;
        hub.peers.retain(|peer| !peer.tx.is_closed());
        let mut delivered = 0;
        for peer in hub.peers.iter().filter(|p| p.destinations.contains(destination)) {
            let frame = BrokerFrame {
                destination: destination.to_string(),
                body: body.clone(),
            };
            if peer.tx.send(frame).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Going offline drops every open connection and refuses new ones.
    pub async fn set_online(&self, online: bool) {
        let mut hub = self.hub.lock().await;
        hub.online = online;
        if !online {
            hub.peers.clear();
        }
    }

    pub async fn connect_attempts(&self) -> usize {
        self.hub.lock().await.connect_attempts
    }

    pub async fn subscriber_count(&self, destination: &str) -> usize {
        let hub = self.hub.lock().await;
        hub.peers
            .iter()
            .filter(|peer| !peer.tx.is_closed() && peer.destinations.contains(destination))
            .count()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn connect(&self, options: &ConnectOptions) -> SyncResult<Box<dyn BrokerConnection>> {
        let mut hub = self.hub.lock().await;
        hub.connect_attempts += 1;
        if !hub.online {
            return Err(SyncError::Network(format!(
                "broker at {} is unreachable",
                options.url
            )));
        }
        let id = hub.next_peer;
        hub.next_peer += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        hub.peers.push(Peer {
            id,
            destinations: HashSet::new(),
            tx,
        });
        Ok(Box::new(InMemoryConnection {
            id,
            hub: self.hub.clone(),
            rx,
        }))
    }
}

struct InMemoryConnection {
    id: u64,
    hub: Arc<Mutex<Hub>>,
    rx: mpsc::UnboundedReceiver<BrokerFrame>,
}

impl InMemoryConnection {
    async fn with_peer<R>(&self, f: impl FnOnce(&mut Peer) -> R) -> SyncResult<R> {
        let mut hub = self.hub.lock().await;
        hub.peers
            .iter_mut()
            .find(|peer| peer.id == self.id)
            .map(f)
            .ok_or(SyncError::ChannelClosed)
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn subscribe(&mut self, destination: &str) -> SyncResult<()> {
        self.with_peer(|peer| {
            peer.destinations.insert(destination.to_string());
        })
        .await
    }

    async fn unsubscribe(&mut self, destination: &str) -> SyncResult<()> {
        self.with_peer(|peer| {
            peer.destinations.remove(destination);
        })
        .await
    }

    async fn next_frame(&mut self) -> Option<BrokerFrame> {
        self.rx.recv().await
    }

    async fn heartbeat(&mut self) -> SyncResult<()> {
        self.with_peer(|_| ()).await
    }
}
