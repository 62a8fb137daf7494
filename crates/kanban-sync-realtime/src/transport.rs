//! Broker transport seam.
//!
//! A transport opens connections to a publish/subscribe broker; a connection
//! carries topic subscriptions and yields inbound frames. The channel manager
//! owns the single connection per session and is the only caller.

use std::time::Duration;

use async_trait::async_trait;
use kanban_sync_core::SyncResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub url: String,
    /// Interval at which the connection is probed for liveness.
    pub heartbeat: Duration,
    /// Bearer credential attached to the connect handshake.
    pub bearer: Option<String>,
}

/// One inbound message. `destination` is the wire form, e.g. `/topic/board/1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerFrame {
    pub destination: String,
    pub body: String,
}

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> SyncResult<Box<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send {
    async fn subscribe(&mut self, destination: &str) -> SyncResult<()>;

    async fn unsubscribe(&mut self, destination: &str) -> SyncResult<()>;

    /// Next inbound frame. `None` once the connection has dropped.
    async fn next_frame(&mut self) -> Option<BrokerFrame>;

    /// Liveness probe. An error means the connection is dead.
    async fn heartbeat(&mut self) -> SyncResult<()>;
}
