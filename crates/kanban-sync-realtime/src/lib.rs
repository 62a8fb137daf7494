pub mod auth;
pub mod channel;
pub mod feed;
pub mod import;
pub mod memory;
pub mod session;
pub mod transport;

pub use auth::{AuthPipeline, CredentialRefresher};
pub use channel::{ChannelManager, ConnectionState, Subscription, Topic};
pub use feed::{BoardFeed, FeedItem};
pub use import::{
    ImportJobApi, ImportJobPoller, ImportJobStart, ImportJobState, ImportJobStatus, ImportMode,
    ImportRowError, ImportTracker, TrackingMode,
};
pub use memory::InMemoryBroker;
pub use session::{AvatarSource, BoardSession, SessionChange, SessionServices};
pub use transport::{BrokerConnection, BrokerFrame, BrokerTransport, ConnectOptions};
