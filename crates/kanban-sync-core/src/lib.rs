pub mod cache;
pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use cache::TtlCache;
pub use config::{CacheSettings, SyncConfig, ViewMode, ViewSettings};
pub use error::SyncError;
pub use result::SyncResult;
pub use traits::Service;
