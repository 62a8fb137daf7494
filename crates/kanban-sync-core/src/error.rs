use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session expired")]
    SessionExpired,

    #[error("Realtime channel closed")]
    ChannelClosed,

    #[error("Scope was torn down before the response arrived")]
    TornDown,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Failures after which the affected scope should be rolled back and reloaded.
    pub fn is_recoverable_by_reload(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Conflict(_) | Self::NotFound(_)
        )
    }

    /// Message shown to the user by the call site that started an optimistic mutation.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Could not reach the server. Your change was undone.".to_string(),
            Self::Conflict(_) => {
                "Someone else changed this item. The board was refreshed.".to_string()
            }
            Self::NotFound(what) => format!("{} no longer exists.", what),
            Self::Validation(msg) => msg.clone(),
            Self::InvalidTransition { entity, from, to } => {
                format!("Cannot move {} from {} to {}.", entity, from, to)
            }
            Self::Unauthorized | Self::SessionExpired => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::ChannelClosed | Self::TornDown => "The board was closed.".to_string(),
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                "Something went wrong. Please reload the board.".to_string()
            }
        }
    }
}
