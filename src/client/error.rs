use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Message cannot be empty.")]
    EmptyMessage,

    #[error("No conversation selected.")]
    NoConversationSelected,

    #[error("No conversation named {0:?}.")]
    UnknownConversation(String),

    /// A reply for this conversation is still on its way.
    #[error("Still waiting for a reply in {0:?}.")]
    Busy(String),

    #[error("Timed out waiting for a reply.")]
    Timeout,

    #[error("Not logged in.")]
    NotLoggedIn,

    /// The daemon answered with a non-success status.
    #[error("{message} ({status})")]
    Api { status: u16, message: String },

    #[error("Could not reach the server: {0}")]
    Transport(#[from] reqwest::Error),

    /// The local conversation cache could not be read.
    #[error("Conversation cache unavailable: {0:#}")]
    Cache(#[from] anyhow::Error),
}

impl ClientError {
    /// Worth retrying by resending the same message.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout | ClientError::Transport(_) => true,
            ClientError::Api { status, .. } => StatusCode::from_u16(*status)
                .map(|s| s.is_server_error())
                .unwrap_or(false),
            _ => false,
        }
    }
}
