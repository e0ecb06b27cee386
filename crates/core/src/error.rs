use thiserror::Error;

/// Failure taxonomy of the presence feed. Clients turn every variant into a
/// state transition; none of these escape a client task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("feed is not configured: {0}")]
    ConfigurationMissing(&'static str),
    #[error("network request failed: {0}")]
    TransientNetwork(String),
    #[error("authorization expired: {0}")]
    AuthExpired(String),
    #[error("malformed frame: {0}")]
    Protocol(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl FeedError {
    /// Terminal for the current session; needs user action to recover.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FeedError::AuthExpired(_))
    }
}
