use thiserror::Error;

/// Everything that can go wrong while handling one inbound message.
///
/// The `Display` text is what the requesting connection receives in its
/// `error` envelope. None of these close the connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("{message}")]
    Persistence {
        message: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{0}")]
    Protocol(String),

    #[error("Poll does not exist.")]
    PollNotFound,

    #[error("Failed to establish voter session.")]
    VoterToken(String),
}

impl SessionError {
    pub fn validation(message: impl Into<String>) -> Self {
        SessionError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        SessionError::StateConflict(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        SessionError::Protocol(message.into())
    }

    /// Wrap a store error with the message shown to the client.
    pub fn persistence(message: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| SessionError::Persistence { message, source }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Validation(_) => "validation",
            SessionError::StateConflict(_) => "state_conflict",
            SessionError::Persistence { .. } => "persistence",
            SessionError::Protocol(_) => "protocol",
            SessionError::PollNotFound => "not_found",
            SessionError::VoterToken(_) => "voter_token",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}
