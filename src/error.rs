use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Transport and protocol failures are normally absorbed into the facade's
/// `connection_error` string; they only appear here when a caller asked for
/// something that cannot proceed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("credential missing or rejected; log in again")]
    AuthExpired,

    #[error("not connected")]
    SendRejected,

    #[error("message is empty")]
    EmptyMessage,
}

/// A frame from the server that could not be understood.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown frame type `{0}`")]
    UnknownType(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential rejected by the server")]
    Unauthorized,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("no credential available")]
    MissingToken,
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::MissingToken)
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        if err.is_auth() {
            Self::AuthExpired
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme `{0}` (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}
