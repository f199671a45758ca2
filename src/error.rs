use thiserror::Error;

pub use dmcore::protocol::ProtocolError;
pub use dmcore::session::StaleResult;
pub use dmcore::socketio::CodecError;

/// A request/response call to the messaging service failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not build request: {0}")]
    Request(#[source] anyhow::Error),
    #[error("network error: {0}")]
    Network(#[source] anyhow::Error),
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// HTTP status for rejections by the service, `None` for local failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    Disconnected,
    #[error("server rejected the connection: {0}")]
    Rejected(String),
    #[error("handshake did not complete in time")]
    HandshakeTimeout,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid service URL '{0}': expected http:// or https://")]
    InvalidBaseUrl(String),
    #[error("invalid page size '{0}': expected 1..=100")]
    InvalidPageSize(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no conversation is selected")]
    NoActiveConversation,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
