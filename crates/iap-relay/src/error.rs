use iap_proto::ProtoError;
use thiserror::Error;

/// Fatal relay errors
///
/// Orderly closure of either endpoint, including a failed transport read or
/// write, is not an error; see [`ShutdownReason`](crate::ShutdownReason).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Protocol error: {0}")]
    Proto(ProtoError),

    #[error("Unknown tag: {0}")]
    UnknownTag(u16),

    #[error("Peer ack moved backwards: previous {previous}, received {received}")]
    ProtocolRegression { previous: u64, received: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ProtoError> for RelayError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::UnknownTag(tag) => RelayError::UnknownTag(tag),
            other => RelayError::Proto(other),
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
