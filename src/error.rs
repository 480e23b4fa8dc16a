// Crate-wide error type.
//
// One variant per failure kind, plus an `Io` passthrough for transport
// plumbing.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer too small: {0}")]
    BufferTooSmall(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("count out of range: {0}")]
    CountOutOfRange(String),

    #[error("address invalid: {0}")]
    AddressInvalid(String),

    #[error("transport send failed: {0}")]
    TransportSend(String),

    #[error("transport receive failed: {0}")]
    TransportReceive(String),

    #[error("decrypt failed")]
    DecryptFailed,

    #[error("no ping target available")]
    NoTargetAvailable,

    #[error("protocol period exceeded")]
    ProtocolPeriodExceeded,

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, SwimError>;
