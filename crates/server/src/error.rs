//! Server error types.

use lnetd_protocol::{CommandType, WireError};
use thiserror::Error;

/// Server result type.
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported KSOCK frame type: 0x{0:02X}")]
    UnsupportedFrameType(u32),

    #[error("handler for {0:?} received a different command body")]
    UnexpectedCommand(CommandType),

    #[error("LNET PING has invalid match bits: 0x{0:016X}")]
    InvalidPingMatchBits(u64),
}
