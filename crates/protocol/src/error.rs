//! Wire protocol error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("unexpected acceptor magic: 0x{0:08X}")]
    BadAcceptorMagic(u32),

    #[error("generic LND protocol not yet supported at the acceptor stage")]
    GenericNotSupported,

    #[error("unsupported acceptor protocol version: {0}")]
    UnsupportedAcceptorVersion(u32),

    #[error("unexpected protocol magic: 0x{0:08X}")]
    BadProtocolMagic(u32),

    #[error("unsupported SOCKLND protocol version: {0}")]
    UnsupportedProtocolVersion(u32),

    #[error("variable IP lists are unsupported: n_ips = {0}")]
    IpListUnsupported(u32),

    #[error("NID size {0} (address + port form) not yet supported")]
    NidSizeNotYetSupported(u8),

    #[error("unsupported NID size: {0}")]
    UnsupportedNidSize(u8),

    #[error("invalid NID format: {0}")]
    InvalidNidFormat(String),

    #[error("unsupported network type: {0}")]
    UnknownNetworkLabel(String),

    #[error("invalid address in NID: {0}")]
    InvalidAddress(String),

    #[error("unsupported LNET message type: {0}")]
    UnknownMessageType(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
