//! LNet wire protocol crate.
//!
//! Wire-compatible implementation of the Lustre LNet acceptor handshake and
//! the SOCKLND (TCP) connection layer: endianness handling, network
//! identifiers (NIDs), the two-stage acceptor + HELLO negotiation, KSOCK
//! framing, and the typed LNet message codec.
//!
//! This crate owns no sockets. Everything operates on injected async byte
//! streams so the connection source (and the tests) can supply any
//! `AsyncRead + AsyncWrite` transport.

mod constants;
mod endian;
mod error;
mod handshake;
mod message;
mod nid;
mod ping;

pub use constants::*;
pub use endian::{swab16, swab32, swab64, Endian};
pub use error::{Result, WireError};
pub use handshake::{negotiate, ConnContext, HelloMsg, HelloNids};
pub use message::{
    AckCommand, GetCommand, HelloCommand, KsockHeader, LNetCommand, LNetMessage, PutCommand,
    ReplyCommand, WireHandle,
};
pub use nid::{Nid, NidHeader, RawExtendedNid, RawNid64, DEFAULT_PORT};
pub use ping::*;
