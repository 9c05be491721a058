//! Protocol constants from the Lustre headers (lnet-idl.h, socklnd.h,
//! nidstr.h, lnet-types.h).

use std::fmt;

use crate::error::WireError;

/// All protocols use this to start negotiation.
pub const PROTO_MAGIC_ACCEPTOR: u32 = 0xACCE_7100;
/// [`PROTO_MAGIC_ACCEPTOR`] seen through the opposite byte order; its
/// presence triggers a byte-order flip for the connection.
pub const PROTO_MAGIC_ACCEPTOR_REV: u32 = 0x0071_CEAC;
/// Unified LND protocol magic.
pub const PROTO_MAGIC_GENERIC: u32 = 0x4572_6963;
/// SOCKLND-specific magic.
pub const PROTO_MAGIC_TCP: u32 = 0xEEBC_0DED;

/// Acceptor protocol versions.
pub const ACCEPTOR_PROTO_V1: u32 = 1;
pub const ACCEPTOR_PROTO_V2: u32 = 2;

/// SOCKLND HELLO protocol versions.
pub const KSOCK_PROTO_V2: u32 = 2;
pub const KSOCK_PROTO_V3: u32 = 3;
pub const KSOCK_PROTO_V4: u32 = 4;

/// KSOCK frame types (outer framing inside a negotiated connection).
pub const KSOCK_MSG_NOOP: u32 = 0xC0;
pub const KSOCK_MSG_LNET: u32 = 0xC1;

/// SOCKLND connection types carried in the HELLO tail.
pub const SOCKLND_CONN_BULK_IN: u32 = 2;
pub const SOCKLND_CONN_CONTROL: u32 = 3;

/// The PID Lustre kernel peers present. Yes, that is the actual value.
pub const PID_LUSTRE: u32 = 12345;
/// Bit flag marking userland processes.
pub const PID_USERLAND: u32 = 0x8000_0000;
/// Reserved PID bits.
pub const PID_RESERVED: u32 = 0xF000_0000;

/// An LNet network type, carried as a single byte in NID headers.
///
/// Unknown values pass through the codec unchanged; only string parsing
/// restricts the accepted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkType(pub u8);

impl NetworkType {
    pub const INVALID: NetworkType = NetworkType(0);
    /// SOCKLND.
    pub const TCP: NetworkType = NetworkType(2);
    pub const O2IB: NetworkType = NetworkType(5);
    /// Loopback.
    pub const LO: NetworkType = NetworkType(9);
    /// Wildcard; an NID with this type matches any peer.
    pub const ANY: NetworkType = NetworkType(0xFF);

    /// Parse a lowercase protocol label from an NID string.
    ///
    /// The wildcard is never written as a label (whole-NID literals `any`
    /// and `*` cover it), so `any` is rejected here.
    pub fn from_label(s: &str) -> Result<NetworkType, WireError> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(NetworkType::TCP),
            "o2ib" => Ok(NetworkType::O2IB),
            "lo" => Ok(NetworkType::LO),
            _ => Err(WireError::UnknownNetworkLabel(s.to_string())),
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NetworkType::TCP => write!(f, "tcp"),
            NetworkType::O2IB => write!(f, "o2ib"),
            NetworkType::LO => write!(f, "lo"),
            NetworkType::ANY => write!(f, "any"),
            NetworkType(other) => write!(f, "unknown({})", other),
        }
    }
}

/// LNet message types ("commands"). The numeric values are fixed by the
/// Lustre wire protocol and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    Ack = 0,
    Put = 1,
    Get = 2,
    Reply = 3,
    Hello = 4,
}

impl CommandType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(CommandType::Ack),
            1 => Some(CommandType::Put),
            2 => Some(CommandType::Get),
            3 => Some(CommandType::Reply),
            4 => Some(CommandType::Hello),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Guard against accidental reordering of [`CommandType`]: HELLO must stay
/// at its Lustre wire value. Call during process initialization; a failure
/// aborts startup.
pub fn assert_wire_compat() {
    assert_eq!(
        CommandType::Hello.to_u32(),
        4,
        "LNET_MSG_HELLO value changed, breaking wire compatibility"
    );
}
