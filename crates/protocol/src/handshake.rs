//! Connection negotiation.
//!
//! A freshly accepted stream goes through two phases before any frames
//! flow. Phase A is the acceptor exchange: a 32-bit magic (whose reversed
//! form reveals a byte-swapped peer and flips the connection's byte order),
//! an acceptor version, and the peer's source NID. Phase B is the SOCKLND
//! HELLO upgrade: protocol magic and version, a pair of raw NIDs, and a
//! common tail carrying PIDs, incarnations and the connection type; we
//! answer with the mutated tail and swapped NIDs.
//!
//! Any failure terminates the connection; no partial state escapes.

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::constants::{
    ACCEPTOR_PROTO_V1, ACCEPTOR_PROTO_V2, KSOCK_PROTO_V2, KSOCK_PROTO_V3, KSOCK_PROTO_V4,
    PROTO_MAGIC_ACCEPTOR, PROTO_MAGIC_ACCEPTOR_REV, PROTO_MAGIC_GENERIC, PROTO_MAGIC_TCP,
    SOCKLND_CONN_BULK_IN, SOCKLND_CONN_CONTROL,
};
use crate::endian::{self, Endian};
use crate::error::WireError;
use crate::nid::{Nid, RawExtendedNid, RawNid64};

/// Per-connection negotiated state.
///
/// Built up by [`negotiate`]; read-only afterwards. Dropped when the
/// connection closes.
#[derive(Debug, Clone, Copy)]
pub struct ConnContext {
    /// The byte order all subsequent frames use on this connection.
    pub byte_order: Endian,
    /// The protocol magic the connection settled on (always SOCKLND TCP).
    pub protocol: u32,
    /// The peer identity announced in the acceptor exchange.
    pub peer: Nid,
}

/// The NID pair of a HELLO, kept in the raw form the protocol version uses
/// so a reply can echo it byte-for-byte.
#[derive(Debug, Clone, Copy)]
pub enum HelloNids {
    /// Versions 2 and 3: packed 64-bit NIDs.
    Compact { src: RawNid64, dst: RawNid64 },
    /// Version 4: raw extended NIDs.
    Extended {
        src: RawExtendedNid,
        dst: RawExtendedNid,
    },
}

impl HelloNids {
    fn swapped(self) -> HelloNids {
        match self {
            HelloNids::Compact { src, dst } => HelloNids::Compact { src: dst, dst: src },
            HelloNids::Extended { src, dst } => HelloNids::Extended { src: dst, dst: src },
        }
    }

    /// The sender NID, widened for logging.
    pub fn src_nid(&self) -> Nid {
        match self {
            HelloNids::Compact { src, .. } => src.to_nid(),
            HelloNids::Extended { src, .. } => src.to_nid(),
        }
    }
}

/// A SOCKLND HELLO message (ksock_hello_msg), minus the unsupported
/// variable IP list.
#[derive(Debug, Clone, Copy)]
pub struct HelloMsg {
    pub magic: u32,
    pub version: u32,
    pub nids: HelloNids,
    pub src_pid: u32,
    pub dst_pid: u32,
    pub src_incarnation: u64,
    pub dst_incarnation: u64,
    pub conn_type: u32,
    pub n_ips: u32,
}

impl HelloMsg {
    /// Read a HELLO from the stream: magic, version, the version-dependent
    /// NID pair, then the common tail. A non-empty IP list is a hard
    /// failure.
    pub async fn read<R>(reader: &mut R, order: Endian) -> Result<HelloMsg, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let magic = endian::read_u32(reader, order).await?;
        match magic {
            PROTO_MAGIC_GENERIC | PROTO_MAGIC_TCP => {}
            other => return Err(WireError::BadProtocolMagic(other)),
        }
        let version = endian::read_u32(reader, order).await?;
        let nids = match version {
            KSOCK_PROTO_V2 | KSOCK_PROTO_V3 => HelloNids::Compact {
                src: RawNid64(endian::read_u64(reader, order).await?),
                dst: RawNid64(endian::read_u64(reader, order).await?),
            },
            KSOCK_PROTO_V4 => HelloNids::Extended {
                src: RawExtendedNid::read(reader, order).await?,
                dst: RawExtendedNid::read(reader, order).await?,
            },
            other => return Err(WireError::UnsupportedProtocolVersion(other)),
        };
        let src_pid = endian::read_u32(reader, order).await?;
        let dst_pid = endian::read_u32(reader, order).await?;
        let src_incarnation = endian::read_u64(reader, order).await?;
        let dst_incarnation = endian::read_u64(reader, order).await?;
        let conn_type = endian::read_u32(reader, order).await?;
        let n_ips = endian::read_u32(reader, order).await?;
        if n_ips != 0 {
            return Err(WireError::IpListUnsupported(n_ips));
        }
        Ok(HelloMsg {
            magic,
            version,
            nids,
            src_pid,
            dst_pid,
            src_incarnation,
            dst_incarnation,
            conn_type,
            n_ips,
        })
    }

    /// Compose our answer: same magic and version, NIDs swapped, the peer's
    /// incarnation and PID echoed into the destination slots, a fresh
    /// incarnation of our own, and bulk-in rewritten to control.
    pub fn reply(&self) -> HelloMsg {
        HelloMsg {
            magic: self.magic,
            version: self.version,
            nids: self.nids.swapped(),
            src_pid: self.src_pid,
            dst_pid: self.src_pid,
            src_incarnation: fresh_incarnation(),
            dst_incarnation: self.src_incarnation,
            conn_type: if self.conn_type == SOCKLND_CONN_BULK_IN {
                SOCKLND_CONN_CONTROL
            } else {
                self.conn_type
            },
            n_ips: 0,
        }
    }

    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::new();
        order.put_u32(&mut buf, self.magic);
        order.put_u32(&mut buf, self.version);
        match &self.nids {
            HelloNids::Compact { src, dst } => {
                order.put_u64(&mut buf, src.0);
                order.put_u64(&mut buf, dst.0);
            }
            HelloNids::Extended { src, dst } => {
                buf.extend_from_slice(&src.to_bytes(order));
                buf.extend_from_slice(&dst.to_bytes(order));
            }
        }
        order.put_u32(&mut buf, self.src_pid);
        order.put_u32(&mut buf, self.dst_pid);
        order.put_u64(&mut buf, self.src_incarnation);
        order.put_u64(&mut buf, self.dst_incarnation);
        order.put_u32(&mut buf, self.conn_type);
        order.put_u32(&mut buf, self.n_ips);
        buf
    }
}

/// A peer-visible nonce identifying this connection instance. Never zero,
/// so peers can distinguish "no incarnation" from a real one.
fn fresh_incarnation() -> u64 {
    rand::thread_rng().gen_range(1..=u64::MAX)
}

/// Run both negotiation phases on a freshly accepted stream and return the
/// settled connection context.
pub async fn negotiate<S>(stream: &mut S, default_order: Endian) -> Result<ConnContext, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut order = default_order;

    // Phase A: acceptor exchange.
    let mut magic = endian::read_u32(stream, order).await?;
    if magic == PROTO_MAGIC_ACCEPTOR_REV {
        order = order.opposite();
        debug!(?order, "reversed acceptor magic, flipping connection byte order");
        magic = PROTO_MAGIC_ACCEPTOR;
    }
    match magic {
        PROTO_MAGIC_ACCEPTOR => {}
        PROTO_MAGIC_GENERIC => return Err(WireError::GenericNotSupported),
        other => return Err(WireError::BadAcceptorMagic(other)),
    }

    let version = endian::read_u32(stream, order).await?;
    let peer = match version {
        ACCEPTOR_PROTO_V1 | ACCEPTOR_PROTO_V2 => Nid::read(stream, order).await?,
        other => return Err(WireError::UnsupportedAcceptorVersion(other)),
    };
    match (version, &peer) {
        (ACCEPTOR_PROTO_V1, Nid::Extended { .. }) => {
            warn!(%peer, "acceptor v1 peer announced a non-compact NID")
        }
        (ACCEPTOR_PROTO_V2, Nid::Compact { .. }) => {
            warn!(%peer, "acceptor v2 peer announced a non-extended NID")
        }
        _ => {}
    }
    debug!(%peer, version, "acceptor exchange complete");

    // Phase B: HELLO protocol upgrade.
    let hello = HelloMsg::read(stream, order).await?;
    debug!(
        version = hello.version,
        src = %hello.nids.src_nid(),
        src_pid = hello.src_pid,
        conn_type = hello.conn_type,
        "received HELLO"
    );
    let reply = hello.reply();
    stream.write_all(&reply.to_bytes(order)).await?;

    Ok(ConnContext {
        byte_order: order,
        protocol: PROTO_MAGIC_TCP,
        peer,
    })
}
