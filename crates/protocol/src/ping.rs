//! The LNet PING payload.
//!
//! A PING is a GET whose match bits carry [`LNET_PROTO_PING_MATCHBITS`];
//! the REPLY payload is a ping info block listing the responder's network
//! interfaces and their status.

use tokio::io::AsyncRead;

use crate::endian::{self, Endian};
use crate::error::WireError;
use crate::nid::Nid;

/// The high match bit marks a GET as a PING request.
pub const LNET_PROTO_PING_MATCHBITS: u64 = 0x8000_0000_0000_0000;
/// "ping" in ASCII.
pub const LNET_PING_MAGIC: u32 = 0x7069_6E67;

pub const PING_NI_STATUS_INVALID: u32 = 0;
pub const PING_NI_STATUS_UP: u32 = 0x15AA_C0DE;
pub const PING_NI_STATUS_DOWN: u32 = 0xDEAD_FACE;

pub const PING_FEATURE_INVALID: u32 = 0;
pub const PING_FEATURE_PING: u32 = 1 << 0;
pub const PING_FEATURE_NI_STATUS: u32 = 1 << 1;
pub const PING_FEATURE_RTE_DISABLED: u32 = 1 << 2;
pub const PING_FEATURE_MULTI_RAIL: u32 = 1 << 3;
pub const PING_FEATURE_DISCOVERY: u32 = 1 << 4;
pub const PING_FEATURE_LARGE_ADDRESS: u32 = 1 << 5;
pub const PING_FEATURE_PRIMARY_LARGE: u32 = 1 << 6;
pub const PING_FEATURE_METADATA: u32 = 1 << 7;

/// One network interface record in a ping response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NidStatus {
    pub nid: Nid,
    pub status: u32,
    pub message_size: u32,
}

/// The ping info block: magic, feature bits, responder PID, and one record
/// per known interface. The record count on the wire is always derived from
/// the record list.
#[derive(Debug, Clone, PartialEq)]
pub struct PingResponse {
    pub magic: u32,
    pub features: u32,
    pub pid: u32,
    pub statuses: Vec<NidStatus>,
}

impl PingResponse {
    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::new();
        order.put_u32(&mut buf, self.magic);
        order.put_u32(&mut buf, self.features);
        order.put_u32(&mut buf, self.pid);
        order.put_u32(&mut buf, self.statuses.len() as u32);
        for status in &self.statuses {
            buf.extend_from_slice(&status.nid.to_bytes(order));
            order.put_u32(&mut buf, status.status);
            order.put_u32(&mut buf, status.message_size);
        }
        buf
    }

    pub async fn read<R>(reader: &mut R, order: Endian) -> Result<PingResponse, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let magic = endian::read_u32(reader, order).await?;
        let features = endian::read_u32(reader, order).await?;
        let pid = endian::read_u32(reader, order).await?;
        let count = endian::read_u32(reader, order).await?;
        let mut statuses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            statuses.push(NidStatus {
                nid: Nid::read(reader, order).await?,
                status: endian::read_u32(reader, order).await?,
                message_size: endian::read_u32(reader, order).await?,
            });
        }
        Ok(PingResponse {
            magic,
            features,
            pid,
            statuses,
        })
    }
}
