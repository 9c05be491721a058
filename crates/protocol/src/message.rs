//! KSOCK framing and the typed LNet message codec.
//!
//! After negotiation every byte on the connection belongs to a KSOCK frame:
//! a 24-byte header whose type is either NOOP (no body) or LNET, in which
//! case an LNet message follows — two variable-width NIDs, a fixed embedded
//! header, exactly one command body selected by the message type, and an
//! opaque payload of the advertised length.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::constants::{CommandType, KSOCK_MSG_LNET};
use crate::endian::{self, Endian};
use crate::error::WireError;
use crate::nid::Nid;

/// The outer framing header: type, checksum, and two zero-copy cookie
/// slots. Checksums are not verified and the cookies are read and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KsockHeader {
    pub msg_type: u32,
    pub checksum: u32,
    pub cookies: [u64; 2],
}

impl KsockHeader {
    pub const WIRE_LEN: usize = 24;

    /// A header announcing an LNet message body.
    pub fn lnet() -> KsockHeader {
        KsockHeader {
            msg_type: KSOCK_MSG_LNET,
            checksum: 0,
            cookies: [0; 2],
        }
    }

    pub async fn read<R>(reader: &mut R, order: Endian) -> Result<KsockHeader, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; Self::WIRE_LEN];
        reader.read_exact(&mut buf).await?;
        let mut cursor = &buf[..];
        Ok(KsockHeader {
            msg_type: order.get_u32(&mut cursor)?,
            checksum: order.get_u32(&mut cursor)?,
            cookies: [order.get_u64(&mut cursor)?, order.get_u64(&mut cursor)?],
        })
    }

    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        order.put_u32(&mut buf, self.msg_type);
        order.put_u32(&mut buf, self.checksum);
        order.put_u64(&mut buf, self.cookies[0]);
        order.put_u64(&mut buf, self.cookies[1]);
        buf
    }
}

/// A wire match descriptor: an opaque cookie pair identifying a memory
/// descriptor at the originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHandle {
    pub interface_cookie: u64,
    pub object_cookie: u64,
}

impl WireHandle {
    fn get<R: io::Read>(reader: &mut R, order: Endian) -> io::Result<WireHandle> {
        Ok(WireHandle {
            interface_cookie: order.get_u64(reader)?,
            object_cookie: order.get_u64(reader)?,
        })
    }

    fn put(&self, buf: &mut Vec<u8>, order: Endian) {
        order.put_u64(buf, self.interface_cookie);
        order.put_u64(buf, self.object_cookie);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckCommand {
    pub dest_wmd: WireHandle,
    pub match_bits: u64,
    pub message_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutCommand {
    pub ack_wmd: WireHandle,
    pub match_bits: u64,
    pub header_data: u64,
    pub portal_index: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCommand {
    pub return_wmd: WireHandle,
    pub match_bits: u64,
    pub portal_index: u32,
    pub source_offset: u32,
    pub sink_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyCommand {
    pub dest_wmd: WireHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloCommand {
    pub incarnation: u64,
    pub kind: u32,
}

/// The typed command body carried by an LNet message, one variant per
/// Lustre command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LNetCommand {
    Ack(AckCommand),
    Put(PutCommand),
    Get(GetCommand),
    Reply(ReplyCommand),
    Hello(HelloCommand),
}

impl LNetCommand {
    pub fn command_type(&self) -> CommandType {
        match self {
            LNetCommand::Ack(_) => CommandType::Ack,
            LNetCommand::Put(_) => CommandType::Put,
            LNetCommand::Get(_) => CommandType::Get,
            LNetCommand::Reply(_) => CommandType::Reply,
            LNetCommand::Hello(_) => CommandType::Hello,
        }
    }

    fn body_len(cmd: CommandType) -> usize {
        match cmd {
            CommandType::Ack => 28,
            CommandType::Put => 40,
            CommandType::Get => 36,
            CommandType::Reply => 16,
            CommandType::Hello => 12,
        }
    }

    /// Read the fixed body for the given command type.
    pub async fn read<R>(
        reader: &mut R,
        order: Endian,
        cmd: CommandType,
    ) -> Result<LNetCommand, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; Self::body_len(cmd)];
        reader.read_exact(&mut buf).await?;
        let mut cursor = &buf[..];
        let command = match cmd {
            CommandType::Ack => LNetCommand::Ack(AckCommand {
                dest_wmd: WireHandle::get(&mut cursor, order)?,
                match_bits: order.get_u64(&mut cursor)?,
                message_length: order.get_u32(&mut cursor)?,
            }),
            CommandType::Put => LNetCommand::Put(PutCommand {
                ack_wmd: WireHandle::get(&mut cursor, order)?,
                match_bits: order.get_u64(&mut cursor)?,
                header_data: order.get_u64(&mut cursor)?,
                portal_index: order.get_u32(&mut cursor)?,
                offset: order.get_u32(&mut cursor)?,
            }),
            CommandType::Get => LNetCommand::Get(GetCommand {
                return_wmd: WireHandle::get(&mut cursor, order)?,
                match_bits: order.get_u64(&mut cursor)?,
                portal_index: order.get_u32(&mut cursor)?,
                source_offset: order.get_u32(&mut cursor)?,
                sink_length: order.get_u32(&mut cursor)?,
            }),
            CommandType::Reply => LNetCommand::Reply(ReplyCommand {
                dest_wmd: WireHandle::get(&mut cursor, order)?,
            }),
            CommandType::Hello => LNetCommand::Hello(HelloCommand {
                incarnation: order.get_u64(&mut cursor)?,
                kind: order.get_u32(&mut cursor)?,
            }),
        };
        Ok(command)
    }

    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::body_len(self.command_type()));
        match self {
            LNetCommand::Ack(ack) => {
                ack.dest_wmd.put(&mut buf, order);
                order.put_u64(&mut buf, ack.match_bits);
                order.put_u32(&mut buf, ack.message_length);
            }
            LNetCommand::Put(put) => {
                put.ack_wmd.put(&mut buf, order);
                order.put_u64(&mut buf, put.match_bits);
                order.put_u64(&mut buf, put.header_data);
                order.put_u32(&mut buf, put.portal_index);
                order.put_u32(&mut buf, put.offset);
            }
            LNetCommand::Get(get) => {
                get.return_wmd.put(&mut buf, order);
                order.put_u64(&mut buf, get.match_bits);
                order.put_u32(&mut buf, get.portal_index);
                order.put_u32(&mut buf, get.source_offset);
                order.put_u32(&mut buf, get.sink_length);
            }
            LNetCommand::Reply(reply) => {
                reply.dest_wmd.put(&mut buf, order);
            }
            LNetCommand::Hello(hello) => {
                order.put_u64(&mut buf, hello.incarnation);
                order.put_u32(&mut buf, hello.kind);
            }
        }
        buf
    }
}

/// A decoded LNet message: addressing, the typed command body, and the
/// opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LNetMessage {
    pub dest_nid: Nid,
    pub source_nid: Nid,
    pub dest_pid: u32,
    pub source_pid: u32,
    pub command: LNetCommand,
    pub payload: Vec<u8>,
}

impl LNetMessage {
    pub fn message_type(&self) -> CommandType {
        self.command.command_type()
    }

    /// Read one LNet message from inside an LNET-type KSOCK frame.
    pub async fn read<R>(reader: &mut R, order: Endian) -> Result<LNetMessage, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let dest_nid = Nid::read(reader, order).await?;
        let source_nid = Nid::read(reader, order).await?;
        let dest_pid = endian::read_u32(reader, order).await?;
        let source_pid = endian::read_u32(reader, order).await?;
        let message_type = endian::read_u32(reader, order).await?;
        let payload_length = endian::read_u32(reader, order).await?;
        debug!(
            %dest_nid,
            %source_nid,
            dest_pid,
            source_pid,
            message_type,
            payload_length,
            "received LNET message header"
        );

        let cmd = CommandType::from_u32(message_type)
            .ok_or(WireError::UnknownMessageType(message_type))?;
        let command = LNetCommand::read(reader, order, cmd).await?;
        let mut payload = vec![0u8; payload_length as usize];
        if payload_length > 0 {
            reader.read_exact(&mut payload).await?;
        }
        Ok(LNetMessage {
            dest_nid,
            source_nid,
            dest_pid,
            source_pid,
            command,
            payload,
        })
    }

    /// Encode the message: NIDs, embedded header, command body, payload.
    /// The payload length field is always recomputed from the payload, so
    /// callers cannot desynchronize the two.
    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.dest_nid.to_bytes(order));
        buf.extend_from_slice(&self.source_nid.to_bytes(order));
        order.put_u32(&mut buf, self.dest_pid);
        order.put_u32(&mut buf, self.source_pid);
        order.put_u32(&mut buf, self.message_type().to_u32());
        order.put_u32(&mut buf, self.payload.len() as u32);
        buf.extend_from_slice(&self.command.to_bytes(order));
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// The REPLY for a GET: NIDs and PIDs swapped, the GET's return
    /// descriptor as the reply destination, and no payload yet.
    pub fn get_reply(&self) -> Option<LNetMessage> {
        let LNetCommand::Get(get) = &self.command else {
            return None;
        };
        Some(LNetMessage {
            dest_nid: self.source_nid,
            source_nid: self.dest_nid,
            dest_pid: self.source_pid,
            source_pid: self.dest_pid,
            command: LNetCommand::Reply(ReplyCommand {
                dest_wmd: get.return_wmd,
            }),
            payload: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{KSOCK_MSG_NOOP, PID_LUSTRE};
    use crate::ping::LNET_PROTO_PING_MATCHBITS;

    fn sample_get() -> LNetMessage {
        LNetMessage {
            dest_nid: "192.168.1.1@tcp0".parse().unwrap(),
            source_nid: "192.168.1.5@tcp0".parse().unwrap(),
            dest_pid: PID_LUSTRE,
            source_pid: PID_LUSTRE,
            command: LNetCommand::Get(GetCommand {
                return_wmd: WireHandle {
                    interface_cookie: 0x1111,
                    object_cookie: 0x2222,
                },
                match_bits: LNET_PROTO_PING_MATCHBITS,
                portal_index: 0,
                source_offset: 0,
                sink_length: 0,
            }),
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_ksock_header_roundtrip() {
        for order in [Endian::Little, Endian::Big] {
            let header = KsockHeader {
                msg_type: KSOCK_MSG_NOOP,
                checksum: 7,
                cookies: [0xAA, 0xBB],
            };
            let bytes = header.to_bytes(order);
            assert_eq!(bytes.len(), KsockHeader::WIRE_LEN);
            let mut reader = bytes.as_slice();
            assert_eq!(KsockHeader::read(&mut reader, order).await.unwrap(), header);
        }
    }

    #[tokio::test]
    async fn test_get_message_roundtrip_both_orders() {
        for order in [Endian::Little, Endian::Big] {
            let message = sample_get();
            let bytes = message.to_bytes(order);
            // 8 + 8 NIDs, 16 embedded header, 36 GET body.
            assert_eq!(bytes.len(), 68);
            let mut reader = bytes.as_slice();
            let decoded = LNetMessage::read(&mut reader, order).await.unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[tokio::test]
    async fn test_payload_length_recomputed() {
        let message = LNetMessage {
            payload: vec![1, 2, 3, 4, 5],
            ..sample_get()
        };
        let bytes = message.to_bytes(Endian::Little);
        let mut reader = bytes.as_slice();
        let decoded = LNetMessage::read(&mut reader, Endian::Little).await.unwrap();
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_put_and_hello_bodies() {
        let put = LNetMessage {
            command: LNetCommand::Put(PutCommand {
                ack_wmd: WireHandle {
                    interface_cookie: 1,
                    object_cookie: 2,
                },
                match_bits: 3,
                header_data: 4,
                portal_index: 5,
                offset: 6,
            }),
            ..sample_get()
        };
        let bytes = put.to_bytes(Endian::Big);
        let mut reader = bytes.as_slice();
        assert_eq!(
            LNetMessage::read(&mut reader, Endian::Big).await.unwrap(),
            put
        );

        let hello = LNetMessage {
            command: LNetCommand::Hello(HelloCommand {
                incarnation: 0xDEAD,
                kind: 4,
            }),
            ..sample_get()
        };
        let bytes = hello.to_bytes(Endian::Little);
        let mut reader = bytes.as_slice();
        let decoded = LNetMessage::read(&mut reader, Endian::Little).await.unwrap();
        assert_eq!(decoded.message_type(), CommandType::Hello);
        assert_eq!(decoded, hello);
    }

    #[tokio::test]
    async fn test_unknown_message_type_fails() {
        let mut bytes = sample_get().to_bytes(Endian::Little);
        // The message type sits after the two compact NIDs and two PIDs.
        bytes[24..28].copy_from_slice(&99u32.to_le_bytes());
        let mut reader = bytes.as_slice();
        assert!(matches!(
            LNetMessage::read(&mut reader, Endian::Little).await,
            Err(WireError::UnknownMessageType(99))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_fails() {
        let bytes = sample_get().to_bytes(Endian::Little);
        let mut reader = &bytes[..40];
        assert!(matches!(
            LNetMessage::read(&mut reader, Endian::Little).await,
            Err(WireError::Io(_))
        ));
    }

    #[test]
    fn test_get_reply_swaps_addressing() {
        let message = sample_get();
        let reply = message.get_reply().unwrap();
        assert_eq!(reply.dest_nid.to_string(), "192.168.1.5@tcp0");
        assert_eq!(reply.source_nid.to_string(), "192.168.1.1@tcp0");
        assert_eq!(reply.message_type(), CommandType::Reply);
        match reply.command {
            LNetCommand::Reply(r) => {
                assert_eq!(r.dest_wmd.interface_cookie, 0x1111);
                assert_eq!(r.dest_wmd.object_cookie, 0x2222);
            }
            _ => panic!("expected REPLY body"),
        }
        assert!(reply.payload.is_empty());

        // Only GETs have a reply.
        let reply_msg = reply.get_reply();
        assert!(reply_msg.is_none());
    }
}
