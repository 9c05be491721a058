//! End-to-end connection tests.
//!
//! Each test scripts the peer side of a connection byte-for-byte, drives it
//! through the server's connection handler over an in-process duplex
//! stream, and inspects the reply bytes.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use lnetd_protocol::{
    negotiate, CommandType, Endian, GetCommand, HelloMsg, HelloNids, KsockHeader, LNetCommand,
    LNetMessage, Nid, PingResponse, PutCommand, RawNid64, WireHandle, ACCEPTOR_PROTO_V1,
    KSOCK_MSG_LNET, KSOCK_MSG_NOOP, KSOCK_PROTO_V3, LNET_PING_MAGIC, LNET_PROTO_PING_MATCHBITS,
    PID_LUSTRE, PING_NI_STATUS_UP, PROTO_MAGIC_ACCEPTOR, PROTO_MAGIC_TCP, SOCKLND_CONN_BULK_IN,
    SOCKLND_CONN_CONTROL,
};
use lnetd_server::LNetClient;

const SRC_RAW_NID: u64 = 0x0002_0000_C0A8_0105; // 192.168.1.5@tcp0
const DST_RAW_NID: u64 = 0x0002_0000_C0A8_0101; // 192.168.1.1@tcp0

fn little_endian_client() -> LNetClient {
    let mut client = LNetClient::new();
    client.byte_order = Endian::Little;
    client
}

fn acceptor_preamble(order: Endian) -> Vec<u8> {
    let mut buf = Vec::new();
    order.put_u32(&mut buf, PROTO_MAGIC_ACCEPTOR);
    order.put_u32(&mut buf, ACCEPTOR_PROTO_V1);
    let nid: Nid = "192.168.1.5@tcp0".parse().unwrap();
    buf.extend_from_slice(&nid.to_bytes(order));
    buf
}

fn hello_v3() -> HelloMsg {
    HelloMsg {
        magic: PROTO_MAGIC_TCP,
        version: KSOCK_PROTO_V3,
        nids: HelloNids::Compact {
            src: RawNid64(SRC_RAW_NID),
            dst: RawNid64(DST_RAW_NID),
        },
        src_pid: PID_LUSTRE,
        dst_pid: PID_LUSTRE,
        src_incarnation: 0xDEAD,
        dst_incarnation: 0,
        conn_type: SOCKLND_CONN_BULK_IN,
        n_ips: 0,
    }
}

fn handshake_script(order: Endian) -> Vec<u8> {
    let mut script = acceptor_preamble(order);
    script.extend_from_slice(&hello_v3().to_bytes(order));
    script
}

fn ping_request() -> LNetMessage {
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

fn lnet_frame(order: Endian, message: &LNetMessage) -> Vec<u8> {
    let mut buf = KsockHeader::lnet().to_bytes(order);
    buf.extend_from_slice(&message.to_bytes(order));
    buf
}

/// Feed the script to a connection handler and collect everything it
/// writes back until the connection closes.
async fn drive(client: LNetClient, script: Vec<u8>) -> Vec<u8> {
    let client = Arc::new(client);
    let (mut peer, ours) = tokio::io::duplex(8192);
    let task = tokio::spawn(async move {
        client.handle_connection(ours, "scripted-peer").await;
    });
    peer.write_all(&script).await.unwrap();
    peer.shutdown().await.unwrap();
    let mut reply = Vec::new();
    peer.read_to_end(&mut reply).await.unwrap();
    task.await.unwrap();
    reply
}

#[tokio::test]
async fn reversed_acceptor_magic_flips_byte_order() {
    // A big-endian peer's ACCEPTOR magic arrives as AC CE 71 00, which
    // reads as the reversed value through our little-endian default.
    let script = handshake_script(Endian::Big);
    assert_eq!(&script[0..4], &[0xAC, 0xCE, 0x71, 0x00]);

    let reply = drive(little_endian_client(), script).await;
    assert_eq!(reply.len(), 56);

    // The HELLO reply only decodes under the flipped (big-endian) order.
    let mut reader = reply.as_slice();
    let hello = HelloMsg::read(&mut reader, Endian::Big).await.unwrap();
    assert_eq!(hello.magic, PROTO_MAGIC_TCP);
    assert_eq!(hello.dst_incarnation, 0xDEAD);
}

#[tokio::test]
async fn acceptor_v1_establishes_compact_peer_identity() {
    let order = Endian::Little;
    let script = handshake_script(order);
    // ACCEPTOR in little-endian bytes.
    assert_eq!(&script[0..4], &[0x00, 0x71, 0xCE, 0xAC]);

    let (mut peer, mut ours) = tokio::io::duplex(1024);
    peer.write_all(&script).await.unwrap();
    let ctx = negotiate(&mut ours, Endian::Little).await.unwrap();
    assert_eq!(ctx.byte_order, Endian::Little);
    assert_eq!(ctx.peer.to_string(), "192.168.1.5@tcp0");
}

#[tokio::test]
async fn hello_v3_reply_mutates_tail_and_swaps_nids() {
    let order = Endian::Little;
    let reply = drive(little_endian_client(), handshake_script(order)).await;
    assert_eq!(reply.len(), 56);

    let mut reader = reply.as_slice();
    let hello = HelloMsg::read(&mut reader, order).await.unwrap();
    assert_eq!(hello.magic, PROTO_MAGIC_TCP);
    assert_eq!(hello.version, KSOCK_PROTO_V3);
    match hello.nids {
        HelloNids::Compact { src, dst } => {
            assert_eq!(src.0, DST_RAW_NID);
            assert_eq!(dst.0, SRC_RAW_NID);
        }
        _ => panic!("expected compact NIDs in a v3 reply"),
    }
    assert_eq!(hello.dst_pid, PID_LUSTRE);
    assert_eq!(hello.dst_incarnation, 0xDEAD);
    assert_ne!(hello.src_incarnation, 0);
    assert_eq!(hello.conn_type, SOCKLND_CONN_CONTROL);
    assert_eq!(hello.n_ips, 0);
}

#[tokio::test]
async fn nonzero_ip_list_closes_without_reply() {
    let order = Endian::Little;
    let mut script = acceptor_preamble(order);
    let hello = HelloMsg {
        n_ips: 1,
        ..hello_v3()
    };
    script.extend_from_slice(&hello.to_bytes(order));

    let reply = drive(little_endian_client(), script).await;
    assert!(reply.is_empty());
}

#[tokio::test]
async fn ping_request_gets_ping_reply() {
    let order = Endian::Little;
    let mut client = little_endian_client();
    client.local_addrs = vec!["192.168.1.7".parse().unwrap()];

    let mut script = handshake_script(order);
    script.extend_from_slice(&lnet_frame(order, &ping_request()));

    let reply = drive(client, script).await;
    let mut reader = &reply[56..];

    let header = KsockHeader::read(&mut reader, order).await.unwrap();
    assert_eq!(header.msg_type, KSOCK_MSG_LNET);
    assert_eq!(header.checksum, 0);

    let message = LNetMessage::read(&mut reader, order).await.unwrap();
    assert!(reader.is_empty(), "no trailing bytes after the reply");
    assert_eq!(message.message_type(), CommandType::Reply);
    assert_eq!(message.dest_nid.to_string(), "192.168.1.5@tcp0");
    assert_eq!(message.source_nid.to_string(), "192.168.1.1@tcp0");
    assert_eq!(message.dest_pid, PID_LUSTRE);
    assert_eq!(message.source_pid, PID_LUSTRE);
    match message.command {
        LNetCommand::Reply(reply_cmd) => {
            assert_eq!(reply_cmd.dest_wmd.interface_cookie, 0x1111);
            assert_eq!(reply_cmd.dest_wmd.object_cookie, 0x2222);
        }
        _ => panic!("expected a REPLY body"),
    }

    let mut payload = message.payload.as_slice();
    let response = PingResponse::read(&mut payload, order).await.unwrap();
    assert_eq!(response.magic, LNET_PING_MAGIC);
    assert_eq!(response.features, 0x3);
    assert_eq!(response.pid, PID_LUSTRE);
    assert_eq!(response.statuses.len(), 1);
    assert_eq!(response.statuses[0].nid.to_string(), "192.168.1.7@tcp0");
    assert_eq!(response.statuses[0].status, PING_NI_STATUS_UP);
    assert_eq!(response.statuses[0].message_size, 0);
}

#[tokio::test]
async fn unknown_command_closes_connection() {
    let order = Endian::Little;
    let mut script = handshake_script(order);
    script.extend_from_slice(&KsockHeader::lnet().to_bytes(order));
    // An LNet message with message_type 99: two compact NIDs, PIDs, then
    // the bogus type.
    let nid: Nid = "192.168.1.5@tcp0".parse().unwrap();
    script.extend_from_slice(&nid.to_bytes(order));
    script.extend_from_slice(&nid.to_bytes(order));
    order.put_u32(&mut script, PID_LUSTRE);
    order.put_u32(&mut script, PID_LUSTRE);
    order.put_u32(&mut script, 99);
    order.put_u32(&mut script, 0);

    let reply = drive(little_endian_client(), script).await;
    // Only the HELLO reply made it out before the connection died.
    assert_eq!(reply.len(), 56);
}

#[tokio::test]
async fn unknown_ksock_frame_type_closes_connection() {
    let order = Endian::Little;
    let mut script = handshake_script(order);
    let bogus = KsockHeader {
        msg_type: 0x7F,
        checksum: 0,
        cookies: [0; 2],
    };
    script.extend_from_slice(&bogus.to_bytes(order));
    script.extend_from_slice(&lnet_frame(order, &ping_request()));

    let reply = drive(little_endian_client(), script).await;
    assert_eq!(reply.len(), 56, "no frames are processed after a bad type");
}

#[tokio::test]
async fn noop_and_unregistered_commands_are_skipped() {
    let order = Endian::Little;
    let mut client = little_endian_client();
    client.local_addrs = vec!["192.168.1.7".parse().unwrap()];

    let mut script = handshake_script(order);
    // A NOOP frame: logged, no body follows.
    let noop = KsockHeader {
        msg_type: KSOCK_MSG_NOOP,
        checksum: 0,
        cookies: [0; 2],
    };
    script.extend_from_slice(&noop.to_bytes(order));
    // A decodable PUT, for which no handler is registered: skipped.
    let put = LNetMessage {
        command: LNetCommand::Put(PutCommand {
            ack_wmd: WireHandle {
                interface_cookie: 0,
                object_cookie: 0,
            },
            match_bits: 1,
            header_data: 2,
            portal_index: 3,
            offset: 4,
        }),
        ..ping_request()
    };
    script.extend_from_slice(&lnet_frame(order, &put));
    // The PING after both still gets answered.
    script.extend_from_slice(&lnet_frame(order, &ping_request()));

    let reply = drive(client, script).await;
    let mut reader = &reply[56..];
    let header = KsockHeader::read(&mut reader, order).await.unwrap();
    assert_eq!(header.msg_type, KSOCK_MSG_LNET);
    let message = LNetMessage::read(&mut reader, order).await.unwrap();
    assert_eq!(message.message_type(), CommandType::Reply);
    assert!(reader.is_empty());
}

#[tokio::test]
async fn nonzero_checksum_is_warned_not_fatal() {
    let order = Endian::Little;
    let mut client = little_endian_client();
    client.local_addrs = vec!["192.168.1.7".parse().unwrap()];

    let mut script = handshake_script(order);
    let mut frame = KsockHeader {
        msg_type: KSOCK_MSG_LNET,
        checksum: 0xBADC_0DE5,
        cookies: [7, 9], // cookies are read and ignored too
    }
    .to_bytes(order);
    frame.extend_from_slice(&ping_request().to_bytes(order));
    script.extend_from_slice(&frame);

    let reply = drive(client, script).await;
    let mut reader = &reply[56..];
    let header = KsockHeader::read(&mut reader, order).await.unwrap();
    assert_eq!(header.msg_type, KSOCK_MSG_LNET);
    let message = LNetMessage::read(&mut reader, order).await.unwrap();
    assert_eq!(message.message_type(), CommandType::Reply);
}
