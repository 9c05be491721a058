//! The LNet client: per-connection drive loop and command dispatch.
//!
//! One client instance serves the whole process. It owns the read-only
//! state every connection shares (byte order, local address catalog, the
//! command registry) while each spawned connection task owns its stream and
//! negotiated context exclusively.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use lnetd_protocol::{
    negotiate, CommandType, ConnContext, Endian, KsockHeader, LNetCommand, LNetMessage,
    NetworkType, Nid, NidStatus, PingResponse, WireError, DEFAULT_PORT, KSOCK_MSG_LNET,
    KSOCK_MSG_NOOP, LNET_PING_MAGIC, LNET_PROTO_PING_MATCHBITS, PING_FEATURE_NI_STATUS,
    PING_FEATURE_PING, PING_NI_STATUS_UP,
};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// A command handler: inspects a decoded message and may produce a reply,
/// which the frame loop writes before reading the next inbound frame.
pub type CommandHandler =
    fn(&LNetClient, &ConnContext, &LNetMessage) -> Result<Option<LNetMessage>, ServerError>;

/// Registry mapping command codes to handlers. Populated once at startup
/// and immutable for the process lifetime.
pub type CommandRegistry = HashMap<CommandType, CommandHandler>;

/// A client for communication via LNet, intended to be wire-compatible
/// with Lustre's kernel implementation.
pub struct LNetClient {
    /// Our default byte order; peers announcing the reversed acceptor
    /// magic get their connection flipped to the opposite order.
    pub byte_order: Endian,
    /// Known local IPs, advertised in PING replies.
    pub local_addrs: Vec<IpAddr>,
    /// The port peers should route replies to (the non-standard `#PORT`
    /// NID suffix).
    pub port: u16,
    commands: CommandRegistry,
}

impl Default for LNetClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LNetClient {
    /// A client with default settings and the GET handler registered.
    pub fn new() -> LNetClient {
        let mut commands: CommandRegistry = HashMap::new();
        commands.insert(CommandType::Get, handle_get as CommandHandler);
        LNetClient {
            byte_order: Endian::host(),
            local_addrs: Vec::new(),
            port: DEFAULT_PORT,
            commands,
        }
    }

    pub fn from_config(config: &ServerConfig) -> LNetClient {
        let mut client = Self::new();
        client.port = config.port;
        client.local_addrs = config.local_addrs.clone();
        client
    }

    /// Returns the client with the specified port.
    pub fn with_port(mut self, port: u16) -> LNetClient {
        self.port = port;
        self
    }

    /// Add or replace a command handler. Only meaningful before the client
    /// starts serving connections.
    pub fn register(&mut self, command: CommandType, handler: CommandHandler) {
        self.commands.insert(command, handler);
    }

    /// Drive one accepted connection to completion: negotiate, then run
    /// the frame loop until the peer disconnects or a failure closes the
    /// connection. The stream is dropped (closed) on return.
    pub async fn handle_connection<S>(&self, mut stream: S, remote: &str)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!(remote, "accepted connection");
        let ctx = match negotiate(&mut stream, self.byte_order).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(remote, error = %e, "negotiation failed");
                return;
            }
        };
        info!(remote, peer = %ctx.peer, order = ?ctx.byte_order, "negotiation succeeded");

        if let Err(e) = self.run_commands(&mut stream, &ctx).await {
            error!(remote, peer = %ctx.peer, error = %e, "command handling failed");
        }
    }

    /// The frame loop: read KSOCK frames in arrival order, dispatch LNET
    /// frames to handlers, and emit any reply in full before reading the
    /// next frame.
    async fn run_commands<S>(&self, stream: &mut S, ctx: &ConnContext) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let header = match KsockHeader::read(stream, ctx.byte_order).await {
                Ok(header) => header,
                Err(WireError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(peer = %ctx.peer, "peer closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            match header.msg_type {
                KSOCK_MSG_NOOP => {
                    debug!(peer = %ctx.peer, "received NOOP message");
                }
                KSOCK_MSG_LNET => {
                    if header.checksum != 0 {
                        warn!(
                            peer = %ctx.peer,
                            checksum = header.checksum,
                            "LNET message has non-zero checksum, which is unsupported"
                        );
                    }
                    let message = LNetMessage::read(stream, ctx.byte_order).await?;
                    let command = message.message_type();
                    let Some(handler) = self.commands.get(&command) else {
                        warn!(
                            peer = %ctx.peer,
                            ?command,
                            "no handler registered for message type, ignoring message"
                        );
                        continue;
                    };
                    if let Some(reply) = handler(self, ctx, &message)? {
                        self.send_message(stream, ctx, &reply).await?;
                    }
                }
                other => return Err(ServerError::UnsupportedFrameType(other)),
            }
        }
    }

    /// Frame and write an LNet message: an LNET-type KSOCK header with zero
    /// checksum and cookies, then the encoded message, as one write.
    pub async fn send_message<S>(
        &self,
        stream: &mut S,
        ctx: &ConnContext,
        message: &LNetMessage,
    ) -> Result<(), ServerError>
    where
        S: AsyncWrite + Unpin,
    {
        debug!(peer = %ctx.peer, command = ?message.message_type(), "sending LNET message");
        let mut buf = KsockHeader::lnet().to_bytes(ctx.byte_order);
        buf.extend_from_slice(&message.to_bytes(ctx.byte_order));
        stream.write_all(&buf).await?;
        Ok(())
    }
}

/// GET handler. The only GET the server currently understands is the LNet
/// PING; other GETs are acknowledged by doing nothing.
fn handle_get(
    client: &LNetClient,
    ctx: &ConnContext,
    message: &LNetMessage,
) -> Result<Option<LNetMessage>, ServerError> {
    let LNetCommand::Get(get) = &message.command else {
        return Err(ServerError::UnexpectedCommand(CommandType::Get));
    };
    debug!(peer = %ctx.peer, match_bits = get.match_bits, "handling GET command");
    if get.match_bits == LNET_PROTO_PING_MATCHBITS {
        return handle_ping(client, ctx, message);
    }
    Ok(None)
}

/// PING handler: compose the REPLY carrying our interface status block.
fn handle_ping(
    client: &LNetClient,
    ctx: &ConnContext,
    message: &LNetMessage,
) -> Result<Option<LNetMessage>, ServerError> {
    let LNetCommand::Get(get) = &message.command else {
        return Err(ServerError::UnexpectedCommand(CommandType::Get));
    };
    if get.match_bits != LNET_PROTO_PING_MATCHBITS {
        return Err(ServerError::InvalidPingMatchBits(get.match_bits));
    }
    if get.portal_index != 0 {
        warn!(
            portal_index = get.portal_index,
            "LNET PING has non-standard portal index"
        );
    }
    info!(peer = %ctx.peer, "handling PING command");

    let Some(mut reply) = message.get_reply() else {
        return Err(ServerError::UnexpectedCommand(CommandType::Get));
    };
    let statuses = client
        .local_addrs
        .iter()
        .map(|addr| NidStatus {
            nid: Nid::from_addr(*addr, NetworkType::TCP, 0, client.port),
            status: PING_NI_STATUS_UP,
            message_size: 0,
        })
        .collect();
    let response = PingResponse {
        magic: LNET_PING_MAGIC,
        features: PING_FEATURE_PING | PING_FEATURE_NI_STATUS,
        pid: message.dest_pid,
        statuses,
    };
    // The ping block goes on the wire verbatim as the REPLY payload; the
    // frame codec derives the payload length field from it.
    reply.payload = response.to_bytes(ctx.byte_order);
    Ok(Some(reply))
}
