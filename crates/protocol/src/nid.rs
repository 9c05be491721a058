//! Network identifiers and methods.
//!
//! An NID names a peer: an address plus a transport descriptor. Two wire
//! widths exist, a compact 8-byte form holding an IPv4 address and an
//! extended 20-byte form holding up to 128 address bits. Both carry a
//! userland-only `port` attribute that is never written on the wire
//! (writing it would break Lustre compatibility).

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::constants::NetworkType;
use crate::endian::{self, Endian};
use crate::error::WireError;

/// LNet traditionally expects the same port across the cluster, but
/// userland needs flexibility, so NID strings accept a `#PORT` suffix to
/// override this default (e.g. `192.168.105.12@tcp0#9881`).
pub const DEFAULT_PORT: u16 = 988;

/// The fixed 4-byte prefix of every wire NID.
///
/// `size` is the wire length of the whole NID minus 8: 0 for the compact
/// form, 12 for the extended form. Sizes 2 and 14 are reserved for future
/// address+port encodings and currently rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NidHeader {
    pub size: u8,
    pub net_type: NetworkType,
    pub net_index: u16,
}

/// A network identifier in one of its two wire widths.
///
/// Equality ignores the non-wire `port` field, and a wildcard compares
/// equal to any other NID regardless of the remaining fields.
#[derive(Debug, Clone, Copy)]
pub enum Nid {
    /// 8 wire bytes; the address word holds an IPv4 address.
    Compact {
        header: NidHeader,
        addr: u32,
        port: u16,
    },
    /// 20 wire bytes; four address words hold up to an IPv6 address.
    Extended {
        header: NidHeader,
        addr: [u32; 4],
        port: u16,
    },
}

impl Nid {
    /// The wildcard NID. In Lustre the entire structure is set to ~0, but
    /// only the type byte is ever inspected.
    pub const ANY: Nid = Nid::Compact {
        header: NidHeader {
            size: 0xFF,
            net_type: NetworkType::ANY,
            net_index: 0xFFFF,
        },
        addr: 0xFFFF_FFFF,
        port: DEFAULT_PORT,
    };

    /// Build an NID from an IP address. The unspecified address maps to the
    /// wildcard, IPv4 to the compact form and IPv6 to the extended form.
    /// A zero port means the default port.
    pub fn from_addr(addr: IpAddr, net_type: NetworkType, net_index: u16, port: u16) -> Nid {
        if addr.is_unspecified() {
            return Nid::ANY;
        }
        let port = if port == 0 { DEFAULT_PORT } else { port };
        match addr {
            IpAddr::V4(v4) => Nid::Compact {
                header: NidHeader {
                    size: 0,
                    net_type,
                    net_index,
                },
                addr: u32::from_be_bytes(v4.octets()),
                port,
            },
            IpAddr::V6(v6) => {
                let octets = v6.octets();
                let mut words = [0u32; 4];
                for (i, word) in words.iter_mut().enumerate() {
                    let mut chunk = [0u8; 4];
                    chunk.copy_from_slice(&octets[i * 4..(i + 1) * 4]);
                    *word = u32::from_be_bytes(chunk);
                }
                Nid::Extended {
                    header: NidHeader {
                        size: 12,
                        net_type,
                        net_index,
                    },
                    addr: words,
                    port,
                }
            }
        }
    }

    pub fn header(&self) -> NidHeader {
        match self {
            Nid::Compact { header, .. } | Nid::Extended { header, .. } => *header,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Nid::Compact { port, .. } | Nid::Extended { port, .. } => *port,
        }
    }

    /// Whether this NID is the wildcard (matches any peer).
    pub fn is_any(&self) -> bool {
        self.header().net_type == NetworkType::ANY
    }

    /// The address carried by this NID. Address words map to the standard
    /// representation in big-endian order.
    pub fn net_addr(&self) -> IpAddr {
        match self {
            Nid::Compact { addr, .. } => IpAddr::V4(Ipv4Addr::from(*addr)),
            Nid::Extended { addr, .. } => {
                let mut octets = [0u8; 16];
                for (i, word) in addr.iter().enumerate() {
                    octets[i * 4..(i + 1) * 4].copy_from_slice(&word.to_be_bytes());
                }
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        }
    }

    /// The encoded length in bytes: `size + 8`.
    pub fn wire_len(&self) -> usize {
        match self {
            Nid::Compact { .. } => 8,
            Nid::Extended { .. } => 20,
        }
    }

    /// Encode in the stream's byte order: size, type, index, then the
    /// address words. The port is never written.
    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        let header = self.header();
        buf.push(header.size);
        buf.push(header.net_type.0);
        order.put_u16(&mut buf, header.net_index);
        match self {
            Nid::Compact { addr, .. } => order.put_u32(&mut buf, *addr),
            Nid::Extended { addr, .. } => {
                for word in addr {
                    order.put_u32(&mut buf, *word);
                }
            }
        }
        buf
    }

    /// Read an NID from the stream.
    ///
    /// A wildcard type short-circuits: the trailing address word is read and
    /// discarded, and EOF there still yields a valid wildcard.
    pub async fn read<R>(reader: &mut R, order: Endian) -> Result<Nid, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await?;
        let header = NidHeader {
            size: head[0],
            net_type: NetworkType(head[1]),
            net_index: order.get_u16(&mut &head[2..4])?,
        };

        if header.net_type == NetworkType::ANY {
            let mut discard = [0u8; 4];
            match reader.read_exact(&mut discard).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("EOF while discarding wildcard NID address word");
                }
                Err(e) => return Err(e.into()),
            }
            return Ok(Nid::ANY);
        }

        match header.size {
            0 => {
                let addr = endian::read_u32(reader, order).await?;
                Ok(Nid::Compact {
                    header,
                    addr,
                    port: DEFAULT_PORT,
                })
            }
            2 => Err(WireError::NidSizeNotYetSupported(2)),
            12 => {
                let mut words = [0u8; 16];
                reader.read_exact(&mut words).await?;
                let mut cursor = &words[..];
                let mut addr = [0u32; 4];
                for word in addr.iter_mut() {
                    *word = order.get_u32(&mut cursor)?;
                }
                Ok(Nid::Extended {
                    header,
                    addr,
                    port: DEFAULT_PORT,
                })
            }
            14 => Err(WireError::NidSizeNotYetSupported(14)),
            other => Err(WireError::UnsupportedNidSize(other)),
        }
    }
}

impl PartialEq for Nid {
    fn eq(&self, other: &Self) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        match (self, other) {
            (
                Nid::Compact {
                    header: h1,
                    addr: a1,
                    ..
                },
                Nid::Compact {
                    header: h2,
                    addr: a2,
                    ..
                },
            ) => h1 == h2 && a1 == a2,
            (
                Nid::Extended {
                    header: h1,
                    addr: a1,
                    ..
                },
                Nid::Extended {
                    header: h2,
                    addr: a2,
                    ..
                },
            ) => h1 == h2 && a1 == a2,
            _ => false,
        }
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "any");
        }
        let header = self.header();
        write!(
            f,
            "{}@{}{}",
            self.net_addr(),
            header.net_type,
            header.net_index
        )?;
        if self.port() != DEFAULT_PORT {
            write!(f, "#{}", self.port())?;
        }
        Ok(())
    }
}

impl FromStr for Nid {
    type Err = WireError;

    /// Parse `ADDRESS@PROTOCOL<NUM>[#PORT]`, or the wildcard literals
    /// `any` and `*`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" || s == "*" {
            return Ok(Nid::ANY);
        }
        let (addr_str, proto_str) = s
            .split_once('@')
            .ok_or_else(|| WireError::InvalidNidFormat(s.to_string()))?;
        let (proto_str, port_str) = match proto_str.split_once('#') {
            Some((proto, port)) => (proto, Some(port)),
            None => (proto_str, None),
        };

        let label_end = proto_str
            .rfind(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| WireError::InvalidNidFormat(s.to_string()))?;
        let (label, num_str) = proto_str.split_at(label_end + 1);
        if num_str.is_empty() {
            return Err(WireError::InvalidNidFormat(s.to_string()));
        }
        let net_type = NetworkType::from_label(label)?;
        let net_index: u16 = num_str
            .parse()
            .map_err(|_| WireError::InvalidNidFormat(format!("invalid network number: {s}")))?;
        let port: u16 = match port_str {
            Some(p) => p
                .parse()
                .map_err(|_| WireError::InvalidNidFormat(format!("invalid port number: {s}")))?,
            None => DEFAULT_PORT,
        };
        let addr: IpAddr = addr_str
            .parse()
            .map_err(|_| WireError::InvalidAddress(addr_str.to_string()))?;
        Ok(Nid::from_addr(addr, net_type, net_index, port))
    }
}

/// Packed 64-bit form of a compact NID, as carried by SOCKLND HELLO
/// versions 2 and 3.
///
/// Bit layout: size in bits 56..64, type in 48..56, index in 32..48,
/// address in 0..32. The layout is interpreted through the byte order the
/// stream is currently using, so the same bytes name different fields on
/// little- and big-endian connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawNid64(pub u64);

impl RawNid64 {
    pub fn to_nid(self) -> Nid {
        let header = NidHeader {
            size: ((self.0 >> 56) & 0xFF) as u8,
            net_type: NetworkType(((self.0 >> 48) & 0xFF) as u8),
            net_index: ((self.0 >> 32) & 0xFFFF) as u16,
        };
        if header.net_type == NetworkType::ANY {
            return Nid::ANY;
        }
        Nid::Compact {
            header,
            addr: (self.0 & 0xFFFF_FFFF) as u32,
            port: DEFAULT_PORT,
        }
    }
}

/// Raw form of an extended NID, as carried by SOCKLND HELLO version 4.
/// The header is carried as received, without reconciliation against the
/// address width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawExtendedNid {
    pub header: NidHeader,
    pub addr: [u32; 4],
}

impl RawExtendedNid {
    pub async fn read<R>(reader: &mut R, order: Endian) -> Result<RawExtendedNid, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 20];
        reader.read_exact(&mut buf).await?;
        let mut cursor = &buf[2..];
        let net_index = order.get_u16(&mut cursor)?;
        let mut addr = [0u32; 4];
        for word in addr.iter_mut() {
            *word = order.get_u32(&mut cursor)?;
        }
        Ok(RawExtendedNid {
            header: NidHeader {
                size: buf[0],
                net_type: NetworkType(buf[1]),
                net_index,
            },
            addr,
        })
    }

    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        buf.push(self.header.size);
        buf.push(self.header.net_type.0);
        order.put_u16(&mut buf, self.header.net_index);
        for word in &self.addr {
            order.put_u32(&mut buf, *word);
        }
        buf
    }

    pub fn to_nid(self) -> Nid {
        Nid::Extended {
            header: self.header,
            addr: self.addr,
            port: DEFAULT_PORT,
        }
    }
}
