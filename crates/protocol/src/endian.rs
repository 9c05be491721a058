//! Byte-order handling for the wire.
//!
//! LNet streams carry integers in whichever byte order the peer negotiated
//! (the acceptor magic read detects a reversed peer). The order is a runtime
//! property of a connection, so every codec in this crate takes an [`Endian`]
//! and dispatches to the matching `byteorder` implementation.

use std::io;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A concrete byte order for one connection.
///
/// The process-wide default is the host order, classified once via
/// [`Endian::host`]; a connection may flip to the opposite order during the
/// acceptor exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Classify the host byte order by comparing a probe value's native
    /// memory image against its little-endian image.
    pub fn host() -> Self {
        let probe: u32 = 0x0102_0304;
        if probe.to_ne_bytes() == probe.to_le_bytes() {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    pub fn is_little(self) -> bool {
        self == Endian::Little
    }

    pub fn is_big(self) -> bool {
        self == Endian::Big
    }

    /// The opposite order (little vs big).
    pub fn opposite(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }

    pub fn get_u16<R: io::Read>(self, reader: &mut R) -> io::Result<u16> {
        match self {
            Endian::Little => reader.read_u16::<LittleEndian>(),
            Endian::Big => reader.read_u16::<BigEndian>(),
        }
    }

    pub fn get_u32<R: io::Read>(self, reader: &mut R) -> io::Result<u32> {
        match self {
            Endian::Little => reader.read_u32::<LittleEndian>(),
            Endian::Big => reader.read_u32::<BigEndian>(),
        }
    }

    pub fn get_u64<R: io::Read>(self, reader: &mut R) -> io::Result<u64> {
        match self {
            Endian::Little => reader.read_u64::<LittleEndian>(),
            Endian::Big => reader.read_u64::<BigEndian>(),
        }
    }

    pub fn put_u16(self, buf: &mut Vec<u8>, value: u16) {
        match self {
            Endian::Little => buf.write_u16::<LittleEndian>(value),
            Endian::Big => buf.write_u16::<BigEndian>(value),
        }
        .expect("Vec write should not fail");
    }

    pub fn put_u32(self, buf: &mut Vec<u8>, value: u32) {
        match self {
            Endian::Little => buf.write_u32::<LittleEndian>(value),
            Endian::Big => buf.write_u32::<BigEndian>(value),
        }
        .expect("Vec write should not fail");
    }

    pub fn put_u64(self, buf: &mut Vec<u8>, value: u64) {
        match self {
            Endian::Little => buf.write_u64::<LittleEndian>(value),
            Endian::Big => buf.write_u64::<BigEndian>(value),
        }
        .expect("Vec write should not fail");
    }
}

/// Reverse the byte order of a 16-bit word. `AABB` -> `BBAA`.
pub fn swab16(x: u16) -> u16 {
    x.swap_bytes()
}

/// Reverse the byte order of a 32-bit word. `AABBCCDD` -> `DDCCBBAA`.
pub fn swab32(x: u32) -> u32 {
    x.swap_bytes()
}

/// Reverse the byte order of a 64-bit word.
/// `1122334455667788` -> `8877665544332211`.
pub fn swab64(x: u64) -> u64 {
    x.swap_bytes()
}

/// Read one 32-bit word from the stream in the given order.
pub(crate) async fn read_u32<R>(reader: &mut R, order: Endian) -> io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    order.get_u32(&mut buf.as_slice())
}

/// Read one 64-bit word from the stream in the given order.
pub(crate) async fn read_u64<R>(reader: &mut R, order: Endian) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).await?;
    order.get_u64(&mut buf.as_slice())
}
