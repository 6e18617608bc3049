//! Blocking wire helpers.
//!
//! Sessions speak length-prefixed packets over a plain TCP stream: an
//! 8-byte header of `indicator:i32 ‖ packet_size:u32`, both little-endian,
//! followed by `packet_size` payload bytes. These helpers read and write
//! that framing over any `Read`/`Write`.

use std::io::{Read, Write};

use crate::error::ProtoError;
use crate::indicator::Indicator;
use crate::types::UserId;

/// Packet header: indicator tag plus payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Tag identifying the payload.
    pub indicator: Indicator,
    /// Payload size in bytes.
    pub size: u32,
}

impl PacketHeader {
    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.indicator.as_i32().to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Write the header to a stream.
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), ProtoError> {
        w.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Read a little-endian i32.
pub fn read_i32(r: &mut impl Read) -> Result<i32, ProtoError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Read a little-endian u32.
pub fn read_u32(r: &mut impl Read) -> Result<u32, ProtoError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64(r: &mut impl Read) -> Result<u64, ProtoError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read an indicator tag.
pub fn read_indicator(r: &mut impl Read) -> Result<Indicator, ProtoError> {
    Indicator::try_from(read_i32(r)?)
}

/// Read an indicator tag and fail unless it is `expected`.
pub fn expect_indicator(r: &mut impl Read, expected: Indicator) -> Result<(), ProtoError> {
    let actual = read_indicator(r)?;
    if actual != expected {
        return Err(ProtoError::UnexpectedIndicator { expected, actual });
    }
    Ok(())
}

/// Probe the stream for the user id that opens the next request. Returns
/// `None` on a clean close (zero bytes read before the first byte of the
/// id), which ends the session.
pub fn probe_user_id(r: &mut impl Read) -> Result<Option<UserId>, ProtoError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtoError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid user id",
            )));
        }
        filled += n;
    }
    Ok(Some(i32::from_le_bytes(buf)))
}

/// Read exactly `len` bytes into the front of `buf`, failing if `buf` is
/// too small for the declared length.
pub fn read_payload(r: &mut impl Read, buf: &mut [u8], len: usize) -> Result<(), ProtoError> {
    if len > buf.len() {
        return Err(ProtoError::PacketTooLarge {
            size: len as u64,
            limit: buf.len() as u64,
        });
    }
    r.read_exact(&mut buf[..len])?;
    Ok(())
}

/// Write a packet: header followed by the payload.
pub fn write_packet(
    w: &mut impl Write,
    indicator: Indicator,
    payload: &[u8],
) -> Result<(), ProtoError> {
    PacketHeader {
        indicator,
        size: payload.len() as u32,
    }
    .write_to(w)?;
    w.write_all(payload)?;
    Ok(())
}
