//! Packet indicator tags.

use crate::error::ProtoError;

/// Size of the indicator tag on the wire.
pub const INDICATOR_SIZE: usize = 4;
/// Size of the packet-size field on the wire.
pub const PACKET_SIZE_SIZE: usize = 4;
/// Size of the packet header (indicator + packet size).
pub const PACKET_HEADER_SIZE: usize = INDICATOR_SIZE + PACKET_SIZE_SIZE;

/// Signed 32-bit tag identifying the packet that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Indicator {
    /// Client sends file share metadata, opening an upload round.
    Meta = -1,
    /// Client sends the concatenated non-duplicate share payloads.
    Data = -2,
    /// Server returns the per-share duplicate status list.
    Stat = -3,
    /// Server streams part of the restored share file to the client.
    RespDownload = -5,
    /// Client requests a download by file name.
    Download = -7,
    /// Peer asks for an intra-user share index probe.
    IntraUserShareIdxUpdate = -10,
    /// Response to an intra-user probe.
    RespIntraUserShareIdxUpdate = -11,
    /// Peer hands over a share for an inter-user index update.
    InterUserShareIdxUpdate = -15,
    /// Response to an inter-user update.
    RespInterUserShareIdxUpdate = -16,
    /// Peer requests a share's restored bytes.
    RestoreShare = -17,
    /// Response carrying a restored share.
    RespRestoreShare = -18,
}

impl Indicator {
    /// Raw wire value of this indicator.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Indicator {
    type Error = ProtoError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Indicator::Meta),
            -2 => Ok(Indicator::Data),
            -3 => Ok(Indicator::Stat),
            -5 => Ok(Indicator::RespDownload),
            -7 => Ok(Indicator::Download),
            -10 => Ok(Indicator::IntraUserShareIdxUpdate),
            -11 => Ok(Indicator::RespIntraUserShareIdxUpdate),
            -15 => Ok(Indicator::InterUserShareIdxUpdate),
            -16 => Ok(Indicator::RespInterUserShareIdxUpdate),
            -17 => Ok(Indicator::RestoreShare),
            -18 => Ok(Indicator::RespRestoreShare),
            other => Err(ProtoError::BadIndicator(other)),
        }
    }
}
