//! Protocol error type.

use crate::indicator::Indicator;

/// Errors raised while decoding packets or record layouts. All of these are
/// fatal to the session that produced them.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// A buffer was shorter than the record it was declared to hold.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        /// Name of the record being parsed.
        what: &'static str,
        /// Bytes required by the declared layout.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// A declared element count disagrees with the buffer length.
    #[error("{what} count mismatch: declared {declared}, buffer holds {actual}")]
    CountMismatch {
        /// Name of the record being parsed.
        what: &'static str,
        /// Count taken from the record head.
        declared: usize,
        /// Count implied by the buffer length.
        actual: usize,
    },
    /// An indicator tag that is not part of the protocol.
    #[error("invalid indicator {0}")]
    BadIndicator(i32),
    /// A packet arrived with an indicator other than the one the session
    /// state machine expects.
    #[error("unexpected indicator {actual:?}, expected {expected:?}")]
    UnexpectedIndicator {
        /// Indicator the session was waiting for.
        expected: Indicator,
        /// Indicator actually received.
        actual: Indicator,
    },
    /// The user id carried by a mid-session packet disagrees with the one
    /// that opened the session.
    #[error("user id mismatch: session {expected}, packet {actual}")]
    UserMismatch {
        /// User id that opened the session.
        expected: i32,
        /// User id carried by the offending packet.
        actual: i32,
    },
    /// A packet declared a payload larger than the session buffer.
    #[error("packet of {size} bytes exceeds the {limit} byte buffer")]
    PacketTooLarge {
        /// Declared payload size.
        size: u64,
        /// Session buffer capacity.
        limit: u64,
    },
    /// The share data payload length disagrees with the sum of the
    /// non-duplicate share sizes declared in the metadata.
    #[error("share data payload is {actual} bytes, metadata declares {expected}")]
    PayloadSizeMismatch {
        /// Sum of non-duplicate share sizes from the metadata.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },
    /// A size field that must be non-negative carries a negative value.
    #[error("{what} declares a negative size {value}")]
    NegativeSize {
        /// Name of the offending field.
        what: &'static str,
        /// The declared value.
        value: i64,
    },
    /// A file name field that is not valid UTF-8.
    #[error("file name is not valid utf-8")]
    BadFileNameEncoding,
    /// Socket-level failure while reading or writing a packet.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
