//! Wire-format definitions for transfer packets.
//!
//! Every datagram exchanged during a transfer is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (type, sequence, checksum, payload).
//! - Serialising a packet into a byte buffer ready for transmission.
//! - Parsing a raw byte slice back into its fields, together with both the
//!   checksum carried on the wire and the one recomputed locally.
//!
//! No I/O happens here.  A checksum mismatch is **not** a parse error: the
//! receiver decides what to do with a corrupted packet, so [`decode`] only
//! fails when the input cannot possibly hold a header.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |                 Sequence Number ...           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      ...      |                 Checksum (CRC-32) ...         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      ...      |                 Payload ...                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 9 bytes.
//! type(1) + sequence(4) + checksum(4)

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::PacketError;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 9;

/// Largest DATA payload.  Header plus payload is 1028 bytes, which stays
/// below a 1500-byte path MTU once IP and UDP headers are added.
pub const MAX_PAYLOAD: usize = 1019;

/// Receive buffer size for a single datagram.
pub const MAX_DATAGRAM: usize = 2048;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_CHECKSUM: usize = 5;

/// zlib-compatible CRC-32 (IEEE polynomial).
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the CRC-32 of `payload`.
///
/// The empty payload hashes to `0`.
pub fn checksum(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

/// Packet type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// A chunk of the transferred byte stream; `seq` is the chunk index.
    Data,
    /// Cumulative acknowledgement; `seq` is the highest in-order chunk accepted.
    Ack,
    /// The sender has delivered the whole stream.
    End,
    /// The transfer is aborted; the payload is a UTF-8 diagnostic.
    Error,
    /// Any type byte this implementation does not know.  Never produced by
    /// the engines, ignored when received.
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(byte: u8) -> Self {
        match byte {
            1 => PacketType::Data,
            2 => PacketType::Ack,
            3 => PacketType::End,
            4 => PacketType::Error,
            other => PacketType::Unknown(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(kind: PacketType) -> Self {
        match kind {
            PacketType::Data => 1,
            PacketType::Ack => 2,
            PacketType::End => 3,
            PacketType::Error => 4,
            PacketType::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Data => write!(f, "DATA"),
            PacketType::Ack => write!(f, "ACK"),
            PacketType::End => write!(f, "END"),
            PacketType::Error => write!(f, "ERROR"),
            PacketType::Unknown(b) => write!(f, "UNKNOWN({b})"),
        }
    }
}

/// An outbound packet: header fields plus payload.
///
/// The checksum is not stored; [`Packet::encode`] always derives it from the
/// payload so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketType::Data,
            seq,
            payload,
        }
    }

    pub fn ack(seq: u32) -> Self {
        Self {
            kind: PacketType::Ack,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn end() -> Self {
        Self {
            kind: PacketType::End,
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// ERROR packet carrying a human-readable diagnostic.
    pub fn error(message: &str) -> Self {
        Self {
            kind: PacketType::Error,
            seq: 0,
            payload: message.as_bytes().to_vec(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        encode(self.kind, self.seq, &self.payload)
    }
}

/// Serialise a header and payload into one datagram.
///
/// The checksum field is the CRC-32 of `payload` only.
pub fn encode(kind: PacketType, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN + payload.len()];

    buf[OFF_TYPE] = u8::from(kind);
    buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&seq.to_be_bytes());
    buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&checksum(payload).to_be_bytes());
    buf[HEADER_LEN..].copy_from_slice(payload);

    buf
}

/// A parsed datagram, including both checksums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub kind: PacketType,
    pub seq: u32,
    pub payload: Vec<u8>,
    /// Checksum as carried in the header.
    pub received_checksum: u32,
    /// Checksum recomputed over the payload that actually arrived.
    pub computed_checksum: u32,
}

impl Decoded {
    /// `true` when the payload arrived exactly as the sender framed it.
    pub fn is_intact(&self) -> bool {
        self.received_checksum == self.computed_checksum
    }

    /// Payload interpreted as a diagnostic message (ERROR packets).
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Parse a raw datagram.
///
/// Returns [`PacketError::Malformed`] only when `buf` is shorter than
/// [`HEADER_LEN`]; everything after the header is payload.
pub fn decode(buf: &[u8]) -> Result<Decoded, PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::Malformed { len: buf.len() });
    }

    let kind = PacketType::from(buf[OFF_TYPE]);
    let seq = u32::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1], buf[OFF_SEQ + 2], buf[OFF_SEQ + 3]]);
    let received_checksum = u32::from_be_bytes([
        buf[OFF_CHECKSUM],
        buf[OFF_CHECKSUM + 1],
        buf[OFF_CHECKSUM + 2],
        buf[OFF_CHECKSUM + 3],
    ]);
    let payload = buf[HEADER_LEN..].to_vec();
    let computed_checksum = checksum(&payload);

    Ok(Decoded {
        kind,
        seq,
        payload,
        received_checksum,
        computed_checksum,
    })
}
