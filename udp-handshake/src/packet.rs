//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is exactly one [`Segment`].  This
//! module owns the on-wire binary layout and the conversion between that
//! layout and the in-memory struct.  No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |                Payload ...                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 13 bytes.  There is no length field;
//! the payload is whatever follows the header in the datagram, since UDP
//! preserves message boundaries.

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// No control bits set.
    pub const NONE: u8 = 0;
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
    /// Reset the connection.
    pub const RST: u8 = 0b0000_1000;

    const NAMES: [(u8, &str); 4] = [(SYN, "SYN"), (ACK, "ACK"), (FIN, "FIN"), (RST, "RST")];

    /// Render a flag set as `SYN|ACK`, or `NONE` when empty.
    ///
    /// Unknown high bits are shown as a trailing hex literal.
    pub fn describe(bits: u8) -> String {
        let mut parts: Vec<String> = NAMES
            .iter()
            .filter(|(bit, _)| bits & bit != 0)
            .map(|(_, name)| (*name).to_string())
            .collect();
        let unknown = bits & 0xf0;
        if unknown != 0 {
            parts.push(format!("{unknown:#04x}"));
        }
        if parts.is_empty() {
            "NONE".to_string()
        } else {
            parts.join("|")
        }
    }
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 13;

// Byte offsets of each field within the serialised header.
const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_FLAGS: usize = 12;

/// One protocol datagram: header fields plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    /// Port the sender considers its own end of the connection.
    ///
    /// A listener puts its per-connection port here in the SYN-ACK so the
    /// client knows where to direct the rest of the exchange.
    pub source_port: u16,
    pub destination_port: u16,
    /// Sequence number of the first payload byte (or of the SYN/FIN slot).
    pub seq: u32,
    /// Next sequence number the sender expects from its peer.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.source_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2]
            .copy_from_slice(&self.destination_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_FLAGS] = self.flags;
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Any flag combination is accepted; only the length is validated.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort { len: buf.len() });
        }

        Ok(Segment {
            source_port: u16::from_be_bytes([buf[OFF_SRC_PORT], buf[OFF_SRC_PORT + 1]]),
            destination_port: u16::from_be_bytes([buf[OFF_DST_PORT], buf[OFF_DST_PORT + 1]]),
            seq: read_u32(buf, OFF_SEQ),
            ack: read_u32(buf, OFF_ACK),
            flags: buf[OFF_FLAGS],
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// `true` iff the flag set equals `mask` exactly.
    ///
    /// A superset does not match: `SYN|ACK|FIN` is not a SYN-ACK.
    pub fn has_exact_flags(&self, mask: u8) -> bool {
        self.flags == mask
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram of {len} bytes is shorter than the 13-byte header")]
    BufferTooShort { len: usize },
}
