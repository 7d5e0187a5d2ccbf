//! Sequence-space arithmetic.
//!
//! Every counter update in the crate goes through [`advance`]: after a
//! segment is sent the local `SND.NXT` moves by it, after one is received
//! `RCV.NXT` becomes `seq + advance(..)`.  All arithmetic wraps modulo 2^32.

use crate::packet::{flags, Segment};

/// How many sequence slots a segment with `seg_flags` and `payload` consumes.
///
/// SYN and FIN occupy one slot when they carry no data; everything else
/// consumes one slot per payload byte, so a bare ACK consumes nothing.
pub fn advance(seg_flags: u8, payload: &[u8]) -> u32 {
    if seg_flags & (flags::SYN | flags::FIN) != 0 && payload.is_empty() {
        1
    } else {
        // Bounded by the UDP datagram size.
        payload.len() as u32
    }
}

/// Sequence number that follows `segment`, i.e. what its receiver should ACK.
pub fn next_after(segment: &Segment) -> u32 {
    segment
        .seq
        .wrapping_add(advance(segment.flags, &segment.payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_segments_consume_one_slot() {
        assert_eq!(advance(flags::SYN, b""), 1);
        assert_eq!(advance(flags::FIN, b""), 1);
        assert_eq!(advance(flags::SYN | flags::ACK, b""), 1);
    }

    #[test]
    fn data_consumes_payload_length() {
        assert_eq!(advance(flags::ACK, b"hello"), 5);
        assert_eq!(advance(flags::SYN, b"abc"), 3);
    }

    #[test]
    fn bare_ack_and_empty_flags_consume_nothing() {
        assert_eq!(advance(flags::ACK, b""), 0);
        assert_eq!(advance(flags::NONE, b""), 0);
        assert_eq!(advance(flags::RST, b""), 0);
    }

    #[test]
    fn next_after_wraps() {
        let syn = Segment {
            seq: u32::MAX,
            flags: flags::SYN,
            ..Segment::default()
        };
        assert_eq!(next_after(&syn), 0);

        let data = Segment {
            seq: u32::MAX - 1,
            flags: flags::ACK,
            payload: b"four".to_vec(),
            ..Segment::default()
        };
        assert_eq!(next_after(&data), 2);
    }
}
