// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use std::ops::Range;

/// The minimum length of an RTP header (no CSRCs or extensions).
const MIN_HEADER_LEN: usize = 12;

/// Raw packet borrowed from the caller's (reused) read buffer.
///
/// Validates the buffer once, then provides accessors. Anything that must
/// outlive the read call (notably the payload) has to be copied out before
/// the next read overwrites the buffer.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            contributing source (CSRC) identifiers             |
/// |                             ....                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub(crate) struct RawPacket<'a>(&'a [u8]);

impl<'a> RawPacket<'a> {
    /// Validates an RTP packet, returning a wrapper and the payload range.
    pub fn new(data: &'a [u8]) -> Result<(Self, Range<usize>), RawPacketError> {
        // RTP doesn't have a defined maximum size but it's implied by the
        // transport: UDP payloads (even with fragmentation) are at most 65,536
        // bytes minus IP/UDP headers.
        if data.len() > usize::from(u16::MAX) {
            return Err(RawPacketError { reason: "too long" });
        }
        let len = data.len();
        if len < MIN_HEADER_LEN {
            return Err(RawPacketError { reason: "too short" });
        }
        if (data[0] & 0b1100_0000) != 2 << 6 {
            return Err(RawPacketError {
                reason: "must be version 2",
            });
        }
        let has_padding = (data[0] & 0b0010_0000) != 0;
        let has_extension = (data[0] & 0b0001_0000) != 0;
        let csrc_count = usize::from(data[0] & 0b0000_1111);
        let csrc_end = MIN_HEADER_LEN + 4 * csrc_count;
        let payload_start = if has_extension {
            if len < csrc_end + 4 {
                return Err(RawPacketError {
                    reason: "extension is after end of packet",
                });
            }
            let extension_words = usize::from(u16::from_be_bytes([
                data[csrc_end + 2],
                data[csrc_end + 3],
            ]));
            csrc_end + 4 + 4 * extension_words
        } else {
            csrc_end
        };
        if len < payload_start {
            return Err(RawPacketError {
                reason: "payload start is after end of packet",
            });
        }
        let payload_end = if has_padding {
            if len == payload_start {
                return Err(RawPacketError {
                    reason: "missing padding",
                });
            }
            let padding_len = usize::from(data[len - 1]);
            if padding_len == 0 {
                return Err(RawPacketError {
                    reason: "invalid padding length 0",
                });
            }
            match len.checked_sub(padding_len) {
                Some(e) if e >= payload_start => e,
                _ => {
                    return Err(RawPacketError {
                        reason: "padding larger than payload",
                    })
                }
            }
        } else {
            len
        };
        Ok((Self(data), payload_start..payload_end))
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.0[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    #[inline]
    #[allow(unused)]
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }
}

#[derive(Debug)]
pub(crate) struct RawPacketError {
    pub reason: &'static str,
}

impl std::fmt::Display for RawPacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid RTP packet: {}", self.reason)
    }
}

#[cfg(test)]
pub(crate) struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
}

#[cfg(test)]
impl RawPacketBuilder {
    pub(crate) fn build(self, payload: &[u8]) -> Vec<u8> {
        assert!(self.payload_type < 0x80);
        let mut data = vec![
            2 << 6, // version=2, no padding, no extensions, no CSRCs.
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ];
        data.extend_from_slice(&self.sequence_number.to_be_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&self.ssrc.to_be_bytes());
        data.extend_from_slice(payload);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_built_packet() {
        let data = RawPacketBuilder {
            sequence_number: 0xABCD,
            timestamp: 0xDEADBEEF,
            payload_type: 96,
            ssrc: 0x12345678,
            mark: true,
        }
        .build(b"payload");
        let (pkt, payload_range) = RawPacket::new(&data).unwrap();
        assert_eq!(pkt.sequence_number(), 0xABCD);
        assert_eq!(pkt.timestamp(), 0xDEADBEEF);
        assert_eq!(pkt.ssrc(), 0x12345678);
        assert!(pkt.mark());
        assert_eq!(&data[payload_range], b"payload");
    }

    #[test]
    fn reject_garbage() {
        assert_eq!(RawPacket::new(b"").unwrap_err().reason, "too short");
        assert_eq!(
            RawPacket::new(&[0u8; 12]).unwrap_err().reason,
            "must be version 2"
        );
        let mut truncated_extension = RawPacketBuilder {
            sequence_number: 0,
            timestamp: 0,
            payload_type: 96,
            ssrc: 0,
            mark: false,
        }
        .build(b"");
        truncated_extension[0] |= 0b0001_0000; // extension flag, no extension.
        assert_eq!(
            RawPacket::new(&truncated_extension).unwrap_err().reason,
            "extension is after end of packet"
        );
    }
}
