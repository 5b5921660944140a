// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembly of completed packet runs into encoded frames.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::buffer::BufferedPacket;
use crate::vp8::FrameType;

/// The maximum number of references a frame can carry.
pub const MAX_REFERENCES: usize = 5;

/// A complete encoded video frame, ready for a decoder once its references
/// have been resolved.
#[derive(Clone)]
pub struct EncodedFrame {
    /// Unique identifier within the stream, assigned by the reference finder.
    /// (A provisional counter value until then.)
    pub id: i64,

    /// Wrapped 16-bit sequence number of the frame's first packet, for
    /// logging and interop.
    pub first_seq_num: u16,

    /// Wrapped 16-bit sequence number of the frame's last packet.
    pub last_seq_num: u16,

    /// Unwrapped sequence number of the frame's first packet.
    pub first_seq_num_unwrapped: i64,

    /// Unwrapped sequence number of the frame's last packet.
    pub last_seq_num_unwrapped: i64,

    /// RTP timestamp shared by all of the frame's packets.
    pub timestamp: u32,

    /// Key or delta, from the first packet's video header.
    pub frame_type: FrameType,

    /// Concatenated packet payloads in sequence order.
    pub data: Vec<u8>,

    /// Number of valid entries in `references`.
    pub num_references: usize,

    /// IDs of the frames this frame depends on for decoding.
    pub references: [i64; MAX_REFERENCES],
}

impl EncodedFrame {
    /// The resolved references, `references[..num_references]`.
    #[inline]
    pub fn references(&self) -> &[i64] {
        &self.references[..self.num_references]
    }
}

impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("id", &self.id)
            .field("first_seq_num", &self.first_seq_num)
            .field("last_seq_num", &self.last_seq_num)
            .field("timestamp", &self.timestamp)
            .field("frame_type", &self.frame_type)
            .field("references", &self.references())
            .field("data", &crate::hex::PayloadHex::new(&self.data, 64))
            .finish()
    }
}

/// Builds [`EncodedFrame`]s from sequence-ordered packet runs.
///
/// Stateless apart from a monotone counter used for provisional frame IDs,
/// which the reference finder later overwrites.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    next_frame_id: AtomicI64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenates the packets' payloads and stamps frame metadata from the
    /// run's first and last packet. Returns `None` for an empty run.
    pub fn assemble(&self, packets: &[BufferedPacket]) -> Option<EncodedFrame> {
        let first = packets.first()?;
        let last = packets.last()?;

        let total_len = packets.iter().map(|p| p.payload.len()).sum();
        let mut data = Vec::with_capacity(total_len);
        for pkt in packets {
            data.extend_from_slice(&pkt.payload);
        }

        Some(EncodedFrame {
            id: self.next_frame_id.fetch_add(1, Ordering::Relaxed),
            first_seq_num: (first.sequence_number & 0xFFFF) as u16,
            last_seq_num: (last.sequence_number & 0xFFFF) as u16,
            first_seq_num_unwrapped: first.sequence_number,
            last_seq_num_unwrapped: last.sequence_number,
            timestamp: first.timestamp,
            frame_type: first.video_header.frame_type,
            data,
            num_references: 0,
            references: [0; MAX_REFERENCES],
        })
    }
}
