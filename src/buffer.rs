// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Staging of out-of-order RTP packets until their video frame is complete.

use bytes::Bytes;

use crate::error::ErrorInt;
use crate::vp8::VideoHeader;
use crate::Error;

/// Packet buffer sizes permitted by [`PacketBuffer::new`].
pub const ALLOWED_SIZES: [u16; 6] = [64, 128, 256, 512, 1024, 2048];

/// One RTP packet staged for frame reassembly.
#[derive(Clone)]
pub struct BufferedPacket {
    /// Unwrapped sequence number, monotone per stream.
    pub sequence_number: i64,

    /// RTP timestamp; identical for all packets of one frame.
    pub timestamp: u32,

    /// Video payload with the VP8 payload descriptor already stripped. Owned
    /// by the packet: the source read buffer is reused across reads.
    pub payload: Bytes,

    /// Codec-derived per-packet metadata.
    pub video_header: VideoHeader,

    /// RTP marker bit; for video, set on the last packet of a frame.
    pub marker: bool,

    /// Set during the buffer's continuity scan. Meaningless outside it.
    continuous: bool,
}

impl std::fmt::Debug for BufferedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedPacket")
            .field("sequence_number", &self.sequence_number)
            .field("timestamp", &self.timestamp)
            .field("video_header", &self.video_header)
            .field("marker", &self.marker)
            .field("payload", &crate::hex::PayloadHex::new(&self.payload, 64))
            .finish()
    }
}

impl BufferedPacket {
    pub fn new(
        sequence_number: i64,
        timestamp: u32,
        payload: Bytes,
        video_header: VideoHeader,
        marker: bool,
    ) -> Self {
        BufferedPacket {
            sequence_number,
            timestamp,
            payload,
            video_header,
            marker,
            continuous: false,
        }
    }
}

/// Buffers video RTP packets and detects complete frames.
///
/// A frame is complete when a run of packets with contiguous unwrapped
/// sequence numbers and a single RTP timestamp spans from a packet flagged
/// as the frame's first to one flagged as its last.
///
/// Slots are addressed by `sequence_number mod size`, so a packet for a frame
/// older than the buffer's span simply overwrites nothing useful and is lost.
#[derive(Debug)]
pub struct PacketBuffer {
    slots: Vec<Option<BufferedPacket>>,
    size: u16,
}

pub(crate) fn validate_size(size: u16) -> Result<(), Error> {
    if !ALLOWED_SIZES.contains(&size) {
        bail!(ErrorInt::InvalidArgument(format!(
            "invalid packet buffer size {}: must be a power of two in {:?}",
            size, ALLOWED_SIZES
        )));
    }
    Ok(())
}

impl PacketBuffer {
    /// Creates a buffer with the given capacity, which must be one of
    /// [`ALLOWED_SIZES`].
    pub fn new(size: u16) -> Result<Self, Error> {
        validate_size(size)?;
        Ok(PacketBuffer {
            slots: (0..size).map(|_| None).collect(),
            size,
        })
    }

    /// Inserts a packet and returns any frames it completed, each as a
    /// sequence-ordered packet run.
    ///
    /// Filling a gap may complete several queued frames at once; they are
    /// returned in ascending sequence-number order. A duplicate of a buffered
    /// packet returns nothing.
    pub fn insert(&mut self, mut pkt: BufferedPacket) -> Vec<Vec<BufferedPacket>> {
        let seq = pkt.sequence_number;
        let index = self.slot_index(seq);

        if matches!(&self.slots[index], Some(existing) if existing.sequence_number == seq) {
            return Vec::new();
        }

        pkt.continuous = false;
        self.slots[index] = Some(pkt);

        self.find_frames(seq)
    }

    fn slot_index(&self, seq: i64) -> usize {
        // rem_euclid: unwrapped sequence numbers may go negative near the
        // start of a stream that begins just after a wrap.
        seq.rem_euclid(i64::from(self.size)) as usize
    }

    /// Scans a window of `size` slots centered on the inserted sequence
    /// number, marking continuity and extracting every frame that completes.
    fn find_frames(&mut self, inserted_seq: i64) -> Vec<Vec<BufferedPacket>> {
        let mut frames = Vec::new();
        let size = i64::from(self.size);
        for i in 0..size {
            let seq = inserted_seq - size / 2 + i;
            if !self.potential_new_frame(seq) {
                continue;
            }
            let index = self.slot_index(seq);
            let Some(pkt) = self.slots[index].as_mut() else {
                continue;
            };
            pkt.continuous = true;
            if pkt.video_header.is_last_packet_in_frame {
                if let Some(frame) = self.extract_frame(seq) {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    /// Whether the packet at `seq` extends a continuous run: either it starts
    /// a frame, or its predecessor is present, continuous, and in the same
    /// frame (same timestamp).
    fn potential_new_frame(&self, seq: i64) -> bool {
        let Some(pkt) = self.slots[self.slot_index(seq)].as_ref() else {
            return false;
        };
        if pkt.sequence_number != seq {
            return false; // A different packet occupies this slot.
        }
        if pkt.video_header.is_first_packet_in_frame {
            return true;
        }
        let Some(prev) = self.slots[self.slot_index(seq - 1)].as_ref() else {
            return false;
        };
        prev.sequence_number == seq - 1 && prev.timestamp == pkt.timestamp && prev.continuous
    }

    /// Extracts the complete frame ending at `end_seq`, walking backwards to
    /// its first packet, then clears its slots. Returns `None` if any packet
    /// of the frame is missing or not yet continuous.
    fn extract_frame(&mut self, end_seq: i64) -> Option<Vec<BufferedPacket>> {
        let mut start_seq = end_seq;
        loop {
            let pkt = self.slots[self.slot_index(start_seq)].as_ref()?;
            if pkt.sequence_number != start_seq {
                return None;
            }
            if pkt.video_header.is_first_packet_in_frame {
                break;
            }
            start_seq -= 1;
            if end_seq - start_seq > i64::from(self.size) {
                return None; // No frame start within the buffer's span.
            }
        }

        for seq in start_seq..=end_seq {
            match self.slots[self.slot_index(seq)].as_ref() {
                Some(pkt) if pkt.sequence_number == seq && pkt.continuous => {}
                _ => return None,
            }
        }

        Some(
            (start_seq..=end_seq)
                .map(|seq| {
                    let index = self.slot_index(seq);
                    self.slots[index]
                        .take()
                        .expect("verified packet present above")
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vp8::{FrameType, NO_PICTURE_ID, NO_TEMPORAL_IDX, NO_TL0_PIC_IDX};

    fn packet(seq: i64, timestamp: u32, first: bool, last: bool, payload: &[u8]) -> BufferedPacket {
        BufferedPacket::new(
            seq,
            timestamp,
            Bytes::copy_from_slice(payload),
            VideoHeader {
                frame_type: if first { FrameType::Key } else { FrameType::Delta },
                is_first_packet_in_frame: first,
                is_last_packet_in_frame: last,
                picture_id: NO_PICTURE_ID,
                temporal_idx: NO_TEMPORAL_IDX,
                tl0_pic_idx: NO_TL0_PIC_IDX,
            },
            last,
        )
    }

    fn seqs(frame: &[BufferedPacket]) -> Vec<i64> {
        frame.iter().map(|p| p.sequence_number).collect()
    }

    #[test]
    fn invalid_sizes() {
        for size in [0, 16, 32, 100, 513, 4096] {
            PacketBuffer::new(size).unwrap_err();
        }
        for size in ALLOWED_SIZES {
            PacketBuffer::new(size).unwrap();
        }
    }

    #[test]
    fn single_packet_frame() {
        let mut b = PacketBuffer::new(512).unwrap();
        let frames = b.insert(packet(1000, 90_000, true, true, b"\x01"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000]);
    }

    #[test]
    fn multi_packet_frame_in_order() {
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        assert!(b.insert(packet(1001, 90_000, false, false, b"\x02")).is_empty());
        let frames = b.insert(packet(1002, 90_000, false, true, b"\x03"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000, 1001, 1002]);
    }

    #[test]
    fn multi_packet_frame_out_of_order() {
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1001, 90_000, false, false, b"\x02")).is_empty());
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        let frames = b.insert(packet(1002, 90_000, false, true, b"\x03"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000, 1001, 1002]);
    }

    #[test]
    fn missing_packet_holds_frame() {
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        assert!(b.insert(packet(1002, 90_000, false, true, b"\x03")).is_empty());
        let frames = b.insert(packet(1001, 90_000, false, false, b"\x02"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000, 1001, 1002]);
    }

    #[test]
    fn duplicates_ignored() {
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        let frames = b.insert(packet(1001, 90_000, false, true, b"\x02"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000, 1001]);
    }

    #[test]
    fn consecutive_frames() {
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        let frames = b.insert(packet(1001, 90_000, false, true, b"\x02"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000, 1001]);

        assert!(b.insert(packet(1002, 93_000, true, false, b"\x03")).is_empty());
        let frames = b.insert(packet(1003, 93_000, false, true, b"\x04"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1002, 1003]);
    }

    #[test]
    fn later_frame_completes_before_earlier() {
        // Frame X = {1000, 1001}, frame Y = {1002, 1003}. Arrival order
        // 1000, 1003, 1002, 1001: Y completes first (it doesn't wait on X),
        // then filling X's gap recovers X. The emission set is {Y, X}.
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        assert!(b.insert(packet(1003, 93_000, false, true, b"\x04")).is_empty());
        let frames = b.insert(packet(1002, 93_000, true, false, b"\x03"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1002, 1003]);
        let frames = b.insert(packet(1001, 90_000, false, true, b"\x02"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [1000, 1001]);
    }

    #[test]
    fn timestamp_change_breaks_continuity() {
        // A "last" packet whose predecessor has a different timestamp can't
        // close a frame that claims to span both.
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(1000, 90_000, true, false, b"\x01")).is_empty());
        assert!(b.insert(packet(1001, 93_000, false, true, b"\x02")).is_empty());
    }

    #[test]
    fn unwrapped_sequence_numbers_span_u16_wrap() {
        let mut b = PacketBuffer::new(512).unwrap();
        assert!(b.insert(packet(65_534, 90_000, true, false, b"\x01")).is_empty());
        assert!(b.insert(packet(65_535, 90_000, false, false, b"\x02")).is_empty());
        assert!(b.insert(packet(65_536, 90_000, false, false, b"\x03")).is_empty());
        let frames = b.insert(packet(65_537, 90_000, false, true, b"\x04"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [65_534, 65_535, 65_536, 65_537]);
    }

    #[test]
    fn negative_sequence_numbers_index_correctly() {
        let mut b = PacketBuffer::new(64).unwrap();
        assert!(b.insert(packet(-2, 90_000, true, false, b"\x01")).is_empty());
        let frames = b.insert(packet(-1, 90_000, false, true, b"\x02"));
        assert_eq!(frames.len(), 1);
        assert_eq!(seqs(&frames[0]), [-2, -1]);
    }

    #[test]
    fn any_arrival_order_yields_same_frames() {
        // The emitted frame set is independent of arrival order as long as no
        // packet falls outside the buffer's span.
        let packets = [
            packet(1000, 90_000, true, false, b"a"),
            packet(1001, 90_000, false, true, b"b"),
            packet(1002, 93_000, true, true, b"c"),
            packet(1003, 96_000, true, false, b"d"),
            packet(1004, 96_000, false, true, b"e"),
        ];
        let orders: &[[usize; 5]] = &[
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [2, 0, 4, 1, 3],
            [1, 3, 0, 4, 2],
            [3, 1, 4, 0, 2],
        ];
        for order in orders {
            let mut b = PacketBuffer::new(64).unwrap();
            let mut emitted: Vec<Vec<i64>> = Vec::new();
            for &i in order {
                for frame in b.insert(packets[i].clone()) {
                    emitted.push(seqs(&frame));
                }
            }
            emitted.sort();
            assert_eq!(
                emitted,
                [vec![1000, 1001], vec![1002], vec![1003, 1004]],
                "order {order:?}"
            );
        }
    }
}
