// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference resolution from sequence numbers alone.

use log::debug;

use super::MAX_STASHED_FRAMES;
use crate::frame::EncodedFrame;
use crate::vp8::FrameType;

/// Resolves references when the payload descriptor carries neither a picture
/// ID nor temporal layer information.
///
/// Every delta frame is assumed to depend on the frame immediately before it:
/// a frame whose first packet directly follows the previous frame's last
/// packet references that frame. Frame IDs are the unwrapped sequence number
/// of the frame's first packet, so IDs and references share one ID space.
///
/// Delta frames arriving out of order wait in a bounded stash until the chain
/// reaches them; frames from before the current GOP are discarded.
#[derive(Debug)]
pub struct SeqNumOnlyRefFinder {
    /// First-packet sequence number of the current GOP's key frame.
    last_gop_first_seq: i64,

    /// First-packet sequence number of the last emitted frame.
    last_frame_first_seq: i64,

    /// Last-packet sequence number of the last emitted frame.
    last_frame_last_seq: i64,

    got_initial_frame: bool,

    /// Pending frames, sorted by `first_seq_num_unwrapped`.
    stash: Vec<EncodedFrame>,
}

impl Default for SeqNumOnlyRefFinder {
    fn default() -> Self {
        SeqNumOnlyRefFinder {
            last_gop_first_seq: -1,
            last_frame_first_seq: -1,
            last_frame_last_seq: -1,
            got_initial_frame: false,
            stash: Vec::new(),
        }
    }
}

impl SeqNumOnlyRefFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes a frame, returning the frames now emittable in decodable
    /// order (the input frame first, then any stashed frames it unblocked).
    pub fn manage_frame(&mut self, frame: EncodedFrame) -> Vec<EncodedFrame> {
        match frame.frame_type {
            FrameType::Key => self.handle_key_frame(frame),
            FrameType::Delta => self.handle_delta_frame(frame),
        }
    }

    fn handle_key_frame(&mut self, mut frame: EncodedFrame) -> Vec<EncodedFrame> {
        frame.id = frame.first_seq_num_unwrapped;
        frame.num_references = 0;

        self.last_gop_first_seq = frame.first_seq_num_unwrapped;
        self.last_frame_first_seq = frame.first_seq_num_unwrapped;
        self.last_frame_last_seq = frame.last_seq_num_unwrapped;
        self.got_initial_frame = true;

        // Frames from before this key frame can no longer matter.
        self.clear_stash_before(frame.first_seq_num_unwrapped);

        let mut result = vec![frame];
        self.resolve_stash(&mut result);
        result
    }

    fn handle_delta_frame(&mut self, frame: EncodedFrame) -> Vec<EncodedFrame> {
        if !self.got_initial_frame {
            self.stash_frame(frame);
            return Vec::new();
        }

        if frame.first_seq_num_unwrapped == self.last_frame_last_seq + 1 {
            let mut result = vec![self.resolve_continuous(frame)];
            self.resolve_stash(&mut result);
            return result;
        }

        if frame.first_seq_num_unwrapped < self.last_gop_first_seq {
            return Vec::new(); // Belongs to an earlier GOP; drop.
        }

        self.stash_frame(frame);
        Vec::new()
    }

    /// Emits a delta frame whose first packet follows the previous frame's
    /// last packet, and advances the chain.
    fn resolve_continuous(&mut self, mut frame: EncodedFrame) -> EncodedFrame {
        frame.id = frame.first_seq_num_unwrapped;
        frame.num_references = 1;
        frame.references[0] = self.last_frame_first_seq;
        self.last_frame_first_seq = frame.first_seq_num_unwrapped;
        self.last_frame_last_seq = frame.last_seq_num_unwrapped;
        frame
    }

    /// Repeatedly emits the stashed frame continuing the chain, until a full
    /// pass resolves nothing.
    fn resolve_stash(&mut self, result: &mut Vec<EncodedFrame>) {
        loop {
            let next = self
                .stash
                .iter()
                .position(|f| f.first_seq_num_unwrapped == self.last_frame_last_seq + 1);
            match next {
                Some(i) => {
                    let frame = self.stash.remove(i);
                    result.push(self.resolve_continuous(frame));
                }
                None => break,
            }
        }
    }

    fn stash_frame(&mut self, frame: EncodedFrame) {
        if self.stash.len() >= MAX_STASHED_FRAMES {
            let evicted = self.stash.remove(0);
            debug!(
                "seq num ref finder stash full; evicting frame at seq {}",
                evicted.first_seq_num_unwrapped
            );
        }
        let at = self
            .stash
            .partition_point(|f| f.first_seq_num_unwrapped < frame.first_seq_num_unwrapped);
        self.stash.insert(at, frame);
    }

    fn clear_stash_before(&mut self, seq: i64) {
        self.stash.retain(|f| f.first_seq_num_unwrapped >= seq);
    }

    /// Drops stashed frames whose first sequence number is below `id`.
    pub fn clear_to(&mut self, id: i64) {
        self.clear_stash_before(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MAX_REFERENCES;

    fn frame(frame_type: FrameType, first_seq: i64, last_seq: i64) -> EncodedFrame {
        EncodedFrame {
            id: 0,
            first_seq_num: (first_seq & 0xFFFF) as u16,
            last_seq_num: (last_seq & 0xFFFF) as u16,
            first_seq_num_unwrapped: first_seq,
            last_seq_num_unwrapped: last_seq,
            timestamp: 0,
            frame_type,
            data: Vec::new(),
            num_references: 0,
            references: [0; MAX_REFERENCES],
        }
    }

    #[test]
    fn key_frame_starts_gop() {
        let mut f = SeqNumOnlyRefFinder::new();
        let result = f.manage_frame(frame(FrameType::Key, 1000, 1002));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 1000);
        assert_eq!(result[0].references(), &[] as &[i64]);
    }

    #[test]
    fn continuous_delta_references_previous_frame() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 1000, 1002));
        let result = f.manage_frame(frame(FrameType::Delta, 1003, 1004));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 1003);
        assert_eq!(result[0].references(), &[1000]);

        let result = f.manage_frame(frame(FrameType::Delta, 1005, 1005));
        assert_eq!(result[0].id, 1005);
        assert_eq!(result[0].references(), &[1003]);
    }

    #[test]
    fn delta_before_any_key_frame_is_stashed() {
        let mut f = SeqNumOnlyRefFinder::new();
        assert!(f.manage_frame(frame(FrameType::Delta, 1003, 1004)).is_empty());

        // The key frame both emits itself and unblocks the stashed delta.
        let result = f.manage_frame(frame(FrameType::Key, 1000, 1002));
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, 1000);
        assert_eq!(result[1].id, 1003);
        assert_eq!(result[1].references(), &[1000]);
    }

    #[test]
    fn out_of_order_deltas_resolve_in_sequence_order() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 1000, 1000));
        assert!(f.manage_frame(frame(FrameType::Delta, 1003, 1003)).is_empty());
        assert!(f.manage_frame(frame(FrameType::Delta, 1002, 1002)).is_empty());

        let result = f.manage_frame(frame(FrameType::Delta, 1001, 1001));
        assert_eq!(result.len(), 3);
        assert_eq!(
            result.iter().map(|f| f.id).collect::<Vec<_>>(),
            [1001, 1002, 1003]
        );
        assert_eq!(result[0].references(), &[1000]);
        assert_eq!(result[1].references(), &[1001]);
        assert_eq!(result[2].references(), &[1002]);
    }

    #[test]
    fn delta_from_earlier_gop_is_discarded() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 1000, 1000));
        assert!(f.manage_frame(frame(FrameType::Delta, 900, 900)).is_empty());
        // Still not emitted once the chain advances past it.
        assert_eq!(f.manage_frame(frame(FrameType::Delta, 1001, 1001)).len(), 1);
    }

    #[test]
    fn new_key_frame_purges_older_stash() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 1000, 1000));
        assert!(f.manage_frame(frame(FrameType::Delta, 1005, 1005)).is_empty());

        // A later key frame makes the stashed 1005 unreachable.
        let result = f.manage_frame(frame(FrameType::Key, 1010, 1010));
        assert_eq!(result.len(), 1);
        assert!(f.manage_frame(frame(FrameType::Delta, 1011, 1011)).len() == 1);
        // 1005 never resurfaces.
        assert!(f.manage_frame(frame(FrameType::Delta, 1006, 1006)).is_empty());
    }

    #[test]
    fn stash_capped_with_oldest_evicted() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 0, 0));
        for i in 0..(MAX_STASHED_FRAMES as i64 + 10) {
            // Leave gaps so nothing resolves.
            let seq = 10 + 2 * i;
            f.manage_frame(frame(FrameType::Delta, seq, seq));
        }
        assert_eq!(f.stash.len(), MAX_STASHED_FRAMES);
        assert_eq!(f.stash[0].first_seq_num_unwrapped, 10 + 2 * 10);
    }

    #[test]
    fn ids_follow_unwrapped_sequence_numbers_across_wrap() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 65_534, 65_535));
        let result = f.manage_frame(frame(FrameType::Delta, 65_536, 65_537));
        assert_eq!(result[0].id, 65_536);
        assert_eq!(result[0].references(), &[65_534]);
    }

    #[test]
    fn clear_to_drops_stashed_frames() {
        let mut f = SeqNumOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key, 1000, 1000));
        f.manage_frame(frame(FrameType::Delta, 1002, 1002));
        f.manage_frame(frame(FrameType::Delta, 1004, 1004));
        f.clear_to(1003);
        assert_eq!(f.stash.len(), 1);
        assert_eq!(f.stash[0].first_seq_num_unwrapped, 1004);
    }
}
