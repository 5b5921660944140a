// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference resolution from VP8 temporal layer information.

use std::collections::BTreeMap;

use log::debug;

use super::MAX_STASHED_FRAMES;
use crate::frame::EncodedFrame;
use crate::vp8::{
    FrameType, VideoHeader, NO_PICTURE_ID, NO_TEMPORAL_IDX, NO_TL0_PIC_IDX,
};
use crate::wrap::{PictureIdUnwrapper, Tl0PicIdxUnwrapper};

/// The maximum number of temporal layers; TID values above this clamp down.
const MAX_TEMPORAL_LAYERS: usize = 4;

/// Layer map rows older than this many TL0 steps are purged on a key frame.
const MAX_TL0_AGE: i64 = 10;

/// Stashed frames more than this many picture IDs behind the latest emitted
/// frame are purged on a key frame.
const MAX_STASHED_PID_AGE: i64 = 100;

/// Resolves references using VP8 temporal scalability metadata.
///
/// TL0PICIDX counts base-layer (TID 0) frames; each base-layer frame
/// references its predecessor, and enhancement-layer frames reference the
/// most recent frame in a lower layer of the same or previous TL0 window.
///
/// Frame IDs are unwrapped picture IDs. Each row of `layer_info` records, per
/// temporal layer, the latest picture ID seen within one TL0 window, stored
/// as `pid + 1` so that zero can mean "unset" even though picture ID zero is
/// legitimate.
#[derive(Debug)]
pub struct Vp8RefFinder {
    picture_id_unwrapper: PictureIdUnwrapper,
    tl0_unwrapper: Tl0PicIdxUnwrapper,

    /// `layer_info[tl0][tid] == pid + 1`, or 0 when unset.
    layer_info: BTreeMap<i64, [i64; MAX_TEMPORAL_LAYERS]>,

    /// Picture ID of the most recently emitted frame.
    last_picture_id: i64,

    got_initial_frame: bool,

    /// Pending frames, sorted by unwrapped picture ID. Unwrapped values are
    /// computed once at stash time; running a value through the unwrapper
    /// again would corrupt its state.
    stash: Vec<StashedFrame>,
}

#[derive(Debug)]
struct StashedFrame {
    frame: EncodedFrame,
    pid: i64,
    tl0: i64,
    tid: usize,
}

impl Default for Vp8RefFinder {
    fn default() -> Self {
        Vp8RefFinder {
            picture_id_unwrapper: PictureIdUnwrapper::default(),
            tl0_unwrapper: Tl0PicIdxUnwrapper::default(),
            layer_info: BTreeMap::new(),
            last_picture_id: -1,
            got_initial_frame: false,
            stash: Vec::new(),
        }
    }
}

impl Vp8RefFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes a frame, returning the frames now emittable in decodable
    /// order.
    pub fn manage_frame(&mut self, mut frame: EncodedFrame, header: &VideoHeader) -> Vec<EncodedFrame> {
        if header.temporal_idx == NO_TEMPORAL_IDX
            || header.tl0_pic_idx == NO_TL0_PIC_IDX
            || header.picture_id == NO_PICTURE_ID
        {
            return self.manage_incomplete_header(frame, header);
        }

        let pid = self
            .picture_id_unwrapper
            .unwrap(i64::from(header.picture_id));
        let tl0 = self.tl0_unwrapper.unwrap(i64::from(header.tl0_pic_idx));
        if pid < 0 || tl0 < 0 {
            return Vec::new();
        }

        frame.id = pid;
        let tid = (header.temporal_idx as usize).min(MAX_TEMPORAL_LAYERS - 1);

        if frame.frame_type == FrameType::Key && tid == 0 {
            self.handle_key_frame(frame, pid, tl0)
        } else {
            self.handle_delta_frame(frame, pid, tl0, tid)
        }
    }

    fn handle_key_frame(&mut self, mut frame: EncodedFrame, pid: i64, tl0: i64) -> Vec<EncodedFrame> {
        frame.num_references = 0;

        // A key frame starts a fresh TL0 window; enhancement-layer entries
        // from any earlier pass through this row no longer apply.
        let mut row = [0; MAX_TEMPORAL_LAYERS];
        row[0] = pid + 1;
        self.layer_info.insert(tl0, row);

        self.last_picture_id = pid;
        self.got_initial_frame = true;

        self.purge_old_state(tl0);

        let mut result = vec![frame];
        self.resolve_stash(&mut result);
        result
    }

    fn handle_delta_frame(
        &mut self,
        mut frame: EncodedFrame,
        pid: i64,
        tl0: i64,
        tid: usize,
    ) -> Vec<EncodedFrame> {
        if !self.got_initial_frame {
            self.stash_frame(frame, pid, tl0, tid);
            return Vec::new();
        }

        let Some(reference) = self.find_reference(tl0, tid) else {
            self.stash_frame(frame, pid, tl0, tid);
            return Vec::new();
        };

        frame.num_references = 1;
        frame.references[0] = reference;
        self.record_frame(pid, tl0, tid);

        let mut result = vec![frame];
        self.resolve_stash(&mut result);
        result
    }

    /// Picks the picture ID this frame depends on, or `None` if no suitable
    /// prior frame is known yet.
    fn find_reference(&self, tl0: i64, tid: usize) -> Option<i64> {
        if tid == 0 {
            // Base layer: the previous TL0 window's base frame.
            let row = self.layer_info.get(&(tl0 - 1))?;
            return (row[0] != 0).then(|| row[0] - 1);
        }

        // Enhancement layer: the nearest lower layer in this TL0 window.
        if let Some(row) = self.layer_info.get(&tl0) {
            for t in (0..tid).rev() {
                if row[t] != 0 {
                    return Some(row[t] - 1);
                }
            }
        }

        // Then the same or lower layer in the previous window.
        if let Some(row) = self.layer_info.get(&(tl0 - 1)) {
            for t in (0..=tid).rev() {
                if row[t] != 0 {
                    return Some(row[t] - 1);
                }
            }
        }

        // Last resort: any known base-layer frame. This is best-effort; the
        // chosen frame is not necessarily a true decoder dependency.
        self.layer_info
            .values()
            .find_map(|row| (row[0] != 0).then(|| row[0] - 1))
    }

    fn record_frame(&mut self, pid: i64, tl0: i64, tid: usize) {
        self.layer_info.entry(tl0).or_insert([0; MAX_TEMPORAL_LAYERS])[tid] = pid + 1;
        self.last_picture_id = pid;
    }

    fn purge_old_state(&mut self, current_tl0: i64) {
        self.layer_info.retain(|&tl0, _| current_tl0 - tl0 <= MAX_TL0_AGE);
        let last_pid = self.last_picture_id;
        self.stash
            .retain(|s| last_pid - s.pid < MAX_STASHED_PID_AGE);
    }

    fn stash_frame(&mut self, frame: EncodedFrame, pid: i64, tl0: i64, tid: usize) {
        if self.stash.len() >= MAX_STASHED_FRAMES {
            let evicted = self.stash.remove(0);
            debug!(
                "VP8 ref finder stash full; evicting frame with picture ID {}",
                evicted.pid
            );
        }
        let at = self.stash.partition_point(|s| s.pid < pid);
        self.stash.insert(at, StashedFrame { frame, pid, tl0, tid });
    }

    /// Repeatedly retries stashed frames with their stored unwrapped values,
    /// restarting after every success, until a full pass resolves nothing.
    fn resolve_stash(&mut self, result: &mut Vec<EncodedFrame>) {
        loop {
            let next = self
                .stash
                .iter()
                .position(|s| self.find_reference(s.tl0, s.tid).is_some());
            match next {
                Some(i) => {
                    let stashed = self.stash.remove(i);
                    let reference = self
                        .find_reference(stashed.tl0, stashed.tid)
                        .expect("reference found above");
                    let mut frame = stashed.frame;
                    frame.id = stashed.pid;
                    frame.num_references = 1;
                    frame.references[0] = reference;
                    self.record_frame(stashed.pid, stashed.tl0, stashed.tid);
                    result.push(frame);
                }
                None => break,
            }
        }
    }

    /// Handles a frame whose descriptor lacks part of the temporal layer
    /// information: with a picture ID it degrades to picture-ID-only
    /// behavior, otherwise the frame keeps its provisional ID and a delta
    /// gets a bare `id - 1` reference.
    fn manage_incomplete_header(
        &mut self,
        mut frame: EncodedFrame,
        header: &VideoHeader,
    ) -> Vec<EncodedFrame> {
        if header.picture_id != NO_PICTURE_ID {
            let pid = self
                .picture_id_unwrapper
                .unwrap(i64::from(header.picture_id));
            frame.id = pid;
        }

        match frame.frame_type {
            FrameType::Key => frame.num_references = 0,
            FrameType::Delta => {
                frame.num_references = 1;
                frame.references[0] = frame.id - 1;
            }
        }

        vec![frame]
    }

    /// Drops stashed frames with unwrapped picture ID below `id`.
    pub fn clear_to(&mut self, id: i64) {
        self.stash.retain(|s| s.pid >= id);
    }
}
