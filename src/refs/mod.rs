// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of inter-frame decoding dependencies.
//!
//! A reference finder assigns each completed frame its stream-unique `id` and
//! the IDs of the frames it depends on, so a downstream decoder can consume
//! frames in a decodable order. Which algorithm applies depends on what the
//! stream's VP8 payload descriptor carries:
//!
//! | available on the frame's first packet | finder |
//! |---|---|
//! | temporal index, TL0PICIDX, and picture ID | [`vp8::Vp8RefFinder`] |
//! | picture ID only | [`frame_id::FrameIdOnlyRefFinder`] |
//! | neither | [`seq_num::SeqNumOnlyRefFinder`] |
//!
//! Frames whose dependencies haven't been seen yet are stashed (bounded,
//! oldest evicted) and re-emitted once a later frame resolves them.

use crate::frame::EncodedFrame;
use crate::vp8::{VideoHeader, NO_PICTURE_ID, NO_TEMPORAL_IDX, NO_TL0_PIC_IDX};

pub mod frame_id;
pub mod seq_num;
pub mod vp8;

pub use frame_id::FrameIdOnlyRefFinder;
pub use seq_num::SeqNumOnlyRefFinder;
pub use vp8::Vp8RefFinder;

/// The maximum number of frames stashed while waiting for dependencies.
/// On overflow the oldest stashed frame is evicted.
pub(crate) const MAX_STASHED_FRAMES: usize = 100;

/// Which reference finder a frame's video header calls for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RefFinderKind {
    SeqNumOnly,
    FrameIdOnly,
    Vp8,
}

impl RefFinderKind {
    /// Selects the finder for a frame from its first packet's video header.
    pub fn for_header(header: &VideoHeader) -> Self {
        if header.temporal_idx != NO_TEMPORAL_IDX
            && header.tl0_pic_idx != NO_TL0_PIC_IDX
            && header.picture_id != NO_PICTURE_ID
        {
            RefFinderKind::Vp8
        } else if header.picture_id != NO_PICTURE_ID {
            RefFinderKind::FrameIdOnly
        } else {
            RefFinderKind::SeqNumOnly
        }
    }
}

/// The closed set of per-stream reference finders.
///
/// Each finder is created lazily on the first frame that calls for it and
/// kept for the stream's lifetime; a stream may switch finders mid-flight
/// (e.g. when an encoder starts emitting picture IDs).
#[derive(Debug, Default)]
pub struct RefFinders {
    seq_num_only: Option<SeqNumOnlyRefFinder>,
    frame_id_only: Option<FrameIdOnlyRefFinder>,
    vp8: Option<Vp8RefFinder>,
}

impl RefFinders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes the frame to the finder selected by its header and returns the
    /// frames that are now emittable, in decodable order.
    pub fn manage_frame(&mut self, frame: EncodedFrame, header: &VideoHeader) -> Vec<EncodedFrame> {
        match RefFinderKind::for_header(header) {
            RefFinderKind::Vp8 => self
                .vp8
                .get_or_insert_with(Vp8RefFinder::new)
                .manage_frame(frame, header),
            RefFinderKind::FrameIdOnly => self
                .frame_id_only
                .get_or_insert_with(FrameIdOnlyRefFinder::new)
                .manage_frame(frame, header),
            RefFinderKind::SeqNumOnly => self
                .seq_num_only
                .get_or_insert_with(SeqNumOnlyRefFinder::new)
                .manage_frame(frame),
        }
    }

    /// Drops stashed state for frames with IDs below `id` in every finder
    /// created so far.
    pub fn clear_to(&mut self, id: i64) {
        if let Some(f) = &mut self.seq_num_only {
            f.clear_to(id);
        }
        if let Some(f) = &mut self.frame_id_only {
            f.clear_to(id);
        }
        if let Some(f) = &mut self.vp8 {
            f.clear_to(id);
        }
    }
}
