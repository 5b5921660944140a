// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference resolution from the picture ID alone.

use crate::frame::EncodedFrame;
use crate::vp8::{FrameType, VideoHeader, NO_PICTURE_ID};
use crate::wrap::PictureIdUnwrapper;

/// Resolves references when the payload descriptor carries a picture ID but
/// no temporal layer information.
///
/// Frame IDs are unwrapped picture IDs; every delta frame references `id - 1`.
/// Unlike the other finders this one keeps no stash and never waits for a key
/// frame: it trusts the downstream consumer to handle missing references.
#[derive(Debug, Default)]
pub struct FrameIdOnlyRefFinder {
    unwrapper: PictureIdUnwrapper,
}

impl FrameIdOnlyRefFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the frame's ID and reference and emits it immediately.
    ///
    /// A frame without a picture ID is emitted unchanged, keeping its
    /// provisional ID.
    pub fn manage_frame(&mut self, mut frame: EncodedFrame, header: &VideoHeader) -> Vec<EncodedFrame> {
        if header.picture_id == NO_PICTURE_ID {
            return vec![frame];
        }

        let unwrapped = self.unwrapper.unwrap(i64::from(header.picture_id));
        if unwrapped < 0 {
            return Vec::new();
        }
        frame.id = unwrapped;

        match frame.frame_type {
            FrameType::Key => frame.num_references = 0,
            FrameType::Delta => {
                frame.num_references = 1;
                frame.references[0] = frame.id - 1;
            }
        }

        vec![frame]
    }

    /// No stash to clear; the unwrapper state is retained.
    pub fn clear_to(&mut self, _id: i64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MAX_REFERENCES;
    use crate::vp8::{NO_TEMPORAL_IDX, NO_TL0_PIC_IDX};

    fn frame(frame_type: FrameType) -> EncodedFrame {
        EncodedFrame {
            id: 7,
            first_seq_num: 0,
            last_seq_num: 0,
            first_seq_num_unwrapped: 0,
            last_seq_num_unwrapped: 0,
            timestamp: 0,
            frame_type,
            data: Vec::new(),
            num_references: 0,
            references: [0; MAX_REFERENCES],
        }
    }

    fn header(picture_id: i32) -> VideoHeader {
        VideoHeader {
            frame_type: FrameType::Key,
            is_first_packet_in_frame: true,
            is_last_packet_in_frame: true,
            picture_id,
            temporal_idx: NO_TEMPORAL_IDX,
            tl0_pic_idx: NO_TL0_PIC_IDX,
        }
    }

    #[test]
    fn key_frame() {
        let mut f = FrameIdOnlyRefFinder::new();
        let result = f.manage_frame(frame(FrameType::Key), &header(100));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 100);
        assert_eq!(result[0].references(), &[] as &[i64]);
    }

    #[test]
    fn delta_references_preceding_picture_id() {
        let mut f = FrameIdOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key), &header(100));
        let result = f.manage_frame(frame(FrameType::Delta), &header(101));
        assert_eq!(result[0].id, 101);
        assert_eq!(result[0].references(), &[100]);
    }

    #[test]
    fn picture_id_wrap() {
        let mut f = FrameIdOnlyRefFinder::new();
        f.manage_frame(frame(FrameType::Key), &header(32_766));
        f.manage_frame(frame(FrameType::Delta), &header(32_767));
        let result = f.manage_frame(frame(FrameType::Delta), &header(0));
        assert_eq!(result[0].id, 32_768);
        assert_eq!(result[0].references(), &[32_767]);
    }

    #[test]
    fn no_picture_id_passes_frame_through() {
        let mut f = FrameIdOnlyRefFinder::new();
        let result = f.manage_frame(frame(FrameType::Delta), &header(NO_PICTURE_ID));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 7); // Provisional ID untouched.
        assert_eq!(result[0].num_references, 0);
    }
}
