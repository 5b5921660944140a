// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! VP8 RTP payload handling as specified in
//! [RFC 7741](https://datatracker.ietf.org/doc/html/rfc7741).

/// Indicates that the picture ID is not present in the payload descriptor.
pub const NO_PICTURE_ID: i32 = -1;

/// Indicates that the temporal layer index is not present.
pub const NO_TEMPORAL_IDX: i8 = -1;

/// Indicates that TL0PICIDX is not present.
pub const NO_TL0_PIC_IDX: i16 = -1;

/// The type of a video frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameType {
    /// An independently decodable frame (I-frame).
    Key,

    /// A frame depending on one or more prior frames (P-frame).
    Delta,
}

/// Per-packet video metadata derived from the RTP header and the VP8 payload
/// descriptor.
///
/// The sentinel value `-1` marks absent optional descriptor fields; see
/// [`NO_PICTURE_ID`], [`NO_TEMPORAL_IDX`], and [`NO_TL0_PIC_IDX`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VideoHeader {
    /// Key or delta. Only meaningful on the frame's first packet; later
    /// packets carry no payload header to inspect.
    pub frame_type: FrameType,

    /// True for a packet with `S == 1` and partition index 0.
    pub is_first_packet_in_frame: bool,

    /// True for a packet with the RTP marker bit set.
    pub is_last_packet_in_frame: bool,

    /// 7- or 15-bit picture ID, or [`NO_PICTURE_ID`]. Valid range 0..32768.
    pub picture_id: i32,

    /// Temporal layer index, or [`NO_TEMPORAL_IDX`]. Valid range 0..4.
    pub temporal_idx: i8,

    /// Temporal layer 0 picture index, or [`NO_TL0_PIC_IDX`]. Valid range
    /// 0..256.
    pub tl0_pic_idx: i16,
}

impl VideoHeader {
    /// Builds a video header from a parsed payload descriptor, the
    /// depacketized video payload, and the RTP marker bit.
    pub fn new(descriptor: &PayloadDescriptor, video_payload: &[u8], marker: bool) -> Self {
        let is_first = descriptor.start_of_partition && descriptor.partition_index == 0;

        // The inverse key frame bit is only present in the payload header of
        // the frame's first packet; elsewhere the first payload byte is
        // arbitrary bitstream data.
        let frame_type = if is_first {
            detect_frame_type(video_payload)
        } else {
            FrameType::Delta
        };

        VideoHeader {
            frame_type,
            is_first_packet_in_frame: is_first,
            is_last_packet_in_frame: marker,
            picture_id: descriptor.picture_id.map(i32::from).unwrap_or(NO_PICTURE_ID),
            temporal_idx: descriptor
                .temporal_idx
                .map(|t| t as i8)
                .unwrap_or(NO_TEMPORAL_IDX),
            tl0_pic_idx: descriptor
                .tl0_pic_idx
                .map(i16::from)
                .unwrap_or(NO_TL0_PIC_IDX),
        }
    }
}

/// Detects key vs delta from the first byte of the VP8 payload header.
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |Size0|H| VER |P|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// `P == 0` indicates a key frame. See RFC 7741 section 4.3.
pub fn detect_frame_type(vp8_payload: &[u8]) -> FrameType {
    match vp8_payload.first() {
        Some(b) if (b & 0x01) == 0 => FrameType::Key,
        _ => FrameType::Delta,
    }
}

/// A parsed VP8 payload descriptor; RFC 7741 section 4.2.
///
/// ```text
///      0 1 2 3 4 5 6 7
///     +-+-+-+-+-+-+-+-+
///     |X|R|N|S|R| PID | (REQUIRED)
///     +-+-+-+-+-+-+-+-+
/// X:  |I|L|T|K| RSV   | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// I:  |M| PictureID   | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
///     |   PictureID   | (M == 1)
///     +-+-+-+-+-+-+-+-+
/// L:  |   TL0PICIDX   | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// T/K:|TID|Y| KEYIDX  | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PayloadDescriptor {
    /// `N`: this packet may be discarded without affecting any other frame.
    pub non_reference: bool,

    /// `S`: this packet starts a VP8 partition.
    pub start_of_partition: bool,

    /// `PID`: index of the partition this packet belongs to.
    pub partition_index: u8,

    /// 7- or 15-bit picture ID, if the `I` bit was set.
    pub picture_id: Option<u16>,

    /// Temporal layer zero index, if the `L` bit was set.
    pub tl0_pic_idx: Option<u8>,

    /// Temporal layer index, if the `T` bit was set.
    pub temporal_idx: Option<u8>,

    /// `Y`: this frame depends only on the base temporal layer.
    pub layer_sync: bool,

    /// Temporal key frame index, if the `K` bit was set.
    pub key_idx: Option<u8>,
}

impl PayloadDescriptor {
    /// Parses the descriptor at the head of `payload`, returning it together
    /// with the depacketized video payload that follows it.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), PayloadDescriptorError> {
        let first = *payload.first().ok_or(PayloadDescriptorError {
            reason: "empty payload",
        })?;
        let mut descriptor = PayloadDescriptor {
            non_reference: (first & 0b0010_0000) != 0,
            start_of_partition: (first & 0b0001_0000) != 0,
            partition_index: first & 0b0000_0111,
            ..Default::default()
        };
        let extended = (first & 0b1000_0000) != 0;
        let mut pos = 1;
        if extended {
            let ext = *payload.get(pos).ok_or(PayloadDescriptorError {
                reason: "truncated extension byte",
            })?;
            pos += 1;
            let has_picture_id = (ext & 0b1000_0000) != 0;
            let has_tl0_pic_idx = (ext & 0b0100_0000) != 0;
            let has_tid = (ext & 0b0010_0000) != 0;
            let has_key_idx = (ext & 0b0001_0000) != 0;
            if has_picture_id {
                let b = *payload.get(pos).ok_or(PayloadDescriptorError {
                    reason: "truncated picture ID",
                })?;
                pos += 1;
                descriptor.picture_id = Some(if (b & 0b1000_0000) != 0 {
                    let low = *payload.get(pos).ok_or(PayloadDescriptorError {
                        reason: "truncated 15-bit picture ID",
                    })?;
                    pos += 1;
                    u16::from(b & 0b0111_1111) << 8 | u16::from(low)
                } else {
                    u16::from(b)
                });
            }
            if has_tl0_pic_idx {
                descriptor.tl0_pic_idx =
                    Some(*payload.get(pos).ok_or(PayloadDescriptorError {
                        reason: "truncated TL0PICIDX",
                    })?);
                pos += 1;
            }
            if has_tid || has_key_idx {
                let b = *payload.get(pos).ok_or(PayloadDescriptorError {
                    reason: "truncated TID/KEYIDX byte",
                })?;
                pos += 1;
                if has_tid {
                    descriptor.temporal_idx = Some((b >> 6) & 0b11);
                    descriptor.layer_sync = (b & 0b0010_0000) != 0;
                }
                if has_key_idx {
                    descriptor.key_idx = Some(b & 0b0001_1111);
                }
            }
        }
        if pos == payload.len() {
            return Err(PayloadDescriptorError {
                reason: "no payload after descriptor",
            });
        }
        Ok((descriptor, &payload[pos..]))
    }
}

#[derive(Debug)]
pub struct PayloadDescriptorError {
    pub reason: &'static str,
}

impl std::fmt::Display for PayloadDescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid VP8 payload descriptor: {}", self.reason)
    }
}
