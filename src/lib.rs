// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reassembly of VP8 video frames from RTP packets.
//!
//! This library turns a lossy, possibly reordered stream of RTP packets
//! carrying VP8 video into complete encoded frames whose inter-frame decoding
//! dependencies have been resolved. It's meant to sit between an RTP source
//! and a decoder or jitter buffer:
//!
//! *   [`buffer::PacketBuffer`] stages packets and detects frame completion
//!     from packet continuity, frame-boundary flags, and timestamp
//!     consistency.
//! *   [`frame::FrameAssembler`] concatenates a completed frame's payloads
//!     and stamps frame-level metadata.
//! *   [`refs`] computes which prior frames each new frame depends on, using
//!     whichever of three algorithms the stream's VP8 payload descriptor
//!     supports.
//! *   [`receiver::Receiver`] wires the above together per stream (keyed by
//!     SSRC), publishing completed frames through an attribute map attached
//!     to each read.
//!
//! Decoding, playout timing, and NACK generation are out of scope; so are
//! codecs other than VP8.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

mod error;

pub use error::Error;

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

pub mod buffer;
pub mod frame;
mod hex;
pub mod receiver;
pub mod refs;
mod rtp;
pub mod vp8;
mod wrap;

pub use buffer::{BufferedPacket, PacketBuffer};
pub use frame::{EncodedFrame, FrameAssembler};
pub use receiver::{
    Attributes, Receiver, ReceiverOptions, RtpReader, StreamInfo, ENCODED_FRAMES_KEY,
    ENCODED_FRAME_KEY,
};
pub use vp8::{FrameType, VideoHeader};
