// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-stream read pipeline: RTP in, resolved video frames out.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{trace, warn};

use crate::buffer::{self, BufferedPacket, PacketBuffer};
use crate::frame::{EncodedFrame, FrameAssembler};
use crate::refs::RefFinders;
use crate::rtp::RawPacket;
use crate::vp8::{PayloadDescriptor, VideoHeader};
use crate::wrap::SequenceNumberUnwrapper;
use crate::Error;

/// Attribute key under which all frames completed by a read are published,
/// as a `Vec<EncodedFrame>` in the order described at [`Receiver`].
pub const ENCODED_FRAMES_KEY: &str = "videoframe.EncodedFrames";

/// Attribute key under which the *first* frame completed by a read is
/// published, as an `EncodedFrame`.
///
/// Deprecated compatibility alias for [`ENCODED_FRAMES_KEY`]: when one read
/// completes several frames this key hides all but the first. New consumers
/// should read the plural key.
pub const ENCODED_FRAME_KEY: &str = "videoframe.EncodedFrame";

const DEFAULT_PACKET_BUFFER_SIZE: u16 = 512;

/// Description of one RTP stream, keyed by SSRC.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub ssrc: u32,

    /// Media type, e.g. `video/VP8`. The receiver only processes VP8
    /// (matched case-insensitively); other streams pass through untouched.
    pub mime_type: String,
}

/// Heterogeneous key-value metadata attached to each read.
#[derive(Default)]
pub struct Attributes(HashMap<&'static str, Box<dyn Any + Send + Sync>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`, if present with type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.0.get(key).and_then(|v| v.downcast_ref())
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.0.insert(key, Box::new(value));
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// A source of RTP packets.
///
/// `read` fills `buf` with the next packet and returns its length. The buffer
/// is owned by the caller and reused across calls, so implementations must
/// not retain references into it.
pub trait RtpReader {
    fn read(&mut self, buf: &mut [u8], attrs: &mut Attributes) -> Result<usize, Error>;
}

impl<F> RtpReader for F
where
    F: FnMut(&mut [u8], &mut Attributes) -> Result<usize, Error>,
{
    fn read(&mut self, buf: &mut [u8], attrs: &mut Attributes) -> Result<usize, Error> {
        self(buf, attrs)
    }
}

/// Options for [`Receiver::new`].
#[derive(Clone, Debug)]
pub struct ReceiverOptions {
    packet_buffer_size: u16,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        ReceiverOptions {
            packet_buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
        }
    }
}

impl ReceiverOptions {
    /// Sets the per-stream packet buffer capacity; must be one of
    /// [`crate::buffer::ALLOWED_SIZES`]. Default is 512.
    pub fn packet_buffer_size(mut self, size: u16) -> Self {
        self.packet_buffer_size = size;
        self
    }
}

/// Assembles VP8 video frames from the RTP streams bound to it.
///
/// Wrap each VP8 stream's packet source with [`Receiver::bind_remote_stream`]
/// and read through the returned [`BoundStream`]. When a read completes one
/// or more frames, they appear on that read's [`Attributes`]:
///
/// ```text
/// let n = bound.read(&mut buf, &mut attrs)?;
/// if let Some(frames) = attrs.get::<Vec<EncodedFrame>>(ENCODED_FRAMES_KEY) {
///     for frame in frames { /* ... */ }
/// }
/// ```
///
/// Within one stream, frames are published in the order the packet buffer
/// detects their completion, and a frame's references only name frames
/// already published for that stream. Multiple streams (distinct SSRCs) may
/// be read concurrently; each stream's own reads must be serial.
#[derive(Debug)]
pub struct Receiver {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    streams: Mutex<HashMap<u32, StreamState>>,
    packet_buffer_size: u16,
}

#[derive(Debug)]
struct StreamState {
    packet_buffer: PacketBuffer,
    assembler: FrameAssembler,
    seq_unwrapper: SequenceNumberUnwrapper,
    ref_finders: RefFinders,
}

impl Receiver {
    /// Creates a receiver, failing on an invalid packet buffer size.
    pub fn new(options: ReceiverOptions) -> Result<Self, Error> {
        buffer::validate_size(options.packet_buffer_size)?;
        Ok(Receiver {
            inner: Arc::new(Inner {
                streams: Mutex::new(HashMap::new()),
                packet_buffer_size: options.packet_buffer_size,
            }),
        })
    }

    /// Wraps `reader` with the frame reassembly pipeline for the stream
    /// described by `info`.
    ///
    /// Non-VP8 streams (and streams whose state can't be created) get a
    /// transparent pass-through wrapper. Binding an SSRC that is already
    /// bound reuses its existing state.
    pub fn bind_remote_stream<R: RtpReader>(
        &self,
        info: &StreamInfo,
        reader: R,
    ) -> BoundStream<R> {
        if !info.mime_type.eq_ignore_ascii_case("video/VP8") {
            return BoundStream {
                binding: None,
                reader,
            };
        }
        match self.inner.get_or_create_stream(info.ssrc) {
            Ok(()) => BoundStream {
                binding: Some((self.inner.clone(), info.ssrc)),
                reader,
            },
            Err(e) => {
                warn!("failed to create stream state for SSRC {}: {}", info.ssrc, e);
                BoundStream {
                    binding: None,
                    reader,
                }
            }
        }
    }

    /// Removes the stream's state. In-flight reads on a previously returned
    /// [`BoundStream`] keep working but observe no further frame emissions.
    pub fn unbind_remote_stream(&self, info: &StreamInfo) {
        let mut streams = self.inner.streams.lock().expect("streams mutex poisoned");
        streams.remove(&info.ssrc);
    }

    /// Drops all per-stream state. Stashed frames are forgotten, not flushed.
    pub fn close(&self) {
        let mut streams = self.inner.streams.lock().expect("streams mutex poisoned");
        streams.clear();
    }
}

impl Inner {
    fn get_or_create_stream(&self, ssrc: u32) -> Result<(), Error> {
        let mut streams = self.streams.lock().expect("streams mutex poisoned");
        if !streams.contains_key(&ssrc) {
            let state = StreamState {
                packet_buffer: PacketBuffer::new(self.packet_buffer_size)?,
                assembler: FrameAssembler::new(),
                seq_unwrapper: SequenceNumberUnwrapper::default(),
                ref_finders: RefFinders::new(),
            };
            streams.insert(ssrc, state);
        }
        Ok(())
    }

    /// Runs one received packet through the reassembly pipeline, returning
    /// any frames it completed and resolved.
    ///
    /// Malformed packets produce no frames and no errors; the caller passes
    /// the raw bytes through either way.
    fn process_packet(&self, ssrc: u32, data: &[u8]) -> Vec<EncodedFrame> {
        let (rtp, payload_range) = match RawPacket::new(data) {
            Ok(p) => p,
            Err(e) => {
                trace!("passing through SSRC {ssrc:08x}: {e}");
                return Vec::new();
            }
        };
        let (descriptor, video_payload) = match PayloadDescriptor::parse(&data[payload_range]) {
            Ok(p) => p,
            Err(e) => {
                trace!("passing through SSRC {ssrc:08x}: {e}");
                return Vec::new();
            }
        };
        let header = VideoHeader::new(&descriptor, video_payload, rtp.mark());

        let mut streams = self.streams.lock().expect("streams mutex poisoned");
        let Some(state) = streams.get_mut(&ssrc) else {
            return Vec::new(); // Unbound or closed mid-read.
        };

        let seq = state
            .seq_unwrapper
            .unwrap(i64::from(rtp.sequence_number()));

        // The read buffer is reused, so the depacketized payload must be
        // copied before it outlives this call.
        let pkt = BufferedPacket::new(
            seq,
            rtp.timestamp(),
            Bytes::copy_from_slice(video_payload),
            header,
            rtp.mark(),
        );

        let mut resolved = Vec::new();
        for packets in state.packet_buffer.insert(pkt) {
            let Some(frame) = state.assembler.assemble(&packets) else {
                continue;
            };
            resolved.extend(state.ref_finders.manage_frame(frame, &packets[0].video_header));
        }
        resolved
    }
}

/// A stream's packet source, wrapped with frame reassembly.
///
/// Returned by [`Receiver::bind_remote_stream`]. Reads delegate to the
/// wrapped reader; completed frames appear on the read's [`Attributes`].
pub struct BoundStream<R> {
    /// Shared receiver state and this stream's SSRC, or `None` when the
    /// stream isn't processed (non-VP8 or state creation failed).
    binding: Option<(Arc<Inner>, u32)>,
    reader: R,
}

impl<R: RtpReader> RtpReader for BoundStream<R> {
    fn read(&mut self, buf: &mut [u8], attrs: &mut Attributes) -> Result<usize, Error> {
        let n = self.reader.read(buf, attrs)?;
        let Some((inner, ssrc)) = &self.binding else {
            return Ok(n);
        };
        let frames = inner.process_packet(*ssrc, &buf[..n]);
        if let Some(first) = frames.first() {
            attrs.set(ENCODED_FRAME_KEY, first.clone());
            attrs.set(ENCODED_FRAMES_KEY, frames);
        }
        Ok(n)
    }
}
