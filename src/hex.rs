// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded hex dumps of video payloads for `Debug` output.
//!
//! [`crate::EncodedFrame`] and [`crate::BufferedPacket`] carry whole encoded
//! pictures or slices of them; dumping one in full would swamp a log line.
//! `PayloadHex` prints the payload length and a capped prefix of its bytes.

use pretty_hex::PrettyHex;

pub struct PayloadHex<'a> {
    payload: &'a [u8],
    limit: usize,
}

impl<'a> PayloadHex<'a> {
    pub fn new(payload: &'a [u8], limit: usize) -> Self {
        Self { payload, limit }
    }
}

impl std::fmt::Debug for PayloadHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.payload.len().min(self.limit);
        write!(f, "{} bytes", self.payload.len())?;
        if shown == 0 {
            return Ok(());
        }
        // Offsets and hex only; the ASCII gutter is useless for bitstream
        // data.
        let config = pretty_hex::HexConfig {
            title: false,
            ascii: false,
            ..Default::default()
        };
        write!(f, "\n{:?}", self.payload[..shown].hex_conf(config))?;
        if shown < self.payload.len() {
            write!(f, "\n... {} more bytes elided", self.payload.len() - shown)?;
        }
        Ok(())
    }
}
