// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extension of wrapping counters to unbounded monotone values.

/// Extends a wrapping counter of the given modulus to an `i64`.
///
/// RTP sequence numbers (16-bit), VP8 picture IDs (15-bit), and TL0PICIDX
/// (8-bit) all wrap in normal operation. Differences are normalized into
/// `(-MODULUS/2, MODULUS/2]`, so any input whose true distance from the
/// previous value is below half the modulus unwraps correctly, forward or
/// backward.
///
/// A negative input is the "absent" sentinel and passes through as `-1`
/// without touching the unwrapper's state.
#[derive(Debug, Default)]
pub(crate) struct Unwrapper<const MODULUS: i64> {
    last: Option<i64>,
}

impl<const MODULUS: i64> Unwrapper<MODULUS> {
    pub fn unwrap(&mut self, value: i64) -> i64 {
        if value < 0 {
            return -1;
        }
        let value = value & (MODULUS - 1);
        let last = match self.last {
            None => {
                self.last = Some(value);
                return value;
            }
            Some(l) => l,
        };
        let mut diff = value - (last & (MODULUS - 1));
        if diff > MODULUS / 2 {
            diff -= MODULUS;
        } else if diff <= -(MODULUS / 2) {
            diff += MODULUS;
        }
        let unwrapped = last + diff;
        self.last = Some(unwrapped);
        unwrapped
    }
}

pub(crate) type SequenceNumberUnwrapper = Unwrapper<{ 1 << 16 }>;
pub(crate) type PictureIdUnwrapper = Unwrapper<{ 1 << 15 }>;
pub(crate) type Tl0PicIdxUnwrapper = Unwrapper<{ 1 << 8 }>;
