// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// Version tag stored in the top bits of every hash.
pub const HASH_VERSION: u64 = 1;

const VERSION_SHIFT: u32 = 60;
const FIELD_BITS: u32 = 20;
const FIELD_MASK: u64 = (1 << FIELD_BITS) - 1;
const ANCHOR_SHIFT: u32 = 2 * FIELD_BITS;
const TARGET_SHIFT: u32 = FIELD_BITS;

/// Landmark-pair fingerprint.
///
/// `hash` identifies the pair; `anchor_time` is where the anchor landmark
/// sits inside the fingerprinted clip, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: u64,
    pub anchor_time: f64,
}

impl Fingerprint {
    pub fn new(hash: u64, anchor_time: f64) -> Self {
        Self { hash, anchor_time }
    }
}

/// Pack a landmark pair into a 64-bit hash.
///
/// Layout (version 1, most significant first):
///
/// | bits  | field                                  |
/// |-------|----------------------------------------|
/// | 60-63 | version                                |
/// | 40-59 | anchor frequency bin                   |
/// | 20-39 | target frequency bin                   |
/// | 0-19  | time delta in STFT frames              |
///
/// Fields wider than 20 bits are masked. The result is always below `2^63`,
/// so it survives a round trip through a signed 64-bit column.
pub fn landmark_hash(anchor_bin: usize, target_bin: usize, delta_frames: usize) -> u64 {
    (HASH_VERSION << VERSION_SHIFT)
        | ((anchor_bin as u64 & FIELD_MASK) << ANCHOR_SHIFT)
        | ((target_bin as u64 & FIELD_MASK) << TARGET_SHIFT)
        | (delta_frames as u64 & FIELD_MASK)
}
