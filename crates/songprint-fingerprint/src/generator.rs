// SPDX-License-Identifier: GPL-3.0-or-later

//! Landmark pairing and hash emission.
//!
//! Every landmark acts as an anchor. Its target zone spans
//! `[anchor + target_zone_start, anchor + target_zone_end)` in time and
//! `anchor ± target_zone_freq_width` in frequency. Each later landmark in
//! the zone is paired with the anchor and hashed with [`landmark_hash`].
//!
//! The forward scan stops at the first landmark at or past the upper time
//! bound. That stop decides ties: a landmark exactly on the lower bound is
//! paired, one exactly on the upper bound is not.

use std::borrow::Cow;

use tracing::debug;

use crate::fingerprint::landmark_hash;
use crate::peaks::sort_landmarks;
use crate::{Fingerprint, FingerprintConfig, Landmark};

pub struct FingerprintGenerator {
    zone_start: f64,
    zone_end: f64,
    freq_width: f64,
}

impl FingerprintGenerator {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self {
            zone_start: config.target_zone_start,
            zone_end: config.target_zone_end,
            freq_width: config.target_zone_freq_width,
        }
    }

    /// Pair landmarks and emit `(hash, anchor_time)` fingerprints.
    ///
    /// Input that is not already time-sorted is sorted first. Output order
    /// follows anchor order but carries no other guarantee.
    pub fn generate(&self, landmarks: &[Landmark]) -> Vec<Fingerprint> {
        let landmarks: Cow<'_, [Landmark]> = if is_time_sorted(landmarks) {
            Cow::Borrowed(landmarks)
        } else {
            let mut owned = landmarks.to_vec();
            sort_landmarks(&mut owned);
            Cow::Owned(owned)
        };

        let mut fingerprints = Vec::new();

        for (i, anchor) in landmarks.iter().enumerate() {
            let t_min = anchor.time + self.zone_start;
            let t_max = anchor.time + self.zone_end;
            let f_min = anchor.frequency - self.freq_width;
            let f_max = anchor.frequency + self.freq_width;

            for target in &landmarks[i + 1..] {
                if target.time >= t_max {
                    break;
                }
                if target.time < t_min || target.frequency < f_min || target.frequency > f_max {
                    continue;
                }

                let delta_frames = target.frame.saturating_sub(anchor.frame);
                let hash = landmark_hash(anchor.bin, target.bin, delta_frames);
                fingerprints.push(Fingerprint::new(hash, anchor.time));
            }
        }

        debug!(
            target: "fingerprint",
            landmarks = landmarks.len(),
            fingerprints = fingerprints.len(),
            "generated fingerprints"
        );

        fingerprints
    }
}

fn is_time_sorted(landmarks: &[Landmark]) -> bool {
    landmarks.windows(2).all(|w| w[0].time <= w[1].time)
}
