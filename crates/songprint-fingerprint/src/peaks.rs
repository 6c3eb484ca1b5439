// SPDX-License-Identifier: GPL-3.0-or-later

//! Landmark picking on the log-magnitude surface.
//!
//! A cell is a landmark when it equals the maximum of the square
//! neighborhood around it and is louder than the amplitude threshold.
//! Cells outside the surface count as `0.0` dB, the loudest possible value,
//! so points near the border face a stricter comparison and rarely qualify.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FingerprintConfig, Spectrogram};

/// Out-of-bounds fill value for the maximum filter.
const PAD_VALUE: f32 = 0.0;

/// A salient time/frequency point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Seconds from the start of the analyzed clip.
    pub time: f64,
    /// Hz
    pub frequency: f64,
    /// STFT frame index the landmark was found in.
    pub frame: usize,
    /// Frequency bin index the landmark was found in.
    pub bin: usize,
}

pub struct PeakExtractor {
    neighborhood_size: usize,
    threshold_db: f32,
}

impl PeakExtractor {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self {
            neighborhood_size: config.neighborhood_size,
            threshold_db: config.amplitude_threshold_db,
        }
    }

    /// Extract landmarks sorted ascending by time, ties by frequency.
    pub fn extract(&self, spectrogram: &Spectrogram) -> Vec<Landmark> {
        if spectrogram.is_empty() {
            return Vec::new();
        }

        let filtered = maximum_filter(&spectrogram.data, self.neighborhood_size);

        let mut landmarks = Vec::new();
        for (frame, (row, max_row)) in spectrogram.data.iter().zip(filtered.iter()).enumerate() {
            for (bin, (&value, &local_max)) in row.iter().zip(max_row.iter()).enumerate() {
                if value == local_max && value > self.threshold_db {
                    landmarks.push(Landmark {
                        time: spectrogram.frame_to_time(frame),
                        frequency: spectrogram.bin_to_freq(bin),
                        frame,
                        bin,
                    });
                }
            }
        }

        sort_landmarks(&mut landmarks);

        debug!(target: "peaks", landmarks = landmarks.len(), "extracted landmarks");
        landmarks
    }
}

/// Stable sort by time, then frequency.
pub fn sort_landmarks(landmarks: &mut [Landmark]) {
    landmarks.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then(a.frequency.total_cmp(&b.frequency))
    });
}

/// Square maximum filter over `[frame][bin]` data with constant padding.
///
/// The filter is separable: a running max along bins followed by one along
/// frames gives the same result as the full 2-D window.
fn maximum_filter(data: &[Vec<f32>], size: usize) -> Vec<Vec<f32>> {
    let along_bins: Vec<Vec<f32>> = data.iter().map(|row| max_1d(row, size)).collect();

    let num_frames = along_bins.len();
    let num_bins = along_bins.first().map_or(0, |r| r.len());
    let mut out = vec![vec![PAD_VALUE; num_bins]; num_frames];

    let mut column = vec![0.0f32; num_frames];
    for bin in 0..num_bins {
        for (frame, row) in along_bins.iter().enumerate() {
            column[frame] = row[bin];
        }
        for (frame, value) in max_1d(&column, size).into_iter().enumerate() {
            out[frame][bin] = value;
        }
    }

    out
}

/// Running maximum with window `[i - size/2, i - size/2 + size - 1]`.
fn max_1d(values: &[f32], size: usize) -> Vec<f32> {
    let len = values.len() as isize;
    let before = (size / 2) as isize;
    let after = size as isize - 1 - before;

    (0..len)
        .map(|i| {
            let lo = i - before;
            let hi = i + after;
            let mut best = if lo < 0 || hi >= len {
                PAD_VALUE
            } else {
                f32::NEG_INFINITY
            };
            for j in lo.max(0)..=hi.min(len - 1) {
                best = best.max(values[j as usize]);
            }
            best
        })
        .collect()
}
