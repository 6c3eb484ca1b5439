// SPDX-License-Identifier: GPL-3.0-or-later

//! Tunables for spectral analysis, peak picking and landmark pairing.
//!
//! Fingerprints produced under different settings do not agree with each
//! other, so the index must be built and queried with the same values.

use serde::{Deserialize, Serialize};

use crate::{FingerprintError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Rate (Hz) that decoded audio is resampled to before analysis.
    pub sample_rate: u32,
    /// STFT window length in samples, even.
    pub fft_size: usize,
    /// Distance between consecutive STFT frames in samples.
    pub hop_size: usize,
    /// Side length (frames and bins) of the square maximum filter.
    pub neighborhood_size: usize,
    /// A peak must be strictly louder than this, in dB relative to the clip maximum.
    pub amplitude_threshold_db: f32,
    /// Amplitude floor used before taking logarithms.
    pub amin: f32,
    /// Dynamic range kept below the clip maximum.
    pub top_db: f32,
    /// Start of the target zone, seconds after the anchor (inclusive).
    pub target_zone_start: f64,
    /// End of the target zone, seconds after the anchor (exclusive).
    pub target_zone_end: f64,
    /// Half-width of the target zone in Hz around the anchor frequency.
    pub target_zone_freq_width: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            fft_size: 2048,
            hop_size: 512,
            neighborhood_size: 15,
            amplitude_threshold_db: -50.0,
            amin: 1e-5,
            top_db: 80.0,
            target_zone_start: 0.1,
            target_zone_end: 0.9,
            target_zone_freq_width: 200.0,
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be > 0"));
        }
        if self.fft_size < 2 || self.fft_size % 2 != 0 {
            return Err(invalid("fft_size must be an even number of at least 2"));
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size {
            return Err(invalid("hop_size must be in 1..=fft_size"));
        }
        if self.neighborhood_size == 0 {
            return Err(invalid("neighborhood_size must be > 0"));
        }
        if self.amin.is_nan() || self.amin <= 0.0 {
            return Err(invalid("amin must be > 0"));
        }
        if self.target_zone_start < 0.0 || self.target_zone_end <= self.target_zone_start {
            return Err(invalid(
                "target zone must satisfy 0 <= target_zone_start < target_zone_end",
            ));
        }
        if self.target_zone_freq_width.is_nan() || self.target_zone_freq_width < 0.0 {
            return Err(invalid("target_zone_freq_width must be >= 0"));
        }
        Ok(())
    }

    /// Number of frequency bins in one STFT frame (`fft_size / 2 + 1`).
    pub fn frequency_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }
}

fn invalid(message: &str) -> FingerprintError {
    FingerprintError::InvalidConfig(message.to_string())
}
