// SPDX-License-Identifier: GPL-3.0-or-later

//! Short-time Fourier analysis producing a log-magnitude surface.
//!
//! Frames are centered: the signal is zero padded by half a window on both
//! sides, so frame `k` is centered on sample `k * hop_size`. Magnitudes are
//! converted to decibels relative to the loudest cell of the clip, which makes
//! loudness relative per clip rather than absolute.

use std::f32::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};
use tracing::debug;

use crate::{FingerprintConfig, SampleBuffer};

/// Log-magnitude surface of one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    /// dB values laid out `[time_frame][frequency_bin]`, all `<= 0.0`.
    pub data: Vec<Vec<f32>>,
    pub fft_size: usize,
    pub hop_size: usize,
    pub sample_rate: u32,
    pub num_frames: usize,
    /// `fft_size / 2 + 1`
    pub num_bins: usize,
}

impl Spectrogram {
    fn empty(config: &FingerprintConfig, sample_rate: u32) -> Self {
        Self {
            data: Vec::new(),
            fft_size: config.fft_size,
            hop_size: config.hop_size,
            sample_rate,
            num_frames: 0,
            num_bins: config.frequency_bins(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_frames == 0
    }

    /// Center frequency of `bin` in Hz.
    pub fn bin_to_freq(&self, bin: usize) -> f64 {
        bin as f64 * self.sample_rate as f64 / self.fft_size as f64
    }

    /// Time in seconds attributed to `frame`, offset by half a window.
    pub fn frame_to_time(&self, frame: usize) -> f64 {
        (frame * self.hop_size + self.fft_size / 2) as f64 / self.sample_rate as f64
    }
}

/// Computes [`Spectrogram`]s with a fixed window and hop.
pub struct SpectralAnalyzer {
    config: FingerprintConfig,
    window: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new(config: FingerprintConfig) -> Self {
        let window = hann_window(config.fft_size);
        Self { config, window }
    }

    /// Analyze the whole buffer.
    ///
    /// Empty buffers and clips whose loudest bin does not rise above the
    /// amplitude floor produce an empty spectrogram instead of an error.
    pub fn analyze(&self, buffer: &SampleBuffer) -> Spectrogram {
        let n = self.config.fft_size;
        let hop = self.config.hop_size;

        if buffer.is_empty() || buffer.sample_rate == 0 {
            debug!(target: "spectral", "empty input, skipping analysis");
            return Spectrogram::empty(&self.config, buffer.sample_rate);
        }

        let half = n / 2;
        let mut padded = vec![0.0f32; buffer.len() + n];
        padded[half..half + buffer.len()].copy_from_slice(&buffer.samples);

        let num_frames = 1 + buffer.len() / hop;
        let num_bins = self.config.frequency_bins();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let mut scratch: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n];

        let mut magnitudes: Vec<Vec<f32>> = Vec::with_capacity(num_frames);
        let mut peak = 0.0f32;

        for frame in 0..num_frames {
            let start = frame * hop;
            for (i, slot) in scratch.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }

            fft.process(&mut scratch);

            let mags: Vec<f32> = scratch[..num_bins].iter().map(|c| c.norm()).collect();
            peak = mags.iter().copied().fold(peak, f32::max);
            magnitudes.push(mags);
        }

        if peak <= self.config.amin {
            debug!(target: "spectral", peak, "silent input, no usable transform");
            return Spectrogram::empty(&self.config, buffer.sample_rate);
        }

        let reference_db = 20.0 * peak.log10();
        let floor_db = -self.config.top_db;
        let amin = self.config.amin;

        let data = magnitudes
            .into_iter()
            .map(|frame| {
                frame
                    .into_iter()
                    .map(|m| (20.0 * m.max(amin).log10() - reference_db).max(floor_db))
                    .collect()
            })
            .collect();

        debug!(
            target: "spectral",
            frames = num_frames,
            bins = num_bins,
            sample_rate = buffer.sample_rate,
            "computed spectrogram"
        );

        Spectrogram {
            data,
            fft_size: n,
            hop_size: hop,
            sample_rate: buffer.sample_rate,
            num_frames,
            num_bins,
        }
    }

    /// Analyze only `[start, start + duration)` seconds of the buffer.
    pub fn analyze_range(
        &self,
        buffer: &SampleBuffer,
        start: f64,
        duration: Option<f64>,
    ) -> Spectrogram {
        self.analyze(&buffer.slice(start, duration))
    }
}

/// Periodic Hann window of length `size`.
fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, seconds: f32, rate: u32) -> SampleBuffer {
        let len = (seconds * rate as f32) as usize;
        let samples = (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect();
        SampleBuffer::new(samples, rate)
    }

    #[test]
    fn dimensions_follow_fft_and_hop() {
        let analyzer = SpectralAnalyzer::new(FingerprintConfig::default());
        let buffer = tone(440.0, 1.0, 22_050);
        let spec = analyzer.analyze(&buffer);

        assert_eq!(spec.num_bins, 1025);
        assert_eq!(spec.num_frames, 1 + 22_050 / 512);
        assert_eq!(spec.data.len(), spec.num_frames);
        assert!(spec.data.iter().all(|f| f.len() == spec.num_bins));
    }

    #[test]
    fn values_are_relative_to_clip_maximum() {
        let analyzer = SpectralAnalyzer::new(FingerprintConfig::default());
        let spec = analyzer.analyze(&tone(1000.0, 0.5, 22_050));

        let max = spec
            .data
            .iter()
            .flatten()
            .copied()
            .fold(f32::MIN, f32::max);
        let min = spec
            .data
            .iter()
            .flatten()
            .copied()
            .fold(f32::MAX, f32::min);

        assert!(max.abs() < 1e-4);
        assert!(min >= -80.0);
    }

    #[test]
    fn loudest_bin_tracks_tone_frequency() {
        let analyzer = SpectralAnalyzer::new(FingerprintConfig::default());
        let spec = analyzer.analyze(&tone(1000.0, 1.0, 22_050));

        let middle = &spec.data[spec.num_frames / 2];
        let (bin, _) = middle
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .expect("non-empty frame");

        let bin_width = 22_050.0 / 2048.0;
        assert!((spec.bin_to_freq(bin) - 1000.0).abs() <= bin_width);
    }

    #[test]
    fn silence_and_empty_input_yield_empty_surface() {
        let analyzer = SpectralAnalyzer::new(FingerprintConfig::default());

        let silent = SampleBuffer::new(vec![0.0; 22_050], 22_050);
        assert!(analyzer.analyze(&silent).is_empty());

        let empty = SampleBuffer::new(Vec::new(), 22_050);
        assert!(analyzer.analyze(&empty).is_empty());
    }

    #[test]
    fn frame_times_include_half_window_offset() {
        let analyzer = SpectralAnalyzer::new(FingerprintConfig::default());
        let spec = analyzer.analyze(&tone(440.0, 0.5, 22_050));
        assert_eq!(spec.frame_to_time(0), 1024.0 / 22_050.0);
        assert_eq!(spec.frame_to_time(2), (1024.0 + 1024.0) / 22_050.0);
    }

    #[test]
    fn odd_window_stays_inside_padding() {
        let config = FingerprintConfig {
            fft_size: 2047,
            ..Default::default()
        };
        let samples = (0..20_480)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 22_050.0).sin())
            .collect();
        let spec = SpectralAnalyzer::new(config).analyze(&SampleBuffer::new(samples, 22_050));
        assert_eq!(spec.num_frames, 1 + 20_480 / 512);
        assert_eq!(spec.num_bins, 1024);
    }

    #[test]
    fn range_analysis_only_covers_requested_window() {
        let analyzer = SpectralAnalyzer::new(FingerprintConfig::default());
        let buffer = tone(440.0, 4.0, 22_050);
        let spec = analyzer.analyze_range(&buffer, 1.0, Some(1.0));
        assert_eq!(spec.num_frames, 1 + 22_050 / 512);
    }
}
