// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end fingerprinting of a sample buffer.

use tracing::debug;

use crate::decoder::resample;
use crate::{
    Fingerprint, FingerprintConfig, FingerprintError, FingerprintGenerator, PeakExtractor, Result,
    SampleBuffer, SpectralAnalyzer,
};

/// Runs spectral analysis, peak extraction and pairing with one configuration.
pub struct Fingerprinter {
    sample_rate: u32,
    analyzer: SpectralAnalyzer,
    extractor: PeakExtractor,
    generator: FingerprintGenerator,
}

impl Fingerprinter {
    /// Build a fingerprinter, rejecting invalid configurations up front.
    pub fn new(config: FingerprintConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sample_rate: config.sample_rate,
            extractor: PeakExtractor::new(&config),
            generator: FingerprintGenerator::new(&config),
            analyzer: SpectralAnalyzer::new(config),
        })
    }

    /// Rate every buffer is analyzed at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fingerprint the whole buffer.
    ///
    /// Buffers at another rate are resampled first, since bin and frame
    /// indices only agree between clips analyzed at the same rate. Silent or
    /// empty audio gives an empty set, never an error.
    pub fn fingerprint(&self, buffer: &SampleBuffer) -> Result<Vec<Fingerprint>> {
        if buffer.is_empty() {
            return Ok(Vec::new());
        }
        if buffer.sample_rate == 0 {
            return Err(FingerprintError::Resample(
                "input declares a sample rate of 0".to_string(),
            ));
        }

        let spectrogram = if buffer.sample_rate == self.sample_rate {
            self.analyzer.analyze(buffer)
        } else {
            debug!(
                target: "fingerprint",
                from = buffer.sample_rate,
                to = self.sample_rate,
                "resampling query before analysis"
            );
            self.analyzer.analyze(&resample(buffer.clone(), self.sample_rate)?)
        };

        let landmarks = self.extractor.extract(&spectrogram);
        if landmarks.is_empty() {
            debug!(target: "fingerprint", "no landmarks above threshold");
            return Ok(Vec::new());
        }
        Ok(self.generator.generate(&landmarks))
    }

    /// Fingerprint `[start, start + duration)` seconds of the buffer.
    ///
    /// Anchor times are relative to `start`.
    pub fn fingerprint_range(
        &self,
        buffer: &SampleBuffer,
        start: f64,
        duration: Option<f64>,
    ) -> Result<Vec<Fingerprint>> {
        self.fingerprint(&buffer.slice(start, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::f32::consts::PI;

    /// A few seconds of stepped tones so landmarks land at distinct times.
    fn melody(rate: u32) -> SampleBuffer {
        let notes = [440.0f32, 660.0, 550.0, 880.0, 495.0, 740.0, 587.0, 990.0];
        let note_len = (0.25 * rate as f32) as usize;
        let mut samples = Vec::with_capacity(notes.len() * note_len * 2);
        for round in 0..2 {
            for (k, freq) in notes.iter().enumerate() {
                let f = freq * (1.0 + round as f32 * 0.1) + k as f32;
                samples.extend(
                    (0..note_len).map(|i| (2.0 * PI * f * i as f32 / rate as f32).sin() * 0.8),
                );
            }
        }
        SampleBuffer::new(samples, rate)
    }

    #[test]
    fn same_clip_gives_same_hash_set() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::default()).expect("valid config");
        let clip = melody(22_050);

        let first = fingerprinter.fingerprint(&clip).expect("fingerprint");
        let second = fingerprinter.fingerprint(&clip).expect("fingerprint");

        assert!(!first.is_empty());
        assert_eq!(first, second);

        let hashes: BTreeSet<u64> = first.iter().map(|f| f.hash).collect();
        let again: BTreeSet<u64> = Fingerprinter::new(FingerprintConfig::default())
            .expect("valid config")
            .fingerprint(&clip)
            .expect("fingerprint")
            .iter()
            .map(|f| f.hash)
            .collect();
        assert_eq!(hashes, again);
    }

    #[test]
    fn silence_yields_no_fingerprints() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::default()).expect("valid config");
        let silence = SampleBuffer::new(vec![0.0; 22_050 * 2], 22_050);
        assert!(fingerprinter.fingerprint(&silence).expect("fingerprint").is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FingerprintConfig {
            hop_size: 0,
            ..Default::default()
        };
        assert!(Fingerprinter::new(config).is_err());

        let odd = FingerprintConfig {
            fft_size: 2047,
            ..Default::default()
        };
        assert!(matches!(
            Fingerprinter::new(odd),
            Err(FingerprintError::InvalidConfig(_))
        ));
    }

    #[test]
    fn range_anchor_times_are_window_relative() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::default()).expect("valid config");
        let clip = melody(22_050);
        let window = fingerprinter
            .fingerprint_range(&clip, 1.0, Some(2.0))
            .expect("fingerprint");
        assert!(!window.is_empty());
        assert!(window.iter().all(|f| f.anchor_time < 2.1));
    }

    #[test]
    fn other_rates_are_resampled_before_hashing() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::default()).expect("valid config");
        assert_eq!(fingerprinter.sample_rate(), 22_050);

        let native: BTreeSet<u64> = fingerprinter
            .fingerprint(&melody(22_050))
            .expect("fingerprint")
            .iter()
            .map(|f| f.hash)
            .collect();
        let doubled: BTreeSet<u64> = fingerprinter
            .fingerprint(&melody(44_100))
            .expect("fingerprint")
            .iter()
            .map(|f| f.hash)
            .collect();

        // Analyzed at 44.1 kHz directly, bin and frame indices would not line up.
        assert!(!doubled.is_empty());
        assert!(native.intersection(&doubled).next().is_some());
    }

    #[test]
    fn zero_rate_input_is_an_error() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::default()).expect("valid config");
        let buffer = SampleBuffer::new(vec![0.5; 64], 0);
        assert!(matches!(
            fingerprinter.fingerprint(&buffer),
            Err(FingerprintError::Resample(_))
        ));
        assert!(fingerprinter
            .fingerprint(&SampleBuffer::new(Vec::new(), 0))
            .expect("empty input")
            .is_empty());
    }
}
