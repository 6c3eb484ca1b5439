// SPDX-License-Identifier: GPL-3.0-or-later

use crate::Result;

/// Mono PCM samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Length of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Copy out the sub-range `[start, start + duration)` in seconds.
    ///
    /// The range is clamped to the buffer: a negative start reads from zero and
    /// a start past the end yields an empty buffer. `None` reads to the end.
    pub fn slice(&self, start: f64, duration: Option<f64>) -> SampleBuffer {
        let rate = self.sample_rate as f64;
        let len = self.samples.len();

        let begin = ((start.max(0.0) * rate).round() as usize).min(len);
        let end = match duration {
            Some(d) => begin
                .saturating_add((d.max(0.0) * rate).round() as usize)
                .min(len),
            None => len,
        };

        SampleBuffer::new(self.samples[begin..end].to_vec(), self.sample_rate)
    }
}

/// Supplier of decoded audio for windowed analysis.
///
/// Implementations own decoding; callers only ask for time ranges.
pub trait AudioSource: Send + Sync {
    /// Total length of the recording in seconds.
    fn total_duration(&self) -> f64;

    /// Load `[start, start + duration)` seconds as mono samples.
    fn load(&self, start: f64, duration: Option<f64>) -> Result<SampleBuffer>;
}

impl AudioSource for SampleBuffer {
    fn total_duration(&self) -> f64 {
        self.duration()
    }

    fn load(&self, start: f64, duration: Option<f64>) -> Result<SampleBuffer> {
        Ok(self.slice(start, duration))
    }
}
