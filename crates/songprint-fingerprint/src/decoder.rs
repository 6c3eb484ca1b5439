// SPDX-License-Identifier: GPL-3.0-or-later

//! Audio file decoding for the fingerprint pipeline.
//!
//! Decodes any container/codec symphonia is built with, in any sample format,
//! mixes every channel down to mono, and resamples to the analysis rate so
//! that fingerprints from files with different native rates agree.
//!
//! [`decode_file`] reads a whole file. [`FileAudioSource`] seeks and decodes
//! only the window it is asked for, which keeps long recordings out of memory.
//!
//! # Example
//!
//! ```no_run
//! use songprint_fingerprint::decoder::{decode_file, FileAudioSource};
//! use songprint_fingerprint::AudioSource;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let buffer = decode_file("song.flac", 22_050)?;
//! println!("decoded {:.1}s of audio", buffer.duration());
//!
//! let recording = FileAudioSource::open("set.mp3", 22_050)?;
//! let window = recording.load(600.0, Some(30.0))?;
//! println!("window holds {} samples", window.len());
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, instrument};

use crate::{AudioSource, FingerprintError, Result, SampleBuffer};

/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Decode `path` to mono samples at `target_rate` Hz.
#[instrument(skip_all, fields(file = ?path.as_ref()))]
pub fn decode_file<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<SampleBuffer> {
    let mut track = TrackReader::open(path.as_ref())?;
    let samples = track.read_mono(0.0, None)?;

    debug!(
        target: "decoder",
        samples = samples.len(),
        sample_rate = track.sample_rate,
        "decoded audio"
    );

    resample(SampleBuffer::new(samples, track.sample_rate), target_rate)
}

/// File-backed [`AudioSource`] that decodes one window per `load`.
///
/// Every call reopens the file, seeks to the window start and stops decoding
/// once the window is full, so concurrent windows never share reader state.
#[derive(Debug, Clone)]
pub struct FileAudioSource {
    path: PathBuf,
    target_rate: u32,
    total_duration: f64,
}

impl FileAudioSource {
    /// Probe `path` and record its length without decoding audio.
    #[instrument(skip_all, fields(file = ?path.as_ref()))]
    pub fn open<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut track = TrackReader::open(&path)?;
        let total_duration = match track.n_frames {
            Some(frames) => frames as f64 / track.sample_rate as f64,
            None => track.scan_duration()?,
        };

        debug!(target: "decoder", total_duration, "opened audio source");

        Ok(Self {
            path,
            target_rate,
            total_duration,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSource for FileAudioSource {
    fn total_duration(&self) -> f64 {
        self.total_duration
    }

    fn load(&self, start: f64, duration: Option<f64>) -> Result<SampleBuffer> {
        let start = start.max(0.0);
        if start >= self.total_duration {
            return Ok(SampleBuffer::new(Vec::new(), self.target_rate));
        }

        let mut track = TrackReader::open(&self.path)?;
        if start > 0.0 {
            track.seek(start)?;
        }

        let rate = track.sample_rate;
        let max_frames = duration.map(|d| (d.max(0.0) * rate as f64).round() as usize);
        let samples = track.read_mono(start, max_frames)?;

        debug!(
            target: "decoder",
            start,
            samples = samples.len(),
            "decoded window"
        );

        resample(SampleBuffer::new(samples, rate), self.target_rate)
    }
}

/// Default audio track of one opened file.
struct TrackReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    time_base: Option<TimeBase>,
    n_frames: Option<u64>,
}

impl TrackReader {
    fn open(path: &Path) -> Result<Self> {
        debug!(target: "decoder", "opening audio file");
        let file = File::open(path)
            .map_err(|e| FingerprintError::Decode(format!("failed to open audio file: {}", e)))?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| FingerprintError::Decode(format!("failed to probe stream: {}", e)))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| FingerprintError::Decode("no audio tracks found".to_string()))?;

        let sample_rate = match track.codec_params.sample_rate {
            Some(rate) if rate > 0 => rate,
            _ => {
                return Err(FingerprintError::Decode(
                    "stream does not declare a sample rate".to_string(),
                ))
            }
        };

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| FingerprintError::Decode(format!("failed to create decoder: {}", e)))?;

        Ok(Self {
            track_id: track.id,
            sample_rate,
            time_base: track.codec_params.time_base,
            n_frames: track.codec_params.n_frames,
            format,
            decoder,
        })
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| {
                FingerprintError::Decode(format!("failed to seek to {:.2}s: {}", seconds, e))
            })?;
        self.decoder.reset();
        Ok(())
    }

    /// Start time of a packet timestamp in seconds.
    fn seconds_at(&self, ts: u64) -> f64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds as f64 + time.frac
            }
            None => ts as f64 / self.sample_rate as f64,
        }
    }

    fn next_packet(&mut self) -> Result<Option<symphonia::core::formats::Packet>> {
        loop {
            match self.format.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(SymphoniaError::ResetRequired) => self.decoder.reset(),
                Err(e) => {
                    return Err(FingerprintError::Decode(format!(
                        "error reading packet: {}",
                        e
                    )))
                }
            }
        }
    }

    /// Decode mono samples from `from` seconds on, stopping after `max_frames`.
    fn read_mono(&mut self, from: f64, max_frames: Option<usize>) -> Result<Vec<f32>> {
        let mut samples: Vec<f32> = Vec::new();

        while max_frames.map_or(true, |max| samples.len() < max) {
            let Some(packet) = self.next_packet()? else {
                break;
            };
            let packet_start = self.seconds_at(packet.ts());

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt frames are skipped; the stream stays usable.
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(target: "decoder", error = e, "skipping undecodable frame");
                    continue;
                }
                Err(e) => {
                    return Err(FingerprintError::Decode(format!(
                        "failed to decode frame: {}",
                        e
                    )))
                }
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut interleaved = InterleavedBuffer::<f32>::new(decoded.capacity() as u64, spec);
            interleaved.copy_interleaved_ref(decoded);

            // Frames of a seeked-to packet that precede the requested start.
            let skip = ((from - packet_start) * self.sample_rate as f64)
                .round()
                .max(0.0) as usize;

            samples.extend(
                interleaved
                    .samples()
                    .chunks(channels)
                    .skip(skip)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        if let Some(max) = max_frames {
            samples.truncate(max);
        }
        Ok(samples)
    }

    /// Sum packet durations when the container does not state a frame count.
    fn scan_duration(&mut self) -> Result<f64> {
        let mut end = 0u64;
        while let Some(packet) = self.next_packet()? {
            end = end.max(packet.ts() + packet.dur());
        }
        Ok(self.seconds_at(end))
    }
}

/// Resample mono audio to `target_rate` with a windowed sinc interpolator.
///
/// The interpolator's group delay is removed, so sample `i` of the output
/// lines up with time `i / target_rate` of the input.
pub fn resample(input: SampleBuffer, target_rate: u32) -> Result<SampleBuffer> {
    if input.sample_rate == target_rate || input.is_empty() {
        return Ok(SampleBuffer::new(input.samples, target_rate));
    }
    if input.sample_rate == 0 || target_rate == 0 {
        return Err(FingerprintError::Resample(format!(
            "cannot resample from {} Hz to {} Hz",
            input.sample_rate, target_rate
        )));
    }

    let ratio = target_rate as f64 / input.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| FingerprintError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected_len = (input.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected_len + delay + RESAMPLE_CHUNK);

    for chunk in input.samples.chunks(RESAMPLE_CHUNK) {
        let block = if chunk.len() == RESAMPLE_CHUNK {
            chunk.to_vec()
        } else {
            let mut padded = vec![0.0f32; RESAMPLE_CHUNK];
            padded[..chunk.len()].copy_from_slice(chunk);
            padded
        };

        let result = resampler
            .process(&[block], None)
            .map_err(|e| FingerprintError::Resample(e.to_string()))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush the filter until the delayed tail of the signal has come out.
    while output.len() < expected_len + delay {
        let result = resampler
            .process(&[vec![0.0f32; RESAMPLE_CHUNK]], None)
            .map_err(|e| FingerprintError::Resample(e.to_string()))?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected_len);

    debug!(
        target: "decoder",
        from = input.sample_rate,
        to = target_rate,
        delay,
        samples = output.len(),
        "resampled audio"
    );

    Ok(SampleBuffer::new(output, target_rate))
}
