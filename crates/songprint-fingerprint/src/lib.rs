// SPDX-License-Identifier: GPL-3.0-or-later

//! Landmark-based audio fingerprinting.
//!
//! This crate provides functionality for:
//! - Turning mono PCM into a log-magnitude spectrogram
//! - Picking locally loudest landmarks on that surface
//! - Pairing landmarks inside a target zone into deterministic hashes
//! - Decoding and resampling audio files into analyzable sample buffers

pub mod config;
pub mod decoder;
pub mod error;
pub mod fingerprint;
pub mod generator;
pub mod peaks;
pub mod pipeline;
pub mod samples;
pub mod spectral;

pub use config::FingerprintConfig;
pub use decoder::FileAudioSource;
pub use error::{FingerprintError, Result};
pub use fingerprint::{landmark_hash, Fingerprint, HASH_VERSION};
pub use generator::FingerprintGenerator;
pub use peaks::{Landmark, PeakExtractor};
pub use pipeline::Fingerprinter;
pub use samples::{AudioSource, SampleBuffer};
pub use spectral::{SpectralAnalyzer, Spectrogram};
