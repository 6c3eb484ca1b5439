// SPDX-License-Identifier: GPL-3.0-or-later

//! Adding known songs to the fingerprint index.

use std::sync::Arc;

use serde::Serialize;
use songprint_domain::Song;
use songprint_fingerprint::{Fingerprinter, SampleBuffer};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::index::FingerprintStore;

/// Errors that can occur while ingesting a song.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Audio produced no fingerprints (silent or too short)
    #[error("No fingerprints could be generated for '{0}'")]
    NoFingerprints(String),

    /// The audio could not be analyzed
    #[error("Failed to fingerprint '{title}': {reason}")]
    Fingerprint { title: String, reason: String },

    /// The index rejected the write
    #[error("Failed to store fingerprints: {0}")]
    Store(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Summary of one ingested song.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedSong {
    pub song: Song,
    pub fingerprint_count: usize,
    pub duration_seconds: f64,
}

/// Fingerprints known songs and stores them.
#[derive(Clone)]
pub struct IngestService {
    fingerprinter: Arc<Fingerprinter>,
    store: Arc<dyn FingerprintStore>,
}

impl IngestService {
    pub fn new(fingerprinter: Arc<Fingerprinter>, store: Arc<dyn FingerprintStore>) -> Self {
        Self {
            fingerprinter,
            store,
        }
    }

    /// Fingerprint a full song and store it under a new id.
    ///
    /// Anchor times are stored relative to the start of `buffer`.
    #[instrument(skip(self, buffer), fields(duration = buffer.duration()))]
    pub async fn ingest(&self, title: &str, buffer: &SampleBuffer) -> IngestResult<IngestedSong> {
        let fingerprints = self
            .fingerprinter
            .fingerprint(buffer)
            .map_err(|e| IngestError::Fingerprint {
                title: title.to_string(),
                reason: e.to_string(),
            })?;
        if fingerprints.is_empty() {
            warn!(target: "ingest", title, "refusing to store a song without fingerprints");
            return Err(IngestError::NoFingerprints(title.to_string()));
        }

        let song = Song::new(title);
        self.store
            .store_song(&song, &fingerprints)
            .await
            .map_err(|e| IngestError::Store(format!("{:#}", e)))?;

        info!(
            target: "ingest",
            song_id = %song.id,
            fingerprints = fingerprints.len(),
            "song ingested"
        );

        Ok(IngestedSong {
            song,
            fingerprint_count: fingerprints.len(),
            duration_seconds: buffer.duration(),
        })
    }
}
