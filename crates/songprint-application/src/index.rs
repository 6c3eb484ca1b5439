// SPDX-License-Identifier: GPL-3.0-or-later

//! Capabilities the core needs from the persisted fingerprint index.
//!
//! The core never manages connections; it is handed these traits. Lookups
//! are read-only, so concurrent callers need no coordination on this side.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use songprint_domain::{IndexedFingerprint, Song, SongId};
use songprint_fingerprint::Fingerprint;
use tracing::debug;

/// Read path of the fingerprint index.
#[async_trait::async_trait]
pub trait FingerprintIndex: Send + Sync {
    /// Every record whose hash is one of `hashes`.
    ///
    /// Callers keep `hashes` within their batch limit.
    async fn lookup(&self, hashes: &[u64]) -> Result<Vec<IndexedFingerprint>>;

    /// Resolve a song id to its title.
    async fn song_title(&self, song_id: SongId) -> Result<Option<String>>;
}

/// Write path used when adding known songs.
#[async_trait::async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Persist a song and all of its fingerprints atomically.
    async fn store_song(&self, song: &Song, fingerprints: &[Fingerprint]) -> Result<()>;
}

#[derive(Default)]
struct IndexData {
    by_hash: HashMap<u64, Vec<IndexedFingerprint>>,
    titles: HashMap<SongId, String>,
}

/// Index held entirely in memory.
///
/// Lookups return records grouped in the order the hashes were asked for,
/// and within one hash in insertion order.
#[derive(Clone, Default)]
pub struct InMemoryFingerprintIndex {
    inner: Arc<RwLock<IndexData>>,
}

impl InMemoryFingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a song and its fingerprints.
    pub fn insert(&self, song: &Song, fingerprints: &[Fingerprint]) -> Result<()> {
        let mut data = self
            .inner
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;

        data.titles.insert(song.id, song.title.clone());
        for fp in fingerprints {
            data.by_hash
                .entry(fp.hash)
                .or_default()
                .push(IndexedFingerprint {
                    hash: fp.hash,
                    song_id: song.id,
                    offset_time: fp.anchor_time,
                });
        }
        Ok(())
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|data| data.by_hash.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl FingerprintIndex for InMemoryFingerprintIndex {
    async fn lookup(&self, hashes: &[u64]) -> Result<Vec<IndexedFingerprint>> {
        let data = self
            .inner
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;

        let records: Vec<IndexedFingerprint> = hashes
            .iter()
            .filter_map(|hash| data.by_hash.get(hash))
            .flatten()
            .copied()
            .collect();

        debug!(target: "index", hashes = hashes.len(), records = records.len(), "in-memory lookup");
        Ok(records)
    }

    async fn song_title(&self, song_id: SongId) -> Result<Option<String>> {
        let data = self
            .inner
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        Ok(data.titles.get(&song_id).cloned())
    }
}

#[async_trait::async_trait]
impl FingerprintStore for InMemoryFingerprintIndex {
    async fn store_song(&self, song: &Song, fingerprints: &[Fingerprint]) -> Result<()> {
        self.insert(song, fingerprints)
    }
}
