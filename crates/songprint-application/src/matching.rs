// SPDX-License-Identifier: GPL-3.0-or-later

//! Offset-voting matcher.
//!
//! Query hashes are looked up in the index in bounded chunks. Every returned
//! record votes for `(song, offset)` where `offset` is the index anchor time
//! minus the query anchor time, rounded to hundredths of a second. A true
//! match piles its votes onto one offset; hash collisions scatter.
//!
//! Tie-break: among groups with the highest vote count, the group whose first
//! vote was cast earliest wins. Votes are cast in a fixed order: records are
//! ordered by the position of their hash in the query (first occurrence),
//! then by song id, then by index offset time. That order does not depend on
//! chunk size or on the order the index returns rows in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use songprint_domain::{format_position, IndexedFingerprint, SongId};
use songprint_fingerprint::{Fingerprint, Fingerprinter, SampleBuffer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::index::FingerprintIndex;

/// Largest hash batch sent to the index in one lookup.
pub const DEFAULT_CHUNK_SIZE: usize = 900;

/// Errors that can occur during matching
#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("Fingerprint index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Invalid lookup chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("Failed to fingerprint query: {0}")]
    Fingerprint(String),
}

/// Result type for matching operations
pub type MatchingResult<T> = Result<T, MatchingError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub chunk_size: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Why a query produced no match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The query audio produced no fingerprints.
    NoFingerprints,
    /// None of the query hashes exist in the index.
    NoIndexHits,
    /// Index records came back but none voted for a group.
    NoVotes,
}

impl std::fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFingerprints => write!(f, "no fingerprints could be generated from the query"),
            Self::NoIndexHits => write!(f, "no index records matched the query hashes"),
            Self::NoVotes => write!(f, "no valid offset groups after scoring"),
        }
    }
}

/// Winning `(song, offset)` group of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate {
    pub song_id: SongId,
    /// Offset in hundredths of a second.
    pub offset_centis: i64,
    pub votes: u32,
}

impl MatchCandidate {
    pub fn offset_seconds(&self) -> f64 {
        self.offset_centis as f64 / 100.0
    }
}

/// Metadata about a successful match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub song_id: SongId,
    pub title: String,
    /// Number of votes for the winning offset.
    pub confidence: u32,
    /// Where the query starts inside the matched song, in seconds.
    pub offset_seconds: f64,
    /// `offset_seconds` as `M:SS`.
    pub position: String,
}

impl MatchResult {
    pub fn new(song_id: SongId, title: String, confidence: u32, offset_seconds: f64) -> Self {
        Self {
            song_id,
            title,
            confidence,
            offset_seconds,
            position: format_position(offset_seconds),
        }
    }

    pub fn position_label(&self) -> &str {
        &self.position
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(MatchResult),
    NoMatch(NoMatchReason),
}

impl MatchOutcome {
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            Self::Matched(result) => Some(result),
            Self::NoMatch(_) => None,
        }
    }
}

/// Round `seconds` to hundredths, as an integer count of centiseconds.
///
/// Halves round away from zero.
pub fn offset_centis(seconds: f64) -> i64 {
    (seconds * 100.0).round() as i64
}

/// Count votes per `(song, offset)` and pick the winner.
///
/// When a hash appears more than once in `query`, its last anchor time is the
/// one used. Records whose hash is not in `query` are ignored.
pub fn score_votes(
    query: &[Fingerprint],
    records: &[IndexedFingerprint],
) -> Option<MatchCandidate> {
    let hash_to_time: HashMap<u64, f64> =
        query.iter().map(|fp| (fp.hash, fp.anchor_time)).collect();

    // (song, offset) -> (votes, order of first vote)
    let mut groups: HashMap<(SongId, i64), (u32, usize)> = HashMap::new();
    for record in records {
        let Some(&query_time) = hash_to_time.get(&record.hash) else {
            continue;
        };
        let key = (record.song_id, offset_centis(record.offset_time - query_time));
        let next = groups.len();
        groups.entry(key).or_insert((0, next)).0 += 1;
    }

    groups
        .into_iter()
        .min_by(|(_, (votes_a, first_a)), (_, (votes_b, first_b))| {
            votes_b.cmp(votes_a).then(first_a.cmp(first_b))
        })
        .map(|((song_id, offset_centis), (votes, _))| MatchCandidate {
            song_id,
            offset_centis,
            votes,
        })
}

/// Offset-voting matcher over a [`FingerprintIndex`].
pub struct Matcher {
    index: Arc<dyn FingerprintIndex>,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(index: Arc<dyn FingerprintIndex>, config: MatcherConfig) -> MatchingResult<Self> {
        if config.chunk_size == 0 {
            return Err(MatchingError::InvalidChunkSize(config.chunk_size));
        }
        Ok(Self { index, config })
    }

    /// Fingerprint `buffer` and match it.
    pub async fn identify(
        &self,
        fingerprinter: &Fingerprinter,
        buffer: &SampleBuffer,
    ) -> MatchingResult<MatchOutcome> {
        let fingerprints = fingerprinter
            .fingerprint(buffer)
            .map_err(|e| MatchingError::Fingerprint(e.to_string()))?;
        self.match_fingerprints(&fingerprints).await
    }

    /// Match a query fingerprint set against the index.
    ///
    /// A lookup failure in any chunk fails the whole attempt; votes from
    /// chunks that already succeeded are dropped with it.
    pub async fn match_fingerprints(
        &self,
        query: &[Fingerprint],
    ) -> MatchingResult<MatchOutcome> {
        if query.is_empty() {
            return Ok(MatchOutcome::NoMatch(NoMatchReason::NoFingerprints));
        }

        let hashes = unique_hashes(query);
        let records = self.fetch_records(&hashes).await?;

        debug!(
            target: "matching",
            fingerprints = query.len(),
            hashes = hashes.len(),
            records = records.len(),
            "index lookup complete"
        );

        if records.is_empty() {
            return Ok(MatchOutcome::NoMatch(NoMatchReason::NoIndexHits));
        }

        let records = order_records(&hashes, records);

        let Some(candidate) = score_votes(query, &records) else {
            return Ok(MatchOutcome::NoMatch(NoMatchReason::NoVotes));
        };

        let title = match self
            .index
            .song_title(candidate.song_id)
            .await
            .map_err(|e| MatchingError::IndexUnavailable(format!("{:#}", e)))?
        {
            Some(title) => title,
            None => {
                warn!(
                    target: "matching",
                    song_id = %candidate.song_id,
                    "matched song has no title in the index"
                );
                candidate.song_id.to_string()
            }
        };

        debug!(
            target: "matching",
            song_id = %candidate.song_id,
            votes = candidate.votes,
            offset = candidate.offset_seconds(),
            "best match"
        );

        Ok(MatchOutcome::Matched(MatchResult::new(
            candidate.song_id,
            title,
            candidate.votes,
            candidate.offset_seconds(),
        )))
    }

    async fn fetch_records(&self, hashes: &[u64]) -> MatchingResult<Vec<IndexedFingerprint>> {
        let mut records = Vec::new();
        for chunk in hashes.chunks(self.config.chunk_size) {
            let batch = self.index.lookup(chunk).await.map_err(|e| {
                warn!(target: "matching", error = %e, "index lookup failed, discarding partial votes");
                MatchingError::IndexUnavailable(format!("{:#}", e))
            })?;
            records.extend(batch);
        }
        Ok(records)
    }
}

/// Query hashes in first-occurrence order, without duplicates.
///
/// Duplicates would make a record come back once per chunk it appears in,
/// so chunking would change the score.
fn unique_hashes(query: &[Fingerprint]) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(query.len());
    query
        .iter()
        .map(|fp| fp.hash)
        .filter(|hash| seen.insert(*hash))
        .collect()
}

fn order_records(hashes: &[u64], mut records: Vec<IndexedFingerprint>) -> Vec<IndexedFingerprint> {
    let rank: HashMap<u64, usize> = hashes.iter().enumerate().map(|(i, h)| (*h, i)).collect();
    records.sort_by(|a, b| {
        let rank_a = rank.get(&a.hash).copied().unwrap_or(usize::MAX);
        let rank_b = rank.get(&b.hash).copied().unwrap_or(usize::MAX);
        rank_a
            .cmp(&rank_b)
            .then(a.song_id.cmp(&b.song_id))
            .then(a.offset_time.total_cmp(&b.offset_time))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryFingerprintIndex;
    use songprint_domain::Song;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(hash: u64, song_id: SongId, offset_time: f64) -> IndexedFingerprint {
        IndexedFingerprint {
            hash,
            song_id,
            offset_time,
        }
    }

    fn matcher(index: Arc<dyn FingerprintIndex>, chunk_size: usize) -> Matcher {
        Matcher::new(index, MatcherConfig { chunk_size }).expect("valid matcher config")
    }

    /// Fails the `fail_on`-th lookup (zero based).
    struct FlakyIndex {
        inner: InMemoryFingerprintIndex,
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait::async_trait]
    impl FingerprintIndex for FlakyIndex {
        async fn lookup(&self, hashes: &[u64]) -> anyhow::Result<Vec<IndexedFingerprint>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                anyhow::bail!("connection reset");
            }
            self.inner.lookup(hashes).await
        }

        async fn song_title(&self, song_id: SongId) -> anyhow::Result<Option<String>> {
            self.inner.song_title(song_id).await
        }
    }

    #[test]
    fn offsets_round_to_hundredths() {
        assert_eq!(offset_centis(1.234), 123);
        assert_eq!(offset_centis(1.236), 124);
        assert_eq!(offset_centis(-0.5), -50);
        assert_eq!(offset_centis(0.0), 0);
    }

    #[test]
    fn consistent_offset_outvotes_scattered_collisions() {
        let song = SongId::new();
        let other = SongId::new();
        let query: Vec<Fingerprint> = (0..5).map(|i| Fingerprint::new(i, i as f64)).collect();

        let mut records: Vec<IndexedFingerprint> =
            (0..5).map(|i| record(i, song, i as f64 + 12.5)).collect();
        records.extend((0..5).map(|i| record(i, other, i as f64 * 3.0)));

        let winner = score_votes(&query, &records).expect("winner");
        assert_eq!(winner.song_id, song);
        assert_eq!(winner.offset_centis, 1250);
        assert_eq!(winner.votes, 5);
    }

    #[test]
    fn ties_go_to_the_first_group_voted_for() {
        let first = SongId::new();
        let second = SongId::new();
        let query = vec![Fingerprint::new(1, 0.0), Fingerprint::new(2, 0.0)];
        let records = vec![
            record(1, second, 4.0),
            record(1, first, 9.0),
            record(2, first, 9.0),
            record(2, second, 4.0),
        ];

        for _ in 0..20 {
            let winner = score_votes(&query, &records).expect("winner");
            assert_eq!(winner.song_id, second);
            assert_eq!(winner.votes, 2);
        }
    }

    #[test]
    fn duplicate_query_hash_uses_last_anchor_time() {
        let song = SongId::new();
        let query = vec![Fingerprint::new(7, 1.0), Fingerprint::new(7, 2.0)];
        let records = vec![record(7, song, 10.0)];

        let winner = score_votes(&query, &records).expect("winner");
        assert_eq!(winner.offset_centis, 800);
    }

    #[test]
    fn records_for_unknown_hashes_do_not_vote() {
        let query = vec![Fingerprint::new(1, 0.0)];
        let records = vec![record(2, SongId::new(), 1.0)];
        assert!(score_votes(&query, &records).is_none());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let index: Arc<dyn FingerprintIndex> = Arc::new(InMemoryFingerprintIndex::new());
        assert!(matches!(
            Matcher::new(index, MatcherConfig { chunk_size: 0 }),
            Err(MatchingError::InvalidChunkSize(0))
        ));
    }

    #[tokio::test]
    async fn empty_query_is_no_fingerprints() {
        let index = Arc::new(InMemoryFingerprintIndex::new());
        let outcome = matcher(index, 900).match_fingerprints(&[]).await.expect("match");
        assert_eq!(outcome, MatchOutcome::NoMatch(NoMatchReason::NoFingerprints));
    }

    #[tokio::test]
    async fn unanalyzable_query_is_an_error() {
        let index = Arc::new(InMemoryFingerprintIndex::new());
        let fingerprinter = Fingerprinter::new(Default::default()).expect("valid config");
        let query = SampleBuffer::new(vec![0.25; 4096], 0);

        let err = matcher(index, 900)
            .identify(&fingerprinter, &query)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchingError::Fingerprint(_)));
    }

    #[tokio::test]
    async fn unknown_hashes_are_no_index_hits() {
        let index = Arc::new(InMemoryFingerprintIndex::new());
        index
            .insert(&Song::new("Known"), &[Fingerprint::new(1, 0.0)])
            .expect("insert");

        let outcome = matcher(index, 900)
            .match_fingerprints(&[Fingerprint::new(42, 0.0)])
            .await
            .expect("match");
        assert_eq!(outcome, MatchOutcome::NoMatch(NoMatchReason::NoIndexHits));
    }

    #[tokio::test]
    async fn match_reports_title_offset_and_position() {
        let index = Arc::new(InMemoryFingerprintIndex::new());
        let song = Song::new("Everything U Are");
        let stored: Vec<Fingerprint> = (0..30).map(|i| Fingerprint::new(i, 60.0 + i as f64)).collect();
        index.insert(&song, &stored).expect("insert");

        let query: Vec<Fingerprint> = (0..30).map(|i| Fingerprint::new(i, i as f64 * 1.0)).collect();
        let outcome = matcher(index, 900).match_fingerprints(&query).await.expect("match");

        let result = outcome.matched().expect("matched");
        assert_eq!(result.song_id, song.id);
        assert_eq!(result.title, "Everything U Are");
        assert_eq!(result.confidence, 30);
        assert_eq!(result.offset_seconds, 60.0);
        assert_eq!(result.position_label(), "1:00");

        let json = serde_json::to_value(result).expect("serialize");
        assert_eq!(json["position"], "1:00");
        assert_eq!(json["offset_seconds"], 60.0);
    }

    #[tokio::test]
    async fn chunked_lookup_matches_single_lookup() {
        let index = Arc::new(InMemoryFingerprintIndex::new());
        let a = Song::new("A");
        let b = Song::new("B");

        let a_prints: Vec<Fingerprint> =
            (0..2000).map(|i| Fingerprint::new(i, i as f64 * 0.01 + 5.0)).collect();
        // B shares every third hash at scattered offsets, plus a cluster of its own.
        let b_prints: Vec<Fingerprint> = (0..2000)
            .filter(|i| i % 3 == 0)
            .map(|i| Fingerprint::new(i, (i % 17) as f64))
            .collect();
        index.insert(&a, &a_prints).expect("insert a");
        index.insert(&b, &b_prints).expect("insert b");

        let query: Vec<Fingerprint> = (0..2000).map(|i| Fingerprint::new(i, i as f64 * 0.01)).collect();

        let single = matcher(index.clone(), 2000)
            .match_fingerprints(&query)
            .await
            .expect("single chunk");
        let chunked = matcher(index.clone(), 900)
            .match_fingerprints(&query)
            .await
            .expect("three chunks");

        assert_eq!(single, chunked);
        let result = single.matched().expect("matched");
        assert_eq!(result.song_id, a.id);
        assert_eq!(result.offset_seconds, 5.0);
        assert_eq!(result.confidence, 2000);
    }

    #[tokio::test]
    async fn tie_break_is_stable_across_chunk_sizes_and_insert_order() {
        let a = Song::new("A");
        let b = Song::new("B");
        let a_prints: Vec<Fingerprint> = (0..10).map(|i| Fingerprint::new(i, 3.0)).collect();
        let b_prints: Vec<Fingerprint> = (0..10).map(|i| Fingerprint::new(i, 7.0)).collect();
        let query: Vec<Fingerprint> = (0..10).map(|i| Fingerprint::new(i, 0.0)).collect();

        let mut winners = HashSet::new();
        for (chunk_size, a_first) in [(1, true), (3, false), (10, true), (900, false)] {
            let index = Arc::new(InMemoryFingerprintIndex::new());
            if a_first {
                index.insert(&a, &a_prints).expect("insert a");
                index.insert(&b, &b_prints).expect("insert b");
            } else {
                index.insert(&b, &b_prints).expect("insert b");
                index.insert(&a, &a_prints).expect("insert a");
            }
            let outcome = matcher(index, chunk_size)
                .match_fingerprints(&query)
                .await
                .expect("match");
            let result = outcome.matched().expect("matched").clone();
            assert_eq!(result.confidence, 10);
            winners.insert(result.song_id);
        }

        // Records for the same hash are ordered by song id, so the smaller id votes first.
        assert_eq!(winners.len(), 1);
        assert!(winners.contains(&a.id.min(b.id)));
    }

    #[tokio::test]
    async fn failed_chunk_discards_the_whole_attempt() {
        let inner = InMemoryFingerprintIndex::new();
        let song = Song::new("A");
        let prints: Vec<Fingerprint> = (0..2000).map(|i| Fingerprint::new(i, 1.0)).collect();
        inner.insert(&song, &prints).expect("insert");

        let flaky = Arc::new(FlakyIndex {
            inner,
            calls: AtomicUsize::new(0),
            fail_on: 2,
        });

        let err = matcher(flaky.clone(), 900)
            .match_fingerprints(&prints)
            .await
            .unwrap_err();

        assert!(matches!(err, MatchingError::IndexUnavailable(ref msg) if msg.contains("connection reset")));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
