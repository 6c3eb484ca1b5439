// SPDX-License-Identifier: GPL-3.0-or-later

//! Matching, scanning and ingest services over a fingerprint index.

pub mod index;
pub mod ingest;
pub mod matching;
pub mod scanning;

pub use index::{FingerprintIndex, FingerprintStore, InMemoryFingerprintIndex};
pub use ingest::{IngestError, IngestResult, IngestService, IngestedSong};
pub use matching::{
    score_votes, MatchCandidate, MatchOutcome, MatchResult, Matcher, MatcherConfig,
    MatchingError, MatchingResult, NoMatchReason,
};
pub use scanning::{
    IntervalAccumulator, MultiSongScanner, ScanError, ScanOptions, ScanResult, WindowMatch,
};
