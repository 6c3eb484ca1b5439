// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Value Objects & IDs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SongId(pub Uuid);

impl SongId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SongId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SongId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A known recording whose fingerprints live in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Song {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: SongId::new(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// One persisted `(hash, song, offset)` record of the fingerprint index.
///
/// Many records share a hash; collisions across songs and positions are expected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IndexedFingerprint {
    pub hash: u64,
    pub song_id: SongId,
    /// Anchor time of the fingerprint inside the indexed song, in seconds.
    pub offset_time: f64,
}

/// A detected span of one song inside a long recording.
///
/// `start_time` and `end_time` are seconds from the start of the scanned file;
/// `confidence` is the highest vote count seen for any window in the span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SongInterval {
    pub song_id: SongId,
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: u32,
}

impl SongInterval {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

// ============================================================================
// Presentation helpers
// ============================================================================

/// Render a position in seconds as `M:SS`.
///
/// Minutes and seconds are both floored, so negative offsets floor toward
/// negative infinity: `-5.0` renders as `-1:55`.
pub fn format_position(seconds: f64) -> String {
    let minutes = seconds.div_euclid(60.0) as i64;
    let seconds_remaining = seconds.rem_euclid(60.0).floor() as i64;
    format!("{}:{:02}", minutes, seconds_remaining)
}
