// SPDX-License-Identifier: GPL-3.0-or-later

//! Multi-song scanning of long recordings.
//!
//! The recording is cut into overlapping windows that are fingerprinted and
//! matched independently, at most `max_concurrent_windows` at a time. Window
//! results are then folded in time order by an [`IntervalAccumulator`], which
//! coalesces consecutive detections of the same song into one interval.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use songprint_domain::SongInterval;
use songprint_fingerprint::{AudioSource, Fingerprinter};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::matching::{MatchOutcome, MatchResult, Matcher, MatchingError};

/// Errors that abort a scan
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid scan configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Fingerprint index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Window worker failed: {0}")]
    Worker(String),
}

impl From<MatchingError> for ScanError {
    fn from(err: MatchingError) -> Self {
        match err {
            MatchingError::IndexUnavailable(msg) => Self::IndexUnavailable(msg),
            MatchingError::Fingerprint(msg) => Self::Worker(msg),
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Window length in seconds.
    pub segment_duration: f64,
    /// Seconds shared by consecutive windows.
    pub overlap: f64,
    /// Minimum vote count for a window to count as a detection.
    pub min_confidence: u32,
    pub max_concurrent_windows: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            segment_duration: 30.0,
            overlap: 5.0,
            min_confidence: 5,
            max_concurrent_windows: 4,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> ScanResult<()> {
        if !self.segment_duration.is_finite() || self.segment_duration <= 0.0 {
            return Err(ScanError::InvalidConfiguration(format!(
                "segment_duration must be positive, got {}",
                self.segment_duration
            )));
        }
        if !self.overlap.is_finite() || self.overlap < 0.0 {
            return Err(ScanError::InvalidConfiguration(format!(
                "overlap must not be negative, got {}",
                self.overlap
            )));
        }
        if self.overlap >= self.segment_duration {
            return Err(ScanError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than segment_duration ({})",
                self.overlap, self.segment_duration
            )));
        }
        if self.max_concurrent_windows == 0 {
            return Err(ScanError::InvalidConfiguration(
                "max_concurrent_windows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Distance between consecutive window starts.
    pub fn step(&self) -> f64 {
        self.segment_duration - self.overlap
    }

    /// Start of every window for a recording of `total_duration` seconds.
    pub fn window_positions(&self, total_duration: f64) -> Vec<f64> {
        let step = self.step();
        if step <= 0.0 {
            return Vec::new();
        }
        (0..)
            .map(|k| k as f64 * step)
            .take_while(|position| *position < total_duration)
            .collect()
    }
}

/// Outcome of one scan window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMatch {
    /// Window start in seconds from the start of the recording.
    pub position: f64,
    /// `None` when the window matched nothing or could not be decoded.
    pub result: Option<MatchResult>,
}

impl WindowMatch {
    pub fn votes(&self) -> u32 {
        self.result.as_ref().map_or(0, |r| r.confidence)
    }
}

/// Folds window results, in time order, into song intervals.
///
/// A window whose vote count reaches the threshold either extends the open
/// interval (same song) or closes it and opens a new one. A weak window
/// changes nothing, so a short dropout inside a song does not split it.
#[derive(Debug, Clone)]
pub struct IntervalAccumulator {
    segment_duration: f64,
    min_confidence: u32,
    open: Option<SongInterval>,
    closed: Vec<SongInterval>,
}

impl IntervalAccumulator {
    pub fn new(segment_duration: f64, min_confidence: u32) -> Self {
        Self {
            segment_duration,
            min_confidence,
            open: None,
            closed: Vec::new(),
        }
    }

    pub fn open_interval(&self) -> Option<&SongInterval> {
        self.open.as_ref()
    }

    pub fn push(&mut self, window: &WindowMatch) {
        let Some(result) = window
            .result
            .as_ref()
            .filter(|r| r.confidence >= self.min_confidence)
        else {
            return;
        };

        let window_end = window.position + self.segment_duration;

        if let Some(open) = self.open.as_mut() {
            if open.song_id == result.song_id {
                open.end_time = window_end;
                open.confidence = open.confidence.max(result.confidence);
                return;
            }
        }

        if let Some(done) = self.open.take() {
            self.closed.push(done);
        }
        self.open = Some(SongInterval {
            song_id: result.song_id,
            title: result.title.clone(),
            start_time: window.position + result.offset_seconds,
            end_time: window_end,
            confidence: result.confidence,
        });
    }

    /// Close the open interval and return all intervals ordered by start time.
    pub fn finish(mut self) -> Vec<SongInterval> {
        if let Some(done) = self.open.take() {
            self.closed.push(done);
        }

        let mut merged: Vec<SongInterval> = Vec::with_capacity(self.closed.len());
        for interval in self.closed {
            match merged.last_mut() {
                Some(last) if last.song_id == interval.song_id => {
                    last.end_time = last.end_time.max(interval.end_time);
                    last.confidence = last.confidence.max(interval.confidence);
                }
                _ => merged.push(interval),
            }
        }

        merged.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        merged
    }
}

/// Sliding-window scanner over a long recording.
pub struct MultiSongScanner {
    fingerprinter: Arc<Fingerprinter>,
    matcher: Arc<Matcher>,
    options: ScanOptions,
}

impl MultiSongScanner {
    pub fn new(
        fingerprinter: Arc<Fingerprinter>,
        matcher: Arc<Matcher>,
        options: ScanOptions,
    ) -> ScanResult<Self> {
        options.validate()?;
        Ok(Self {
            fingerprinter,
            matcher,
            options,
        })
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan `source` and return the detected song intervals.
    ///
    /// An empty list means nothing was detected.
    #[instrument(skip_all, fields(duration = source.total_duration()))]
    pub async fn scan(&self, source: Arc<dyn AudioSource>) -> ScanResult<Vec<SongInterval>> {
        let positions = self.options.window_positions(source.total_duration());
        info!(target: "scanner", windows = positions.len(), "starting scan");

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_windows));
        let mut handles: VecDeque<JoinHandle<ScanResult<WindowMatch>>> = positions
            .into_iter()
            .map(|position| {
                tokio::spawn(run_window(
                    position,
                    self.options.segment_duration,
                    Arc::clone(&semaphore),
                    Arc::clone(&source),
                    Arc::clone(&self.fingerprinter),
                    Arc::clone(&self.matcher),
                ))
            })
            .collect();

        let mut accumulator =
            IntervalAccumulator::new(self.options.segment_duration, self.options.min_confidence);

        // Fold strictly in window order.
        while let Some(handle) = handles.pop_front() {
            let joined = handle
                .await
                .map_err(|e| ScanError::Worker(e.to_string()))
                .and_then(|window| window);

            match joined {
                Ok(window) => accumulator.push(&window),
                Err(e) => {
                    for pending in &handles {
                        pending.abort();
                    }
                    warn!(target: "scanner", error = %e, "scan aborted");
                    return Err(e);
                }
            }
        }

        let intervals = accumulator.finish();
        info!(target: "scanner", intervals = intervals.len(), "scan complete");
        Ok(intervals)
    }
}

async fn run_window(
    position: f64,
    segment_duration: f64,
    semaphore: Arc<Semaphore>,
    source: Arc<dyn AudioSource>,
    fingerprinter: Arc<Fingerprinter>,
    matcher: Arc<Matcher>,
) -> ScanResult<WindowMatch> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| ScanError::Worker("window semaphore closed".to_string()))?;

    let fingerprints = tokio::task::spawn_blocking(move || {
        source
            .load(position, Some(segment_duration))
            .and_then(|buffer| fingerprinter.fingerprint(&buffer))
    })
    .await
    .map_err(|e| ScanError::Worker(e.to_string()))?;

    let fingerprints = match fingerprints {
        Ok(fingerprints) => fingerprints,
        Err(e) => {
            warn!(target: "scanner", position, error = %e, "skipping undecodable window");
            return Ok(WindowMatch {
                position,
                result: None,
            });
        }
    };

    let result = match matcher.match_fingerprints(&fingerprints).await? {
        MatchOutcome::Matched(result) => Some(result),
        MatchOutcome::NoMatch(reason) => {
            debug!(target: "scanner", position, %reason, "window matched nothing");
            None
        }
    };

    Ok(WindowMatch { position, result })
}
