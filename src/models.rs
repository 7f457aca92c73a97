//! Core data models for the genre playlist pipeline.
//!
//! This module contains the bucket mapping handed to the playlist emitter,
//! search candidates returned by the metadata service, and run statistics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Reserved Labels
// ============================================================================

/// Catch-all bucket that absorbs every genre with too few files.
pub const OVERFLOW_LABEL: &str = "Mixed Songs";

/// Bucket for files whose genre could not be resolved.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Title of the aggregate playlist containing every file.
pub const MASTER_LABEL: &str = "All";

/// Resolved genre name, e.g. "rock" or "indie folk".
pub type GenreLabel = String;

// ============================================================================
// Genre Buckets
// ============================================================================

/// Mapping of genre label to the ordered files assigned to it.
///
/// Files keep first-seen order and a path is stored at most once per bucket.
/// Empty buckets are never retained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenreBuckets {
    buckets: BTreeMap<GenreLabel, Vec<PathBuf>>,
}

impl GenreBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to a bucket, creating the bucket if needed.
    /// Returns false if the file was already in that bucket.
    pub fn insert(&mut self, label: &str, path: PathBuf) -> bool {
        let files = self.buckets.entry(label.to_string()).or_default();
        if files.contains(&path) {
            return false;
        }
        files.push(path);
        true
    }

    /// Append files to a bucket, skipping any already present.
    pub fn extend(&mut self, label: &str, paths: impl IntoIterator<Item = PathBuf>) {
        for path in paths {
            self.insert(label, path);
        }
        if self.buckets.get(label).is_some_and(|files| files.is_empty()) {
            self.buckets.remove(label);
        }
    }

    pub fn remove(&mut self, label: &str) -> Option<Vec<PathBuf>> {
        self.buckets.remove(label)
    }

    pub fn get(&self, label: &str) -> Option<&[PathBuf]> {
        self.buckets.get(label).map(Vec::as_slice)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.buckets.contains_key(label)
    }

    pub fn labels(&self) -> Vec<GenreLabel> {
        self.buckets.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.buckets
            .iter()
            .map(|(label, files)| (label.as_str(), files.as_slice()))
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of files across all buckets.
    pub fn file_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Every file of every bucket, in label order.
    pub fn all_files(&self) -> impl Iterator<Item = &Path> {
        self.buckets
            .values()
            .flat_map(|files| files.iter().map(PathBuf::as_path))
    }
}

// ============================================================================
// Metadata Service Models
// ============================================================================

/// Artist reference attached to a search result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// One track returned by a free-text search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackCandidate {
    pub name: String,
    /// Credited artists, primary artist first.
    pub artists: Vec<ArtistRef>,
}

impl TrackCandidate {
    pub fn primary_artist(&self) -> Option<&ArtistRef> {
        self.artists.first()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected over a single run, written with `--stats-json`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub files_scanned: usize,
    pub empty_identifiers: usize,
    pub cache_hits: usize,
    pub outbound_lookups: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub no_results: usize,
    pub no_genre: usize,
    pub throttle_trips: usize,
    pub throttle_exhausted: bool,
    pub service_errors: usize,
    pub buckets_merged: usize,
    pub files_moved_to_overflow: usize,
    pub playlists_written: usize,
    pub elapsed_secs: f64,
}
