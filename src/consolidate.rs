//! Merges small genre buckets into the overflow bucket.
//!
//! Playlists with a handful of songs are noise in the media server, so any
//! genre below the threshold is folded into "Mixed Songs". Moved files are
//! recorded in the cache under their path so the assignment is kept on disk.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cache::GenreCache;
use crate::models::{GenreBuckets, GenreLabel, OVERFLOW_LABEL};

/// Buckets with fewer files than this are merged into the overflow bucket.
pub const DEFAULT_THRESHOLD: usize = 15;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Labels that were removed and merged, in label order.
    pub merged: Vec<GenreLabel>,
    pub files_moved: usize,
    /// Overflow files that got a cache entry without being moved this pass.
    pub backfilled: usize,
}

/// Cache key used for per-file overflow assignments.
pub fn file_cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Merge every non-overflow bucket smaller than `threshold` into the overflow
/// bucket, point each affected file's cache entry at the overflow label, and
/// checkpoint the cache.
pub fn consolidate(
    buckets: &mut GenreBuckets,
    cache: &mut GenreCache,
    threshold: usize,
) -> Result<ConsolidationReport> {
    let mut report = ConsolidationReport::default();

    // Collect first, mutate second
    let small: Vec<GenreLabel> = buckets
        .iter()
        .filter(|(label, files)| *label != OVERFLOW_LABEL && files.len() < threshold)
        .map(|(label, _)| label.to_string())
        .collect();

    for label in &small {
        let Some(files) = buckets.remove(label) else {
            continue;
        };
        for file in &files {
            cache.put(&file_cache_key(file), OVERFLOW_LABEL);
        }
        log::info!(
            "Merging '{}' ({} files) into '{}'",
            label,
            files.len(),
            OVERFLOW_LABEL
        );
        report.files_moved += files.len();
        buckets.extend(OVERFLOW_LABEL, files);
    }
    report.merged = small;

    if let Some(files) = buckets.get(OVERFLOW_LABEL) {
        for file in files {
            let key = file_cache_key(file);
            if cache.get(&key) != Some(OVERFLOW_LABEL) {
                cache.put(&key, OVERFLOW_LABEL);
                report.backfilled += 1;
            }
        }
    }

    cache
        .flush()
        .context("Failed to checkpoint genre cache after consolidation")?;

    Ok(report)
}
