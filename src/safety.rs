//! Safety checks run before anything is written.
//!
//! Emission replaces whole playlist directories, so the playlist root must
//! never overlap the media library, and the cache must not live inside a tree
//! that gets rewritten and re-owned on every run.

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Absolute form of `path`. The longest existing ancestor is canonicalized so
/// symlinks and `..` cannot hide an overlap; the missing tail is appended as
/// given.
fn absolute(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .context("Failed to read working directory")?
            .join(path)
    };

    let mut tail = Vec::new();
    let mut current = path.as_path();
    loop {
        if let Ok(resolved) = fs::canonicalize(current) {
            return Ok(tail.iter().rev().fold(resolved, |acc, part| acc.join(part)));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                current = parent;
            }
            _ => return Ok(path),
        }
    }
}

/// Validates the output locations of a run.
///
/// Checks:
/// - Playlist root is not the media root
/// - Playlist root is not inside the media root
/// - Cache file is not inside the playlist root
pub fn validate_output_paths(media_dir: &Path, playlist_dir: &Path, cache_path: &Path) -> Result<()> {
    let media = absolute(media_dir)?;
    let playlists = absolute(playlist_dir)?;
    let cache = absolute(cache_path)?;

    if playlists == media {
        bail!(
            "Safety check failed: playlist directory '{}' cannot be the media directory",
            playlist_dir.display()
        );
    }

    if playlists.starts_with(&media) {
        bail!(
            "Safety check failed: playlist directory '{}' lies inside media directory '{}'",
            playlist_dir.display(),
            media_dir.display()
        );
    }

    if cache.starts_with(&playlists) {
        bail!(
            "Safety check failed: cache '{}' lies inside playlist directory '{}'",
            cache_path.display(),
            playlist_dir.display()
        );
    }

    Ok(())
}
