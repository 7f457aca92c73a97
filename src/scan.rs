//! Media directory scan.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Container formats produced by the downloader.
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "m4a", "mp4", "mov", "webp"];

/// A media file picked up by the scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    /// File name without its extension, the raw input for identifier derivation.
    pub stem: String,
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            allowed.iter().any(|e| e == &ext)
        })
        .unwrap_or(false)
}

/// Recursively list media files under `root` whose extension is allowed.
/// Entries are returned in traversal order, siblings sorted by file name.
pub fn scan_media(root: &Path, extensions: &[String]) -> Result<Vec<MediaFile>> {
    if !root.is_dir() {
        bail!("Media directory '{}' does not exist", root.display());
    }
    let allowed = normalize_extensions(extensions);

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_allowed_extension(entry.path(), &allowed) {
            continue;
        }
        let stem = entry
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push(MediaFile {
            path: entry.into_path(),
            stem,
        });
    }

    log::info!("Found {} media files under {}", files.len(), root.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn default_extensions() -> Vec<String> {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_scan_filters_and_recurses() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("2024").join("jan");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("b - Song - 20240101x.mp4"), b"").unwrap();
        fs::write(dir.path().join("a.MP3"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::write(nested.join("c.m4a"), b"").unwrap();
        fs::write(nested.join("cover.jpg"), b"").unwrap();

        let files = scan_media(dir.path(), &default_extensions()).unwrap();
        let stems: Vec<&str> = files.iter().map(|f| f.stem.as_str()).collect();
        assert_eq!(stems, vec!["c", "a", "b - Song - 20240101x"]);
    }

    #[test]
    fn test_scan_custom_extensions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.flac"), b"").unwrap();
        fs::write(dir.path().join("y.mp3"), b"").unwrap();

        let files = scan_media(dir.path(), &[".FLAC".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, dir.path().join("x.flac"));
    }

    #[test]
    fn test_directories_named_like_media_are_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("album.mp3")).unwrap();
        let files = scan_media(dir.path(), &default_extensions()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let result = scan_media(&dir.path().join("missing"), &default_extensions());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }
}
