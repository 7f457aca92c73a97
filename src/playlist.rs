//! Jellyfin playlist writer.
//!
//! Each genre gets `<root>/<Title>/playlist.xml`; an aggregate playlist with
//! every file goes to `<root>/All/playlist.xml`. Files are written next to
//! their destination and renamed into place so an interrupted run never
//! leaves a truncated playlist behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{GenreBuckets, MASTER_LABEL};

pub const PLAYLIST_FILE_NAME: &str = "playlist.xml";

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Static fields of every playlist document.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlaylistSettings {
    pub owner_user_id: String,
    pub content_rating: String,
    pub media_type: String,
    pub rating: u32,
    pub running_time: u32,
}

impl Default for PlaylistSettings {
    fn default() -> Self {
        Self {
            owner_user_id: String::new(),
            content_rating: "TV-PG-LV".to_string(),
            media_type: "Video".to_string(),
            rating: 10,
            running_time: 12,
        }
    }
}

// ============================================================================
// Naming
// ============================================================================

fn is_cased(c: char) -> bool {
    c.is_lowercase() || c.is_uppercase()
}

/// Title-case a genre label: "indie folk" -> "Indie Folk", "r&b" -> "R&B".
///
/// A letter is capitalized whenever the previous character has no case, so
/// digits start a new word ("80s rock" -> "80S Rock"). Existing playlist
/// directories were named with this rule and are overwritten in place.
pub fn playlist_title(label: &str) -> String {
    let mut title = String::with_capacity(label.len());
    let mut prev_cased = false;
    for c in label.trim().chars() {
        if prev_cased {
            title.extend(c.to_lowercase());
        } else {
            title.extend(c.to_uppercase());
        }
        prev_cased = is_cased(c);
    }
    title
}

/// Directory name for a playlist title, safe to join onto the playlist root.
pub fn directory_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Characters XML 1.0 cannot represent, even as references.
fn is_forbidden_in_xml(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if is_forbidden_in_xml(c) => out.push(char::REPLACEMENT_CHARACTER),
            c => out.push(c),
        }
    }
    out
}

fn element(out: &mut String, depth: usize, name: &str, text: &str) {
    let _ = writeln!(
        out,
        "{}<{name}>{}</{name}>",
        "\t".repeat(depth),
        escape_xml(text)
    );
}

/// Render one playlist document.
pub fn render_playlist<'a>(
    title: &str,
    files: impl IntoIterator<Item = &'a Path>,
    settings: &PlaylistSettings,
    now: DateTime<Local>,
) -> String {
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    let year = now.format("%Y").to_string();

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<Item>\n");
    element(&mut out, 1, "ContentRating", &settings.content_rating);
    element(&mut out, 1, "Added", &timestamp);
    element(&mut out, 1, "LockData", "false");
    element(&mut out, 1, "CustomRating", &settings.content_rating);
    element(&mut out, 1, "LocalTitle", title);
    element(&mut out, 1, "PremiereDate", &timestamp);
    element(&mut out, 1, "Rating", &settings.rating.to_string());
    element(&mut out, 1, "ProductionYear", &year);
    element(&mut out, 1, "RunningTime", &settings.running_time.to_string());
    element(&mut out, 1, "OwnerUserId", &settings.owner_user_id);
    out.push_str("\t<PlaylistItems>\n");
    for path in files {
        out.push_str("\t\t<PlaylistItem>\n");
        element(&mut out, 3, "Path", &path.to_string_lossy());
        out.push_str("\t\t</PlaylistItem>\n");
    }
    out.push_str("\t</PlaylistItems>\n");
    out.push_str("\t<Shares />\n");
    element(&mut out, 1, "PlaylistMediaType", &settings.media_type);
    out.push_str("</Item>\n");
    out
}

// ============================================================================
// Emitter
// ============================================================================

pub struct PlaylistEmitter {
    root: PathBuf,
    settings: PlaylistSettings,
}

impl PlaylistEmitter {
    pub fn new(root: &Path, settings: PlaylistSettings) -> Self {
        Self {
            root: root.to_path_buf(),
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write one playlist per bucket plus the aggregate playlist.
    /// Returns the paths written.
    pub fn emit(&self, buckets: &GenreBuckets, now: DateTime<Local>) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create playlist directory {}", self.root.display())
        })?;

        let mut written = Vec::new();
        for (label, files) in buckets.iter() {
            if files.is_empty() {
                continue;
            }
            let mut title = playlist_title(label);
            if title.eq_ignore_ascii_case(MASTER_LABEL) {
                log::warn!("Genre '{}' collides with the aggregate playlist name", label);
                title = format!("{title} (Genre)");
            }
            let path = self.write_playlist(&title, files.iter().map(PathBuf::as_path), now)?;
            log::info!("Wrote playlist '{}' with {} files", title, files.len());
            written.push(path);
        }

        if buckets.file_count() > 0 {
            let path = self.write_playlist(MASTER_LABEL, buckets.all_files(), now)?;
            log::info!(
                "Wrote playlist '{}' with {} files",
                MASTER_LABEL,
                buckets.file_count()
            );
            written.push(path);
        }

        Ok(written)
    }

    /// Write `<root>/<title>/playlist.xml` via a temporary sibling and rename.
    pub fn write_playlist<'a>(
        &self,
        title: &str,
        files: impl IntoIterator<Item = &'a Path>,
        now: DateTime<Local>,
    ) -> Result<PathBuf> {
        let dir = self.root.join(directory_name(title));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let document = render_playlist(title, files, &self.settings, now);
        let target = dir.join(PLAYLIST_FILE_NAME);
        let staging = dir.join(format!("{PLAYLIST_FILE_NAME}.tmp"));

        fs::write(&staging, document)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &target)
            .with_context(|| format!("Failed to replace {}", target.display()))?;
        Ok(target)
    }
}
