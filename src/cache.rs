//! Persistent genre cache.
//!
//! Maps a key (track identifier, or a file path once consolidation has moved
//! it into the overflow bucket) to a genre label. The whole table is loaded
//! into memory on open; writes are buffered and committed by `flush` in a
//! single SQLite transaction, so a failed checkpoint leaves the previously
//! committed state untouched.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};

use crate::models::GenreLabel;

pub struct GenreCache {
    conn: Connection,
    path: Option<PathBuf>,
    entries: FxHashMap<String, GenreLabel>,
    dirty: FxHashSet<String>,
}

impl GenreCache {
    /// Open (or create) the cache database at `path` and load every entry.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open genre cache {}", path.display()))?;
        let mut cache = Self::from_connection(conn)?;
        cache.path = Some(path.to_path_buf());
        log::info!(
            "Loaded {} cached genre entries from {}",
            cache.len(),
            path.display()
        );
        Ok(cache)
    }

    /// Cache with no backing file. Used for dry runs and tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory cache")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;

             CREATE TABLE IF NOT EXISTS genre_cache (
                 key TEXT PRIMARY KEY,
                 genre TEXT NOT NULL
             );",
        )
        .context("Failed to initialize genre cache schema")?;

        let mut entries = FxHashMap::default();
        {
            let mut stmt = conn.prepare("SELECT key, genre FROM genre_cache")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let genre: String = row.get(1)?;
                entries.insert(key, genre);
            }
        }

        Ok(Self {
            conn,
            path: None,
            entries,
            dirty: FxHashSet::default(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite an entry. Returns true if the stored value changed.
    pub fn put(&mut self, key: &str, genre: &str) -> bool {
        if self.get(key) == Some(genre) {
            return false;
        }
        self.entries.insert(key.to_string(), genre.to_string());
        self.dirty.insert(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries changed since the last successful flush.
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Commit pending entries. Returns the number written.
    ///
    /// On error nothing is committed and the entries stay pending.
    pub fn flush(&mut self) -> Result<usize> {
        if self.dirty.is_empty() {
            return Ok(0);
        }

        let mut keys: Vec<&String> = self.dirty.iter().collect();
        keys.sort();

        let tx = self
            .conn
            .transaction()
            .context("Failed to begin cache transaction")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO genre_cache (key, genre) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET genre = excluded.genre",
            )?;
            for key in &keys {
                if let Some(genre) = self.entries.get(*key) {
                    stmt.execute(params![key, genre])?;
                }
            }
        }
        tx.commit().context("Failed to commit genre cache")?;

        let written = keys.len();
        self.dirty.clear();
        log::debug!(
            "Flushed {} cache entries to {}",
            written,
            self.path
                .as_deref()
                .map_or_else(|| "memory".to_string(), |p| p.display().to_string())
        );
        Ok(written)
    }

    /// Flush pending entries and close the database.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.conn
            .close()
            .map_err(|(_, err)| err)
            .context("Failed to close genre cache")
    }
}
