//! Command-line arguments and the credentials/settings file.
//!
//! Paths and tuning knobs come from the command line. Spotify credentials and
//! playlist metadata live in a TOML file kept outside the repository, located
//! by `--config` or `GENRE_PLAYLISTS_CONFIG`.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consolidate::DEFAULT_THRESHOLD;
use crate::jellyfin::{DEFAULT_OWNER, DEFAULT_SERVICE};
use crate::playlist::PlaylistSettings;
use crate::rate_limit::DEFAULT_MAX_TRIPS;
use crate::resolver::DEFAULT_SEARCH_LIMIT;
use crate::scan::DEFAULT_EXTENSIONS;

pub const CONFIG_ENV: &str = "GENRE_PLAYLISTS_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "genre-playlists")]
#[command(about = "Build Jellyfin genre playlists for downloaded media using Spotify genres")]
pub struct Args {
    /// Credentials/settings TOML file
    #[arg(long, env = CONFIG_ENV)]
    pub config: PathBuf,

    #[arg(long, default_value = "/volumes/data/metube/downloads/completed")]
    pub media_dir: PathBuf,

    #[arg(long, default_value = "/var/lib/jellyfin/data/playlists")]
    pub playlist_dir: PathBuf,

    #[arg(long, default_value = "genre_cache.sqlite3")]
    pub cache: PathBuf,

    /// Minimum seconds between Spotify requests
    #[arg(long, default_value = "5")]
    pub cooldown_secs: f64,

    /// Consecutive rate-limit responses before lookups stop for the run
    #[arg(long, default_value_t = DEFAULT_MAX_TRIPS)]
    pub max_trips: u32,

    /// Genres with fewer files are merged into "Mixed Songs"
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: usize,

    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    pub search_limit: usize,

    /// Owner applied to the playlist tree (user:group)
    #[arg(long, default_value = DEFAULT_OWNER)]
    pub owner: String,

    /// Media server unit restarted after writing playlists
    #[arg(long, default_value = DEFAULT_SERVICE)]
    pub service: String,

    #[arg(long)]
    pub no_chown: bool,

    #[arg(long)]
    pub no_restart: bool,

    /// Resolve and consolidate, but write no playlists and run no system commands
    #[arg(long)]
    pub dry_run: bool,

    /// Hide progress bars and print periodic progress lines instead
    #[arg(long)]
    pub log_only: bool,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write run statistics as JSON
    #[arg(long)]
    pub stats_json: Option<PathBuf>,
}

impl Args {
    pub fn log_filter(&self) -> Result<log::LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("Unknown log level '{}'", self.log_level))
    }
}

// ============================================================================
// Settings File
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SpotifySection {
    pub client_id: String,
    pub client_secret: String,
    /// HTTP read/write timeout in seconds
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistSection {
    #[serde(flatten)]
    pub settings: PlaylistSettings,
    pub extensions: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub spotify: SpotifySection,
    pub playlists: PlaylistSection,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let config: FileConfig = toml::from_str(text).context("Invalid settings file")?;
        if config.spotify.client_id.trim().is_empty() {
            bail!("[spotify] client_id is missing");
        }
        if config.spotify.client_secret.trim().is_empty() {
            bail!("[spotify] client_secret is missing");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }
}

// ============================================================================
// Resolved Run Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub media_dir: PathBuf,
    pub playlist_dir: PathBuf,
    pub cache_path: PathBuf,
    pub cooldown: Duration,
    pub max_trips: u32,
    pub threshold: usize,
    pub search_limit: usize,
    pub extensions: Vec<String>,
    pub playlist: PlaylistSettings,
    pub owner: String,
    pub service: String,
    pub chown: bool,
    pub restart: bool,
    pub dry_run: bool,
    pub stats_json: Option<PathBuf>,
    pub client_id: String,
    pub client_secret: String,
    pub http_timeout: Duration,
}

impl RunConfig {
    pub fn from_args(args: &Args, file: FileConfig) -> Result<Self> {
        if !args.cooldown_secs.is_finite() || args.cooldown_secs < 0.0 {
            bail!("--cooldown-secs must be a non-negative number");
        }
        if args.max_trips == 0 {
            bail!("--max-trips must be at least 1");
        }

        let cooldown = Duration::try_from_secs_f64(args.cooldown_secs)
            .context("--cooldown-secs out of range")?;

        let extensions = file
            .playlists
            .extensions
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect());

        Ok(Self {
            media_dir: args.media_dir.clone(),
            playlist_dir: args.playlist_dir.clone(),
            cache_path: args.cache.clone(),
            cooldown,
            max_trips: args.max_trips,
            threshold: args.threshold,
            search_limit: args.search_limit,
            extensions,
            playlist: file.playlists.settings,
            owner: args.owner.clone(),
            service: args.service.clone(),
            chown: !args.no_chown && !args.dry_run,
            restart: !args.no_restart && !args.dry_run,
            dry_run: args.dry_run,
            stats_json: args.stats_json.clone(),
            client_id: file.spotify.client_id,
            client_secret: file.spotify.client_secret,
            http_timeout: Duration::from_secs(file.spotify.timeout_secs.unwrap_or(15)),
        })
    }
}
