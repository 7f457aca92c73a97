//! End-to-end run: scan, resolve, consolidate, emit, hand over to the media
//! server, close the cache.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::cache::GenreCache;
use crate::config::RunConfig;
use crate::consolidate::consolidate;
use crate::jellyfin;
use crate::models::{GenreBuckets, RunStats, UNKNOWN_LABEL};
use crate::normalize::derive_track_identifier;
use crate::playlist::PlaylistEmitter;
use crate::progress::{create_progress_bar, log_progress};
use crate::rate_limit::{Clock, RateLimiter};
use crate::resolver::GenreResolver;
use crate::safety::validate_output_paths;
use crate::scan::scan_media;
use crate::spotify::{MetadataService, SpotifyClient};

/// Cache is flushed every this many files during resolution.
const CHECKPOINT_INTERVAL: usize = 50;

/// Progress line interval in log-only mode.
const PROGRESS_LOG_INTERVAL: u64 = 25;

/// Run against the real Spotify API with the system clock.
pub fn run(config: &RunConfig) -> Result<RunStats> {
    validate_output_paths(&config.media_dir, &config.playlist_dir, &config.cache_path)?;

    let cache = GenreCache::open(&config.cache_path)?;
    let service = SpotifyClient::new(&config.client_id, &config.client_secret, config.http_timeout);
    let limiter = RateLimiter::new(config.cooldown, config.max_trips);
    let resolver =
        GenreResolver::new(service, limiter, cache).with_search_limit(config.search_limit);

    let stats = run_with(config, resolver, Local::now())?;

    if let Some(path) = &config.stats_json {
        write_stats(path, &stats)?;
    }
    Ok(stats)
}

/// Everything after setup, generic over the service and clock.
pub fn run_with<S: MetadataService, C: Clock>(
    config: &RunConfig,
    mut resolver: GenreResolver<S, C>,
    now: DateTime<Local>,
) -> Result<RunStats> {
    let start = Instant::now();
    let mut stats = RunStats::default();

    // ========================================================================
    // Scan and resolve
    // ========================================================================

    let files = scan_media(&config.media_dir, &config.extensions)?;
    stats.files_scanned = files.len();

    let mut buckets = GenreBuckets::new();
    let total = files.len() as u64;
    let pb = create_progress_bar(total, "Resolving genres");

    for (i, file) in files.into_iter().enumerate() {
        let identifier = derive_track_identifier(&file.stem);
        pb.set_message(format!("Resolving: {}", truncate_for_display(&identifier, 40)));

        match resolver.resolve(&identifier) {
            Some(genre) => {
                log::debug!("{} -> {}", file.path.display(), genre);
                buckets.insert(&genre, file.path);
            }
            None => {
                stats.unresolved += 1;
                buckets.insert(UNKNOWN_LABEL, file.path);
            }
        }

        pb.inc(1);
        log_progress("resolve", i as u64 + 1, total, PROGRESS_LOG_INTERVAL);

        if (i + 1) % CHECKPOINT_INTERVAL == 0 {
            resolver
                .cache_mut()
                .flush()
                .context("Failed to checkpoint genre cache during resolution")?;
        }
    }
    pb.finish_with_message(format!(
        "Resolved {} files into {} genres",
        stats.files_scanned,
        buckets.len()
    ));

    let resolve_stats = resolver.stats().clone();
    stats.empty_identifiers = resolve_stats.empty_identifiers;
    stats.cache_hits = resolve_stats.cache_hits;
    stats.outbound_lookups = resolve_stats.outbound_calls;
    stats.resolved = resolve_stats.resolved;
    stats.no_results = resolve_stats.no_results;
    stats.no_genre = resolve_stats.no_genre + resolve_stats.no_artist;
    stats.throttle_trips = resolve_stats.throttle_trips;
    stats.service_errors = resolve_stats.service_errors;
    stats.throttle_exhausted = resolver.is_exhausted();

    // ========================================================================
    // Consolidate
    // ========================================================================

    let report = consolidate(&mut buckets, resolver.cache_mut(), config.threshold)?;
    stats.buckets_merged = report.merged.len();
    stats.files_moved_to_overflow = report.files_moved;
    log::info!(
        "Consolidation merged {} genres ({} files); {} playlists remain",
        report.merged.len(),
        report.files_moved,
        buckets.len()
    );

    // ========================================================================
    // Emit and hand over
    // ========================================================================

    if config.dry_run {
        for (label, files) in buckets.iter() {
            log::info!("[dry run] {}: {} files", label, files.len());
        }
    } else {
        let emitter = PlaylistEmitter::new(&config.playlist_dir, config.playlist.clone());
        let written = emitter.emit(&buckets, now)?;
        stats.playlists_written = written.len();
    }

    if config.chown {
        jellyfin::chown_recursive(&config.owner, &config.playlist_dir);
    }
    if config.restart {
        jellyfin::restart_service(&config.service);
    }

    resolver
        .into_cache()
        .close()
        .context("Failed to save genre cache")?;

    stats.elapsed_secs = start.elapsed().as_secs_f64();
    Ok(stats)
}

pub fn write_stats(path: &Path, stats: &RunStats) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote run statistics to {}", path.display());
    Ok(())
}

fn truncate_for_display(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::file_cache_key;
    use crate::models::OVERFLOW_LABEL;
    use crate::playlist::{PlaylistSettings, PLAYLIST_FILE_NAME};
    use crate::rate_limit::testing::FakeClock;
    use crate::scan::DEFAULT_EXTENSIONS;
    use crate::spotify::testing::ScriptedService;
    use crate::spotify::ServiceError;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        config: RunConfig,
    }

    fn fixture(threshold: usize) -> Fixture {
        let dir = tempdir().unwrap();
        let media_dir = dir.path().join("media");
        fs::create_dir(&media_dir).unwrap();
        let config = RunConfig {
            media_dir,
            playlist_dir: dir.path().join("playlists"),
            cache_path: dir.path().join("genre_cache.sqlite3"),
            cooldown: Duration::from_secs(5),
            max_trips: 3,
            threshold,
            search_limit: 5,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            playlist: PlaylistSettings::default(),
            owner: "jellyfin:jellyfin".to_string(),
            service: "jellyfin".to_string(),
            chown: false,
            restart: false,
            dry_run: false,
            stats_json: None,
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            http_timeout: Duration::from_secs(1),
        };
        Fixture { _dir: dir, config }
    }

    fn touch(config: &RunConfig, name: &str) -> PathBuf {
        let path = config.media_dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    fn resolver(
        config: &RunConfig,
        service: ScriptedService,
        clock: &FakeClock,
    ) -> GenreResolver<ScriptedService, FakeClock> {
        let cache = GenreCache::open(&config.cache_path).unwrap();
        let limiter = RateLimiter::with_clock(clock.clone(), config.cooldown, config.max_trips);
        GenreResolver::new(service, limiter, cache)
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn playlist_paths(config: &RunConfig, title: &str) -> BTreeSet<String> {
        let xml =
            fs::read_to_string(config.playlist_dir.join(title).join(PLAYLIST_FILE_NAME)).unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        doc.descendants()
            .filter(|n| n.has_tag_name("Path"))
            .filter_map(|n| n.text().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_full_run_groups_and_emits() {
        let fx = fixture(2);
        let a = touch(&fx.config, "Queen - Bohemian Rhapsody - 20240101abcdef.mp4");
        let b = touch(&fx.config, "Queen - Bohemian Rhapsody - 20240202abcdef.mp3");
        let c = touch(&fx.config, "Miles Davis - So What - 20230303abcdef.m4a");
        touch(&fx.config, "cover.jpg");

        let service = ScriptedService::new()
            .with_track("Bohemian Rhapsody", "queen", &["rock", "glam rock"])
            .with_track("So What", "miles", &["jazz"]);
        let clock = FakeClock::new();
        let stats = run_with(&fx.config, resolver(&fx.config, service, &clock), fixed_now()).unwrap();

        assert_eq!(stats.files_scanned, 3);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.buckets_merged, 1);
        assert_eq!(stats.files_moved_to_overflow, 1);
        // Rock, Mixed Songs, All
        assert_eq!(stats.playlists_written, 3);

        let rock = playlist_paths(&fx.config, "Rock");
        assert_eq!(rock.len(), 2);
        assert!(rock.contains(a.to_str().unwrap()));
        assert!(rock.contains(b.to_str().unwrap()));
        assert_eq!(
            playlist_paths(&fx.config, "Mixed Songs"),
            BTreeSet::from([c.to_string_lossy().into_owned()])
        );
        assert_eq!(playlist_paths(&fx.config, "All").len(), 3);

        // Cache survives the run with both lookups and the overflow assignment
        let cache = GenreCache::open(&fx.config.cache_path).unwrap();
        assert_eq!(cache.get("Bohemian Rhapsody"), Some("rock"));
        assert_eq!(cache.get("So What"), Some("jazz"));
        assert_eq!(cache.get(&file_cache_key(&c)), Some(OVERFLOW_LABEL));
    }

    #[test]
    fn test_second_run_is_served_from_cache() {
        let fx = fixture(1);
        touch(&fx.config, "Queen - Bohemian Rhapsody - 20240101abcdef.mp4");

        let clock = FakeClock::new();
        let service = ScriptedService::new().with_track("Bohemian Rhapsody", "queen", &["rock"]);
        let first = run_with(&fx.config, resolver(&fx.config, service, &clock), fixed_now()).unwrap();
        assert_eq!(first.outbound_lookups, 2);

        let second = run_with(
            &fx.config,
            resolver(&fx.config, ScriptedService::new(), &clock),
            fixed_now(),
        )
        .unwrap();
        assert_eq!(second.outbound_lookups, 0);
        assert_eq!(second.cache_hits, 1);
        assert!(fx.config.playlist_dir.join("Rock").join(PLAYLIST_FILE_NAME).is_file());
    }

    #[test]
    fn test_no_file_is_lost() {
        let fx = fixture(15);
        let mut expected = BTreeSet::new();
        for i in 0..20 {
            expected.insert(touch(&fx.config, &format!("Band - Rock Song {i} - 2024010{i}abc.mp3")));
        }
        for i in 0..3 {
            expected.insert(touch(&fx.config, &format!("Trio - Jazz Tune {i} - 2024020{i}abc.mp3")));
        }
        // Title segment is empty, so the identifier is too
        expected.insert(touch(&fx.config, "Band -  - 20240101abcdef.mp4"));

        let mut service = ScriptedService::new();
        for i in 0..20 {
            service = service.with_track(&format!("Rock Song {i}"), "band", &["rock"]);
        }
        for i in 0..3 {
            service = service.with_track(&format!("Jazz Tune {i}"), "trio", &["jazz"]);
        }

        let clock = FakeClock::new();
        let stats = run_with(&fx.config, resolver(&fx.config, service, &clock), fixed_now()).unwrap();
        assert_eq!(stats.files_scanned, 24);
        assert_eq!(stats.empty_identifiers, 1);

        let all: BTreeSet<PathBuf> = playlist_paths(&fx.config, "All")
            .into_iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(all, expected);
        assert_eq!(playlist_paths(&fx.config, "Rock").len(), 20);
        // 3 jazz + 1 unknown fall below the threshold
        assert_eq!(playlist_paths(&fx.config, "Mixed Songs").len(), 4);
        assert!(!fx.config.playlist_dir.join("Jazz").exists());
    }

    #[test]
    fn test_exhausted_throttle_routes_everything_to_overflow() {
        let fx = fixture(15);
        for i in 0..4 {
            touch(&fx.config, &format!("Artist - Song {i} - 2024030{i}abcd.mp3"));
        }

        let mut service = ScriptedService::new();
        for _ in 0..3 {
            service
                .queued_searches
                .push_back(Err(ServiceError::RateLimited { retry_after: None }));
        }
        let clock = FakeClock::new();
        let stats = run_with(&fx.config, resolver(&fx.config, service, &clock), fixed_now()).unwrap();

        assert!(stats.throttle_exhausted);
        assert_eq!(stats.throttle_trips, 3);
        assert_eq!(stats.outbound_lookups, 3);
        assert_eq!(stats.unresolved, 4);
        assert_eq!(playlist_paths(&fx.config, "Mixed Songs").len(), 4);
        assert_eq!(playlist_paths(&fx.config, "All").len(), 4);
    }

    #[test]
    fn test_dry_run_writes_no_playlists() {
        let mut fx = fixture(1);
        fx.config.dry_run = true;
        touch(&fx.config, "Queen - Bohemian Rhapsody - 20240101abcdef.mp4");

        let clock = FakeClock::new();
        let service = ScriptedService::new().with_track("Bohemian Rhapsody", "queen", &["rock"]);
        let stats = run_with(&fx.config, resolver(&fx.config, service, &clock), fixed_now()).unwrap();

        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.playlists_written, 0);
        assert!(!fx.config.playlist_dir.exists());
        // Lookups are still cached
        let cache = GenreCache::open(&fx.config.cache_path).unwrap();
        assert_eq!(cache.get("Bohemian Rhapsody"), Some("rock"));
    }

    #[test]
    fn test_missing_media_dir_fails() {
        let fx = fixture(1);
        fs::remove_dir(&fx.config.media_dir).unwrap();
        let clock = FakeClock::new();
        let result = run_with(
            &fx.config,
            resolver(&fx.config, ScriptedService::new(), &clock),
            fixed_now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_write_stats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = RunStats {
            files_scanned: 7,
            ..RunStats::default()
        };
        write_stats(&path, &stats).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["files_scanned"], 7);
        assert_eq!(value["throttle_exhausted"], false);
    }

    #[test]
    fn test_truncate_for_display() {
        assert_eq!(truncate_for_display("short", 40), "short");
        assert_eq!(truncate_for_display("abcdefghij", 6), "abc...");
    }
}
