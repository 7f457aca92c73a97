use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use genre_playlists::config::{Args, FileConfig, RunConfig};
use genre_playlists::models::RunStats;
use genre_playlists::pipeline;
use genre_playlists::progress::{format_duration, set_log_only};

fn main() -> Result<()> {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, args.log_filter()?);
    clog.init();

    set_log_only(args.log_only);

    let file = FileConfig::load(&args.config)?;
    let config = RunConfig::from_args(&args, file)?;

    log::info!("Scanning media directory: {:?}", config.media_dir);
    log::info!("Playlist directory: {:?}", config.playlist_dir);
    log::info!("Genre cache: {:?}", config.cache_path);
    if config.dry_run {
        log::info!("Dry run: no playlists will be written");
    }

    let stats = pipeline::run(&config).context("Playlist generation failed")?;

    print!("{}", summary(&stats));

    Ok(())
}

fn summary(stats: &RunStats) -> String {
    let mut lines = vec![
        format!("\n{:=<60}", ""),
        "Playlist generation complete!".to_string(),
        format!("  Files scanned: {}", stats.files_scanned),
        format!(
            "  Genres found: {} ({} from cache, {} new via {} lookups)",
            stats.cache_hits + stats.resolved,
            stats.cache_hits,
            stats.resolved,
            stats.outbound_lookups
        ),
        format!("  Unresolved: {}", stats.unresolved),
        format!(
            "  Merged into Mixed Songs: {} genres, {} files",
            stats.buckets_merged, stats.files_moved_to_overflow
        ),
    ];
    if stats.throttle_exhausted {
        lines.push(format!(
            "  Rate limited: lookups stopped after {} trips",
            stats.throttle_trips
        ));
    }
    lines.push(format!("  Playlists written: {}", stats.playlists_written));
    lines.push(format!(
        "  Elapsed: {}",
        format_duration(Duration::from_secs_f64(stats.elapsed_secs))
    ));
    lines.push(format!("{:=<60}", ""));
    lines.join("\n") + "\n"
}
