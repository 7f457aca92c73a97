//! Media-server side effects after playlists are written.
//!
//! Both hooks are best effort: failures are logged and the run carries on.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

pub const DEFAULT_OWNER: &str = "jellyfin:jellyfin";
pub const DEFAULT_SERVICE: &str = "jellyfin";

fn run_command(program: &str, args: &[&str]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {program}"))?;
    if !output.status.success() {
        bail!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Hand the playlist tree to the media server's user (`chown -R`).
pub fn chown_recursive(owner: &str, dir: &Path) -> bool {
    let dir_arg = dir.to_string_lossy();
    match run_command("chown", &["-R", owner, &dir_arg]) {
        Ok(()) => {
            log::info!("Set owner {} on {}", owner, dir.display());
            true
        }
        Err(err) => {
            log::error!("Error setting media server rights: {:#}", err);
            false
        }
    }
}

/// Restart the media server so it picks up the new playlists.
pub fn restart_service(service: &str) -> bool {
    match run_command("systemctl", &["restart", service]) {
        Ok(()) => {
            log::info!("Restarted {}", service);
            true
        }
        Err(err) => {
            log::error!("Error restarting {}: {:#}", service, err);
            false
        }
    }
}
