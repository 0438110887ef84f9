// WG Auto-Tunnel - PID File Management
// Ensures only one daemon instance runs at a time

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// PID file guard; the file is removed again when the guard drops
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim the given PID file, refusing when another live daemon holds
    /// it. A file left behind by a dead process is treated as stale and
    /// replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(existing) = read_pid(&path) {
            if process_exists(existing) {
                anyhow::bail!(
                    "Daemon is already running with PID {}. \
                     Stop it first or remove {} if it is stale.",
                    existing,
                    path.display()
                );
            }
            warn!(pid = existing, "Removing stale PID file");
            fs::remove_file(&path).context("Failed to remove stale PID file")?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create runtime directory")?;
        }

        let pid = std::process::id();
        fs::write(&path, pid.to_string()).context("Failed to write PID file")?;
        debug!(pid, path = %path.display(), "Created PID file");

        Ok(Self { path })
    }

    /// Claim the daemon's default PID file in the runtime directory
    pub fn acquire_default() -> Result<Self> {
        Self::acquire(crate::config::runtime_dir()?.join("wg-autotunneld.pid"))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Check whether a process with the given PID exists.
///
/// kill(pid, 0) sends no signal; EPERM still means the process is there.
#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as i32, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    warn!("Process existence check not implemented for this platform");
    true
}
