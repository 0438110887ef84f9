// WG Auto-Tunnel - Tunnel Spec Store
// TOML-backed spec I/O shared by the daemon and any front-end

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::spec::TunnelSpec;

/// Default tunnel spec directory (~/.config/wg-autotunnel/tunnels)
pub fn default_specs_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
    Ok(config_dir.join("wg-autotunnel").join("tunnels"))
}

fn spec_path(dir: &Path, id: &Uuid) -> PathBuf {
    dir.join(format!("{}.toml", id))
}

/// Load all tunnel specs from a directory.
///
/// Unparseable files are skipped with a warning so one bad import does not
/// take the whole set down.
pub fn load_all_specs(dir: &Path) -> Result<Vec<TunnelSpec>> {
    if !dir.exists() {
        debug!("Tunnel spec directory does not exist: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut specs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        // Skip non-TOML files
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            continue;
        }

        match load_spec(&path) {
            Ok(spec) => {
                debug!("Loaded tunnel spec: {} ({})", spec.name(), spec.id());
                specs.push(spec);
            }
            Err(e) => {
                warn!("Failed to load tunnel spec {}: {}", path.display(), e);
            }
        }
    }

    // Stable order regardless of directory iteration order
    specs.sort_by(|a, b| a.metadata.created_at.cmp(&b.metadata.created_at));

    Ok(specs)
}

/// Load a single tunnel spec from a path
pub fn load_spec(path: &Path) -> Result<TunnelSpec> {
    let contents = fs::read_to_string(path)?;
    let spec: TunnelSpec = toml::from_str(&contents)?;
    Ok(spec)
}

/// Load a single tunnel spec by its UUID
pub fn load_spec_by_id(dir: &Path, id: &Uuid) -> Result<TunnelSpec> {
    let path = spec_path(dir, id);
    if !path.exists() {
        return Err(Error::SpecNotFound(id.to_string()));
    }
    load_spec(&path)
}

/// Save a tunnel spec to disk.
///
/// With `overwrite` false, refuses to clobber an existing spec file.
pub fn save_spec(dir: &Path, spec: &TunnelSpec, overwrite: bool) -> Result<PathBuf> {
    spec.validate()?;

    fs::create_dir_all(dir)?;
    let path = spec_path(dir, &spec.id());

    if !overwrite && path.exists() {
        return Err(Error::SpecExists(spec.name().to_string()));
    }

    let toml_content = toml::to_string_pretty(spec)?;
    fs::write(&path, toml_content)?;

    debug!("Saved tunnel spec '{}' to {}", spec.name(), path.display());

    Ok(path)
}

/// Delete a tunnel spec from disk by UUID
pub fn delete_spec(dir: &Path, id: &Uuid) -> Result<PathBuf> {
    let path = spec_path(dir, id);
    if !path.exists() {
        return Err(Error::SpecNotFound(id.to_string()));
    }
    fs::remove_file(&path)?;
    debug!("Deleted tunnel spec at {}", path.display());
    Ok(path)
}
