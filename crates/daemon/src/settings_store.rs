// WG Auto-Tunnel - Settings Store
// TOML persistence for the user settings document, plus the writer the
// orchestrator uses to push mutations back to disk and into the watch

use std::fs;
use std::path::PathBuf;

use tokio::sync::watch;
use tracing::debug;

use wg_autotunnel_common::{Result, Settings};
use wg_autotunnel_core::SettingsWriter;

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load settings; a missing file means first run and yields defaults
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(settings)?;
        fs::write(&self.path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

/// Settings writer handed to the orchestrator: persists to disk and echoes
/// the new document into the settings watch so API readers stay current.
pub struct PersistingSettingsWriter {
    store: SettingsStore,
    tx: watch::Sender<Settings>,
}

impl PersistingSettingsWriter {
    pub fn new(store: SettingsStore, tx: watch::Sender<Settings>) -> Self {
        Self { store, tx }
    }
}

impl SettingsWriter for PersistingSettingsWriter {
    fn persist(&self, settings: &Settings) -> Result<()> {
        self.store.save(settings)?;
        // The orchestrator already holds this value; the echo only serves
        // other watchers.
        let _ = self.tx.send(settings.clone());
        Ok(())
    }
}
