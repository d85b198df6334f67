//! `FilePersistence`: a JSON-file-backed `Persistence` adapter. Adapted from
//! `hagias-monitor-service/src/layouts.rs`'s `Layouts::load`/`save`
//! (`try_exists` guard, `serde_json` round-trip, `Context`-wrapped errors)
//! to the synchronous, whole-blob contract `Persistence` requires — this
//! port is called from inside `SettingsManager::apply`/`revert`, which are
//! not `async`, so `std::fs` replaces `tokio::fs`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use display_settings_core::ports::Persistence;
use tracing::{debug, warn};

pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load_private(&self) -> Result<Vec<u8>> {
        if !self.path.try_exists()? {
            return Ok(Vec::new());
        }
        std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))
    }

    fn store_private(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, bytes)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn clear_private(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }
}

impl Persistence for FilePersistence {
    fn store(&self, bytes: &[u8]) -> bool {
        debug!(path = %self.path.display(), "persisting state");
        match self.store_private(bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to persist state");
                false
            }
        }
    }

    fn load(&self) -> Option<Vec<u8>> {
        match self.load_private() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "failed to load persisted state");
                None
            }
        }
    }

    fn clear(&self) -> bool {
        debug!(path = %self.path.display(), "clearing persisted state");
        match self.clear_private() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to clear persisted state");
                false
            }
        }
    }
}
