//! Host configuration: the persistence file path and the `WinWorkarounds`
//! knobs, loaded from an optional `display-settings.toml` next to the
//! executable. Adapted from `hagias/src/config.rs`'s `figment` + `Toml`
//! loading, minus the Rocket-specific `RelativePathBuf`/web-serving fields
//! this host has no use for.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use figment::Figment;
use figment::providers::{Format as _, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub persistence_path: PathBuf,
    pub hdr_blank_delay_ms: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            persistence_path: PathBuf::from("display-settings-state.json"),
            hdr_blank_delay_ms: None,
        }
    }
}

impl HostConfig {
    pub fn hdr_blank_delay(&self) -> Option<Duration> {
        self.hdr_blank_delay_ms.map(Duration::from_millis)
    }
}

pub fn get() -> Result<HostConfig> {
    debug!("loading host config");
    let toml_path = config_path();
    let figment = Figment::from(Serialized::defaults(HostConfig::default()))
        .merge(Toml::file(&toml_path).nested());
    let config = figment
        .extract::<HostConfig>()
        .context("failed to extract display-settings.toml config")?;
    debug!(?config, "loaded host config");
    Ok(config)
}

fn config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.join("display-settings.toml")))
        .unwrap_or_else(|| Path::new("display-settings.toml").to_owned())
}
