//! Node-local configuration file.
//!
//! One TOML file per deployed node: identity, radio bridge addresses, the
//! local relay bank, and the street-wide coordinator settings (shared
//! verbatim across the whole street so every node reaches the same
//! decisions from the same data).

use ostrvo_core::{ConfigError, CoordinatorConfig, Energy, LocalSample, Power, Relay};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// This node's roster id
    pub node_id: String,
    /// UDP bind address of the radio bridge
    pub listen_addr: SocketAddr,
    /// Broadcast address the street listens on
    pub broadcast_addr: SocketAddr,
    /// Local relay bank; empty for pure sensor nodes
    #[serde(default)]
    pub relays: Vec<Relay>,
    /// Baseline reported until a sensor driver is wired in
    #[serde(default)]
    pub telemetry: TelemetryDefaults,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TelemetryDefaults {
    pub battery_kwh: Energy,
    pub load_kw: Power,
    pub generation_kw: Power,
}

impl Default for TelemetryDefaults {
    fn default() -> Self {
        Self {
            battery_kwh: Energy::from_kwh(5.0),
            load_kw: Power::from_kw(0.5),
            generation_kw: Power::ZERO,
        }
    }
}

#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error("cannot read \"{path}\": {source}")]
    Io { path: String, source: std::io::Error },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, NodeConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| NodeConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and fully validate; any error here must abort startup
    pub fn from_toml_str(raw: &str) -> Result<Self, NodeConfigError> {
        let cfg: NodeConfig = toml::from_str(raw)?;
        cfg.coordinator.validate()?;
        if cfg.coordinator.roster_entry(&cfg.node_id).is_none() {
            return Err(ConfigError::UnknownLocalNode { id: cfg.node_id.clone() }.into());
        }
        Ok(cfg)
    }

    pub fn initial_sample(&self) -> LocalSample {
        LocalSample {
            battery_kwh: self.telemetry.battery_kwh,
            load_kw: self.telemetry.load_kw,
            generation_kw: self.telemetry.generation_kw,
        }
    }
}
