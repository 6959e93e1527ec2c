//! Coordinator configuration and the static street roster.
//!
//! The configuration is loaded by an external collaborator (the node
//! binary parses TOML, the simulation harness builds it in code) and
//! consumed here as a plain struct. Validation is fatal: a node must not
//! run with an inconsistent safety configuration.

use crate::types::{Energy, NodeId, NodeRole, Power};
use crate::wire::NODE_ID_LEN;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// One node of the static street roster.
///
/// The declared bounds are the plausibility envelope the fault classifier
/// judges the node's own telemetry against; they are deployment facts, not
/// trust decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterEntry {
    pub id: NodeId,
    pub role: NodeRole,
    /// Shed ordering: lower tiers are shed first. Ignored for anchors.
    #[serde(default = "default_priority_tier")]
    pub priority_tier: u8,
    /// Battery capacity; a claim above this is implausible
    #[serde(default)]
    pub battery_capacity_kwh: Energy,
    /// Fastest the battery can physically charge
    #[serde(default)]
    pub max_charge_rate_kw: Power,
    /// Hardware ceiling on drawn load
    #[serde(default = "default_max_load")]
    pub max_load_kw: Power,
    /// Hardware ceiling on generation
    #[serde(default)]
    pub max_generation_kw: Power,
}

fn default_priority_tier() -> u8 {
    1
}

fn default_max_load() -> Power {
    Power::from_kw(10.0)
}

/// Everything the coordination loop needs to run one node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Wall-clock seconds per tick; bounds the battery charge-rate check
    pub tick_interval_secs: u32,
    /// Silent ticks before Healthy degrades to Stale
    pub stale_timeout_ticks: u32,
    /// Silent ticks before Stale degrades to Faulty (> stale timeout)
    pub fault_timeout_ticks: u32,
    /// Implausible reports before Suspect is promoted to Faulty
    pub consecutive_anomaly_threshold: u32,
    /// Consecutive plausible reports that clear a Suspect node
    pub plausible_recovery_streak: u32,
    /// Reserve level that opens a scarcity episode
    pub low_reserve_threshold_kwh: Energy,
    /// Reserve level that permits restoration; strictly above the
    /// low-reserve threshold (hysteresis)
    pub restore_threshold_kwh: Energy,
    /// Consecutive deficit ticks before Normal confirms Scarcity
    pub scarcity_confirm_ticks: u32,
    /// Ticks Scarcity must persist before the first shed round
    pub shed_delay_ticks: u32,
    /// Sustained-surplus ticks before Recovering may restore
    pub restore_confirm_ticks: u32,
    /// Inbound frames processed per tick; the rest are dropped and counted
    pub max_messages_per_tick: usize,
    /// Ticks between outbound heartbeats
    pub heartbeat_interval_ticks: u32,
    /// Ticks between outbound full state reports
    pub report_interval_ticks: u32,
    pub roster: Vec<RosterEntry>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            stale_timeout_ticks: 6,
            fault_timeout_ticks: 24,
            consecutive_anomaly_threshold: 5,
            plausible_recovery_streak: 3,
            low_reserve_threshold_kwh: Energy::from_kwh(2.0),
            restore_threshold_kwh: Energy::from_kwh(4.0),
            scarcity_confirm_ticks: 3,
            shed_delay_ticks: 2,
            restore_confirm_ticks: 6,
            max_messages_per_tick: 64,
            heartbeat_interval_ticks: 3,
            report_interval_ticks: 12,
            roster: Vec::new(),
        }
    }
}

/// Startup-fatal configuration faults
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("restore_threshold_kwh ({restore}) must be strictly greater than low_reserve_threshold_kwh ({low})")]
    RestoreNotAboveShed { low: Energy, restore: Energy },
    #[error("fault_timeout_ticks ({fault}) must be strictly greater than stale_timeout_ticks ({stale})")]
    FaultNotAboveStale { stale: u32, fault: u32 },
    #[error("{field} must be at least 1")]
    ZeroField { field: &'static str },
    #[error("roster must not be empty")]
    EmptyRoster,
    #[error("roster declares no anchor node")]
    NoAnchor,
    #[error("duplicate roster id \"{id}\"")]
    DuplicateNode { id: NodeId },
    #[error("roster id \"{id}\" must be 1..={NODE_ID_LEN} ASCII bytes")]
    BadNodeId { id: NodeId },
    #[error("node \"{id}\" is not in the roster")]
    UnknownLocalNode { id: NodeId },
}

impl CoordinatorConfig {
    /// Validate threshold ordering and roster consistency.
    ///
    /// Called once at startup; any error is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, field) in [
            (self.tick_interval_secs, "tick_interval_secs"),
            (self.stale_timeout_ticks, "stale_timeout_ticks"),
            (self.fault_timeout_ticks, "fault_timeout_ticks"),
            (self.consecutive_anomaly_threshold, "consecutive_anomaly_threshold"),
            (self.plausible_recovery_streak, "plausible_recovery_streak"),
            (self.scarcity_confirm_ticks, "scarcity_confirm_ticks"),
            (self.restore_confirm_ticks, "restore_confirm_ticks"),
            (self.heartbeat_interval_ticks, "heartbeat_interval_ticks"),
            (self.report_interval_ticks, "report_interval_ticks"),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroField { field });
            }
        }
        if self.max_messages_per_tick == 0 {
            return Err(ConfigError::ZeroField { field: "max_messages_per_tick" });
        }
        if self.fault_timeout_ticks <= self.stale_timeout_ticks {
            return Err(ConfigError::FaultNotAboveStale {
                stale: self.stale_timeout_ticks,
                fault: self.fault_timeout_ticks,
            });
        }
        if self.restore_threshold_kwh <= self.low_reserve_threshold_kwh {
            return Err(ConfigError::RestoreNotAboveShed {
                low: self.low_reserve_threshold_kwh,
                restore: self.restore_threshold_kwh,
            });
        }
        if self.roster.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        let mut seen = HashSet::new();
        for entry in &self.roster {
            if entry.id.is_empty() || entry.id.len() > NODE_ID_LEN || !entry.id.is_ascii() {
                return Err(ConfigError::BadNodeId { id: entry.id.clone() });
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateNode { id: entry.id.clone() });
            }
        }
        if !self.roster.iter().any(|e| e.role == NodeRole::Anchor) {
            return Err(ConfigError::NoAnchor);
        }
        Ok(())
    }

    pub fn roster_entry(&self, id: &str) -> Option<&RosterEntry> {
        self.roster.iter().find(|e| e.id == id)
    }
}
