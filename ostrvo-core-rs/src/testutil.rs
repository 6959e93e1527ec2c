//! Shared fixtures for unit tests across the crate

use crate::config::{CoordinatorConfig, RosterEntry};
use crate::types::{Energy, NodeRole, Power, TelemetryReport};

/// Three-node street: anchor `a1`, participants `p1` (tier 1) and `p2`
/// (tier 2)
pub(crate) fn street_config() -> CoordinatorConfig {
    CoordinatorConfig {
        roster: vec![
            RosterEntry {
                id: "a1".to_string(),
                role: NodeRole::Anchor,
                priority_tier: 1,
                battery_capacity_kwh: Energy::from_kwh(20.0),
                max_charge_rate_kw: Power::from_kw(5.0),
                max_load_kw: Power::from_kw(10.0),
                max_generation_kw: Power::from_kw(8.0),
            },
            RosterEntry {
                id: "p1".to_string(),
                role: NodeRole::Participant,
                priority_tier: 1,
                battery_capacity_kwh: Energy::from_kwh(10.0),
                max_charge_rate_kw: Power::from_kw(3.0),
                max_load_kw: Power::from_kw(8.0),
                max_generation_kw: Power::from_kw(4.0),
            },
            RosterEntry {
                id: "p2".to_string(),
                role: NodeRole::Participant,
                priority_tier: 2,
                battery_capacity_kwh: Energy::from_kwh(10.0),
                max_charge_rate_kw: Power::from_kw(3.0),
                max_load_kw: Power::from_kw(8.0),
                max_generation_kw: Power::from_kw(4.0),
            },
        ],
        ..CoordinatorConfig::default()
    }
}

/// In-bounds report for any node of [`street_config`]
pub(crate) fn plausible_report(id: &str, seq: u32, tick: u32) -> TelemetryReport {
    TelemetryReport {
        node_id: id.to_string(),
        tick,
        seq,
        battery_kwh: Energy::from_kwh(4.0),
        load_kw: Power::from_kw(3.0),
        generation_kw: Power::ZERO,
    }
}
