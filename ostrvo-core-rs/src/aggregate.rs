//! Street-level energy aggregation.
//!
//! A pure function of the registry and the current tick: no side effects,
//! no I/O, summation in ascending node-id order so fixed-point results are
//! bit-identical across replays of the same fixture.
//!
//! Contribution rules follow the classifier verdicts. Healthy nodes
//! contribute their latest values. Stale nodes contribute their
//! last-Healthy values decayed linearly to zero across the fault timeout.
//! Suspect and Faulty nodes contribute zero generation and reserve but
//! their full last-known load: an untrusted node is assumed to still draw
//! power even when its claims are not believed.

use crate::config::CoordinatorConfig;
use crate::registry::{NodeRegistry, TelemetrySample};
use crate::types::{AggregateSnapshot, Energy, Health, NodeRole, Power};

/// Recompute the street snapshot for this tick
pub fn aggregate(registry: &NodeRegistry, cfg: &CoordinatorConfig, tick: u32) -> AggregateSnapshot {
    let mut generation_centi: i64 = 0;
    let mut load_centi: i64 = 0;
    let mut reserve_centi: i64 = 0;
    let mut healthy_nodes = 0usize;
    let mut reference_anchors = 0usize;

    for record in registry.iter() {
        match record.health {
            Health::Healthy => {
                healthy_nodes += 1;
                if record.role == NodeRole::Anchor {
                    reference_anchors += 1;
                }
                if let Some(sample) = &record.latest {
                    generation_centi += i64::from(sample.generation_kw.centi_kw());
                    load_centi += i64::from(sample.load_kw.centi_kw());
                    reserve_centi += i64::from(sample.battery_kwh.centi_kwh());
                }
            }
            Health::Stale => {
                if record.role == NodeRole::Anchor {
                    reference_anchors += 1;
                }
                if let Some(sample) = &record.last_healthy {
                    let silent = record.silent_ticks(tick);
                    let (generation, load, reserve) =
                        decayed(sample, silent, cfg.fault_timeout_ticks);
                    generation_centi += generation;
                    load_centi += load;
                    reserve_centi += reserve;
                }
            }
            Health::Suspect | Health::Faulty => {
                load_centi += i64::from(record.last_known_load().centi_kw());
            }
        }
    }

    AggregateSnapshot {
        tick,
        total_generation_kw: Power::from_centi_kw(clamp_i32(generation_centi)),
        total_load_kw: Power::from_centi_kw(clamp_i32(load_centi)),
        total_reserve_kwh: Energy::from_centi_kwh(clamp_u32(reserve_centi)),
        healthy_node_count: healthy_nodes,
        reference_anchor_count: reference_anchors,
    }
}

/// Linear decay toward zero: full weight at zero silence, zero weight at
/// the fault timeout
fn decayed(sample: &TelemetrySample, silent_ticks: u32, fault_timeout_ticks: u32) -> (i64, i64, i64) {
    let remaining = i64::from(fault_timeout_ticks.saturating_sub(silent_ticks));
    let span = i64::from(fault_timeout_ticks).max(1);
    let scale = |centi: i64| centi * remaining / span;
    (
        scale(i64::from(sample.generation_kw.centi_kw())),
        scale(i64::from(sample.load_kw.centi_kw())),
        scale(i64::from(sample.battery_kwh.centi_kwh())),
    )
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use crate::testutil::street_config;
    use crate::types::Health;

    fn sample(battery: f64, load: f64, generation: f64, tick: u32) -> TelemetrySample {
        TelemetrySample {
            battery_kwh: Energy::from_kwh(battery),
            load_kw: Power::from_kw(load),
            generation_kw: Power::from_kw(generation),
            accepted_tick: tick,
        }
    }

    fn loaded_registry() -> (CoordinatorConfig, NodeRegistry) {
        let cfg = street_config();
        let mut reg = NodeRegistry::from_roster(&cfg.roster);
        reg.record_local("a1", sample(12.0, 0.5, 5.0, 10));
        reg.record_local("p1", sample(4.0, 3.0, 0.0, 10));
        reg.record_local("p2", sample(6.0, 3.0, 0.0, 10));
        (cfg, reg)
    }

    #[test]
    fn test_all_healthy_sums_latest_values() {
        let (cfg, reg) = loaded_registry();
        let snap = aggregate(&reg, &cfg, 10);
        assert_eq!(snap.total_generation_kw, Power::from_kw(5.0));
        assert_eq!(snap.total_load_kw, Power::from_kw(6.5));
        assert_eq!(snap.total_reserve_kwh, Energy::from_kwh(22.0));
        assert_eq!(snap.healthy_node_count, 3);
        assert_eq!(snap.reference_anchor_count, 1);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let (cfg, reg) = loaded_registry();
        assert_eq!(aggregate(&reg, &cfg, 10), aggregate(&reg, &cfg, 10));
    }

    #[test]
    fn test_stale_contribution_decays_linearly() {
        let (cfg, mut reg) = loaded_registry();
        let record = reg.get_mut("p2").unwrap();
        record.health = Health::Stale;
        record.last_seen_tick = Some(0);
        record.latest = Some(sample(6.0, 3.0, 0.0, 0));
        record.last_healthy = record.latest;

        // Half the fault timeout elapsed: half weight
        let half = cfg.fault_timeout_ticks / 2;
        let snap = aggregate(&reg, &cfg, half);
        assert_eq!(snap.total_load_kw, Power::from_kw(3.5 + 1.5));
        assert_eq!(snap.total_reserve_kwh, Energy::from_kwh(16.0 + 3.0));
        assert_eq!(snap.healthy_node_count, 2);

        // At the fault timeout the contribution has fully decayed
        let snap = aggregate(&reg, &cfg, cfg.fault_timeout_ticks);
        assert_eq!(snap.total_load_kw, Power::from_kw(3.5));
        assert_eq!(snap.total_reserve_kwh, Energy::from_kwh(16.0));
    }

    #[test]
    fn test_suspect_contributes_full_load_but_no_reserve() {
        let (cfg, mut reg) = loaded_registry();
        reg.get_mut("p1").unwrap().health = Health::Suspect;
        let snap = aggregate(&reg, &cfg, 10);
        // p1's 3 kW load stays in, its 4 kWh reserve and any generation
        // drop out
        assert_eq!(snap.total_load_kw, Power::from_kw(6.5));
        assert_eq!(snap.total_reserve_kwh, Energy::from_kwh(18.0));
        assert_eq!(snap.healthy_node_count, 2);
    }

    #[test]
    fn test_faulty_anchor_is_not_a_reference() {
        let (cfg, mut reg) = loaded_registry();
        reg.get_mut("a1").unwrap().health = Health::Faulty;
        let snap = aggregate(&reg, &cfg, 10);
        assert_eq!(snap.reference_anchor_count, 0);
        // Its generation claim is gone, its load is kept
        assert_eq!(snap.total_generation_kw, Power::ZERO);
        assert_eq!(snap.total_load_kw, Power::from_kw(6.5));
    }

    #[test]
    fn test_stale_anchor_still_references() {
        let (cfg, mut reg) = loaded_registry();
        let record = reg.get_mut("a1").unwrap();
        record.health = Health::Stale;
        record.last_seen_tick = Some(9);
        let snap = aggregate(&reg, &cfg, 10);
        assert_eq!(snap.reference_anchor_count, 1);
    }

    #[test]
    fn test_never_reporting_node_contributes_nothing() {
        let cfg = street_config();
        let reg = NodeRegistry::from_roster(&cfg.roster);
        let snap = aggregate(&reg, &cfg, 0);
        assert_eq!(snap.total_load_kw, Power::ZERO);
        assert_eq!(snap.total_reserve_kwh, Energy::ZERO);
        assert_eq!(snap.healthy_node_count, 3);
    }
}
