//! Per-node health state machine.
//!
//! Classifies every rostered node as Healthy, Stale, Suspect, or Faulty.
//! Staleness is timeout-driven and evaluated once per tick; suspicion is
//! driven by physically implausible claims judged against the node's own
//! declared bounds, not against peer consensus; no trusted quorum is
//! assumed reachable on any given tick. Faulty is sticky until an
//! out-of-band operator reset.

use crate::config::CoordinatorConfig;
use crate::registry::{NodeRecord, NodeRegistry, ReportRejection, TelemetrySample};
use crate::types::{Energy, Health, Heartbeat, Power, TelemetryReport};
use std::fmt;
use tracing::{info, warn};

/// A physically impossible claim relative to the node's declared bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Battery claim above declared capacity
    BatteryAboveCapacity { claimed: Energy, capacity: Energy },
    /// Battery rose faster than the declared max charge rate allows
    BatteryClimbTooFast { rise: Energy, allowed: Energy },
    /// Load claim above the hardware ceiling
    LoadAboveCeiling { claimed: Power, ceiling: Power },
    /// Generation claim above the hardware ceiling
    GenerationAboveCeiling { claimed: Power, ceiling: Power },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::BatteryAboveCapacity { claimed, capacity } => {
                write!(f, "battery {claimed} above capacity {capacity}")
            }
            Anomaly::BatteryClimbTooFast { rise, allowed } => {
                write!(f, "battery rose {rise} in one interval, max {allowed}")
            }
            Anomaly::LoadAboveCeiling { claimed, ceiling } => {
                write!(f, "load {claimed} above ceiling {ceiling}")
            }
            Anomaly::GenerationAboveCeiling { claimed, ceiling } => {
                write!(f, "generation {claimed} above ceiling {ceiling}")
            }
        }
    }
}

/// Telemetry fields a single message actually carries
struct Claim {
    battery_kwh: Energy,
    load_kw: Option<Power>,
    generation_kw: Option<Power>,
}

/// Evaluates reports and timeouts against the classifier state machine
#[derive(Debug, Clone)]
pub struct FaultClassifier {
    tick_interval_secs: u32,
    stale_timeout_ticks: u32,
    fault_timeout_ticks: u32,
    anomaly_threshold: u32,
    recovery_streak: u32,
}

impl FaultClassifier {
    pub fn new(cfg: &CoordinatorConfig) -> Self {
        Self {
            tick_interval_secs: cfg.tick_interval_secs,
            stale_timeout_ticks: cfg.stale_timeout_ticks,
            fault_timeout_ticks: cfg.fault_timeout_ticks,
            anomaly_threshold: cfg.consecutive_anomaly_threshold,
            recovery_streak: cfg.plausible_recovery_streak,
        }
    }

    /// Ingest a full state report. Returns the node's health after
    /// classification.
    pub fn ingest_report(
        &self,
        registry: &mut NodeRegistry,
        report: &TelemetryReport,
        tick: u32,
    ) -> Result<Health, ReportRejection> {
        let claim = Claim {
            battery_kwh: report.battery_kwh,
            load_kw: Some(report.load_kw),
            generation_kw: Some(report.generation_kw),
        };
        self.ingest(registry, &report.node_id, report.seq, claim, tick)
    }

    /// Ingest a liveness heartbeat (battery only)
    pub fn ingest_heartbeat(
        &self,
        registry: &mut NodeRegistry,
        heartbeat: &Heartbeat,
        tick: u32,
    ) -> Result<Health, ReportRejection> {
        let claim = Claim {
            battery_kwh: heartbeat.battery_kwh,
            load_kw: None,
            generation_kw: None,
        };
        self.ingest(registry, &heartbeat.node_id, heartbeat.seq, claim, tick)
    }

    fn ingest(
        &self,
        registry: &mut NodeRegistry,
        id: &str,
        seq: u32,
        claim: Claim,
        tick: u32,
    ) -> Result<Health, ReportRejection> {
        let record = registry.admit(id, seq, tick)?;

        if let Some(anomaly) = self.assess(record, &claim, tick) {
            record.consecutive_anomalies += 1;
            record.plausible_streak = 0;
            let was = record.health;
            record.health = if record.consecutive_anomalies >= self.anomaly_threshold {
                Health::Faulty
            } else {
                Health::Suspect
            };
            match record.health {
                Health::Faulty => warn!(
                    node = %record.id,
                    anomalies = record.consecutive_anomalies,
                    %anomaly,
                    "anomaly threshold reached, node confirmed faulty"
                ),
                _ => warn!(node = %record.id, from = %was, %anomaly, "implausible report, node suspect"),
            }
            return Ok(record.health);
        }

        // Plausible, in-sequence claim: apply values
        let previous = record.latest;
        let sample = TelemetrySample {
            battery_kwh: claim.battery_kwh,
            load_kw: claim.load_kw.or(previous.map(|s| s.load_kw)).unwrap_or(Power::ZERO),
            generation_kw: claim
                .generation_kw
                .or(previous.map(|s| s.generation_kw))
                .unwrap_or(Power::ZERO),
            accepted_tick: tick,
        };
        record.latest = Some(sample);

        match record.health {
            Health::Healthy => {
                record.last_healthy = Some(sample);
            }
            Health::Stale => {
                record.health = Health::Healthy;
                record.last_healthy = Some(sample);
                info!(node = %record.id, "stale node reporting again");
            }
            Health::Suspect => {
                record.plausible_streak += 1;
                if record.plausible_streak >= self.recovery_streak {
                    record.health = Health::Healthy;
                    record.consecutive_anomalies = 0;
                    record.plausible_streak = 0;
                    record.last_healthy = Some(sample);
                    info!(node = %record.id, "suspect node cleared after plausible streak");
                }
            }
            // admit() never returns a Faulty record
            Health::Faulty => {}
        }
        Ok(record.health)
    }

    /// Judge one claim against the node's declared bounds and its own
    /// prior trajectory
    fn assess(&self, record: &NodeRecord, claim: &Claim, tick: u32) -> Option<Anomaly> {
        if claim.battery_kwh > record.battery_capacity_kwh {
            return Some(Anomaly::BatteryAboveCapacity {
                claimed: claim.battery_kwh,
                capacity: record.battery_capacity_kwh,
            });
        }
        if let Some(prev) = &record.latest {
            let elapsed_ticks = tick.saturating_sub(prev.accepted_tick).max(1);
            let allowed = self.max_battery_rise(record.max_charge_rate_kw, elapsed_ticks);
            let rise = claim.battery_kwh.saturating_sub(prev.battery_kwh);
            if rise > allowed {
                return Some(Anomaly::BatteryClimbTooFast { rise, allowed });
            }
        }
        if let Some(load) = claim.load_kw {
            if load > record.max_load_kw {
                return Some(Anomaly::LoadAboveCeiling { claimed: load, ceiling: record.max_load_kw });
            }
        }
        if let Some(generation) = claim.generation_kw {
            if generation > record.max_generation_kw {
                return Some(Anomaly::GenerationAboveCeiling {
                    claimed: generation,
                    ceiling: record.max_generation_kw,
                });
            }
        }
        None
    }

    /// Largest plausible battery gain over `elapsed_ticks`, rounded up one
    /// fixed-point step to absorb sender-side rounding
    fn max_battery_rise(&self, max_charge_rate: Power, elapsed_ticks: u32) -> Energy {
        let rate_centi_kw = max_charge_rate.centi_kw().max(0) as u64;
        let elapsed_secs = u64::from(elapsed_ticks) * u64::from(self.tick_interval_secs);
        let centi_kwh = (rate_centi_kw * elapsed_secs).div_ceil(3600) + 1;
        Energy::from_centi_kwh(centi_kwh.min(u64::from(u32::MAX)) as u32)
    }

    /// Advance timeout-driven transitions; called once per tick after the
    /// inbound drain
    pub fn advance_tick(&self, registry: &mut NodeRegistry, tick: u32) {
        for record in registry.iter_mut() {
            if record.health == Health::Faulty {
                continue;
            }
            let silent = record.silent_ticks(tick);
            if silent > self.fault_timeout_ticks {
                warn!(node = %record.id, silent, "silent past fault timeout, node faulty");
                record.health = Health::Faulty;
            } else if silent > self.stale_timeout_ticks && record.health == Health::Healthy {
                info!(node = %record.id, silent, "no report past stale timeout, node stale");
                record.health = Health::Stale;
            }
        }
    }
}
