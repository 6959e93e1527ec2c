//! Named street scenarios.
//!
//! Each scenario wires a four-house street (one anchor, three
//! participants in shed tiers 1..3), scripts the day, injects its faults,
//! and checks the protocol-level expectations on the end state.

use crate::cluster::{NodeScript, ScriptedTelemetry, StreetCluster};
use crate::fault_injection::{ByzantineBehavior, FaultConfig, FaultInjector};
use crate::metrics::ScenarioReport;
use ostrvo_core::{
    CoordinatorConfig, Energy, EnginePhase, Health, LocalSample, NodeRole, Power, RosterEntry,
    ShedAction,
};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Sunny day, clean radio, nobody sheds
    Happy,
    /// Duty-cycle-starved radio: heavy loss must not confuse health
    LossyRadio,
    /// The anchor's radio dies; participants must fail safe on their own
    AnchorLoss,
    /// One node claims impossible battery reserve
    ByzantineBattery,
    /// Solar collapse plus the evening load bump: tiered shedding
    EveningPeak,
    /// Overnight drain empties the street's batteries: shed everything
    NightDrain,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Happy,
        Scenario::LossyRadio,
        Scenario::AnchorLoss,
        Scenario::ByzantineBattery,
        Scenario::EveningPeak,
        Scenario::NightDrain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Happy => "happy",
            Scenario::LossyRadio => "lossy-radio",
            Scenario::AnchorLoss => "anchor-loss",
            Scenario::ByzantineBattery => "byzantine-battery",
            Scenario::EveningPeak => "evening-peak",
            Scenario::NightDrain => "night-drain",
        }
    }

    pub fn blurb(&self) -> &'static str {
        match self {
            Scenario::Happy => "sunny day, clean radio, no commands expected",
            Scenario::LossyRadio => "25% frame loss; health must degrade no further than stale",
            Scenario::AnchorLoss => "anchor radio dies; participants self-shed fail-safe",
            Scenario::ByzantineBattery => "inflated battery claims end in a faulty verdict",
            Scenario::EveningPeak => "evening deficit sheds tier 1 and 2, spares tier 3",
            Scenario::NightDrain => "drained batteries plus night load shed the whole street",
        }
    }

    pub fn default_ticks(&self) -> u32 {
        match self {
            Scenario::AnchorLoss => 80,
            Scenario::EveningPeak | Scenario::NightDrain => 80,
            _ => 120,
        }
    }

    pub fn run(&self, seed: u64, ticks: u32) -> ScenarioReport {
        let cfg = street_roster();
        match self {
            Scenario::Happy => {
                let mut cluster = StreetCluster::new(
                    &cfg,
                    sunny_scripts(),
                    FaultInjector::new(FaultConfig::none(), seed),
                );
                cluster.run(ticks);
                let mut report = ScenarioReport::from_cluster(self.name(), seed, ticks, &cluster);
                report.expect(cluster.command_log.is_empty(), "no commands on a sunny day");
                let anchor = cluster.first_anchor().coordinator();
                report.expect(
                    anchor.registry().iter().all(|r| r.health == Health::Healthy),
                    "anchor sees the whole street healthy",
                );
                report.expect(
                    cluster.nodes().iter().all(|n| n.coordinator().phase() == EnginePhase::Normal),
                    "every node stays in normal phase",
                );
                report
            }

            Scenario::LossyRadio => {
                let mut cluster = StreetCluster::new(
                    &cfg,
                    sunny_scripts(),
                    FaultInjector::new(FaultConfig::lossy_radio(), seed),
                );
                cluster.run(ticks);
                let mut report = ScenarioReport::from_cluster(self.name(), seed, ticks, &cluster);
                // Loss may make peers stale and even trigger a cautious
                // shed; it must never escalate to a faulty verdict
                for node in cluster.nodes() {
                    report.expect(
                        node.coordinator().registry().iter().all(|r| r.health != Health::Faulty),
                        "frame loss alone never convicts a node",
                    );
                }
                report.notes.push(format!(
                    "{} shed / {} restore commands under loss",
                    report.shed_commands, report.restore_commands
                ));
                report
            }

            Scenario::AnchorLoss => {
                let mut scripts = sunny_scripts();
                scripts[0].silent_from = Some(20);
                let mut cluster =
                    StreetCluster::new(&cfg, scripts, FaultInjector::new(FaultConfig::none(), seed));
                cluster.run(ticks);
                let mut report = ScenarioReport::from_cluster(self.name(), seed, ticks, &cluster);
                for node in cluster.nodes().iter().skip(1) {
                    report.expect(
                        node.loads_shed(),
                        "every participant sheds itself once unanchored",
                    );
                    report.expect(
                        node.coordinator().phase() == EnginePhase::Shedding,
                        "participants hold the shedding phase while unanchored",
                    );
                }
                report
            }

            Scenario::ByzantineBattery => {
                let mut scripts = sunny_scripts();
                scripts[2].telemetry = ScriptedTelemetry::new(sample(6.0, 1.5, 0.0))
                    .behaving(ByzantineBehavior::InflatedBattery);
                let mut cluster =
                    StreetCluster::new(&cfg, scripts, FaultInjector::new(FaultConfig::none(), seed));
                cluster.run(ticks);
                let mut report = ScenarioReport::from_cluster(self.name(), seed, ticks, &cluster);
                let anchor = cluster.first_anchor().coordinator();
                report.expect(
                    anchor.registry().get("p2").unwrap().health == Health::Faulty,
                    "inflated battery claims convict p2",
                );
                report.expect(
                    cluster.command_log.is_empty(),
                    "an honest majority keeps the street unshed",
                );
                report.expect(
                    anchor.phase() == EnginePhase::Normal,
                    "anchor stays normal without the liar's reserve",
                );
                report
            }

            Scenario::EveningPeak => {
                // Solar collapses to 3 kW while every household load bumps
                let evening = 40;
                let mut scripts = sunny_scripts();
                scripts[0].telemetry =
                    ScriptedTelemetry::new(sample(15.0, 0.5, 6.0)).at(evening, sample(15.0, 0.5, 3.0));
                scripts[1].telemetry =
                    ScriptedTelemetry::new(sample(6.0, 2.0, 0.0)).at(evening, sample(6.0, 3.5, 0.0));
                scripts[2].telemetry =
                    ScriptedTelemetry::new(sample(6.0, 1.5, 0.0)).at(evening, sample(6.0, 3.0, 0.0));
                scripts[3].telemetry =
                    ScriptedTelemetry::new(sample(8.0, 1.0, 0.0)).at(evening, sample(8.0, 2.5, 0.0));
                let mut cluster =
                    StreetCluster::new(&cfg, scripts, FaultInjector::new(FaultConfig::none(), seed));
                cluster.run(ticks);
                let mut report = ScenarioReport::from_cluster(self.name(), seed, ticks, &cluster);

                report.expect(cluster.node("p1").loads_shed(), "tier 1 shed first");
                report.expect(cluster.node("p2").loads_shed(), "tier 2 shed second");
                report.expect(!cluster.node("p3").loads_shed(), "tier 3 (critical) spared");
                let shed_targets: Vec<&str> = cluster
                    .command_log
                    .iter()
                    .filter(|(_, c)| c.action == ShedAction::Shed)
                    .map(|(_, c)| c.target.as_str())
                    .collect();
                report.expect(
                    shed_targets == vec!["p1", "p2"],
                    "tiers shed in priority order, one per evaluation",
                );
                report
            }

            Scenario::NightDrain => {
                // Once stored energy runs out overnight, participants are
                // cut to keep the anchor alive. Solar is gone and every
                // battery is near empty.
                let night = 30;
                let mut scripts = sunny_scripts();
                scripts[0].telemetry =
                    ScriptedTelemetry::new(sample(15.0, 0.5, 6.0)).at(night, sample(0.8, 0.5, 0.5));
                scripts[1].telemetry =
                    ScriptedTelemetry::new(sample(6.0, 2.0, 0.0)).at(night, sample(0.3, 2.0, 0.0));
                scripts[2].telemetry =
                    ScriptedTelemetry::new(sample(6.0, 1.5, 0.0)).at(night, sample(0.3, 1.5, 0.0));
                scripts[3].telemetry =
                    ScriptedTelemetry::new(sample(8.0, 1.0, 0.0)).at(night, sample(0.3, 1.0, 0.0));
                let mut cluster =
                    StreetCluster::new(&cfg, scripts, FaultInjector::new(FaultConfig::none(), seed));
                cluster.run(ticks);
                let mut report = ScenarioReport::from_cluster(self.name(), seed, ticks, &cluster);

                for id in ["p1", "p2", "p3"] {
                    report.expect(cluster.node(id).loads_shed(), "whole street shed overnight");
                }
                let shed_targets: Vec<&str> = cluster
                    .command_log
                    .iter()
                    .filter(|(_, c)| c.action == ShedAction::Shed)
                    .map(|(_, c)| c.target.as_str())
                    .collect();
                report.expect(
                    shed_targets == vec!["p1", "p2", "p3"],
                    "tiers fall in priority order even under a full shed",
                );
                report.expect(
                    cluster.first_anchor().coordinator().phase() == EnginePhase::Shedding,
                    "reserve below the restore band keeps the anchor shedding",
                );
                report.expect(report.restore_commands == 0, "nothing restored before sunrise");
                report
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "happy" | "sunny" => Ok(Scenario::Happy),
            "lossy-radio" | "lossy_radio" | "lossy" => Ok(Scenario::LossyRadio),
            "anchor-loss" | "anchor_loss" => Ok(Scenario::AnchorLoss),
            "byzantine-battery" | "byzantine_battery" | "byzantine" => Ok(Scenario::ByzantineBattery),
            "evening-peak" | "evening_peak" | "evening" => Ok(Scenario::EveningPeak),
            "night-drain" | "night_drain" | "night" => Ok(Scenario::NightDrain),
            other => Err(format!("unknown scenario \"{other}\"")),
        }
    }
}

fn sample(battery: f64, load: f64, generation: f64) -> LocalSample {
    LocalSample {
        battery_kwh: Energy::from_kwh(battery),
        load_kw: Power::from_kw(load),
        generation_kw: Power::from_kw(generation),
    }
}

/// Four houses: anchor a1, participants p1..p3 in shed tiers 1..3
fn street_roster() -> CoordinatorConfig {
    let participant = |id: &str, tier: u8| RosterEntry {
        id: id.to_string(),
        role: NodeRole::Participant,
        priority_tier: tier,
        battery_capacity_kwh: Energy::from_kwh(12.0),
        max_charge_rate_kw: Power::from_kw(3.0),
        max_load_kw: Power::from_kw(8.0),
        max_generation_kw: Power::from_kw(4.0),
    };
    CoordinatorConfig {
        roster: vec![
            RosterEntry {
                id: "a1".to_string(),
                role: NodeRole::Anchor,
                priority_tier: 1,
                battery_capacity_kwh: Energy::from_kwh(25.0),
                max_charge_rate_kw: Power::from_kw(6.0),
                max_load_kw: Power::from_kw(10.0),
                max_generation_kw: Power::from_kw(8.0),
            },
            participant("p1", 1),
            participant("p2", 2),
            participant("p3", 3),
        ],
        ..CoordinatorConfig::default()
    }
}

/// Sunny-day baseline: 6 kW of solar against 5 kW of street load
fn sunny_scripts() -> Vec<NodeScript> {
    vec![
        NodeScript::honest(sample(15.0, 0.5, 6.0)),
        NodeScript::honest(sample(6.0, 2.0, 0.0)),
        NodeScript::honest(sample(6.0, 1.5, 0.0)),
        NodeScript::honest(sample(8.0, 1.0, 0.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_parse() {
        assert_eq!("happy".parse::<Scenario>().unwrap(), Scenario::Happy);
        assert_eq!("lossy-radio".parse::<Scenario>().unwrap(), Scenario::LossyRadio);
        assert_eq!("anchor_loss".parse::<Scenario>().unwrap(), Scenario::AnchorLoss);
        assert_eq!("evening".parse::<Scenario>().unwrap(), Scenario::EveningPeak);
        assert!("mystery".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_happy_street_passes() {
        let report = Scenario::Happy.run(7, 40);
        assert!(report.pass, "notes: {:?}", report.notes);
        assert_eq!(report.shed_commands, 0);
    }

    #[test]
    fn test_anchor_loss_fails_safe() {
        let report = Scenario::AnchorLoss.run(7, Scenario::AnchorLoss.default_ticks());
        assert!(report.pass, "notes: {:?}", report.notes);
    }

    #[test]
    fn test_byzantine_battery_convicted() {
        let report = Scenario::ByzantineBattery.run(7, 60);
        assert!(report.pass, "notes: {:?}", report.notes);
        assert_eq!(report.shed_commands, 0);
    }

    #[test]
    fn test_evening_peak_sheds_in_tier_order() {
        let report = Scenario::EveningPeak.run(7, Scenario::EveningPeak.default_ticks());
        assert!(report.pass, "notes: {:?}", report.notes);
        assert_eq!(report.first_shed_tick.map(|t| t >= 40), Some(true));
    }

    #[test]
    fn test_night_drain_sheds_the_whole_street() {
        let report = Scenario::NightDrain.run(7, Scenario::NightDrain.default_ticks());
        assert!(report.pass, "notes: {:?}", report.notes);
        assert_eq!(report.shed_commands, 3);
        assert_eq!(report.restore_commands, 0);
    }
}
