//! In-process street of coordinator nodes.
//!
//! Every roster node runs a real [`Coordinator`] over a channel transport;
//! the cluster plays radio, broadcasting each node's outbound frames to
//! every other node on the next tick with seeded loss and duplication.
//! No network, no clocks: a run is a pure function of roster, scripts,
//! faults, and seed.

use crate::fault_injection::{ByzantineBehavior, FaultInjector};
use ostrvo_core::{
    wire, ChannelTransport, Coordinator, CoordinatorConfig, Energy, LocalSample, LoopCounters,
    NodeRole, Power, Relay, RelayBank, RelayClass, RelayKind, ShedCommand, TelemetrySource,
    TickSummary, WireMessage,
};
use tracing::debug;

/// Scripted sensor: a baseline sample with tick-keyed overrides, plus an
/// optional Byzantine distortion layered on top
pub struct ScriptedTelemetry {
    baseline: LocalSample,
    /// `(from_tick, sample)` pairs, ascending; the latest one at or below
    /// the current tick wins
    timeline: Vec<(u32, LocalSample)>,
    behavior: ByzantineBehavior,
}

impl ScriptedTelemetry {
    pub fn new(baseline: LocalSample) -> Self {
        Self { baseline, timeline: Vec::new(), behavior: ByzantineBehavior::Honest }
    }

    pub fn at(mut self, from_tick: u32, sample: LocalSample) -> Self {
        self.timeline.push((from_tick, sample));
        self.timeline.sort_by_key(|(t, _)| *t);
        self
    }

    pub fn behaving(mut self, behavior: ByzantineBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

impl TelemetrySource for ScriptedTelemetry {
    fn sample(&mut self, tick: u32) -> LocalSample {
        let mut sample = self
            .timeline
            .iter()
            .rev()
            .find(|(from, _)| *from <= tick)
            .map(|(_, s)| *s)
            .unwrap_or(self.baseline);
        match self.behavior {
            ByzantineBehavior::Honest => {}
            ByzantineBehavior::InflatedBattery => {
                sample.battery_kwh =
                    sample.battery_kwh.saturating_add(Energy::from_kwh(50.0 + f64::from(tick)));
            }
            ByzantineBehavior::OverloadClaim => {
                sample.load_kw = Power::from_kw(150.0);
            }
        }
        sample
    }
}

/// Per-node plan: what it senses and when its radio dies
pub struct NodeScript {
    pub telemetry: ScriptedTelemetry,
    /// Stop transmitting from this tick on (radio failure, not sensor)
    pub silent_from: Option<u32>,
}

impl NodeScript {
    pub fn honest(baseline: LocalSample) -> Self {
        Self { telemetry: ScriptedTelemetry::new(baseline), silent_from: None }
    }
}

/// One simulated node
pub struct SimNode {
    pub id: String,
    coordinator: Coordinator<ChannelTransport, ScriptedTelemetry, RelayBank>,
    silent_from: Option<u32>,
}

impl SimNode {
    pub fn coordinator(&self) -> &Coordinator<ChannelTransport, ScriptedTelemetry, RelayBank> {
        &self.coordinator
    }

    pub fn counters(&self) -> LoopCounters {
        self.coordinator.counters()
    }

    pub fn loads_shed(&self) -> bool {
        self.coordinator.relays().loads_shed()
    }
}

/// The whole street in memory
pub struct StreetCluster {
    nodes: Vec<SimNode>,
    injector: FaultInjector,
    /// Frames awaiting delivery, per recipient
    in_flight: Vec<Vec<Vec<u8>>>,
    /// Every command any node broadcast, with its send tick
    pub command_log: Vec<(u32, ShedCommand)>,
    tick: u32,
}

impl StreetCluster {
    /// Build one node per roster entry; `scripts` must align with the
    /// roster order.
    pub fn new(cfg: &CoordinatorConfig, scripts: Vec<NodeScript>, injector: FaultInjector) -> Self {
        assert_eq!(cfg.roster.len(), scripts.len(), "one script per roster entry");
        let nodes: Vec<SimNode> = cfg
            .roster
            .iter()
            .zip(scripts)
            .map(|(entry, script)| {
                let relays = RelayBank::new(vec![Relay {
                    id: format!("{}_loads", entry.id),
                    name: format!("{} household loads", entry.id),
                    kind: RelayKind::Load,
                    class: RelayClass::Medium,
                    is_closed: true,
                }]);
                let coordinator = Coordinator::new(
                    entry.id.clone(),
                    cfg.clone(),
                    ChannelTransport::new(),
                    script.telemetry,
                    relays,
                )
                .expect("roster validated by scenario construction");
                SimNode { id: entry.id.clone(), coordinator, silent_from: script.silent_from }
            })
            .collect();
        let in_flight = nodes.iter().map(|_| Vec::new()).collect();
        Self { nodes, injector, in_flight, command_log: Vec::new(), tick: 0 }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> &SimNode {
        self.nodes.iter().find(|n| n.id == id).expect("unknown sim node id")
    }

    fn index_of(&self, role: NodeRole) -> Option<usize> {
        self.nodes.iter().position(|n| n.coordinator.registry().get(&n.id).unwrap().role == role)
    }

    pub fn first_anchor(&self) -> &SimNode {
        &self.nodes[self.index_of(NodeRole::Anchor).expect("roster has an anchor")]
    }

    /// One street tick: deliver pending frames, run every node, route the
    /// new frames through the fault injector for the next tick.
    pub fn step(&mut self) -> Vec<TickSummary> {
        let tick = self.tick;

        for (node, pending) in self.nodes.iter_mut().zip(self.in_flight.iter_mut()) {
            for frame in pending.drain(..) {
                node.coordinator.transport_mut().push_inbound(frame);
            }
        }

        let mut summaries = Vec::with_capacity(self.nodes.len());
        let mut outbound: Vec<Vec<Vec<u8>>> = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.iter_mut() {
            summaries.push(node.coordinator.run_tick());
            let frames = node.coordinator.transport_mut().drain_outbound();
            let silenced = node.silent_from.is_some_and(|from| tick >= from);
            if silenced {
                debug!(node = %node.id, tick, "radio silent, frames discarded");
                outbound.push(Vec::new());
            } else {
                outbound.push(frames);
            }
        }

        for (sender, frames) in outbound.into_iter().enumerate() {
            for frame in frames {
                if let Ok(WireMessage::ShedCommand(cmd)) = wire::decode(&frame) {
                    self.command_log.push((tick, cmd));
                }
                for recipient in 0..self.nodes.len() {
                    if recipient == sender {
                        continue;
                    }
                    if self.injector.should_drop() {
                        continue;
                    }
                    self.in_flight[recipient].push(frame.clone());
                    if self.injector.should_duplicate() {
                        self.in_flight[recipient].push(frame.clone());
                    }
                }
            }
        }

        self.tick += 1;
        summaries
    }

    /// Run the street for a span of ticks, returning the final tick's
    /// summaries
    pub fn run(&mut self, ticks: u32) -> Vec<TickSummary> {
        let mut last = Vec::new();
        for _ in 0..ticks {
            last = self.step();
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_injection::FaultConfig;
    use ostrvo_core::{Health, RosterEntry};

    fn tiny_street() -> CoordinatorConfig {
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
            ],
            ..CoordinatorConfig::default()
        }
    }

    fn sample(battery: f64, load: f64, generation: f64) -> LocalSample {
        LocalSample {
            battery_kwh: Energy::from_kwh(battery),
            load_kw: Power::from_kw(load),
            generation_kw: Power::from_kw(generation),
        }
    }

    #[test]
    fn test_clean_street_sees_each_other_healthy() {
        let cfg = tiny_street();
        let scripts = vec![
            NodeScript::honest(sample(15.0, 0.0, 5.0)),
            NodeScript::honest(sample(6.0, 2.0, 0.0)),
        ];
        let mut cluster =
            StreetCluster::new(&cfg, scripts, FaultInjector::new(FaultConfig::none(), 11));
        cluster.run(20);

        let anchor_view = cluster.node("a1").coordinator().registry();
        assert_eq!(anchor_view.get("p1").unwrap().health, Health::Healthy);
        let p1_view = cluster.node("p1").coordinator().registry();
        assert_eq!(p1_view.get("a1").unwrap().health, Health::Healthy);
        assert!(cluster.command_log.is_empty());
    }

    #[test]
    fn test_silenced_node_goes_stale_then_faulty_in_peer_view() {
        let cfg = tiny_street();
        let scripts = vec![
            NodeScript::honest(sample(15.0, 0.0, 5.0)),
            NodeScript {
                telemetry: ScriptedTelemetry::new(sample(6.0, 2.0, 0.0)),
                silent_from: Some(5),
            },
        ];
        let mut cluster =
            StreetCluster::new(&cfg, scripts, FaultInjector::new(FaultConfig::none(), 11));
        cluster.run(cfg.fault_timeout_ticks + 10);

        let anchor_view = cluster.node("a1").coordinator().registry();
        assert_eq!(anchor_view.get("p1").unwrap().health, Health::Faulty);
    }
}
