//! The per-node coordination loop.
//!
//! One `run_tick` call is one protocol tick: drain the transport up to the
//! message budget, classify what arrived, fold in the local sensor sample,
//! advance timeouts, recompute the street snapshot, run the decision
//! engine, and hand any resulting frames back to the transport. The tick
//! boundary is the only point at which registry, snapshot, and engine
//! state change; everything inside a tick sees one consistent view.
//!
//! The loop is synchronous and lock-free. Whatever drives it (a tokio
//! interval in the node binary, a plain `for` loop in the harness) gets
//! tick-granular cancellation for free: stop calling `run_tick`.

use crate::aggregate::aggregate;
use crate::classifier::FaultClassifier;
use crate::config::{ConfigError, CoordinatorConfig};
use crate::engine::{EnginePhase, ShedEngine};
use crate::registry::{NodeRegistry, TelemetrySample};
use crate::relays::RelayDriver;
use crate::transport::Transport;
use crate::types::{
    AggregateSnapshot, Energy, Heartbeat, NodeId, NodeRole, Power, ShedAction, ShedCommand,
    TelemetryReport,
};
use crate::wire::{self, WireMessage};
use tracing::{debug, info, warn};

/// Raw sample from the node's own sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSample {
    pub battery_kwh: Energy,
    pub load_kw: Power,
    pub generation_kw: Power,
}

/// Telemetry boundary: the sensor driver is an external collaborator
pub trait TelemetrySource {
    fn sample(&mut self, tick: u32) -> LocalSample;
}

/// Always returns the same sample; stands in where no sensor driver is
/// wired up
#[derive(Debug, Clone, Copy)]
pub struct FixedTelemetry(pub LocalSample);

impl TelemetrySource for FixedTelemetry {
    fn sample(&mut self, _tick: u32) -> LocalSample {
        self.0
    }
}

/// Running totals over the loop's lifetime
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopCounters {
    pub frames_received: u64,
    /// Frames past the per-tick budget, dropped unprocessed
    pub frames_over_budget: u64,
    pub decode_failures: u64,
    pub rejected_reports: u64,
    pub commands_sent: u64,
    pub send_failures: u64,
}

/// What one tick did, for the status surface
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub tick: u32,
    pub phase: EnginePhase,
    pub snapshot: AggregateSnapshot,
    pub commands_issued: usize,
}

/// One node's coordination loop over abstract transport, sensor, and
/// relay boundaries
pub struct Coordinator<T, S, R> {
    cfg: CoordinatorConfig,
    local_id: NodeId,
    local_role: NodeRole,
    registry: NodeRegistry,
    classifier: FaultClassifier,
    engine: ShedEngine,
    transport: T,
    sensor: S,
    relays: R,
    tick: u32,
    seq: u32,
    /// Idempotency gate: last `(action, issued_tick)` applied locally
    last_applied: Option<(ShedAction, u32)>,
    counters: LoopCounters,
}

impl<T: Transport, S: TelemetrySource, R: RelayDriver> Coordinator<T, S, R> {
    /// Validates the configuration (fatal on inconsistency) and checks the
    /// local node is rostered.
    pub fn new(
        local_id: NodeId,
        cfg: CoordinatorConfig,
        transport: T,
        sensor: S,
        relays: R,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let local_role = cfg
            .roster_entry(&local_id)
            .map(|e| e.role)
            .ok_or_else(|| ConfigError::UnknownLocalNode { id: local_id.clone() })?;
        let registry = NodeRegistry::from_roster(&cfg.roster);
        let classifier = FaultClassifier::new(&cfg);
        info!(node = %local_id, role = %local_role, peers = registry.len() - 1, "coordinator ready");
        Ok(Self {
            classifier,
            registry,
            engine: ShedEngine::new(),
            cfg,
            local_id,
            local_role,
            transport,
            sensor,
            relays,
            tick: 0,
            seq: 0,
            last_applied: None,
            counters: LoopCounters::default(),
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn phase(&self) -> EnginePhase {
        self.engine.phase()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    pub fn counters(&self) -> LoopCounters {
        self.counters
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn relays(&self) -> &R {
        &self.relays
    }

    /// Run one tick to completion. Never blocks, never panics on bad
    /// input: malformed frames and rejected reports are counted and
    /// dropped, the loop cadence is sacred.
    pub fn run_tick(&mut self) -> TickSummary {
        let tick = self.tick;

        // Inbound drain, bounded per tick against message floods
        let frames = self.transport.poll_received();
        self.counters.frames_received += frames.len() as u64;
        let budget = self.cfg.max_messages_per_tick;
        if frames.len() > budget {
            warn!(
                tick,
                dropped = frames.len() - budget,
                "inbound burst over budget, excess frames dropped"
            );
            self.counters.frames_over_budget += (frames.len() - budget) as u64;
        }
        for frame in frames.into_iter().take(budget) {
            self.handle_frame(&frame, tick);
        }

        // Local sensing; a node trusts its own hardware
        let local = self.sensor.sample(tick);
        self.registry.record_local(
            &self.local_id,
            TelemetrySample {
                battery_kwh: local.battery_kwh,
                load_kw: local.load_kw,
                generation_kw: local.generation_kw,
                accepted_tick: tick,
            },
        );

        // Timeout transitions, then one consistent snapshot
        self.classifier.advance_tick(&mut self.registry, tick);
        let snapshot = aggregate(&self.registry, &self.cfg, tick);

        let commands = self.engine.evaluate(&snapshot, &mut self.registry, &self.cfg);
        self.dispatch_commands(&commands, snapshot.reference_anchor_count == 0);

        self.send_self_report(local, tick);

        self.tick += 1;
        TickSummary {
            tick,
            phase: self.engine.phase(),
            snapshot,
            commands_issued: commands.len(),
        }
    }

    fn handle_frame(&mut self, frame: &[u8], tick: u32) {
        match wire::decode(frame) {
            Err(e) => {
                // Dropped silently at this level: counted, never crashes
                // the loop
                self.counters.decode_failures += 1;
                debug!(tick, error = %e, "undecodable frame dropped");
            }
            Ok(WireMessage::Heartbeat(hb)) => {
                if hb.node_id == self.local_id {
                    return;
                }
                if let Err(rejection) = self.classifier.ingest_heartbeat(&mut self.registry, &hb, tick)
                {
                    self.counters.rejected_reports += 1;
                    debug!(tick, %rejection, "heartbeat rejected");
                }
            }
            Ok(WireMessage::StateReport(report)) => {
                if report.node_id == self.local_id {
                    return;
                }
                if let Err(rejection) =
                    self.classifier.ingest_report(&mut self.registry, &report, tick)
                {
                    self.counters.rejected_reports += 1;
                    debug!(tick, %rejection, "state report rejected");
                }
            }
            Ok(WireMessage::ShedCommand(cmd)) => {
                if cmd.target == self.local_id {
                    self.apply_command(&cmd);
                } else {
                    // Broadcast medium: commands for neighbours pass by
                    debug!(tick, target = %cmd.target, "command for another node ignored");
                }
            }
        }
    }

    /// Anchors broadcast every engine decision. Participants mirror the
    /// engine for visibility and fail-safe only: they act on their own
    /// conclusions solely when the island is unanchored and no coordinator
    /// can be reached by construction.
    fn dispatch_commands(&mut self, commands: &[ShedCommand], unanchored: bool) {
        match self.local_role {
            NodeRole::Anchor => {
                for cmd in commands {
                    if cmd.target == self.local_id {
                        self.apply_command(cmd);
                    }
                    self.broadcast(&WireMessage::ShedCommand(cmd.clone()));
                    self.counters.commands_sent += 1;
                }
            }
            NodeRole::Participant => {
                if unanchored {
                    for cmd in commands {
                        if cmd.target == self.local_id {
                            self.apply_command(cmd);
                        }
                    }
                }
            }
        }
    }

    /// Idempotent application: the same `(action, issued_tick)` twice has
    /// no additional effect
    fn apply_command(&mut self, cmd: &ShedCommand) {
        let key = (cmd.action, cmd.issued_tick);
        if self.last_applied == Some(key) {
            debug!(action = %cmd.action, issued_tick = cmd.issued_tick, "duplicate command ignored");
            return;
        }
        self.last_applied = Some(key);
        info!(action = %cmd.action, reason = %cmd.reason, issued_tick = cmd.issued_tick, "applying command");
        self.relays.apply(cmd);
        self.registry.set_shed(&self.local_id, cmd.action == ShedAction::Shed);
    }

    /// Outbound self-reporting on the configured cadence. A full state
    /// report supersedes the heartbeat on ticks where both are due.
    fn send_self_report(&mut self, local: LocalSample, tick: u32) {
        let message = if tick % self.cfg.report_interval_ticks == 0 {
            self.seq += 1;
            Some(WireMessage::StateReport(TelemetryReport {
                node_id: self.local_id.clone(),
                tick,
                seq: self.seq,
                battery_kwh: local.battery_kwh,
                load_kw: local.load_kw,
                generation_kw: local.generation_kw,
            }))
        } else if tick % self.cfg.heartbeat_interval_ticks == 0 {
            self.seq += 1;
            Some(WireMessage::Heartbeat(Heartbeat {
                node_id: self.local_id.clone(),
                tick,
                seq: self.seq,
                battery_kwh: local.battery_kwh,
            }))
        } else {
            None
        };
        if let Some(message) = message {
            self.broadcast(&message);
        }
    }

    fn broadcast(&mut self, message: &WireMessage) {
        match wire::encode(message) {
            Ok(frame) => {
                if !self.transport.try_send(&frame) {
                    self.counters.send_failures += 1;
                    debug!("transport refused frame");
                }
            }
            Err(e) => {
                // Local values out of wire range; nothing to transmit
                self.counters.send_failures += 1;
                warn!(error = %e, "outbound message not encodable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relays::{Relay, RelayBank, RelayClass, RelayKind};
    use crate::testutil::street_config;
    use crate::transport::ChannelTransport;
    use crate::types::ReasonCode;

    fn sample(battery: f64, load: f64, generation: f64) -> LocalSample {
        LocalSample {
            battery_kwh: Energy::from_kwh(battery),
            load_kw: Power::from_kw(load),
            generation_kw: Power::from_kw(generation),
        }
    }

    fn load_bank() -> RelayBank {
        RelayBank::new(vec![Relay {
            id: "r_main".to_string(),
            name: "Main Loads".to_string(),
            kind: RelayKind::Load,
            class: RelayClass::Medium,
            is_closed: true,
        }])
    }

    fn participant() -> Coordinator<ChannelTransport, FixedTelemetry, RelayBank> {
        Coordinator::new(
            "p1".to_string(),
            street_config(),
            ChannelTransport::new(),
            FixedTelemetry(sample(4.0, 3.0, 0.0)),
            load_bank(),
        )
        .unwrap()
    }

    #[test]
    fn test_unrostered_local_node_is_fatal() {
        let result = Coordinator::new(
            "ghost".to_string(),
            street_config(),
            ChannelTransport::new(),
            FixedTelemetry(sample(0.0, 0.0, 0.0)),
            load_bank(),
        );
        assert!(matches!(result, Err(ConfigError::UnknownLocalNode { .. })));
    }

    #[test]
    fn test_first_tick_emits_state_report() {
        let mut node = participant();
        node.run_tick();
        let frames = node.transport_mut().drain_outbound();
        assert_eq!(frames.len(), 1);
        match wire::decode(&frames[0]).unwrap() {
            WireMessage::StateReport(report) => {
                assert_eq!(report.node_id, "p1");
                assert_eq!(report.seq, 1);
                assert_eq!(report.load_kw, Power::from_kw(3.0));
            }
            other => panic!("expected state report, got {other:?}"),
        }
    }

    #[test]
    fn test_own_sequence_increases_across_message_kinds() {
        let mut node = participant();
        let report_interval = node.cfg.report_interval_ticks;
        let mut seqs = Vec::new();
        let mut kinds = Vec::new();
        for _ in 0..=report_interval {
            node.run_tick();
            for frame in node.transport_mut().drain_outbound() {
                match wire::decode(&frame).unwrap() {
                    WireMessage::StateReport(r) => {
                        seqs.push(r.seq);
                        kinds.push("report");
                    }
                    WireMessage::Heartbeat(hb) => {
                        seqs.push(hb.seq);
                        kinds.push("heartbeat");
                    }
                    other => panic!("unexpected outbound {other:?}"),
                }
            }
        }
        // Full reports bound the window, heartbeats fill the gaps, one
        // shared sequence space throughout
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "gaps in {seqs:?}");
        assert_eq!(kinds.first(), Some(&"report"));
        assert_eq!(kinds.last(), Some(&"report"));
        assert!(kinds.contains(&"heartbeat"));
    }

    #[test]
    fn test_garbage_frames_counted_never_fatal() {
        let mut node = participant();
        node.transport_mut().push_inbound(vec![0xFF; 7]);
        node.transport_mut().push_inbound(vec![]);
        let summary = node.run_tick();
        assert_eq!(node.counters().decode_failures, 2);
        assert_eq!(summary.tick, 0);
    }

    #[test]
    fn test_message_budget_caps_processing() {
        let mut node = participant();
        let flood = node.cfg.max_messages_per_tick + 10;
        for _ in 0..flood {
            node.transport_mut().push_inbound(vec![0xFF; 7]);
        }
        node.run_tick();
        assert_eq!(node.counters().frames_over_budget, 10);
        assert_eq!(node.counters().decode_failures, node.cfg.max_messages_per_tick as u64);
    }

    #[test]
    fn test_shed_command_applied_once() {
        let mut node = participant();
        let cmd = ShedCommand {
            target: "p1".to_string(),
            action: ShedAction::Shed,
            reason: ReasonCode::LowReserve,
            issued_tick: 3,
        };
        let frame = wire::encode(&WireMessage::ShedCommand(cmd)).unwrap();
        // Radio duplication: same frame delivered twice
        node.transport_mut().push_inbound(frame.clone());
        node.transport_mut().push_inbound(frame);
        node.run_tick();
        assert!(node.relays().loads_shed());
        assert!(node.registry().get("p1").unwrap().shed_commanded);
    }

    #[test]
    fn test_command_for_neighbour_ignored() {
        let mut node = participant();
        let cmd = ShedCommand {
            target: "p2".to_string(),
            action: ShedAction::Shed,
            reason: ReasonCode::LowReserve,
            issued_tick: 3,
        };
        let frame = wire::encode(&WireMessage::ShedCommand(cmd)).unwrap();
        node.transport_mut().push_inbound(frame);
        node.run_tick();
        assert!(!node.relays().loads_shed());
    }

    #[test]
    fn test_participant_self_sheds_when_unanchored() {
        let mut node = participant();
        // The anchor never says a word; after the fault timeout the island
        // is unanchored and the participant must not wait for a command
        let silent_span = node.cfg.fault_timeout_ticks + 2;
        for _ in 0..silent_span {
            node.run_tick();
        }
        assert!(node.relays().loads_shed());
        assert_eq!(node.phase(), EnginePhase::Shedding);
    }
}
