//! Authoritative in-memory roster of street nodes.
//!
//! The registry is the only cross-tick memory in the core. It is owned
//! exclusively by the coordination loop (single-writer by construction)
//! and iterated in ascending node-id order so every derived aggregate is
//! reproducible. Records are created from the static roster and never
//! deleted mid-run, only marked Faulty.

use crate::config::RosterEntry;
use crate::types::{Energy, Health, NodeId, NodeRole, Power};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Last accepted telemetry values for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySample {
    pub battery_kwh: Energy,
    pub load_kw: Power,
    pub generation_kw: Power,
    /// Local tick at which the sample was accepted
    pub accepted_tick: u32,
}

/// Everything the street remembers about one node
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: NodeId,
    pub role: NodeRole,
    pub priority_tier: u8,
    pub battery_capacity_kwh: Energy,
    pub max_charge_rate_kw: Power,
    pub max_load_kw: Power,
    pub max_generation_kw: Power,
    pub health: Health,
    /// Local tick of the last accepted (valid, in-sequence) report
    pub last_seen_tick: Option<u32>,
    /// Highest sequence number accepted from this node
    pub last_seq: Option<u32>,
    /// Latest plausible values; implausible claims are never stored here
    pub latest: Option<TelemetrySample>,
    /// Values as of the last tick the node was Healthy; decayed for Stale
    /// contributions
    pub last_healthy: Option<TelemetrySample>,
    pub consecutive_anomalies: u32,
    /// Consecutive plausible reports while Suspect
    pub plausible_streak: u32,
    /// Whether the engine currently presumes this node's loads shed
    pub shed_commanded: bool,
}

impl NodeRecord {
    fn from_roster(entry: &RosterEntry) -> Self {
        Self {
            id: entry.id.clone(),
            role: entry.role,
            priority_tier: entry.priority_tier,
            battery_capacity_kwh: entry.battery_capacity_kwh,
            max_charge_rate_kw: entry.max_charge_rate_kw,
            max_load_kw: entry.max_load_kw,
            max_generation_kw: entry.max_generation_kw,
            health: Health::Healthy,
            last_seen_tick: None,
            last_seq: None,
            latest: None,
            last_healthy: None,
            consecutive_anomalies: 0,
            plausible_streak: 0,
            shed_commanded: false,
        }
    }

    /// Last load this node is known to draw, regardless of freshness
    pub fn last_known_load(&self) -> Power {
        self.latest
            .as_ref()
            .or(self.last_healthy.as_ref())
            .map(|s| s.load_kw)
            .unwrap_or(Power::ZERO)
    }

    /// Ticks since the last accepted report (roster load counts as tick 0)
    pub fn silent_ticks(&self, tick: u32) -> u32 {
        tick.saturating_sub(self.last_seen_tick.unwrap_or(0))
    }
}

/// Why an incoming report was not applied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportRejection {
    #[error("sender \"{id}\" is not in the street roster")]
    UnknownNode { id: NodeId },
    #[error("sequence {seq} from \"{id}\" does not advance past {last}")]
    ReplayedSequence { id: NodeId, seq: u32, last: u32 },
    #[error("node \"{id}\" is faulty; reports ignored until operator reset")]
    NodeFaulty { id: NodeId },
}

/// Single-writer roster keyed by node id (ascending iteration order)
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NodeRecord>,
    rejected_replays: u64,
    rejected_unknown: u64,
}

impl NodeRegistry {
    pub fn from_roster(roster: &[RosterEntry]) -> Self {
        let nodes = roster
            .iter()
            .map(|entry| (entry.id.clone(), NodeRecord::from_roster(entry)))
            .collect();
        Self { nodes, rejected_replays: 0, rejected_unknown: 0 }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id)
    }

    /// Ascending node-id iteration; the only sanctioned traversal order
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeRecord> {
        self.nodes.values_mut()
    }

    /// Gate an incoming report: sender must be rostered, not Faulty, and
    /// strictly advance its sequence number. On success the record's
    /// sequence and liveness are updated and the record is returned for
    /// classification.
    pub fn admit(
        &mut self,
        id: &str,
        seq: u32,
        tick: u32,
    ) -> Result<&mut NodeRecord, ReportRejection> {
        let Some(record) = self.nodes.get_mut(id) else {
            self.rejected_unknown += 1;
            return Err(ReportRejection::UnknownNode { id: id.to_string() });
        };
        if record.health == Health::Faulty {
            return Err(ReportRejection::NodeFaulty { id: id.to_string() });
        }
        if let Some(last) = record.last_seq {
            if seq <= last {
                self.rejected_replays += 1;
                return Err(ReportRejection::ReplayedSequence { id: id.to_string(), seq, last });
            }
        }
        record.last_seq = Some(seq);
        record.last_seen_tick = Some(tick);
        Ok(record)
    }

    /// Feed the local node's own sensor sample. Local sensing bypasses the
    /// classifier: a node trusts its own hardware.
    pub fn record_local(&mut self, id: &str, sample: TelemetrySample) {
        if let Some(record) = self.nodes.get_mut(id) {
            record.health = Health::Healthy;
            record.last_seen_tick = Some(sample.accepted_tick);
            record.latest = Some(sample);
            record.last_healthy = Some(sample);
        }
    }

    pub fn set_shed(&mut self, id: &str, shed: bool) {
        if let Some(record) = self.nodes.get_mut(id) {
            record.shed_commanded = shed;
        }
    }

    /// Out-of-band operator action: the only path out of Faulty.
    ///
    /// The sequence gate is kept so a replayed pre-fault frame cannot be
    /// admitted after the reset.
    pub fn operator_reset(&mut self, id: &str) -> bool {
        match self.nodes.get_mut(id) {
            Some(record) if record.health == Health::Faulty => {
                record.health = Health::Stale;
                record.consecutive_anomalies = 0;
                record.plausible_streak = 0;
                record.latest = None;
                record.last_healthy = None;
                info!(node = %id, "operator reset: faulty node back on probation");
                true
            }
            _ => false,
        }
    }

    pub fn rejected_replays(&self) -> u64 {
        self.rejected_replays
    }

    pub fn rejected_unknown(&self) -> u64 {
        self.rejected_unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::street_config;

    #[test]
    fn test_roster_load_creates_healthy_records() {
        let cfg = street_config();
        let reg = NodeRegistry::from_roster(&cfg.roster);
        assert_eq!(reg.len(), cfg.roster.len());
        assert!(reg.iter().all(|r| r.health == Health::Healthy));
        assert!(reg.iter().all(|r| r.latest.is_none()));
    }

    #[test]
    fn test_iteration_is_ascending_by_id() {
        let cfg = street_config();
        let reg = NodeRegistry::from_roster(&cfg.roster);
        let ids: Vec<&str> = reg.iter().map(|r| r.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_unknown_sender_rejected_and_counted() {
        let cfg = street_config();
        let mut reg = NodeRegistry::from_roster(&cfg.roster);
        let err = reg.admit("intruder", 1, 5).unwrap_err();
        assert!(matches!(err, ReportRejection::UnknownNode { .. }));
        assert_eq!(reg.rejected_unknown(), 1);
    }

    #[test]
    fn test_replayed_sequence_discarded() {
        let cfg = street_config();
        let mut reg = NodeRegistry::from_roster(&cfg.roster);
        assert!(reg.admit("p1", 7, 1).is_ok());
        // Same and older sequence numbers never advance
        assert!(matches!(
            reg.admit("p1", 7, 2),
            Err(ReportRejection::ReplayedSequence { seq: 7, last: 7, .. })
        ));
        assert!(matches!(reg.admit("p1", 3, 3), Err(ReportRejection::ReplayedSequence { .. })));
        assert_eq!(reg.rejected_replays(), 2);
        // A genuinely newer one does
        assert!(reg.admit("p1", 8, 4).is_ok());
    }

    #[test]
    fn test_faulty_node_reports_ignored_until_reset() {
        let cfg = street_config();
        let mut reg = NodeRegistry::from_roster(&cfg.roster);
        reg.get_mut("p1").unwrap().health = Health::Faulty;
        assert!(matches!(reg.admit("p1", 1, 1), Err(ReportRejection::NodeFaulty { .. })));

        assert!(reg.operator_reset("p1"));
        assert_eq!(reg.get("p1").unwrap().health, Health::Stale);
        assert!(reg.admit("p1", 2, 2).is_ok());
    }

    #[test]
    fn test_operator_reset_only_touches_faulty() {
        let cfg = street_config();
        let mut reg = NodeRegistry::from_roster(&cfg.roster);
        assert!(!reg.operator_reset("p1"));
        assert_eq!(reg.get("p1").unwrap().health, Health::Healthy);
    }

    #[test]
    fn test_reset_keeps_sequence_gate() {
        let cfg = street_config();
        let mut reg = NodeRegistry::from_roster(&cfg.roster);
        assert!(reg.admit("p1", 40, 1).is_ok());
        reg.get_mut("p1").unwrap().health = Health::Faulty;
        reg.operator_reset("p1");
        // Pre-fault frames stay dead after the reset
        assert!(matches!(reg.admit("p1", 39, 9), Err(ReportRejection::ReplayedSequence { .. })));
    }
}
