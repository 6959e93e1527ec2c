//! Core types for the OSTRVO protocol

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Unique identifier for an OSTRVO node
pub type NodeId = String;

/// Role of a node in the street microgrid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Grid-forming node providing the voltage/frequency reference.
    /// Anchors are never shed targets.
    Anchor,
    /// Grid-following node that can be shed and restored
    Participant,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Anchor => write!(f, "anchor"),
            NodeRole::Participant => write!(f, "participant"),
        }
    }
}

/// Classifier verdict on a node's telemetry stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Reporting in sequence, values within declared bounds
    Healthy,
    /// Silent past the stale timeout; last values decay toward zero
    Stale,
    /// Delivered physically implausible values; on probation
    Suspect,
    /// Confirmed bad; sticky until an operator reset
    Faulty,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Stale => write!(f, "stale"),
            Health::Suspect => write!(f, "suspect"),
            Health::Faulty => write!(f, "faulty"),
        }
    }
}

/// Power in fixed-point 0.01 kW steps.
///
/// All street-level arithmetic is integer so that aggregation is exact and
/// replayable; the radio link carries the same resolution in 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Power(i32);

impl Power {
    pub const ZERO: Power = Power(0);

    pub fn from_centi_kw(centi: i32) -> Self {
        Power(centi)
    }

    pub fn from_kw(kw: f64) -> Self {
        Power((kw * 100.0).round() as i32)
    }

    pub fn centi_kw(self) -> i32 {
        self.0
    }

    pub fn as_kw(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn saturating_add(self, other: Power) -> Power {
        Power(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Power) -> Power {
        Power(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kW", self.as_kw())
    }
}

impl Serialize for Power {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_kw())
    }
}

impl<'de> Deserialize<'de> for Power {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Power::from_kw)
    }
}

/// Stored energy in fixed-point 0.01 kWh steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Energy(u32);

impl Energy {
    pub const ZERO: Energy = Energy(0);

    pub fn from_centi_kwh(centi: u32) -> Self {
        Energy(centi)
    }

    pub fn from_kwh(kwh: f64) -> Self {
        Energy((kwh.max(0.0) * 100.0).round() as u32)
    }

    pub fn centi_kwh(self) -> u32 {
        self.0
    }

    pub fn as_kwh(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn saturating_add(self, other: Energy) -> Energy {
        Energy(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Energy) -> Energy {
        Energy(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kWh", self.as_kwh())
    }
}

impl Serialize for Energy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_kwh())
    }
}

impl<'de> Deserialize<'de> for Energy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Energy::from_kwh)
    }
}

/// Liveness beacon; carries battery level only.
///
/// Shares the sender's sequence space with [`TelemetryReport`], so a
/// replayed heartbeat cannot roll back a newer full report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub node_id: NodeId,
    /// Sender's local tick at transmit time
    pub tick: u32,
    /// Strictly increasing per sender
    pub seq: u32,
    pub battery_kwh: Energy,
}

/// Full self-report of a node's energy state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryReport {
    pub node_id: NodeId,
    /// Sender's local tick at transmit time
    pub tick: u32,
    /// Strictly increasing per sender
    pub seq: u32,
    pub battery_kwh: Energy,
    pub load_kw: Power,
    pub generation_kw: Power,
}

/// Shed or restore a participant's loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShedAction {
    Shed,
    Restore,
}

impl fmt::Display for ShedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShedAction::Shed => write!(f, "shed"),
            ShedAction::Restore => write!(f, "restore"),
        }
    }
}

/// Why a command was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Aggregate reserve fell below the low-reserve threshold
    LowReserve,
    /// Load exceeded generation for the confirm window
    SustainedDeficit,
    /// No healthy or stale anchor remains; fail-safe shed-all
    Unanchored,
    /// Sustained surplus allowed a restore round
    SurplusRecovered,
}

impl ReasonCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ReasonCode::LowReserve => 0,
            ReasonCode::SustainedDeficit => 1,
            ReasonCode::Unanchored => 2,
            ReasonCode::SurplusRecovered => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ReasonCode::LowReserve),
            1 => Some(ReasonCode::SustainedDeficit),
            2 => Some(ReasonCode::Unanchored),
            3 => Some(ReasonCode::SurplusRecovered),
            _ => None,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::LowReserve => write!(f, "low-reserve"),
            ReasonCode::SustainedDeficit => write!(f, "sustained-deficit"),
            ReasonCode::Unanchored => write!(f, "unanchored"),
            ReasonCode::SurplusRecovered => write!(f, "surplus-recovered"),
        }
    }
}

/// Immutable output of the decision engine.
///
/// Applying the same `(target, action, issued_tick)` twice has no
/// additional effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShedCommand {
    pub target: NodeId,
    pub action: ShedAction,
    pub reason: ReasonCode,
    pub issued_tick: u32,
}

/// Street-level energy balance derived from the registry each tick.
///
/// Never persisted across ticks except as the previous value for trend
/// checks inside the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregateSnapshot {
    pub tick: u32,
    pub total_generation_kw: Power,
    pub total_load_kw: Power,
    pub total_reserve_kwh: Energy,
    /// Nodes currently classified Healthy
    pub healthy_node_count: usize,
    /// Anchors still fit to serve as frequency reference (Healthy or Stale)
    pub reference_anchor_count: usize,
}
