//! OSTRVO Core Library
//!
//! Street microgrid coordination for islanded operation: a fixed binary
//! heartbeat/state-exchange protocol over a lossy narrowband radio, a
//! per-node fault classifier, and the load-shed decision engine, all
//! driven by a single-writer fixed-tick coordination loop.

pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod registry;
pub mod relays;
pub mod transport;
pub mod types;
pub mod wire;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregate::aggregate;
pub use classifier::{Anomaly, FaultClassifier};
pub use config::{ConfigError, CoordinatorConfig, RosterEntry};
pub use coordinator::{
    Coordinator, FixedTelemetry, LocalSample, LoopCounters, TelemetrySource, TickSummary,
};
pub use engine::{EnginePhase, ShedEngine};
pub use registry::{NodeRecord, NodeRegistry, ReportRejection, TelemetrySample};
pub use relays::{Relay, RelayBank, RelayClass, RelayDriver, RelayKind};
pub use transport::{ChannelTransport, Transport, UdpTransport};
pub use types::*;
pub use wire::{DecodeError, EncodeError, WireMessage};
