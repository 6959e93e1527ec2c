//! Fault injection for street soak runs.
//!
//! Models the radio and the nodes misbehaving: probabilistic frame loss
//! and duplication on every link, plus per-node Byzantine telemetry
//! (sensors that lie upward about battery or load). Runs are seeded so
//! every failure is replayable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// How a compromised or broken node lies in its self-reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByzantineBehavior {
    /// Reports the scripted truth
    Honest,
    /// Claims ever-growing battery reserve far past its capacity
    InflatedBattery,
    /// Claims load far above its hardware ceiling
    OverloadClaim,
}

/// Fault plan for one run
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability a frame is lost on a link (0.0-1.0)
    pub message_loss_rate: f64,
    /// Probability a delivered frame arrives twice
    pub duplicate_rate: f64,
    /// Byzantine nodes by roster index
    pub byzantine_nodes: HashMap<usize, ByzantineBehavior>,
}

impl FaultConfig {
    /// Clean radio, honest nodes
    pub fn none() -> Self {
        Self::default()
    }

    /// Duty-cycle-starved narrowband link: heavy loss, some duplication
    pub fn lossy_radio() -> Self {
        Self {
            message_loss_rate: 0.25,
            duplicate_rate: 0.05,
            ..Self::default()
        }
    }

    pub fn with_byzantine(mut self, node_idx: usize, behavior: ByzantineBehavior) -> Self {
        self.byzantine_nodes.insert(node_idx, behavior);
        self
    }

    pub fn behavior(&self, node_idx: usize) -> ByzantineBehavior {
        self.byzantine_nodes.get(&node_idx).copied().unwrap_or(ByzantineBehavior::Honest)
    }
}

/// Seeded fault source; identical seeds replay identical runs
pub struct FaultInjector {
    config: FaultConfig,
    rng: StdRng,
}

impl FaultInjector {
    pub fn new(config: FaultConfig, seed: u64) -> Self {
        Self { config, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn should_drop(&mut self) -> bool {
        self.config.message_loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.message_loss_rate
    }

    pub fn should_duplicate(&mut self) -> bool {
        self.config.duplicate_rate > 0.0 && self.rng.gen::<f64>() < self.config.duplicate_rate
    }

    pub fn behavior(&self, node_idx: usize) -> ByzantineBehavior {
        self.config.behavior(node_idx)
    }
}
