//! Load-shed decision engine.
//!
//! A four-phase state machine driven solely by the per-tick aggregate
//! snapshot. Scarcity entry is debounced, shedding is staged one priority
//! tier at a time with optimistic projection (delivery is never
//! acknowledged within a tick), and restoration sits behind a hysteresis
//! band strictly above the shed threshold so the street cannot oscillate.
//!
//! The engine keeps no per-node state: which nodes are presumed shed lives
//! in the registry. Losing every frequency-reference anchor overrides all
//! of it; an unanchored island cannot be trusted to self-stabilize, so
//! every participant is shed immediately.

use crate::config::CoordinatorConfig;
use crate::registry::NodeRegistry;
use crate::types::{AggregateSnapshot, Health, NodeId, NodeRole, ReasonCode, ShedAction, ShedCommand};
use std::fmt;
use tracing::{error, info, warn};

/// Engine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Balanced; watching for deficit or low reserve
    Normal,
    /// Shortage suspected; waiting out the shed delay
    Scarcity,
    /// Actively shedding tiers until the projection balances
    Shedding,
    /// Above the restore threshold; confirming before restoring
    Recovering,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePhase::Normal => write!(f, "normal"),
            EnginePhase::Scarcity => write!(f, "scarcity"),
            EnginePhase::Shedding => write!(f, "shedding"),
            EnginePhase::Recovering => write!(f, "recovering"),
        }
    }
}

#[derive(Debug)]
pub struct ShedEngine {
    phase: EnginePhase,
    /// Consecutive deficit ticks observed while Normal
    deficit_streak: u32,
    /// Ticks spent in Scarcity
    scarcity_age: u32,
    /// Consecutive surplus ticks observed while Recovering
    surplus_streak: u32,
    /// Reason attached to shed commands of the current episode
    shed_reason: ReasonCode,
    /// Whether the last evaluation already saw an unanchored island
    unanchored_latched: bool,
}

impl Default for ShedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ShedEngine {
    pub fn new() -> Self {
        Self {
            phase: EnginePhase::Normal,
            deficit_streak: 0,
            scarcity_age: 0,
            surplus_streak: 0,
            shed_reason: ReasonCode::LowReserve,
            unanchored_latched: false,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Advance the state machine one tick and return any commands to
    /// broadcast. Commands are immutable once created; the registry's
    /// shed flags are updated optimistically as they are issued.
    pub fn evaluate(
        &mut self,
        snapshot: &AggregateSnapshot,
        registry: &mut NodeRegistry,
        cfg: &CoordinatorConfig,
    ) -> Vec<ShedCommand> {
        let tick = snapshot.tick;

        // Fail-safe overrides every phase and all hysteresis. On the tick
        // the anchor set empties, every eligible participant is commanded
        // regardless of earlier optimistic flags (a mirrored engine may
        // have flagged nodes whose commands were never broadcast).
        if snapshot.reference_anchor_count == 0 {
            let entering = !self.unanchored_latched;
            if entering {
                error!(tick, "unanchored island: no healthy anchor, forcing full load shed");
            }
            self.unanchored_latched = true;
            self.phase = EnginePhase::Shedding;
            self.shed_reason = ReasonCode::Unanchored;
            self.deficit_streak = 0;
            self.scarcity_age = 0;
            self.surplus_streak = 0;
            return Self::shed_everything(registry, tick, entering);
        }
        self.unanchored_latched = false;

        let low_reserve = snapshot.total_reserve_kwh < cfg.low_reserve_threshold_kwh;
        let deficit = snapshot.total_load_kw > snapshot.total_generation_kw;

        match self.phase {
            EnginePhase::Normal => {
                if low_reserve {
                    self.shed_reason = ReasonCode::LowReserve;
                    self.enter_scarcity(snapshot, tick);
                } else if deficit {
                    self.deficit_streak += 1;
                    if self.deficit_streak >= cfg.scarcity_confirm_ticks {
                        self.shed_reason = ReasonCode::SustainedDeficit;
                        self.enter_scarcity(snapshot, tick);
                    }
                } else {
                    self.deficit_streak = 0;
                }
                Vec::new()
            }

            EnginePhase::Scarcity => {
                if !low_reserve && !deficit {
                    info!(tick, "scarcity cleared before shed delay expired");
                    self.phase = EnginePhase::Normal;
                    self.deficit_streak = 0;
                    self.scarcity_age = 0;
                    Vec::new()
                } else {
                    self.scarcity_age += 1;
                    if self.scarcity_age > cfg.shed_delay_ticks {
                        warn!(tick, reason = %self.shed_reason, "scarcity persisted, shedding begins");
                        self.phase = EnginePhase::Shedding;
                        self.shed_next_tier(snapshot, registry, tick)
                    } else {
                        Vec::new()
                    }
                }
            }

            EnginePhase::Shedding => {
                let commands = self.shed_next_tier(snapshot, registry, tick);
                // Recovery opens only once the projection is balanced and
                // reserve has climbed past the hysteresis band
                if commands.is_empty()
                    && snapshot.total_reserve_kwh > cfg.restore_threshold_kwh
                    && Self::projected_balance_centi(snapshot, registry) >= 0
                {
                    info!(tick, "reserve above restore threshold, entering recovery");
                    self.phase = EnginePhase::Recovering;
                    self.surplus_streak = 0;
                }
                commands
            }

            EnginePhase::Recovering => {
                if snapshot.total_reserve_kwh < cfg.low_reserve_threshold_kwh
                    || Self::projected_balance_centi(snapshot, registry) < 0
                {
                    warn!(tick, "conditions worsened again, recovery abandoned");
                    self.phase = EnginePhase::Shedding;
                    self.surplus_streak = 0;
                    Vec::new()
                } else if snapshot.total_reserve_kwh > cfg.restore_threshold_kwh {
                    self.surplus_streak += 1;
                    if self.surplus_streak >= cfg.restore_confirm_ticks {
                        let commands = Self::restore_next_tier(snapshot, registry, tick);
                        if registry.iter().all(|r| !r.shed_commanded) {
                            info!(tick, "all participants restored, back to normal");
                            self.phase = EnginePhase::Normal;
                            self.deficit_streak = 0;
                            self.scarcity_age = 0;
                            self.surplus_streak = 0;
                        }
                        commands
                    } else {
                        Vec::new()
                    }
                } else {
                    // Inside the hysteresis band: hold, neither confirm
                    // nor abandon
                    Vec::new()
                }
            }
        }
    }

    fn enter_scarcity(&mut self, snapshot: &AggregateSnapshot, tick: u32) {
        warn!(
            tick,
            reserve = %snapshot.total_reserve_kwh,
            load = %snapshot.total_load_kw,
            generation = %snapshot.total_generation_kw,
            reason = %self.shed_reason,
            "entering scarcity"
        );
        self.phase = EnginePhase::Scarcity;
        self.scarcity_age = 0;
        self.deficit_streak = 0;
    }

    /// Generation minus load, with shed-commanded nodes' last-known load
    /// presumed already gone
    fn projected_balance_centi(snapshot: &AggregateSnapshot, registry: &NodeRegistry) -> i64 {
        let shed_load: i64 = registry
            .iter()
            .filter(|r| r.shed_commanded)
            .map(|r| i64::from(r.last_known_load().centi_kw()))
            .sum();
        let projected_load = (i64::from(snapshot.total_load_kw.centi_kw()) - shed_load).max(0);
        i64::from(snapshot.total_generation_kw.centi_kw()) - projected_load
    }

    /// Shed-eligible participants as `(tier, last-known load, id)`
    fn shed_candidates(registry: &NodeRegistry) -> Vec<(u8, i32, NodeId)> {
        registry
            .iter()
            .filter(|r| {
                r.role == NodeRole::Participant && r.health != Health::Faulty && !r.shed_commanded
            })
            .map(|r| (r.priority_tier, r.last_known_load().centi_kw(), r.id.clone()))
            .collect()
    }

    /// One shed round: lowest tier first, highest load first inside the
    /// tier, node id as the final tie-break. Stops as soon as the
    /// projected surplus is non-negative; never crosses into the next
    /// tier within one round.
    fn shed_next_tier(
        &self,
        snapshot: &AggregateSnapshot,
        registry: &mut NodeRegistry,
        tick: u32,
    ) -> Vec<ShedCommand> {
        let mut balance = Self::projected_balance_centi(snapshot, registry);
        if balance >= 0 {
            return Vec::new();
        }
        let mut candidates = Self::shed_candidates(registry);
        if candidates.is_empty() {
            return Vec::new();
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        let tier = candidates[0].0;

        let mut commands = Vec::new();
        for (_, load, id) in candidates.into_iter().take_while(|c| c.0 == tier) {
            warn!(node = %id, tier, reason = %self.shed_reason, "shedding participant");
            registry.set_shed(&id, true);
            commands.push(ShedCommand {
                target: id,
                action: ShedAction::Shed,
                reason: self.shed_reason,
                issued_tick: tick,
            });
            balance += i64::from(load);
            if balance >= 0 {
                break;
            }
        }
        commands
    }

    /// One restore round: highest tier (most critical) first, lightest
    /// load first inside the tier. Restores only what the projected
    /// balance can absorb; Faulty nodes keep their last commanded relay
    /// state.
    fn restore_next_tier(
        snapshot: &AggregateSnapshot,
        registry: &mut NodeRegistry,
        tick: u32,
    ) -> Vec<ShedCommand> {
        let mut candidates: Vec<(u8, i32, NodeId)> = registry
            .iter()
            .filter(|r| {
                r.role == NodeRole::Participant && r.health != Health::Faulty && r.shed_commanded
            })
            .map(|r| (r.priority_tier, r.last_known_load().centi_kw(), r.id.clone()))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        let tier = candidates[0].0;

        let mut balance = Self::projected_balance_centi(snapshot, registry);
        let mut commands = Vec::new();
        for (_, load, id) in candidates.into_iter().take_while(|c| c.0 == tier) {
            if balance - i64::from(load) < 0 {
                break;
            }
            balance -= i64::from(load);
            info!(node = %id, tier, "restoring participant");
            registry.set_shed(&id, false);
            commands.push(ShedCommand {
                target: id,
                action: ShedAction::Restore,
                reason: ReasonCode::SurplusRecovered,
                issued_tick: tick,
            });
        }
        commands
    }

    /// Unanchored fail-safe: shed every eligible participant. On entry the
    /// optimistic flags are ignored so no node is skipped; afterwards only
    /// newly eligible nodes are commanded. Faulty nodes are already
    /// assumed worst-case.
    fn shed_everything(registry: &mut NodeRegistry, tick: u32, entering: bool) -> Vec<ShedCommand> {
        let targets: Vec<NodeId> = registry
            .iter()
            .filter(|r| {
                r.role == NodeRole::Participant
                    && r.health != Health::Faulty
                    && (entering || !r.shed_commanded)
            })
            .map(|r| r.id.clone())
            .collect();
        let mut commands = Vec::with_capacity(targets.len());
        for id in targets {
            warn!(node = %id, "fail-safe shed");
            registry.set_shed(&id, true);
            commands.push(ShedCommand {
                target: id,
                action: ShedAction::Shed,
                reason: ReasonCode::Unanchored,
                issued_tick: tick,
            });
        }
        commands
    }
}
