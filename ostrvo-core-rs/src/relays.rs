//! Local relay bank and the actuation boundary.
//!
//! Each node owns a bank of named relays. A shed command addressed to the
//! local node opens every Load relay; a restore closes them back most
//! critical class first. Source and Grid relays are never touched by
//! shed/restore. The core only commands intent through [`RelayDriver`];
//! verifying physical application is the relay hardware's problem.

use crate::types::{ShedAction, ShedCommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Priority class of a relay; lower classes are more critical and are
/// restored first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayClass {
    /// Medical, comms
    Critical,
    /// Fridge, lights
    High,
    /// HVAC
    Medium,
    /// Everything deferrable
    Low,
}

/// What the relay switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    /// Battery, solar, EV discharge
    Source,
    /// Appliance circuits
    Load,
    /// Main grid tie
    Grid,
}

/// One physical relay circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    pub id: String,
    pub name: String,
    pub kind: RelayKind,
    pub class: RelayClass,
    #[serde(default = "default_closed")]
    pub is_closed: bool,
}

fn default_closed() -> bool {
    true
}

/// Actuation boundary: receives commands addressed to the local node
pub trait RelayDriver {
    fn apply(&mut self, command: &ShedCommand);
}

/// In-memory relay bank; the hardware driver behind it is an external
/// collaborator
#[derive(Debug, Clone)]
pub struct RelayBank {
    relays: Vec<Relay>,
}

impl RelayBank {
    pub fn new(relays: Vec<Relay>) -> Self {
        Self { relays }
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    /// True when every Load relay is open
    pub fn loads_shed(&self) -> bool {
        self.relays
            .iter()
            .filter(|r| r.kind == RelayKind::Load)
            .all(|r| !r.is_closed)
    }

    /// Open every closed Load relay; returns how many actually switched
    pub fn shed_loads(&mut self) -> usize {
        let mut switched = 0;
        for relay in self.relays.iter_mut().filter(|r| r.kind == RelayKind::Load) {
            if relay.is_closed {
                warn!(relay = %relay.name, class = ?relay.class, "opening load relay");
                relay.is_closed = false;
                switched += 1;
            }
        }
        switched
    }

    /// Close open Load relays, most critical class first
    pub fn restore_loads(&mut self) -> usize {
        let mut switched = 0;
        let mut order: Vec<usize> = (0..self.relays.len())
            .filter(|&i| self.relays[i].kind == RelayKind::Load && !self.relays[i].is_closed)
            .collect();
        order.sort_by_key(|&i| self.relays[i].class);
        for i in order {
            let relay = &mut self.relays[i];
            info!(relay = %relay.name, class = ?relay.class, "closing load relay");
            relay.is_closed = true;
            switched += 1;
        }
        switched
    }
}

impl RelayDriver for RelayBank {
    fn apply(&mut self, command: &ShedCommand) {
        info!(
            action = %command.action,
            reason = %command.reason,
            issued_tick = command.issued_tick,
            "relay command"
        );
        match command.action {
            ShedAction::Shed => {
                self.shed_loads();
            }
            ShedAction::Restore => {
                self.restore_loads();
            }
        }
    }
}
