//! Run reports and JSON artifacts.

use crate::cluster::StreetCluster;
use chrono::Utc;
use ostrvo_core::ShedAction;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where one node ended up after a run
#[derive(Debug, Serialize)]
pub struct NodeOutcome {
    pub id: String,
    pub role: String,
    pub phase: String,
    pub loads_shed: bool,
    pub frames_received: u64,
    pub decode_failures: u64,
    pub rejected_reports: u64,
}

/// Full record of one scenario run
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub seed: u64,
    pub ticks: u32,
    pub shed_commands: usize,
    pub restore_commands: usize,
    pub first_shed_tick: Option<u32>,
    pub nodes: Vec<NodeOutcome>,
    pub pass: bool,
    pub notes: Vec<String>,
}

impl ScenarioReport {
    /// Snapshot the cluster's end state; `pass` and `notes` stay with the
    /// scenario's own expectations
    pub fn from_cluster(scenario: &str, seed: u64, ticks: u32, cluster: &StreetCluster) -> Self {
        let nodes = cluster
            .nodes()
            .iter()
            .map(|node| {
                let counters = node.counters();
                let record = node
                    .coordinator()
                    .registry()
                    .get(&node.id)
                    .expect("own record always rostered");
                NodeOutcome {
                    id: node.id.clone(),
                    role: record.role.to_string(),
                    phase: node.coordinator().phase().to_string(),
                    loads_shed: node.loads_shed(),
                    frames_received: counters.frames_received,
                    decode_failures: counters.decode_failures,
                    rejected_reports: counters.rejected_reports,
                }
            })
            .collect();
        Self {
            scenario: scenario.to_string(),
            seed,
            ticks,
            shed_commands: cluster
                .command_log
                .iter()
                .filter(|(_, c)| c.action == ShedAction::Shed)
                .count(),
            restore_commands: cluster
                .command_log
                .iter()
                .filter(|(_, c)| c.action == ShedAction::Restore)
                .count(),
            first_shed_tick: cluster
                .command_log
                .iter()
                .find(|(_, c)| c.action == ShedAction::Shed)
                .map(|(tick, _)| *tick),
            nodes,
            pass: true,
            notes: Vec::new(),
        }
    }

    pub fn expect(&mut self, ok: bool, note: &str) {
        if !ok {
            self.pass = false;
            self.notes.push(format!("FAILED: {note}"));
        }
    }

    /// Write the report as a timestamped JSON artifact
    pub fn write_json(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = dir.join(format!("{}-{}-seed{}.json", self.scenario, stamp, self.seed));
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, body)?;
        Ok(path)
    }
}
