//! OSTRVO street simulation harness.
//!
//! Runs whole streets of coordinator nodes in process, over a lossy
//! simulated radio with seeded fault injection:
//! - `run` - one named scenario, JSON report to stdout
//! - `suite` - every scenario, summary table, non-zero exit on failure
//! - `list` - available scenarios

mod cluster;
mod fault_injection;
mod metrics;
mod scenarios;

use clap::{Parser, Subcommand};
use scenarios::Scenario;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ostrvo-sim")]
#[command(about = "Street simulation and fault-injection harness for OSTRVO")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario
    Run {
        /// Scenario name (see `list`)
        #[arg(short, long, default_value = "happy")]
        scenario: String,

        /// Ticks to simulate (scenario default when omitted)
        #[arg(short, long)]
        ticks: Option<u32>,

        /// Fault-injection seed; identical seeds replay identical runs
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Directory for the JSON report artifact
        #[arg(short = 'd', long)]
        output_dir: Option<PathBuf>,
    },

    /// Run the full scenario suite
    Suite {
        /// Fault-injection seed shared by every scenario
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Directory for the JSON report artifacts
        #[arg(short = 'd', long)]
        output_dir: Option<PathBuf>,
    },

    /// List available scenarios
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { scenario, ticks, seed, output_dir } => {
            let scenario: Scenario = scenario.parse()?;
            let ticks = ticks.unwrap_or_else(|| scenario.default_ticks());
            let report = scenario.run(seed, ticks);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(dir) = output_dir {
                let path = report.write_json(&dir)?;
                info!(path = %path.display(), "report written");
            }
            if !report.pass {
                std::process::exit(1);
            }
        }

        Commands::Suite { seed, output_dir } => {
            let mut failures = 0usize;
            println!("{:<20} {:>6} {:>6} {:>8}  result", "scenario", "ticks", "shed", "restore");
            for scenario in Scenario::ALL {
                let report = scenario.run(seed, scenario.default_ticks());
                println!(
                    "{:<20} {:>6} {:>6} {:>8}  {}",
                    scenario.name(),
                    report.ticks,
                    report.shed_commands,
                    report.restore_commands,
                    if report.pass { "PASS" } else { "FAIL" }
                );
                for note in &report.notes {
                    println!("    {note}");
                }
                if let Some(dir) = &output_dir {
                    report.write_json(dir)?;
                }
                if !report.pass {
                    failures += 1;
                }
            }
            if failures > 0 {
                eprintln!("{failures} scenario(s) failed");
                std::process::exit(1);
            }
        }

        Commands::List => {
            for scenario in Scenario::ALL {
                println!("{:<20} {}", scenario.name(), scenario.blurb());
            }
        }
    }

    Ok(())
}
