//! # Proxy viscometer
//!
//! Command-line front end for the transfer-cycle sequencer.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a configuration
//! viscometer check --config config/viscometer.toml
//!
//! # Print the per-cycle dose and draw depth
//! viscometer plan
//!
//! # Run the whole sequence against the simulated pipette
//! viscometer simulate --report run.json
//!
//! # Start a new configuration from the defaults
//! viscometer default-config > config/viscometer.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humantime_serde::re::humantime::format_duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proxy_viscometer::config::{Settings, DEFAULT_CONFIG_PATH};
use proxy_viscometer::hardware::{MockPipette, Pacing};
use proxy_viscometer::protocol::{schedule, RunController};

/// Proxy viscometer transfer sequencer
#[derive(Parser)]
#[command(name = "viscometer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration
    Check {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print dose, draw depth and dispense rate for every cycle
    Plan {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Run the full sequence against the simulated pipette
    Simulate {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Sleep through every dwell instead of only advancing the virtual clock
        #[arg(long)]
        realtime: bool,

        /// Write the JSON run report here
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Print the built-in defaults as TOML
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let settings = load(&config, cli.log_level.as_deref())?;
            run_check(&config, &settings);
            Ok(())
        }
        Commands::Plan { config } => {
            let settings = load(&config, cli.log_level.as_deref())?;
            run_plan(&settings)
        }
        Commands::Simulate {
            config,
            realtime,
            report,
        } => {
            let settings = load(&config, cli.log_level.as_deref())?;
            run_simulate(settings, realtime, report).await
        }
        Commands::DefaultConfig => {
            print!("{}", Settings::default().to_toml()?);
            Ok(())
        }
    }
}

/// Load settings, then start logging at the resolved level.
///
/// `RUST_LOG` wins over `--log-level`, which wins over the file.
fn load(path: &Path, cli_level: Option<&str>) -> Result<Settings> {
    match Settings::load_from(path) {
        Ok(settings) => {
            init_tracing(cli_level.unwrap_or(&settings.application.log_level));
            info!(config = %path.display(), "Configuration loaded");
            Ok(settings)
        }
        Err(err) => {
            init_tracing(cli_level.unwrap_or("info"));
            Err(err).with_context(|| format!("loading {}", path.display()))
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_check(path: &Path, settings: &Settings) {
    let run = &settings.run;
    let deck = &settings.deck;
    println!("Configuration OK: {}", path.display());
    println!("  samples:      {}", run.sample_count);
    println!("  flow rates:   {:?} µL/s", run.flow_rates);
    println!("  replicates:   {}", run.replicates);
    println!(
        "  durations:    aspirate {}, dispense {}",
        format_duration(run.aspiration_duration),
        format_duration(run.dispense_duration)
    );
    println!("  start depth:  {:+.2} mm", run.start_depth_mm);
    println!(
        "  deck:         {} (slot {}), {} (slot {}), {} (slot {})",
        deck.reservoir.kind,
        deck.reservoir.slot,
        deck.plate.kind,
        deck.plate.slot,
        deck.tip_rack.kind,
        deck.tip_rack.slot
    );
    println!(
        "  pipette:      {} ({} mount)",
        deck.instrument.kind, deck.instrument.mount
    );
}

fn run_plan(settings: &Settings) -> Result<()> {
    let samples = schedule(&settings.run)?;
    for sample in &samples {
        println!(
            "Sample {}: reservoir {} -> destination {} (tip {})",
            sample.sample_index, sample.reservoir, sample.destination, sample.tip
        );
        println!(
            "  {:>10}  {:>4}  {:>10}  {:>10}  {:>10}  {:>8}",
            "rate µL/s", "rep", "volume µL", "depth mm", "after mm", "rel rate"
        );
        for cycle in &sample.cycles {
            println!(
                "  {:>10.1}  {:>4}  {:>10.1}  {:>10.2}  {:>10.2}  {:>8.4}",
                cycle.flow_rate,
                cycle.replicate,
                cycle.aspirated_ul,
                cycle.aspirate_depth_mm,
                cycle.depth_after_mm,
                cycle.dispense_rate
            );
        }
    }
    Ok(())
}

async fn run_simulate(settings: Settings, realtime: bool, report: Option<PathBuf>) -> Result<()> {
    let pacing = if realtime {
        Pacing::RealTime
    } else {
        Pacing::Instant
    };
    let pipette = MockPipette::new().with_pacing(pacing);
    let mut controller = RunController::new(Arc::new(pipette.clone()), settings);

    let result = controller.run().await;

    if let Some(path) = &report {
        controller
            .report()
            .write_json(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    let actions = pipette.actions().await.len();
    let elapsed = pipette.elapsed().await;
    println!(
        "{} cycles, {} driver actions, {} of dwell",
        controller.report().cycle_count(),
        actions,
        format_duration(elapsed)
    );

    result.map(|_| ()).context("simulated run aborted")
}
