//! Gradient bench runner
//!
//! Runs a protocol, push-pull cycling or a stop-all against simulated
//! syringe pumps on the host. Type `stop` and press enter to abort a run.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use gradient_core::config::{ProtocolConfig, PushPullConfig};
use gradient_core::sequencer::PushPullOutcome;
use gradient_core::RunOutcome;
use gradient_drivers::pump::{PumpGroup, SyringePumpConfig};
use gradient_runner::config::{load_config, parse_config};
use gradient_runner::delay::StdDelay;
use gradient_runner::sim::ClockedPump;
use gradient_runner::{AbortTrigger, ProtocolRunner, StopReport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bundled default protocol
/// Edit protocol.toml and rebuild, or pass --config
const EMBEDDED_PROTOCOL: &str = include_str!("../protocol.toml");

/// Most simulated pumps per role
const MAX_UNITS: usize = 4;

type BenchGroup = PumpGroup<ClockedPump, MAX_UNITS>;
type BenchRunner = ProtocolRunner<BenchGroup, BenchGroup, StdDelay>;

#[derive(Debug, Parser)]
#[command(name = "gradient-bench", version, about = "Run a gradient protocol on simulated pumps")]
struct Cli {
    #[command(subcommand)]
    command: Option<BenchCommand>,

    /// Protocol file (TOML); the bundled protocol is used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run this many times faster than real time
    #[arg(long, default_value_t = 1, global = true)]
    speedup: u32,

    /// Usable syringe volume of the simulated pumps (mL)
    #[arg(long, default_value_t = 20.0, global = true)]
    capacity_ml: f32,
}

#[derive(Debug, clap::Subcommand)]
enum BenchCommand {
    /// Run the protocol (default)
    Run,
    /// Stop both pumps and report which were already idle
    Stop,
    /// Move fluid back and forth between the two syringes
    PushPull {
        /// Full cycles; each is one stroke each way
        #[arg(long, default_value_t = 1)]
        cycles: u32,
        /// Rate of both pumps (mL/min)
        #[arg(long, default_value_t = 5.0)]
        rate_ml_min: f32,
        /// Length of one stroke (seconds)
        #[arg(long, default_value_t = 120.0)]
        stroke_s: f32,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            load_config(path).with_context(|| format!("load protocol {}", path.display()))?
        }
        None => parse_config(EMBEDDED_PROTOCOL).context("parse bundled protocol")?,
    };

    let pump_config = SyringePumpConfig {
        capacity_ml: cli.capacity_ml,
        ..SyringePumpConfig::default()
    };
    let stock = bench_group("stock", config.parallelism.stock, &pump_config, cli.speedup)?;
    let buffer = bench_group("buffer", config.parallelism.buffer, &pump_config, cli.speedup)?;
    let runner = ProtocolRunner::new(stock, buffer, StdDelay::scaled(cli.speedup));

    match cli.command.unwrap_or(BenchCommand::Run) {
        BenchCommand::Run => run_protocol(&runner, &config)?,
        BenchCommand::Stop => stop_pumps(&runner)?,
        BenchCommand::PushPull {
            cycles,
            rate_ml_min,
            stroke_s,
        } => {
            let push_pull = PushPullConfig {
                cycles,
                rate_ml_min,
                stroke_s,
                syringe: config.syringe,
                poll_interval_ms: config.poll_interval_ms,
                ..PushPullConfig::default()
            };
            push_pull_cycles(&runner, push_pull)?
        }
    }

    if let Some((stock, buffer)) = runner.into_bindings() {
        report("stock", &stock, &config);
        report("buffer", &buffer, &config);
    }

    Ok(())
}

fn run_protocol(runner: &BenchRunner, config: &ProtocolConfig) -> Result<()> {
    let handle = runner.start(config.clone()).context("start run")?;
    watch_stdin(handle.abort_trigger());

    match handle.join().context("run failed")? {
        RunOutcome::Completed { steps } => info!(steps, "Protocol complete"),
        RunOutcome::Aborted { step, state } => {
            warn!(step = step + 1, ?state, "Protocol aborted")
        }
    }
    Ok(())
}

fn push_pull_cycles(runner: &BenchRunner, config: PushPullConfig) -> Result<()> {
    let handle = runner.start_push_pull(config).context("start push-pull")?;
    watch_stdin(handle.abort_trigger());

    match handle.join().context("push-pull failed")? {
        PushPullOutcome::Completed { cycles } => info!(cycles, "Push-pull complete"),
        PushPullOutcome::Aborted { cycle } => warn!(cycle = cycle + 1, "Push-pull aborted"),
    }
    Ok(())
}

fn stop_pumps(runner: &BenchRunner) -> Result<()> {
    let reports = runner.stop_all().context("stop pumps")?;
    let failed = reports
        .iter()
        .filter(|(_, report)| matches!(report, StopReport::Failed(_)))
        .count();
    if failed > 0 {
        bail!("{failed} pump(s) did not stop");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn bench_group(
    role: &str,
    units: u8,
    pump_config: &SyringePumpConfig,
    speedup: u32,
) -> Result<BenchGroup> {
    let mut group = BenchGroup::new();
    for index in 0..units {
        let pump = ClockedPump::new(format!("{role}-{index}"), pump_config.clone(), speedup);
        if group.add(pump).is_err() {
            bail!("at most {MAX_UNITS} pumps per role, {units} requested for {role}");
        }
    }
    Ok(group)
}

/// Abort the run when `stop` is typed
fn watch_stdin(trigger: AbortTrigger) {
    let spawned = thread::Builder::new()
        .name("gradient-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("stop") => {
                        trigger.abort();
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "stdin watcher unavailable; run cannot be aborted");
    }
}

fn report(role: &str, group: &BenchGroup, config: &ProtocolConfig) {
    let delivered: f32 = group.iter().map(ClockedPump::delivered_ml).sum();
    info!(
        role,
        units = group.len(),
        delivered_ml = delivered,
        syringe_mm = config.syringe.diameter_mm,
        "Delivered volume"
    );
}
