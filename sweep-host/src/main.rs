mod clock;
mod config;
mod console;
mod emulator;
mod error;
mod event;
mod runtime;
mod serial;
mod sink;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sweep_core::orchestrator::EngineRequest;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::HostConfig;
use emulator::EmulatorCommand;
use runtime::{Mode, Runtime, SweepOutcome};
use sink::CsvSink;

/// Drives DECT NR+ perf measurements across MCS and SNR.
#[derive(Debug, Parser)]
#[command(name = "dect-sweep", version, about)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file.
    #[arg(short, long, default_value = "dect-sweep.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configured sweep to completion.
    Sweep,
    /// Interactive operator console.
    Console,
    /// Print the points the sweep would visit.
    Plan,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = HostConfig::load(&cli.config)?;

    match cli.command {
        Command::Plan => {
            let plan = config.plan().context("invalid [[tiers]]")?;
            println!("{} points on {}", plan.point_count(), config.channel()?);
            for point in plan.points() {
                println!("  {point}");
            }
            Ok(())
        }
        Command::Sweep => {
            let plan = config.plan().context("invalid [[tiers]]")?;
            let mut runtime = runtime(&config, Mode::Batch)?;
            info!(points = plan.point_count(), "starting sweep");
            runtime.request(EngineRequest::StartSweep)?;
            match runtime.run().await {
                SweepOutcome::Completed { points } => {
                    info!(points, "sweep finished");
                    Ok(())
                }
                SweepOutcome::Stopped { completed } => {
                    info!(completed, "sweep stopped early");
                    Ok(())
                }
                SweepOutcome::Aborted(err) => bail!("sweep aborted: {err}"),
                SweepOutcome::None => bail!("sweep did not run"),
            }
        }
        Command::Console => {
            let mut runtime = runtime(&config, Mode::Interactive)?;
            println!("{}", console::BANNER);
            console::spawn_reader(runtime.events());
            runtime.run().await;
            Ok(())
        }
    }
}

fn runtime(config: &HostConfig, mode: Mode) -> anyhow::Result<Runtime> {
    let engine = config.engine()?;
    let emulator = EmulatorCommand {
        program: config.emulator.program.clone(),
        args: config.emulator.args.clone(),
    };
    let sink = CsvSink::new(&config.output.data_dir, config.output.mode);
    Ok(Runtime::new(engine, emulator, sink, mode))
}
