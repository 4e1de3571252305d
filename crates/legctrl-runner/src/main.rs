//! `legctrl`: drive a LegCtrl robot from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use legctrl_runner::bridge_server::print_banner;
use legctrl_runner::scenario::{build_client, print_devices, scan, shutdown, spawn_printer};
use legctrl_runner::{
    BridgeConfig, BridgeServer, Interrupt, RunConfig, RunnerError, RunnerResult, ScenarioRunner,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "legctrl", about = "Remote control for LegCtrl robots", version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this address.
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan for robots and print what was found.
    Scan {
        /// Run configuration naming the transport. Defaults to one simulated robot.
        #[arg(long)]
        config: Option<PathBuf>,

        /// How long to scan.
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
    },
    /// Execute a scenario.
    Run {
        /// Run configuration with the scenario steps.
        #[arg(long)]
        config: PathBuf,

        /// Device name for connect steps, overriding the configuration.
        #[arg(long)]
        device: Option<String>,
    },
    /// Serve a simulated robot over TCP.
    Bridge {
        /// TCP port to listen on.
        #[arg(long, default_value_t = 7400)]
        port: u16,

        /// Robot name.
        #[arg(long, default_value = "LegCtrl")]
        name: String,
    },
}

fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = legctrl_metrics::install_prometheus(addr) {
            error!("failed to start metrics exporter: {}", e);
            return ExitCode::FAILURE;
        }
        info!("metrics on http://{}/metrics", addr);
    }

    let result = match cli.command {
        Command::Scan {
            config,
            duration_ms,
        } => run_scan(config, Duration::from_millis(duration_ms)),
        Command::Run { config, device } => run_scenario(config, device),
        Command::Bridge { port, name } => run_bridge(port, name),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunnerError::Interrupted) => {
            info!("interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn install_interrupt() -> RunnerResult<Interrupt> {
    let interrupt = Interrupt::new();
    let handler = interrupt.clone();
    ctrlc::set_handler(move || handler.trigger())?;
    Ok(interrupt)
}

fn run_scan(config: Option<PathBuf>, duration: Duration) -> RunnerResult<()> {
    let config = match config {
        Some(path) => RunConfig::load(&path)?,
        None => RunConfig::default(),
    };
    let interrupt = install_interrupt()?;
    let client = build_client(&config)?;

    let devices = scan(&client, duration, &interrupt)?;
    print_devices(&devices);
    Ok(())
}

fn run_scenario(path: PathBuf, device: Option<String>) -> RunnerResult<()> {
    let mut config = RunConfig::load(&path)?;
    if device.is_some() {
        config.device = device;
    }
    let interrupt = install_interrupt()?;
    let client = build_client(&config)?;
    let printer = spawn_printer(client.subscribe())?;

    info!("Runner: {} steps from {}", config.steps.len(), path.display());
    let result = ScenarioRunner::new(&client, config.device.clone(), interrupt).run(&config.steps);

    shutdown(&client);
    drop(client);
    let _ = printer.join();
    result
}

fn run_bridge(port: u16, name: String) -> RunnerResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let stop = Arc::new(tokio::sync::Notify::new());
    let handler = stop.clone();
    ctrlc::set_handler(move || handler.notify_one())?;

    runtime.block_on(async move {
        let server = BridgeServer::bind(BridgeConfig::new(port, name)).await?;
        print_banner(server.state().name(), server.local_addr()?);
        server.run_until(stop.notified()).await
    })?;
    Ok(())
}
