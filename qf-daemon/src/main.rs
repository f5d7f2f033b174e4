//! quietfan daemon (quietfand)
//!
//! Privileged service that runs the closed-loop fan controller.
//!
//! # Lifecycle
//! - Loads and validates the configuration, then builds every fan engine
//! - Switches the fans to manual PWM control and ticks the registry until
//!   SIGINT/SIGTERM
//! - Optionally serves the latest status over HTTP (read-only)
//! - Leaves every fan at full power on exit, including error exits and panics

mod fan_control;
mod logging;
mod server;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use qf_core::constants::paths::CONFIG_FILE;
use qf_core::{load_config, Config};
use tracing::{error, info, warn};

use fan_control::{FullPowerGuard, ShutdownSignal};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long the status server gets to finish in-flight requests
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "quietfand")]
#[command(version)]
#[command(about = "quietfan - closed-loop fan control daemon")]
#[command(long_about = "quietfan - closed-loop fan control daemon

Keeps each configured fan at the lowest speed that holds its temperature
sensors at their targets, stopping fans entirely when nothing needs cooling.

ENVIRONMENT VARIABLES:
    QUIETFAN_LOG=debug     Log level (overridden by --log-level)")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// Verify we're running as root
fn verify_privileges() -> Result<(), &'static str> {
    // SAFETY: geteuid and getuid only return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        return Err("Daemon must run as root (euid=0) to write PWM controls");
    }
    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }

    info!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

fn status_server_addr(config: &Config) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = config
        .status_server
        .bind
        .parse()
        .with_context(|| format!("Invalid status server address {:?}", config.status_server.bind))?;
    Ok(SocketAddr::new(ip, config.status_server.port))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: Log panics; unwinding still runs the full-power guard
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
        error!(location = %location, "PANIC: {}", message);
    }));

    // PHASE 1: Arguments
    let cli = Cli::parse();

    // PHASE 2: Configuration
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // PHASE 3: Logging
    let log_level = logging::resolve_log_level(cli.log_level.as_deref(), config.log_level.as_deref());
    let use_journald = logging::init(&log_level);

    info!("STARTUP: quietfand {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
    info!("STARTUP: Log level: {}", log_level);

    if cli.check {
        let registry = config.build_registry().context("Invalid configuration")?;
        println!(
            "Configuration OK: {} fan(s), update every {}s",
            registry.fans().len(),
            registry.update_interval().as_secs_f64()
        );
        return Ok(());
    }

    // PHASE 4: Privilege check
    if let Err(e) = verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    // PHASE 5: Signal handlers
    let shutdown = Arc::new(ShutdownSignal::new());
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
            shutdown.request();
        }) {
            warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
        }
    }

    // PHASE 6: Fan engines; from here on every exit leaves the fans at full power
    let registry = Arc::new(Mutex::new(config.build_registry().context("Invalid configuration")?));
    let guard = FullPowerGuard::new(Arc::clone(&registry));

    registry
        .lock()
        .enable_manual_control()
        .context("Failed to enable manual PWM control")?;
    info!("STARTUP: {} fan(s) under manual control", registry.lock().fans().len());

    // PHASE 7: Status server
    let server_handle = if config.status_server.enabled {
        let addr = status_server_addr(&config)?;
        let state = {
            let reg = registry.lock();
            server::ServerState::new(reg.status_handle(), reg.history().cloned())
        };
        let shutdown = Arc::clone(&shutdown);
        Some(tokio::spawn(async move {
            if let Err(e) = server::run_server(addr, state, shutdown).await {
                error!("Status server error: {:#}", e);
            }
        }))
    } else {
        info!("STARTUP: Status server disabled");
        None
    };

    // PHASE 8: Control loop
    let result = fan_control::run_control_loop(Arc::clone(&registry), Arc::clone(&shutdown)).await;

    // PHASE 9: Shutdown
    shutdown.request();
    if let Some(handle) = server_handle {
        if tokio::time::timeout(SERVER_SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Status server did not stop in time");
        }
    }
    drop(guard);

    match &result {
        Ok(()) => info!("SHUTDOWN: Daemon terminated gracefully"),
        Err(e) => error!("SHUTDOWN: Control loop failed: {:#}", e),
    }
    result
}
