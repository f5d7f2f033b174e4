//! Control loop driving the fan registry
//!
//! One registry tick at a time runs on the blocking pool. Between ticks the
//! loop sleeps for the interval the registry asked for, or until shutdown is
//! requested.
//!
//! # Failure Handling
//!
//! - A failed tick has already forced every fan to full power; the loop keeps
//!   retrying on the normal interval.
//! - After `MAX_CONSECUTIVE_ERRORS` failed ticks in a row the loop gives up.
//! - Fatal errors (a changed sensor layout, duplicate names) end the loop at once.
//! - `FullPowerGuard` forces full power when it is dropped, so every exit
//!   path of the daemon, unwinding included, leaves the fans at full speed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use parking_lot::Mutex;
use qf_core::constants::timing::MAX_CONSECUTIVE_ERRORS;
use qf_core::FanRegistry;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub type SharedRegistry = Arc<Mutex<FanRegistry>>;

/// Shutdown request shared between the signal handler and async tasks
#[derive(Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call from any thread, including the signal handler thread
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request in between is not lost
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

/// Forces every fan to full power when dropped
pub struct FullPowerGuard {
    registry: SharedRegistry,
}

impl FullPowerGuard {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }
}

impl Drop for FullPowerGuard {
    fn drop(&mut self) {
        info!("SHUTDOWN: Forcing all fans to full power");
        self.registry.lock().force_full_power();
    }
}

/// Run ticks until shutdown is requested or the failure budget is exhausted
pub async fn run_control_loop(registry: SharedRegistry, shutdown: Arc<ShutdownSignal>) -> anyhow::Result<()> {
    let update_interval = registry.lock().update_interval();
    info!(update_interval = update_interval.as_secs_f64(), "Fan control loop starting");

    let mut consecutive_errors: u32 = 0;

    while !shutdown.is_requested() {
        let reg = Arc::clone(&registry);
        let result = tokio::task::spawn_blocking(move || reg.lock().tick()).await;

        let next = match result {
            Ok(Ok(next)) => {
                if consecutive_errors > 0 {
                    info!("Control loop recovered after {} errors", consecutive_errors);
                    consecutive_errors = 0;
                }
                next
            }
            Ok(Err(e)) if e.is_fatal() => {
                error!(error = %e, "Unrecoverable control error");
                return Err(e).context("fan control stopped");
            }
            Ok(Err(e)) => {
                consecutive_errors += 1;
                if consecutive_errors == 1 || consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
                    error!("Control loop error (count: {}): {}", consecutive_errors, e);
                }
                update_interval
            }
            Err(e) => {
                // The tick panicked before it could force full power itself
                consecutive_errors += 1;
                error!("Control tick panicked (count: {}): {}", consecutive_errors, e);
                force_full_power(&registry).await;
                update_interval
            }
        };

        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            warn!("Too many consecutive errors, giving up");
            bail!("{} consecutive control loop errors", consecutive_errors);
        }

        tokio::select! {
            _ = tokio::time::sleep(next) => {}
            _ = shutdown.wait() => {
                debug!("Control loop woken up by shutdown request");
            }
        }
    }

    info!("Fan control loop stopped");
    Ok(())
}

async fn force_full_power(registry: &SharedRegistry) {
    let reg = Arc::clone(registry);
    if let Err(e) = tokio::task::spawn_blocking(move || reg.lock().force_full_power()).await {
        error!("Forcing full power failed: {}", e);
    }
}
