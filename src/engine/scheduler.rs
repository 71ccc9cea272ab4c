//! Cycle scheduler and HA state manager.
//!
//! The engine is **active** exactly when the sentinel-reported master's
//! host equals this engine's host identifier and the store is healthy;
//! otherwise it is standby. The state is polled on a fixed interval and
//! transitions start or stop the cycle loop:
//!
//! - standby → active: spawn the cycle worker.
//! - active → standby: signal the worker's stop token and wait; the
//!   in-flight cycle completes (including its flush) before the loop ends.
//!
//! A full shutdown uses the scheduler's own cancellation token, which also
//! aborts in-flight store I/O and the inter-cycle sleep; a cycle cancelled
//! mid-evaluation never flushes, so no partial writes become visible.

use super::{EngineError, RuleEngine};
use crate::config::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    engine: Arc<RuleEngine>,
    host_id: String,
    cycle_period: Duration,
    state_check_interval: Duration,
    unhealthy_window: Duration,
    cancel: CancellationToken,
    active: AtomicBool,
}

impl Scheduler {
    pub fn new(engine: Arc<RuleEngine>, config: &Config, cancel: CancellationToken) -> Self {
        Scheduler {
            engine,
            host_id: config.host_id(),
            cycle_period: Duration::from_millis(config.engine.cycle_time_ms.max(1)),
            state_check_interval: Duration::from_millis(config.ha.state_check_interval_ms.max(1)),
            unhealthy_window: Duration::from_millis(config.ha.unhealthy_window_ms),
            cancel,
            active: AtomicBool::new(false),
        }
    }

    /// Whether this engine currently drives cycles.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Drive the state machine until the cancellation token fires. Returns
    /// after any running cycle worker has stopped.
    pub async fn run(&self) {
        info!(host = %self.host_id, "state manager started");
        let mut worker: Option<(CancellationToken, JoinHandle<()>)> = None;
        let mut unhealthy_since: Option<Instant> = None;
        let mut unhealthy_reported = false;

        let mut ticker = tokio::time::interval(self.state_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let healthy = self.engine.store().is_healthy();
            if healthy {
                unhealthy_since = None;
                unhealthy_reported = false;
            } else {
                let since = *unhealthy_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.unhealthy_window && !unhealthy_reported {
                    error!(
                        window = ?self.unhealthy_window,
                        "store unreachable beyond the configured window; engine held inactive"
                    );
                    unhealthy_reported = true;
                }
            }

            let should_be_active = healthy && self.master_is_self().await;

            match (should_be_active, worker.is_some()) {
                (true, false) => {
                    info!(host = %self.host_id, "becoming active; starting cycle loop");
                    let stop = CancellationToken::new();
                    let handle = tokio::spawn(cycle_worker(
                        Arc::clone(&self.engine),
                        self.cycle_period,
                        stop.clone(),
                        self.cancel.clone(),
                    ));
                    worker = Some((stop, handle));
                    self.active.store(true, Ordering::SeqCst);
                }
                (false, true) => {
                    info!(host = %self.host_id, "becoming inactive; stopping cycle loop");
                    if let Some((stop, handle)) = worker.take() {
                        stop.cancel();
                        if handle.await.is_err() {
                            warn!("cycle worker panicked during deactivation");
                        }
                    }
                    self.active.store(false, Ordering::SeqCst);
                }
                _ => {}
            }
        }

        if let Some((stop, handle)) = worker.take() {
            stop.cancel();
            let _ = handle.await;
        }
        self.active.store(false, Ordering::SeqCst);
        info!("state manager stopped");
    }

    async fn master_is_self(&self) -> bool {
        match self.engine.store().sentinel_master().await {
            Ok(master) => master.host == self.host_id,
            Err(e) => {
                debug!(error = %e, "sentinel master lookup failed");
                false
            }
        }
    }
}

/// The cycle loop. `stop` is the graceful deactivation signal, checked only
/// between cycles and during the inter-cycle sleep; `hard` aborts the cycle
/// itself (shutdown).
async fn cycle_worker(
    engine: Arc<RuleEngine>,
    period: Duration,
    stop: CancellationToken,
    hard: CancellationToken,
) {
    info!(?period, "cycle loop started");
    loop {
        if stop.is_cancelled() || hard.is_cancelled() {
            break;
        }

        let cycle_start = Instant::now();
        match engine.run_cycle(&hard).await {
            Ok(report) => {
                debug!(
                    fired = report.fired,
                    writes = report.writes,
                    flushed = report.flushed,
                    "cycle finished"
                );
            }
            Err(EngineError::Cancelled) => break,
            Err(e) => warn!(error = %e, "cycle failed"),
        }

        let elapsed = cycle_start.elapsed();
        if elapsed >= period {
            warn!(
                ?elapsed,
                ?period,
                "cycle overran its period; starting the next immediately"
            );
            continue;
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = hard.cancelled() => break,
            _ = tokio::time::sleep(period - elapsed) => {}
        }
    }
    info!("cycle loop stopped");
}
