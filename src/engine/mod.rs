//! # Runtime Execution Engine
//!
//! Loads a compiled plan and executes it against live data. One cycle:
//!
//! ```text
//! store.get_current(read keys)
//!     ↓
//! temporal buffers update (sampling policy)
//!     ↓
//! layers in order:
//!     groups in index order, rules within a group on the worker pool
//!     outcomes applied to the pending map in declaration order
//!     numeric writes overlaid so the next layer observes them
//!     ↓
//! pending map flushed as one atomic batch, messages after writes
//! ```
//!
//! Errors inside one rule never affect another rule's evaluation; a failed
//! flush discards the cycle's writes and the next cycle starts clean.

pub mod actions;
pub mod eval;
pub mod scheduler;

pub use scheduler::Scheduler;

use crate::emit::{self, ExecutablePlan};
use crate::expr::ExprCache;
use crate::store::{LogThrottle, Store, StoreError};
use crate::temporal::TemporalBuffers;
use actions::{PendingCycle, RuleOutcome};
use eval::EvalContext;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] emit::EmitError),

    #[error("cycle cancelled")]
    Cancelled,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// UTC wall clock in microseconds. One clock source for cycle scheduling
/// and buffer updates.
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Default)]
struct EngineStats {
    cycles_completed: AtomicU64,
    rules_fired: AtomicU64,
    flush_failures: AtomicU64,
    last_cycle_us: AtomicU64,
}

/// Point-in-time counters for operators and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cycles_completed: u64,
    pub rules_fired: u64,
    pub flush_failures: u64,
    pub last_cycle_us: u64,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub fired: usize,
    pub writes: usize,
    pub messages: usize,
    /// False when the batch flush failed and the writes were discarded.
    pub flushed: bool,
}

// ============================================================================
// Engine
// ============================================================================

/// The cyclic evaluator: compiled plan, temporal state, store handle and a
/// fixed-parallelism worker pool for group-internal evaluation.
pub struct RuleEngine {
    plan: ExecutablePlan,
    store: Arc<dyn Store>,
    temporal: TemporalBuffers,
    exprs: ExprCache,
    workers: rayon::ThreadPool,
    throttle: LogThrottle,
    stats: EngineStats,
}

impl RuleEngine {
    /// Build an engine from a loaded plan. `worker_threads` of 0 sizes the
    /// pool to the machine.
    pub fn new(
        plan: ExecutablePlan,
        store: Arc<dyn Store>,
        worker_threads: usize,
        throttle_window: Duration,
    ) -> Result<Self, EngineError> {
        let threads = if worker_threads == 0 {
            num_cpus::get()
        } else {
            worker_threads
        };
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rule-worker-{i}"))
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

        let temporal = TemporalBuffers::new(
            plan.sampling_period_ms,
            plan.default_buffer_capacity,
            plan.buffer_capacities.clone(),
        );

        Ok(RuleEngine {
            plan,
            store,
            temporal,
            exprs: ExprCache::new(),
            workers,
            throttle: LogThrottle::new(throttle_window),
            stats: EngineStats::default(),
        })
    }

    /// Load the plan from an artifact directory and build the engine.
    pub fn from_artifact(
        dir: impl AsRef<Path>,
        store: Arc<dyn Store>,
        worker_threads: usize,
        throttle_window: Duration,
    ) -> Result<Self, EngineError> {
        let plan = emit::load_plan(dir)?;
        Self::new(plan, store, worker_threads, throttle_window)
    }

    pub fn plan(&self) -> &ExecutablePlan {
        &self.plan
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_completed: self.stats.cycles_completed.load(Ordering::Relaxed),
            rules_fired: self.stats.rules_fired.load(Ordering::Relaxed),
            flush_failures: self.stats.flush_failures.load(Ordering::Relaxed),
            last_cycle_us: self.stats.last_cycle_us.load(Ordering::Relaxed),
        }
    }

    /// Run one cycle at the current wall clock.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, EngineError> {
        self.run_cycle_at(now_us(), cancel).await
    }

    /// Run one cycle at an explicit timestamp. The timestamp drives both
    /// temporal buffer updates and the batch write timestamp, which is what
    /// lets tests replay sample sequences deterministically.
    pub async fn run_cycle_at(
        &self,
        now_us: i64,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, EngineError> {
        let started = std::time::Instant::now();

        let readings = self.store.get_current(&self.plan.read_keys).await?;
        let mut current: HashMap<String, f64> = readings
            .iter()
            .map(|(key, reading)| (key.clone(), reading.value))
            .collect();
        for (key, reading) in &readings {
            self.temporal.update(key, reading.value, now_us);
        }

        let Some((pending, fired)) = self.evaluate_layers(&mut current, now_us, cancel) else {
            return Err(EngineError::Cancelled);
        };

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let report = match pending.flush(self.store.as_ref(), now_us).await {
            Ok(flush) => CycleReport {
                fired,
                writes: flush.writes,
                messages: flush.messages,
                flushed: true,
            },
            Err(e) => {
                warn!(error = %e, "batch flush failed; discarding this cycle's writes");
                self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                CycleReport {
                    fired,
                    writes: 0,
                    messages: 0,
                    flushed: false,
                }
            }
        };

        self.stats.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rules_fired
            .fetch_add(fired as u64, Ordering::Relaxed);
        self.stats
            .last_cycle_us
            .store(started.elapsed().as_micros() as u64, Ordering::Relaxed);

        debug!(
            fired,
            writes = report.writes,
            messages = report.messages,
            flushed = report.flushed,
            "cycle complete"
        );
        Ok(report)
    }

    /// Coordinator entry point: evaluate the plan against an input map and
    /// collect numeric outputs, with no store I/O and no temporal updates
    /// beyond what the buffers already hold. Returns the number of rules
    /// that fired.
    ///
    /// This is the artifact's documented surface for embedding and tests;
    /// the cycle loop is the same walk plus store I/O around it.
    pub fn evaluate(
        &self,
        inputs: &HashMap<String, f64>,
        outputs: &mut HashMap<String, f64>,
    ) -> usize {
        let mut current = inputs.clone();
        let never = CancellationToken::new();
        let Some((pending, fired)) = self.evaluate_layers(&mut current, now_us(), &never) else {
            return 0;
        };
        for (key, value) in pending.numeric_writes() {
            outputs.insert(key.to_string(), value);
        }
        fired
    }

    /// Walk the layers: groups in index order, rules within a group on the
    /// worker pool, outcomes applied in declaration order, each layer's
    /// numeric writes overlaid so the next layer observes them. Returns
    /// `None` when cancelled mid-walk.
    fn evaluate_layers(
        &self,
        current: &mut HashMap<String, f64>,
        now_us: i64,
        cancel: &CancellationToken,
    ) -> Option<(PendingCycle, usize)> {
        let mut pending = PendingCycle::new();
        let mut fired = 0usize;

        for layer_groups in self.plan.groups_by_layer() {
            if cancel.is_cancelled() {
                return None;
            }

            let mut outcomes: Vec<RuleOutcome> = Vec::new();
            for group in layer_groups {
                let ctx = EvalContext {
                    current: &*current,
                    temporal: &self.temporal,
                    exprs: &self.exprs,
                    now_us,
                    throttle: &self.throttle,
                };
                let group_outcomes: Vec<RuleOutcome> = self.workers.install(|| {
                    group
                        .rules
                        .par_iter()
                        .map(|&idx| self.evaluate_rule(idx, &ctx))
                        .collect()
                });
                outcomes.extend(group_outcomes);
            }

            for outcome in outcomes {
                if outcome.fired {
                    fired += 1;
                }
                pending.apply(outcome);
            }

            let overlay: Vec<(String, f64)> = pending
                .numeric_writes()
                .map(|(key, value)| (key.to_string(), value))
                .collect();
            current.extend(overlay);
        }

        Some((pending, fired))
    }

    fn evaluate_rule(&self, idx: usize, ctx: &EvalContext<'_>) -> RuleOutcome {
        let rule = &self.plan.rules[idx];
        if eval::eval_group(&rule.name, &rule.conditions, ctx) {
            trace!(rule = %rule.name, conditions = %rule.rendered, "rule fired");
            actions::run_actions(rule, ctx)
        } else {
            RuleOutcome::default()
        }
    }
}
