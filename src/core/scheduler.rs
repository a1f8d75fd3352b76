//! One tokio task per node, each on its own `interval`.
//!
//! Ticks are best effort: a slow tick delays the next one instead of bursting to
//! catch up. Stopping lets an in-flight tick finish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SimError};
use crate::node::NodeId;
use crate::registry::NodeRegistry;
use crate::tick::{TickOutcome, Ticker};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TickRateSummary {
    pub active_tasks: usize,
    pub total_ticks: u64,
    pub uptime_secs: f64,
    pub ticks_per_second: f64,
    pub min_node_ticks: u64,
    pub max_node_ticks: u64,
}

struct Shared {
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    fatal_tx: watch::Sender<Option<SimError>>,
    total_ticks: AtomicU64,
    started: Mutex<Option<Instant>>,
    spawned: Mutex<HashSet<NodeId>>,
    node_ticks: Mutex<HashMap<NodeId, u64>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    runtime: Mutex<Option<Handle>>,
}

impl Shared {
    fn record_tick(&self, id: NodeId) {
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut books) = self.node_ticks.lock() {
            *books.entry(id).or_insert(0) += 1;
        }
    }

    fn task_ended(&self, id: NodeId) {
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.remove(&id);
        }
    }

    fn fail(&self, err: SimError) {
        error!(error = %err, "invariant violated; stopping scheduler");
        self.fatal_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(err);
                true
            } else {
                false
            }
        });
        self.running.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }
}

fn poisoned() -> SimError {
    SimError::InvariantViolation("scheduler lock poisoned".to_string())
}

pub struct TickScheduler {
    ticker: Ticker,
    registry: Arc<NodeRegistry>,
    shared: Arc<Shared>,
}

impl TickScheduler {
    pub(crate) fn new(ticker: Ticker, registry: Arc<NodeRegistry>) -> Self {
        let (stop_tx, _) = watch::channel(true);
        let (fatal_tx, _) = watch::channel(None);
        Self {
            ticker,
            registry,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                stop_tx,
                fatal_tx,
                total_ticks: AtomicU64::new(0),
                started: Mutex::new(None),
                spawned: Mutex::new(HashSet::new()),
                node_ticks: Mutex::new(HashMap::new()),
                handles: Mutex::new(Vec::new()),
                runtime: Mutex::new(None),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start ticking every registered node. Must be called from inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if let Some(err) = self.fatal() {
            return Err(err);
        }
        let handle = Handle::try_current()
            .map_err(|_| SimError::InvalidConfig("scheduler must start inside a tokio runtime"))?;
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        *self.shared.runtime.lock().map_err(|_| poisoned())? = Some(handle);
        *self.shared.started.lock().map_err(|_| poisoned())? = Some(Instant::now());
        self.shared.stop_tx.send_replace(false);

        let ids: Vec<NodeId> = self.registry.all()?.iter().map(|n| n.id).collect();
        info!(nodes = ids.len(), "scheduler started");
        for id in ids {
            self.spawn(id)?;
        }
        Ok(())
    }

    /// Start ticking `id` if the scheduler is running and the node has no task yet.
    pub fn spawn(&self, id: NodeId) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let node = self.registry.get(id)?;
        if node.state.degraded {
            return Ok(());
        }
        if !self.shared.spawned.lock().map_err(|_| poisoned())?.insert(id) {
            return Ok(());
        }
        let Some(handle) = self.shared.runtime.lock().map_err(|_| poisoned())?.clone() else {
            return Ok(());
        };

        let task = handle.spawn(run_node(
            self.ticker.clone(),
            Arc::clone(&self.shared),
            id,
            node.tick_interval,
            self.shared.stop_tx.subscribe(),
        ));
        self.shared.handles.lock().map_err(|_| poisoned())?.push(task);
        Ok(())
    }

    /// Signal every task to stop and wait for in-flight ticks to finish.
    pub async fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.stop_tx.send_replace(true);

        let handles = match self.shared.handles.lock() {
            Ok(mut h) => std::mem::take(&mut *h),
            Err(_) => Vec::new(),
        };
        for task in handles {
            if let Err(e) = task.await {
                warn!(error = %e, "node task ended abnormally");
            }
        }
        if let Ok(mut spawned) = self.shared.spawned.lock() {
            spawned.clear();
        }
        if was_running {
            info!(ticks = self.shared.total_ticks.load(Ordering::Relaxed), "scheduler stopped");
        }
    }

    /// The first fatal error recorded, if any.
    pub fn fatal(&self) -> Option<SimError> {
        self.shared.fatal_tx.borrow().clone()
    }

    /// Resolves with the first invariant violation any task reports.
    pub async fn wait_fatal(&self) -> SimError {
        let mut rx = self.shared.fatal_tx.subscribe();
        let slot = rx.wait_for(Option::is_some).await.map(|slot| slot.clone());
        match slot {
            Ok(Some(err)) => err,
            Ok(None) => SimError::InvariantViolation("fatal slot emptied".to_string()),
            Err(_) => SimError::InvariantViolation("scheduler dropped".to_string()),
        }
    }

    pub fn tick_rate_summary(&self) -> TickRateSummary {
        let total_ticks = self.shared.total_ticks.load(Ordering::Relaxed);
        let uptime = self
            .shared
            .started
            .lock()
            .ok()
            .and_then(|s| s.map(|t| t.elapsed()))
            .unwrap_or(Duration::ZERO);
        let active_tasks = self.shared.spawned.lock().map(|s| s.len()).unwrap_or(0);
        let (min_node_ticks, max_node_ticks) = self
            .shared
            .node_ticks
            .lock()
            .map(|books| {
                let min = books.values().copied().min().unwrap_or(0);
                let max = books.values().copied().max().unwrap_or(0);
                (min, max)
            })
            .unwrap_or((0, 0));

        let uptime_secs = uptime.as_secs_f64();
        TickRateSummary {
            active_tasks,
            total_ticks,
            uptime_secs,
            ticks_per_second: if uptime_secs > 0.0 {
                total_ticks as f64 / uptime_secs
            } else {
                0.0
            },
            min_node_ticks,
            max_node_ticks,
        }
    }
}

async fn run_node(
    ticker: Ticker,
    shared: Arc<Shared>,
    id: NodeId,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop.borrow_and_update() {
            break;
        }
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
        }

        match ticker.tick(id) {
            Ok(TickOutcome::Ticked(report)) => {
                shared.record_tick(id);
                debug!(id, idx = report.history_idx, "ticked");
            }
            Ok(TickOutcome::Skipped) | Ok(TickOutcome::Degraded(_)) => break,
            Err(e) if e.is_fatal() => {
                shared.fail(e);
                break;
            }
            Err(e) => warn!(id, error = %e, "tick failed"),
        }
    }
    shared.task_ended(id);
}
