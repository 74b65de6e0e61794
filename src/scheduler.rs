// =============================================================================
// Supervised Task Scheduler
// =============================================================================
//
// Every background activity (feed pollers, fusion, side inputs, cache sweep,
// analyzers, decision cycle) is a named periodic task.  Guarantees:
//
//   - A task's job is awaited inline, so two invocations of the same task
//     never overlap.  A slow job simply delays the next tick
//     (`MissedTickBehavior::Delay`).
//   - Failures are recorded, never propagated: the next tick is the retry.
//   - Shutdown is cooperative.  Pending timers are cancelled, a job that is
//     already running is allowed to finish.
//
// Per-task health is kept in a shared registry and served by the health
// endpoint.
// =============================================================================

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Lifecycle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for its initial delay.
    Scheduled,
    Idle,
    Running,
    Stopped,
}

/// Queryable health record of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskHealth {
    pub name: String,
    pub state: TaskState,
    pub interval_ms: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub total_runs: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

impl TaskHealth {
    fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: TaskState::Scheduled,
            interval_ms: interval.as_millis() as u64,
            last_run_at: None,
            last_success_at: None,
            last_duration_ms: None,
            consecutive_failures: 0,
            total_runs: 0,
            total_failures: 0,
            last_error: None,
        }
    }
}

type Registry = Arc<RwLock<BTreeMap<String, TaskHealth>>>;

/// Owns all periodic tasks of the process.
pub struct Scheduler {
    registry: Registry,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            registry: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` every `interval`, first after `initial_delay`.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.spawn_inner(name.into(), interval, initial_delay, None, job);
    }

    /// Like [`spawn_periodic`](Self::spawn_periodic), but `trigger` also
    /// wakes the task for an extra run between ticks.
    pub fn spawn_triggered<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        trigger: Arc<Notify>,
        job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.spawn_inner(name.into(), interval, initial_delay, Some(trigger), job);
    }

    fn spawn_inner<F, Fut>(
        &self,
        name: String,
        interval: Duration,
        initial_delay: Duration,
        trigger: Option<Arc<Notify>>,
        mut job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry
            .write()
            .insert(name.clone(), TaskHealth::new(&name, interval));

        let registry = self.registry.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            if *shutdown.borrow() {
                set_state(&registry, &name, TaskState::Stopped);
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = shutdown.changed() => {
                    set_state(&registry, &name, TaskState::Stopped);
                    return;
                }
            }

            debug!(task = %name, interval_ms = interval.as_millis() as u64, "task started");
            // `interval` panics on a zero period.
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let manual = async {
                    match &trigger {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = manual => {
                        debug!(task = %name, "manual trigger");
                    }
                    _ = shutdown.changed() => break,
                }

                let started = Utc::now();
                set_state(&registry, &name, TaskState::Running);
                let result = job().await;
                record_run(&registry, &name, started, result);
            }

            set_state(&registry, &name, TaskState::Stopped);
            debug!(task = %name, "task stopped");
        });

        self.handles.lock().push(handle);
    }

    /// Snapshot of every task's health, ordered by name.
    pub fn health(&self) -> Vec<TaskHealth> {
        self.registry.read().values().cloned().collect()
    }

    #[cfg(test)]
    pub fn task_health(&self, name: &str) -> Option<TaskHealth> {
        self.registry.read().get(name).cloned()
    }

    /// Cancel pending timers and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        info!(tasks = handles.len(), "scheduler shutting down");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "task panicked during shutdown");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn set_state(registry: &Registry, name: &str, state: TaskState) {
    if let Some(h) = registry.write().get_mut(name) {
        h.state = state;
    }
}

fn record_run(registry: &Registry, name: &str, started: DateTime<Utc>, result: anyhow::Result<()>) {
    let finished = Utc::now();
    let mut map = registry.write();
    let Some(h) = map.get_mut(name) else {
        return;
    };

    h.state = TaskState::Idle;
    h.total_runs += 1;
    h.last_run_at = Some(started);
    h.last_duration_ms = Some((finished - started).num_milliseconds().max(0) as u64);

    match result {
        Ok(()) => {
            h.last_success_at = Some(finished);
            h.consecutive_failures = 0;
        }
        Err(e) => {
            h.total_failures += 1;
            h.consecutive_failures += 1;
            h.last_error = Some(format!("{e:#}"));
            warn!(
                task = %name,
                consecutive_failures = h.consecutive_failures,
                error = %e,
                "task run failed"
            );
        }
    }
}
