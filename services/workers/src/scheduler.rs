//! Singleton task scheduler.
//!
//! Each registered task runs on its own fixed tick. On every tick the
//! scheduler asks the leadership oracle whether this instance should act;
//! only the current fleet leader executes the task body. Guards:
//!
//! - **Overlap**: a tick arriving while the previous run is still in
//!   flight is skipped and logged, never queued
//! - **Errors**: a failing or panicking task body is caught at the tick
//!   boundary and the next tick proceeds normally
//! - **Shutdown**: no new tick starts after the signal; an in-flight run
//!   is allowed to complete

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cover_fleet::LeadershipOracle;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Boxed task body: a zero-argument, side-effecting unit of work.
type TaskFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Execution state of one registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No run in flight; the next tick may execute.
    Idle,

    /// A run is in flight; ticks are skipped until it completes.
    Running,

    /// Shutdown observed; no further ticks.
    Stopped,
}

/// Shared state handle for one task's `Idle -> Running -> Idle` machine.
#[derive(Clone)]
struct TaskSlot {
    state: Arc<Mutex<TaskState>>,
}

impl TaskSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TaskState::Idle)),
        }
    }

    fn state(&self) -> TaskState {
        *self.state.lock().expect("task state lock poisoned")
    }

    fn begin(&self) {
        *self.state.lock().expect("task state lock poisoned") = TaskState::Running;
    }

    /// Completion transition. A stopped task stays stopped.
    fn finish(&self) {
        let mut state = self.state.lock().expect("task state lock poisoned");
        if *state == TaskState::Running {
            *state = TaskState::Idle;
        }
    }

    fn stop(&self) {
        *self.state.lock().expect("task state lock poisoned") = TaskState::Stopped;
    }
}

struct ScheduledTask {
    name: String,
    interval: Duration,
    run: TaskFn,
}

/// Timer-driven scheduler for leader-gated singleton tasks.
///
/// Tasks are registered once at process start. Leadership is re-derived
/// from the oracle on every tick, so a task migrates between instances
/// as the fleet scales without any handover protocol.
pub struct SingletonScheduler {
    oracle: Arc<LeadershipOracle>,
    tasks: Vec<ScheduledTask>,
}

impl SingletonScheduler {
    /// Create a scheduler with no registered tasks.
    pub fn new(oracle: Arc<LeadershipOracle>) -> Self {
        Self {
            oracle,
            tasks: Vec::new(),
        }
    }

    /// Register a named task with a fixed tick interval.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let run: TaskFn = Arc::new(move || Box::pin(task()));
        self.tasks.push(ScheduledTask {
            name: name.into(),
            interval,
            run,
        });
    }

    /// Run all registered task loops until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self { oracle, tasks } = self;
        info!(task_count = tasks.len(), "Starting singleton scheduler");

        let mut handles = Vec::new();
        for task in tasks {
            let oracle = Arc::clone(&oracle);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(run_task_loop(task, oracle, shutdown)));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Task loop panicked");
            }
        }
    }
}

async fn run_task_loop(
    task: ScheduledTask,
    oracle: Arc<LeadershipOracle>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        task = %task.name,
        interval_ms = task.interval.as_millis() as u64,
        "Starting task loop"
    );

    let slot = TaskSlot::new();
    let mut interval = tokio::time::interval(task.interval);
    // A slow run must not produce a burst of catch-up ticks; missed
    // ticks are lost.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick(&task, &oracle, &slot).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    slot.stop();
                    info!(task = %task.name, "Task loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle one tick for one task.
async fn tick(task: &ScheduledTask, oracle: &Arc<LeadershipOracle>, slot: &TaskSlot) {
    match slot.state() {
        TaskState::Running => {
            warn!(task = %task.name, "Previous run still in flight; skipping tick");
            return;
        }
        TaskState::Stopped => return,
        TaskState::Idle => {}
    }

    // Leadership is consulted fresh on every tick. Not being leader is
    // the common case on all but one instance and is not an error.
    if !oracle.is_leader().await {
        debug!(task = %task.name, "Not the leader; skipping tick");
        return;
    }

    slot.begin();

    let name = task.name.clone();
    let run = Arc::clone(&task.run);
    let slot = slot.clone();
    tokio::spawn(async move {
        debug!(task = %name, "Task run starting");
        match tokio::spawn(run()).await {
            Ok(Ok(())) => debug!(task = %name, "Task run complete"),
            Ok(Err(e)) => error!(task = %name, error = %e, "Task run failed"),
            Err(e) => error!(task = %name, error = %e, "Task run panicked"),
        }
        slot.finish();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cover_fleet::{InstanceIdentity, StaticRegistry};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn identity(instance_id: &str) -> InstanceIdentity {
        InstanceIdentity {
            subscription_id: "sub-1".to_string(),
            resource_group: "cover-rg".to_string(),
            site_name: "cover-app".to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    fn leader_oracle() -> Arc<LeadershipOracle> {
        let registry = Arc::new(StaticRegistry::with_instances(&["i-1", "i-2"]));
        Arc::new(LeadershipOracle::new(Some(identity("i-1")), registry))
    }

    fn follower_oracle() -> Arc<LeadershipOracle> {
        let registry = Arc::new(StaticRegistry::with_instances(&["i-1", "i-2"]));
        Arc::new(LeadershipOracle::new(Some(identity("i-2")), registry))
    }

    #[tokio::test]
    async fn test_leader_runs_task_on_each_tick() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut scheduler = SingletonScheduler::new(leader_oracle());
        scheduler.register("counting", Duration::from_millis(20), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(110)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // First tick fires immediately, then every 20ms.
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_follower_never_runs_task() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut scheduler = SingletonScheduler::new(follower_oracle());
        scheduler.register("counting", Duration::from_millis(20), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_run_skips_overlapping_ticks() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut scheduler = SingletonScheduler::new(leader_oracle());
        scheduler.register("slow", Duration::from_millis(20), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Spans several ticks; those ticks must be skipped,
                    // not queued.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Only the first run started; every tick during it was skipped.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_task_keeps_ticking() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut scheduler = SingletonScheduler::new(leader_oracle());
        scheduler.register("failing", Duration::from_millis(20), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("report generation exploded")
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(110)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // A failed run leaves the task Idle, so later ticks still fire.
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_panicking_task_keeps_ticking() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut scheduler = SingletonScheduler::new(leader_oracle());
        scheduler.register("panicking", Duration::from_millis(20), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    panic!("task body panicked");
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(110)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_ticks() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut scheduler = SingletonScheduler::new(leader_oracle());
        scheduler.register("counting", Duration::from_millis(20), {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Let any run spawned just before the signal finish.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_shutdown = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn test_task_slot_transitions() {
        let slot = TaskSlot::new();
        assert_eq!(slot.state(), TaskState::Idle);

        slot.begin();
        assert_eq!(slot.state(), TaskState::Running);

        slot.finish();
        assert_eq!(slot.state(), TaskState::Idle);

        // A completion arriving after shutdown must not resurrect the task.
        slot.begin();
        slot.stop();
        slot.finish();
        assert_eq!(slot.state(), TaskState::Stopped);
    }
}
