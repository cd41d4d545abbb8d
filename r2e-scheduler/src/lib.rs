//! Periodic background task runner.
//!
//! Drives the hub's own periodic work: cache maintenance/warming
//! and model republishing. Each registered task runs on
//! its own `tokio::spawn`ed loop with an optional initial delay, then ticks
//! on a fixed interval until the shared `CancellationToken` fires.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A periodic unit of work. Boxed so [`Scheduler::register`] can take any
/// async closure.
pub type TaskFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// How often a registered task runs.
#[derive(Debug, Clone, Copy)]
pub enum ScheduleConfig {
    /// Fire immediately, then every `Duration`.
    Interval(Duration),
    /// Wait `initial_delay`, then fire every `interval`.
    IntervalWithDelay {
        interval: Duration,
        initial_delay: Duration,
    },
}

impl ScheduleConfig {
    fn parts(&self) -> (Duration, Duration) {
        match self {
            ScheduleConfig::Interval(d) => (*d, Duration::ZERO),
            ScheduleConfig::IntervalWithDelay { interval, initial_delay } => (*interval, *initial_delay),
        }
    }

    fn describe(&self) -> String {
        match self {
            ScheduleConfig::Interval(d) => format!("every {}s", d.as_secs()),
            ScheduleConfig::IntervalWithDelay { interval, initial_delay } => {
                format!("every {}s (delay {}s)", interval.as_secs(), initial_delay.as_secs())
            }
        }
    }
}

/// Metadata about a registered job, queryable at runtime (e.g. for an
/// operator status endpoint).
#[derive(Clone, Debug)]
pub struct ScheduledJobInfo {
    pub name: String,
    pub schedule: String,
}

/// Runs registered periodic tasks until cancelled. One instance per process;
/// the `r2e` app crate owns it and registers cache maintenance/warming and
/// model-republish jobs against it during bootstrap.
pub struct Scheduler {
    cancel: CancellationToken,
    jobs: Mutex<Vec<ScheduledJobInfo>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            jobs: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The cancellation token every registered task loop selects against.
    /// Exposed so a caller can check `is_cancelled()` without holding a
    /// reference to the whole scheduler.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register and immediately start a periodic task.
    pub fn register(&self, name: impl Into<String>, schedule: ScheduleConfig, task: TaskFn) {
        let name = name.into();
        self.jobs.lock().expect("lock poisoned").push(ScheduledJobInfo {
            name: name.clone(),
            schedule: schedule.describe(),
        });

        let (interval, initial_delay) = schedule.parts();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(initial_delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        task().await;
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!(job = %name, "scheduled task stopping");
                        return;
                    }
                }
            }
        });
        self.handles.lock().expect("lock poisoned").push(handle);
    }

    /// Metadata for every registered job.
    pub fn jobs(&self) -> Vec<ScheduledJobInfo> {
        self.jobs.lock().expect("lock poisoned").clone()
    }

    /// Cancel every running task. Loops observe this cooperatively at their
    /// next tick or select point; in-flight task invocations are not
    /// interrupted mid-body.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for every task loop to exit.
    pub async fn shutdown(&self) {
        self.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.handles.lock().expect("lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
    }
}
