//! Per-pipeline tick loop.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{executor, PipelineRuntime};
use crate::errors::{Result, StreamflowError};

/// One-shot stop request shared between a scheduler task and its owner.
///
/// Only the first reason is kept.
#[derive(Debug, Default)]
pub struct StopSignal {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl StopSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
            self.notify.notify_waiters();
        }
    }

    /// Returns whether a stop was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The reason given to the first `cancel`.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once a stop is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A running tick loop.
///
/// Cancelling lets the current tick finish; in-flight items are never
/// preempted. A loop spawned after a cancelled one waits for that one to
/// exit before its first tick, so ticks of one pipeline never overlap.
#[derive(Debug)]
pub struct SchedulerHandle {
    signal: Arc<StopSignal>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Spawns the tick loop for `runtime`.
    ///
    /// `previous` is cancelled, and the new loop starts ticking only once it
    /// has exited.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when called outside a Tokio runtime.
    pub fn spawn(runtime: &Arc<PipelineRuntime>, previous: Option<Self>) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StreamflowError::Config("starting a pipeline requires a Tokio runtime".to_string())
        })?;
        let previous = previous.map(|prev| {
            prev.cancel("restarted");
            prev.task
        });
        let signal = Arc::new(StopSignal::new());
        let task = handle.spawn(run(
            Arc::downgrade(runtime),
            Arc::clone(&signal),
            runtime.config().tick_interval(),
            previous,
        ));
        Ok(Self { signal, task })
    }

    /// Requests the loop to stop after its current tick.
    pub fn cancel(&self, reason: &str) {
        self.signal.cancel(reason);
    }

    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run(
    runtime: Weak<PipelineRuntime>,
    signal: Arc<StopSignal>,
    period: std::time::Duration,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        tokio::select! {
            biased;
            () = signal.cancelled() => {
                tracing::debug!(reason = ?signal.reason(), "Scheduler cancelled before first tick");
                return;
            }
            _ = previous => {}
        }
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = signal.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(runtime) = runtime.upgrade() else {
            break;
        };
        if signal.is_cancelled() || !runtime.status().is_running() {
            break;
        }
        executor::run_tick(&runtime).await;
    }

    tracing::debug!(reason = ?signal.reason(), "Scheduler loop exited");
}
