// src/engine/ticker.rs

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::errors::{CloudbenchError, Result};

/// Handle to a loop started with [`spawn_periodic`].
///
/// Dropping the handle stops the loop as well.
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<Result<()>>,
}

impl LoopHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to stop. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit on its own, e.g. after its failure budget
    /// ran out.
    pub async fn join(self) -> Result<()> {
        let LoopHandle { join, stop_tx, .. } = self;
        let result = join.await.map_err(|e| CloudbenchError::Other(e.into()));
        drop(stop_tx);
        result?
    }

    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}

/// Run `cycle` every `period` on the tokio runtime.
///
/// Ticks are single-flight: a tick that arrives while the previous cycle
/// is still running is skipped, not queued. When `failure_budget` is set,
/// the loop exits with the last error after that many consecutive failed
/// cycles; otherwise failures are logged and the loop keeps going.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    failure_budget: Option<u32>,
    cycle: F,
) -> LoopHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let running = Arc::new(AtomicBool::new(false));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<()>>();
        let mut failures = 0u32;

        info!(loop_name = name, ?period, "periodic loop started");

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    info!(loop_name = name, "periodic loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if running.swap(true, Ordering::AcqRel) {
                        debug!(loop_name = name, "previous cycle still running, skipping tick");
                        continue;
                    }
                    let fut = cycle();
                    let running = Arc::clone(&running);
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        let result = fut.await;
                        running.store(false, Ordering::Release);
                        let _ = done_tx.send(result);
                    });
                }
                Some(result) = done_rx.recv() => {
                    match result {
                        Ok(()) => failures = 0,
                        Err(err) => {
                            failures += 1;
                            warn!(loop_name = name, failures, error = %err, "cycle failed");
                            if failure_budget.is_some_and(|budget| failures >= budget) {
                                error!(loop_name = name, failures, "failure budget exhausted, stopping loop");
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
    });

    LoopHandle {
        name,
        stop_tx,
        join,
    }
}
