use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ProcessingLocks;

/// Background task that periodically evicts expired processing locks.
///
/// Started and stopped explicitly by whoever owns the lock service. Dropping
/// the handle without calling [`LockSweeper::stop`] aborts the task.
pub struct LockSweeper {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LockSweeper {
    /// Spawn onto the current tokio runtime.
    pub fn spawn(locks: Arc<dyn ProcessingLocks>, every: Duration) -> Self {
        let (shutdown, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let evicted = locks.sweep();
                        if evicted > 0 {
                            debug!(evicted, "swept expired processing locks");
                        }
                    }
                }
            }
        });

        info!(interval_ms = every.as_millis() as u64, "processing lock sweeper started");
        Self {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "processing lock sweeper exited abnormally");
            }
        }
        info!("processing lock sweeper stopped");
    }
}

impl Drop for LockSweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
