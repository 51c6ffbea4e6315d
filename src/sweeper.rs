//! Periodic eviction of idle sessions.

use crate::pool::SessionPool;
use crate::renderer::Renderer;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Evicts sessions idle for at least `max_idle`, every `period`.
#[derive(Debug, Clone, Copy)]
pub struct EvictionSweeper {
    period: Duration,
    max_idle: Duration,
}

impl EvictionSweeper {
    pub fn new(period: Duration, max_idle: Duration) -> Self {
        Self { period, max_idle }
    }

    /// Run one sweep over `pool`.
    pub async fn sweep<R: Renderer>(&self, pool: &SessionPool<R>) -> usize {
        let evicted = pool.evict_idle(self.max_idle).await;
        if evicted == 0 {
            debug!("sweep found nothing to evict ({:?})", pool.stats());
        }
        evicted
    }

    /// Start sweeping `pool` on a background task.
    ///
    /// The first sweep happens one period after spawning. Must be called from
    /// within a tokio runtime.
    pub fn spawn<R: Renderer>(self, pool: SessionPool<R>) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "eviction sweeper started (every {:?}, idle threshold {:?})",
                self.period, self.max_idle
            );
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        self.sweep(&pool).await;
                    }
                }
            }
            info!("eviction sweeper stopped");
        });
        SweeperHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Handle to a running sweeper task. Dropping it also stops the task.
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
