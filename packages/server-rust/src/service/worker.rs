//! Background worker for periodic and on-demand housekeeping.
//!
//! A `BackgroundWorker<R>` owns one tokio task that feeds requests from an
//! mpsc channel to a `BackgroundRunnable` and calls its tick hook at a fixed
//! interval until stopped.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

const TASK_QUEUE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Handler driven by a `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// On-demand request type.
    type Task: Send + 'static;

    /// Handle one submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on every tick. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once after the loop exits. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running background task.
///
/// Ticks that fall behind are delayed rather than bunched, so a slow sweep
/// never triggers a burst of catch-up sweeps.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop. The first tick fires one interval after start.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_QUEUE_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + tick_interval,
                tick_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(t) => runnable.run(t).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task for the worker.
    ///
    /// # Errors
    ///
    /// Fails once the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop and waits for the runnable's shutdown hook.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        runs: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    struct CountingRunnable(Counters);

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = u32;

        async fn run(&mut self, _task: u32) {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.0.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_submit_and_stop() {
        let counters = Counters::default();
        let mut worker =
            BackgroundWorker::start(CountingRunnable(counters.clone()), Duration::from_secs(60));

        for task in 0..3 {
            worker.submit(task).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);
        assert!(worker.is_running());

        worker.stop().await;
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_interval() {
        let counters = Counters::default();
        let mut worker =
            BackgroundWorker::start(CountingRunnable(counters.clone()), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counters.ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(95)).await;
        worker.stop().await;
        assert_eq!(counters.ticks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let mut worker = BackgroundWorker::start(
            CountingRunnable(Counters::default()),
            Duration::from_secs(60),
        );
        worker.stop().await;
        assert!(worker.submit(7).await.is_err());
    }
}
