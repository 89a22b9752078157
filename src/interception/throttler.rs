// src/interception/throttler.rs
//! Trailing-edge throttle for pattern rebuilds
//!
//! Triggers arriving within the quiescence window collapse into a single run
//! once the window has elapsed after the last trigger. Runs never overlap:
//! triggers that arrive while a run is in flight schedule one more run after
//! it.
//!
//! ```text
//! triggers:  x  x   x                 x
//! window:    |--|---|-----|           |-----|
//! runs:                   [run]             [run]
//! ```

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Job run by the throttler. Returning `false` stops the worker.
pub type ThrottledJob = Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Debounced single-flight runner
pub struct Throttler {
    trigger: mpsc::UnboundedSender<()>,
    runs: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl Throttler {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn new(window: Duration, job: ThrottledJob) -> Self {
        let (trigger, mut rx) = mpsc::unbounded_channel::<()>();
        let runs = Arc::new(AtomicU64::new(0));
        let worker_runs = Arc::clone(&runs);

        let worker = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // wait for the window to pass without new triggers
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(window) => break,
                        next = rx.recv() => {
                            if next.is_none() {
                                return;
                            }
                        }
                    }
                }

                debug!("Running throttled job");
                let keep_going = job().await;
                worker_runs.fetch_add(1, Ordering::SeqCst);
                if !keep_going {
                    break;
                }
            }
        });

        Self {
            trigger,
            runs,
            worker,
        }
    }

    /// Request a run
    pub fn schedule(&self) {
        let _ = self.trigger.send(());
    }

    /// Number of completed runs
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(counter: Arc<AtomicUsize>) -> ThrottledJob {
        Box::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = Throttler::new(Duration::from_millis(50), counting_job(counter.clone()));

        for _ in 0..5 {
            throttler.schedule();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(throttler.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_edge_waits_for_quiet_window() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = Throttler::new(Duration::from_millis(50), counting_job(counter.clone()));

        throttler.schedule();
        tokio::time::sleep(Duration::from_millis(40)).await;
        throttler.schedule();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // 80ms after the first trigger but only 40ms after the last
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_run_separately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = Throttler::new(Duration::from_millis(50), counting_job(counter.clone()));

        throttler.schedule();
        tokio::time::sleep(Duration::from_millis(200)).await;
        throttler.schedule();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));
        let job: ThrottledJob = {
            let active = Arc::clone(&active);
            let overlapped = Arc::clone(&overlapped);
            Box::new(move || {
                let active = Arc::clone(&active);
                let overlapped = Arc::clone(&overlapped);
                async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    true
                }
                .boxed()
            })
        };
        let throttler = Throttler::new(Duration::from_millis(50), job);

        throttler.schedule();
        tokio::time::sleep(Duration::from_millis(70)).await;
        // the first run is in flight now
        throttler.schedule();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        assert_eq!(throttler.runs(), 2);
    }
}
