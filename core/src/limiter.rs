//! Admission control for outbound work.
//!
//! A [`RateLimiter`] admits scheduled tasks in submission order, keeps at most
//! `max_concurrent` of them running and spaces consecutive dispatches by at
//! least `min_delay`. It knows nothing about what the tasks do; the crawler
//! uses it for page fetches and the index build uses it to pace store reads.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    pub max_concurrent: usize,
    pub min_delay: Duration,
}

impl LimiterConfig {
    /// Four page fetches in flight, 500ms between dispatches.
    pub const fn crawler() -> Self {
        Self { max_concurrent: 4, min_delay: Duration::from_millis(500) }
    }

    /// One row read at a time, 1s between reads.
    pub const fn store_scan() -> Self {
        Self { max_concurrent: 1, min_delay: Duration::from_millis(1000) }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self { Self::crawler() }
}

type Waiter = oneshot::Sender<OwnedSemaphorePermit>;

/// Cheap to clone; clones share the same slots and dispatch clock.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    config: LimiterConfig,
    slots: Arc<Semaphore>,
    waiters: mpsc::UnboundedSender<Waiter>,
    // taken and spawned by the first `schedule` call
    dispatcher: Mutex<Option<Dispatcher>>,
}

/// Hands out slots to waiters strictly in the order they were queued.
/// Ends once every `RateLimiter` clone is gone.
struct Dispatcher {
    waiters: mpsc::UnboundedReceiver<Waiter>,
    slots: Arc<Semaphore>,
    min_delay: Duration,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut last_dispatch: Option<Instant> = None;
        while let Some(waiter) = self.waiters.recv().await {
            if waiter.is_closed() {
                continue;
            }
            if let Some(at) = last_dispatch {
                sleep_until(at + self.min_delay).await;
            }
            let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
                break;
            };
            if waiter.is_closed() {
                continue;
            }
            last_dispatch = Some(Instant::now());
            // a receiver dropped in between hands the permit straight back
            let _ = waiter.send(permit);
        }
    }
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let (waiters, queue) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher { waiters: queue, slots: Arc::clone(&slots), min_delay: config.min_delay };
        Self {
            inner: Arc::new(Inner { config, slots, waiters, dispatcher: Mutex::new(Some(dispatcher)) }),
        }
    }

    pub fn config(&self) -> LimiterConfig { self.inner.config }

    /// Number of slots currently held: tasks that were admitted and have not
    /// finished, including ones admitted but not yet polled by their caller.
    /// Tasks still waiting out `min_delay` are not counted.
    pub fn in_flight(&self) -> usize {
        self.inner.config.max_concurrent.max(1) - self.inner.slots.available_permits()
    }

    /// Queue `task` and return a future resolving to its output.
    ///
    /// The queue position is taken when `schedule` is called, and admission
    /// runs on a background dispatcher, so a task is admitted as soon as a
    /// slot frees up whether or not its future is being polled yet. A
    /// task's output (including an `Err`) only reaches its own future;
    /// dropping the future before admission gives its turn to the next task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F, Fut, T>(&self, task: F) -> impl Future<Output = T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            tokio::spawn(dispatcher.run());
        }
        let (waiter, admitted) = oneshot::channel();
        if self.inner.waiters.send(waiter).is_err() {
            tracing::warn!("rate limiter dispatcher is gone; running task unthrottled");
        }
        async move {
            let permit = admitted.await.ok();
            let out = task().await;
            drop(permit);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(max_concurrent: usize, delay_ms: u64) -> RateLimiter {
        RateLimiter::new(LimiterConfig { max_concurrent, min_delay: Duration::from_millis(delay_ms) })
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_are_spaced_by_min_delay() {
        let limiter = limiter(4, 500);
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| tokio::spawn(limiter.schedule(move || async move { start.elapsed() })))
            .collect();

        let mut started = Vec::new();
        for h in handles {
            started.push(h.await.unwrap());
        }
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500), "{:?}", started);
        }
        assert_eq!(started[0], Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_ceiling() {
        let limiter = limiter(2, 0);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(limiter.schedule(move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_in_submission_order() {
        let limiter = limiter(1, 10);
        let order = Arc::new(Mutex::new(Vec::new()));
        let futures: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                limiter.schedule(move || async move { order.lock().push(i) })
            })
            .collect();

        // poll in reverse; admission must still follow the schedule() calls
        let handles: Vec<_> = futures.into_iter().rev().map(tokio::spawn).collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_does_not_affect_siblings() {
        let limiter = limiter(1, 0);
        let bad = limiter.schedule(|| async { Err::<u32, &str>("boom") });
        let good = limiter.schedule(|| async { Ok::<u32, &str>(7) });
        assert_eq!(bad.await, Err("boom"));
        assert_eq!(good.await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_ticket_passes_its_turn() {
        let limiter = limiter(1, 0);
        let abandoned = limiter.schedule(|| async { 1 });
        let kept = limiter.schedule(|| async { 2 });
        drop(abandoned);
        assert_eq!(kept.await, 2);
        assert_eq!(limiter.schedule(|| async { 3 }).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn later_task_runs_while_earlier_future_is_idle() {
        let limiter = limiter(4, 0);
        let first = limiter.schedule(|| async { 1 });
        let second = limiter.schedule(|| async { 2 });

        let out = tokio::time::timeout(Duration::from_secs(60), second).await;
        assert_eq!(out, Ok(2));
        assert_eq!(first.await, 1);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_out_the_delay_is_not_in_flight() {
        let limiter = limiter(2, 500);
        assert_eq!(limiter.schedule(|| async { 1 }).await, 1);
        let second = tokio::spawn(limiter.schedule(|| async { 2 }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(second.await.unwrap(), 2);
        assert_eq!(limiter.in_flight(), 0);
    }
}
