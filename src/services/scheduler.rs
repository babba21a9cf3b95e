//! Cancellable scheduled tasks
//!
//! Wraps a spawned tokio task so timers can be cancelled deterministically.
//! Dropping a `ScheduledTask` cancels it. Three shapes are supported:
//! - `once` - run a future after a delay
//! - `repeating` - run a future every period (first run after one period)
//! - `chain` - run a future after a delay; the future returns the next delay,
//!   or `None` to end the chain

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `f` once after `delay`
    pub fn once<F, Fut>(name: &'static str, delay: Duration, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(task = name, "scheduled_task_fired");
            f().await;
        });
        Self { name, handle }
    }

    /// Run `f` every `period`, starting one period from now
    pub fn repeating<F, Fut>(name: &'static str, period: Duration, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(task = name, "scheduled_task_fired");
                f().await;
            }
        });
        Self { name, handle }
    }

    /// Self-rescheduling chain: `f` decides the delay before its next run
    pub fn chain<F, Fut>(name: &'static str, initial_delay: Duration, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Duration>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::time::sleep(delay).await;
                trace!(task = name, "scheduled_task_fired");
                match f().await {
                    Some(next) => delay = next,
                    None => break,
                }
            }
        });
        Self { name, handle }
    }

    /// Cancel the task; a run that has not started yet never happens
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            trace!(task = self.name, "scheduled_task_cancelled");
        }
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = ScheduledTask::once("test", Duration::from_secs(5), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = ScheduledTask::once("test", Duration::from_secs(5), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = ScheduledTask::repeating("test", Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        drop(task);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_uses_returned_delays() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _task = ScheduledTask::chain("test", Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Some(Duration::from_secs(10))
                } else {
                    None
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
