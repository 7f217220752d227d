//! Scheduler (§4.6): two independent periodic cycles (validate, heartbeat)
//! owned by the Session Core.
//!
//! Each cycle is a `tokio::spawn`-ed loop driven by `tokio::time::interval`.
//! `stop()` aborts the task and awaits its handle, so a caller observing
//! `stop()` return has the spec's "no late firings" guarantee.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One named periodic cycle. Starting replaces any previous run (stops the
/// old, spawns a new); stopping is idempotent.
struct Cycle {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Cycle {
    fn new(name: &'static str) -> Self {
        Self { name, handle: Mutex::new(None) }
    }

    async fn start<F, Fut>(&self, interval: Duration, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop().await;
        if interval.is_zero() {
            return;
        }

        let name = self.name;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; consume it so the cycle's first
            // real action runs after one full interval, not at t=0.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::debug!(cycle = name, "tick");
                action().await;
            }
        });

        let mut handle = self.handle.lock().await;
        *handle = Some(task);
    }

    async fn stop(&self) {
        let task = self.handle.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    async fn is_running(&self) -> bool {
        self.handle.lock().await.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Owns the validate and heartbeat cycles (§4.1, §4.6).
pub struct Scheduler {
    validate: Arc<Cycle>,
    heartbeat: Arc<Cycle>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { validate: Arc::new(Cycle::new("validate")), heartbeat: Arc::new(Cycle::new("heartbeat")) }
    }

    pub async fn start_validate<F, Fut>(&self, interval: Duration, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.validate.start(interval, action).await;
    }

    pub async fn start_heartbeat<F, Fut>(&self, interval: Duration, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.heartbeat.start(interval, action).await;
    }

    pub async fn stop_validate(&self) {
        self.validate.stop().await;
    }

    pub async fn stop_heartbeat(&self) {
        self.heartbeat.stop().await;
    }

    pub async fn stop_all(&self) {
        self.validate.stop().await;
        self.heartbeat.stop().await;
    }

    pub async fn validate_running(&self) -> bool {
        self.validate.is_running().await
    }

    pub async fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_running().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn start_runs_action_on_each_tick() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        scheduler
            .start_validate(Duration::from_millis(10), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;

        assert!(ticks.load(Ordering::SeqCst) >= 2);
        scheduler.stop_all().await;
    }

    #[tokio::test]
    async fn stop_guarantees_no_late_firings() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        scheduler
            .start_heartbeat(Duration::from_millis(5), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        scheduler.stop_heartbeat().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn zero_interval_does_not_start_a_cycle() {
        let scheduler = Scheduler::new();
        scheduler.start_validate(Duration::from_secs(0), || async {}).await;
        assert!(!scheduler.validate_running().await);
    }

    #[tokio::test]
    async fn restarting_replaces_the_previous_task() {
        let scheduler = Scheduler::new();
        scheduler.start_validate(Duration::from_secs(60), || async {}).await;
        assert!(scheduler.validate_running().await);
        scheduler.start_validate(Duration::from_secs(60), || async {}).await;
        assert!(scheduler.validate_running().await);
        scheduler.stop_all().await;
    }
}
