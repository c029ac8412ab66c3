//! Named, unique background jobs
//!
//! Each job runs on its own tokio task, so runs of one job never overlap.
//! Enqueueing a name that is already scheduled aborts the old task first.

use crate::network_monitor::ConnectivityCheck;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const MEASUREMENT_JOB: &str = "network_test";
pub const SYNC_JOB: &str = "data_sync";

/// First retry delay; doubles on every further retry
pub const BASE_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed-rate runs, the first one immediately
    Periodic { interval: Duration },
    /// One run after `delay`, re-armed after each run
    ExactAlarm { delay: Duration },
}

impl Trigger {
    fn period(&self) -> Duration {
        match self {
            Trigger::Periodic { interval } => *interval,
            Trigger::ExactAlarm { delay } => *delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Retry,
}

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> JobOutcome;
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    connectivity: Arc<dyn ConnectivityCheck>,
    base_backoff: Duration,
}

impl Scheduler {
    pub fn new(connectivity: Arc<dyn ConnectivityCheck>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            connectivity,
            base_backoff: BASE_BACKOFF,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Schedule `job` under `name`, replacing any job already using the name
    pub fn enqueue_unique(
        &self,
        name: &str,
        trigger: Trigger,
        require_network: bool,
        job: Arc<dyn Job>,
    ) {
        let constraint = require_network.then(|| Arc::clone(&self.connectivity));
        let runner = JobRunner {
            name: name.to_string(),
            job,
            constraint,
            base_backoff: self.base_backoff,
            cap: trigger.period().max(self.base_backoff),
        };

        let mut jobs = self.jobs();
        if let Some(previous) = jobs.remove(name) {
            previous.abort();
            info!("Replaced schedule for job '{name}'");
        }
        info!("Scheduled job '{name}': {trigger:?}, network required: {require_network}");
        jobs.insert(name.to_string(), tokio::spawn(runner.drive(trigger)));
    }

    pub fn cancel(&self, name: &str) -> bool {
        match self.jobs().remove(name) {
            Some(handle) => {
                handle.abort();
                info!("Cancelled job '{name}'");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs()
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn shutdown(&self) {
        for (name, handle) in self.jobs().drain() {
            debug!("Stopping job '{name}'");
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct JobRunner {
    name: String,
    job: Arc<dyn Job>,
    constraint: Option<Arc<dyn ConnectivityCheck>>,
    base_backoff: Duration,
    /// Longest backoff and longest wait for the constraint
    cap: Duration,
}

impl JobRunner {
    async fn drive(self, trigger: Trigger) {
        match trigger {
            Trigger::Periodic { interval } => {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    self.run_with_retry().await;
                }
            }
            Trigger::ExactAlarm { delay } => loop {
                tokio::time::sleep(delay).await;
                self.run_with_retry().await;
                debug!("Job '{}' re-armed for {:?}", self.name, delay);
            },
        }
    }

    async fn run_with_retry(&self) {
        let started = Instant::now();
        let mut backoff = self.base_backoff;

        loop {
            if let Some(constraint) = &self.constraint {
                if !constraint.is_connected().await {
                    if started.elapsed() + self.base_backoff > self.cap {
                        warn!("Job '{}' skipped: no network", self.name);
                        return;
                    }
                    debug!("Job '{}' waiting for network", self.name);
                    tokio::time::sleep(self.base_backoff).await;
                    continue;
                }
            }

            debug!("Running job '{}'", self.name);
            match self.job.run().await {
                JobOutcome::Success => return,
                JobOutcome::Retry => {
                    if started.elapsed() + backoff > self.cap {
                        warn!("Job '{}' failed; giving up until next trigger", self.name);
                        return;
                    }
                    warn!("Job '{}' failed; retrying in {:?}", self.name, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.cap);
                }
            }
        }
    }
}
