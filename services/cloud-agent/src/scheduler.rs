//! Polling loop that keeps instance records in step with the platform.
//!
//! The scheduler:
//! - Periodically fetches every tracked VM and reconciles its record
//! - Drives destroy tasks to completion and records their outcome
//! - Emits status reports for records whose status changed

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vmcloud_connector::{AsyncTask, TaskError, VmSnapshot};
use vmcloud_reconcile::{
    ErrorKind, ImagePool, InstanceRecord, InstanceStatus, InstanceView,
    DEFAULT_RECONCILE_INTERVAL, DEFAULT_TASK_POLL_INTERVAL,
};

use crate::config::Config;
use crate::provider::VmProvider;

/// Scheduler loop configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,

    /// Interval between polls of in-flight tasks.
    pub task_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            task_poll_interval: DEFAULT_TASK_POLL_INTERVAL,
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            reconcile_interval: config.reconcile_interval,
            task_poll_interval: config.task_poll_interval,
        }
    }
}

/// A status change ready to be published.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub instance: InstanceView,
    pub reported_at: DateTime<Utc>,
}

/// Result of fetching one record's VM.
enum Observation {
    Present(VmSnapshot),
    Missing,
    Unavailable,
}

/// Destroy bookkeeping, by instance id.
#[derive(Default)]
struct Destroys {
    /// Tasks in flight.
    in_flight: HashMap<String, Arc<AsyncTask>>,

    /// Destroyed instances whose VM the platform still lists.
    awaiting_removal: HashSet<String>,
}

/// Reconciles the records of one image pool against a VM provider.
///
/// Observations are applied under the destroy lock, so a destroy requested
/// while a fetch is in flight is never overwritten by that fetch.
pub struct Scheduler {
    pool: Arc<ImagePool>,
    provider: Arc<dyn VmProvider>,
    config: SchedulerConfig,
    destroys: Mutex<Destroys>,
}

impl Scheduler {
    pub fn new(
        pool: Arc<ImagePool>,
        provider: Arc<dyn VmProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            config,
            destroys: Mutex::new(Destroys::default()),
        }
    }

    pub fn pool(&self) -> &Arc<ImagePool> {
        &self.pool
    }

    /// Run the scheduler loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            image_id = %self.pool.image_id(),
            reconcile_interval_secs = self.config.reconcile_interval.as_secs(),
            task_poll_interval_ms = self.config.task_poll_interval.as_millis() as u64,
            "Starting scheduler loop"
        );

        let mut reconcile_interval = tokio::time::interval(self.config.reconcile_interval);
        let mut task_interval = tokio::time::interval(self.config.task_poll_interval);

        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    self.reconcile_once().await;
                    self.publish_status_reports().await;
                }
                _ = task_interval.tick() => {
                    self.drive_tasks().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single reconciliation pass over all records.
    ///
    /// Records with a destroy in flight are left to [`Self::drive_tasks`].
    /// Destroyed records are only watched for their VM to disappear.
    pub async fn reconcile_once(&self) {
        debug!(image_id = %self.pool.image_id(), "Starting reconciliation");

        let busy: HashSet<String> = {
            let destroys = self.destroys.lock().await;
            destroys.in_flight.keys().cloned().collect()
        };
        let mut fetches = JoinSet::new();
        for record in self.pool.instances().await {
            if busy.contains(record.instance_id()) {
                continue;
            }
            let provider = Arc::clone(&self.provider);
            fetches.spawn(async move {
                let observation = observe(provider.as_ref(), record.instance_id()).await;
                (record, observation)
            });
        }

        while let Some(joined) = fetches.join_next().await {
            let (record, observation) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Fetch task panicked");
                    continue;
                }
            };
            self.apply(&record, observation).await;
        }
    }

    async fn apply(&self, record: &InstanceRecord, observation: Observation) {
        let instance_id = record.instance_id();
        let mut destroys = self.destroys.lock().await;

        if destroys.in_flight.contains_key(instance_id) {
            debug!(instance_id = %instance_id, "Destroy requested during fetch, skipping");
            return;
        }

        if destroys.awaiting_removal.contains(instance_id) {
            if matches!(observation, Observation::Missing) {
                destroys.awaiting_removal.remove(instance_id);
                self.pool.remove(instance_id).await;
            }
            return;
        }

        match observation {
            Observation::Present(snapshot) => record.reconcile(&snapshot),
            Observation::Missing => {
                if record.status() != InstanceStatus::ScheduledToStart {
                    debug!(instance_id = %instance_id, "Remote VM not found");
                    record.set_status(InstanceStatus::Unknown);
                }
            }
            Observation::Unavailable => {}
        }
    }

    /// Starts destroying an instance.
    ///
    /// A record whose VM no longer exists is dropped right away.
    pub async fn request_destroy(&self, instance_id: &str) -> Result<()> {
        let record = self
            .pool
            .get(instance_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("instance not found: {instance_id}"))?;

        {
            let destroys = self.destroys.lock().await;
            if destroys.in_flight.contains_key(instance_id) {
                debug!(instance_id = %instance_id, "Destroy already in progress");
                return Ok(());
            }
            if destroys.awaiting_removal.contains(instance_id) {
                debug!(instance_id = %instance_id, "Instance already destroyed");
                return Ok(());
            }
        }

        let Some(vm) = self.provider.fetch(instance_id).await? else {
            info!(instance_id = %instance_id, "Remote VM already gone");
            self.pool.remove(instance_id).await;
            return Ok(());
        };

        let mut destroys = self.destroys.lock().await;
        if destroys.in_flight.contains_key(instance_id) {
            return Ok(());
        }
        let task = Arc::new(VmSnapshot::from_remote(vm).delete_instance());
        record.set_status(InstanceStatus::ScheduledToStop);
        info!(instance_id = %instance_id, task = %task.description(), "Destroy scheduled");
        destroys.in_flight.insert(instance_id.to_string(), task);
        Ok(())
    }

    /// Requests cancellation of an in-flight destroy.
    ///
    /// The task stays tracked until the platform reports its real outcome.
    pub async fn cancel_destroy(&self, instance_id: &str) -> bool {
        let task = self.destroys.lock().await.in_flight.get(instance_id).cloned();
        match task {
            Some(task) => {
                task.cancel().await;
                true
            }
            None => false,
        }
    }

    /// Polls every tracked task once and settles the completed ones.
    pub async fn drive_tasks(&self) {
        let tracked: Vec<(String, Arc<AsyncTask>)> = self
            .destroys
            .lock()
            .await
            .in_flight
            .iter()
            .map(|(id, task)| (id.clone(), Arc::clone(task)))
            .collect();

        for (instance_id, task) in tracked {
            let status = task.poll().await;
            let Some(outcome) = status.outcome(task.description()) else {
                continue;
            };

            let vm_gone = outcome.is_ok()
                && matches!(
                    observe(self.provider.as_ref(), &instance_id).await,
                    Observation::Missing
                );

            let mut destroys = self.destroys.lock().await;
            destroys.in_flight.remove(&instance_id);
            let Some(record) = self.pool.get(&instance_id).await else {
                debug!(instance_id = %instance_id, "Task finished for removed instance");
                continue;
            };

            record.record_task_result(ErrorKind::CannotDestroy, &outcome);
            match outcome {
                Ok(()) if vm_gone => {
                    self.pool.remove(&instance_id).await;
                }
                Ok(()) => {
                    info!(instance_id = %instance_id, "Destroyed, waiting for VM to disappear");
                    record.set_status(InstanceStatus::Stopping);
                    destroys.awaiting_removal.insert(instance_id);
                }
                Err(TaskError::Cancelled { .. }) => {
                    info!(instance_id = %instance_id, "Destroy cancelled");
                    record.set_status(InstanceStatus::Stopped);
                }
                Err(e) => {
                    warn!(instance_id = %instance_id, error = %e, "Destroy failed");
                    record.set_status(InstanceStatus::Error);
                }
            }
        }
    }

    /// Status reports for records whose status changed; each change is
    /// reported once.
    pub async fn collect_status_reports(&self) -> Vec<StatusReport> {
        let reported_at = Utc::now();
        self.pool
            .take_status_reports()
            .await
            .into_iter()
            .map(|instance| StatusReport {
                instance,
                reported_at,
            })
            .collect()
    }

    async fn publish_status_reports(&self) {
        for report in self.collect_status_reports().await {
            match serde_json::to_string(&report) {
                Ok(json) => info!(
                    instance_id = %report.instance.instance_id,
                    status = %report.instance.status,
                    report = %json,
                    "Instance status changed"
                ),
                Err(e) => warn!(
                    instance_id = %report.instance.instance_id,
                    error = %e,
                    "Failed to encode status report"
                ),
            }
        }
    }
}

async fn observe(provider: &dyn VmProvider, instance_id: &str) -> Observation {
    match provider.fetch(instance_id).await {
        Ok(Some(vm)) => Observation::Present(VmSnapshot::from_remote(vm)),
        Ok(None) => Observation::Missing,
        Err(e) => {
            warn!(instance_id = %instance_id, error = %e, "Failed to fetch VM, will retry");
            Observation::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.reconcile_interval, Duration::from_secs(10));
        assert_eq!(config.task_poll_interval, Duration::from_millis(500));
    }
}
