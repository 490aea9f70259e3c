//! In-memory stand-ins for platform objects.
//!
//! Used by tests and by the reference agent when no real SDK is wired in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::remote::{
    PowerState, RemoteTask, RemoteTaskInfo, RemoteTaskState, RemoteVm, VmConfig, VmRuntime,
};

// =============================================================================
// MockTask
// =============================================================================

/// Scripted platform task.
///
/// Reports `Running` for a number of polls, then a terminal state.
pub struct MockTask {
    remaining: AtomicUsize,
    terminal: RemoteTaskState,
    cancelled: AtomicBool,
    cancel_count: AtomicUsize,

    /// Set when the task reaches `Success`.
    done: Arc<AtomicBool>,
}

impl MockTask {
    /// A task that succeeds after `polls` running polls.
    pub fn succeeding_after(polls: usize) -> Self {
        Self::scripted(polls, RemoteTaskState::Success)
    }

    /// A task that fails with `message` after `polls` running polls.
    pub fn failing_after(polls: usize, message: &str) -> Self {
        Self::scripted(polls, RemoteTaskState::Error(message.to_string()))
    }

    fn scripted(polls: usize, terminal: RemoteTaskState) -> Self {
        Self {
            remaining: AtomicUsize::new(polls),
            terminal,
            cancelled: AtomicBool::new(false),
            cancel_count: AtomicUsize::new(0),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with whoever needs to observe success.
    fn with_done_flag(mut self, done: Arc<AtomicBool>) -> Self {
        self.done = done;
        self
    }

    /// Number of cancel requests received.
    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTask for MockTask {
    async fn info(&self) -> Result<RemoteTaskInfo, ConnectorError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(RemoteTaskInfo {
                state: RemoteTaskState::Error("cancelled".to_string()),
                progress: None,
            });
        }

        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining.store(remaining - 1, Ordering::SeqCst);
            return Ok(RemoteTaskInfo {
                state: RemoteTaskState::Running,
                progress: Some(50),
            });
        }

        if self.terminal == RemoteTaskState::Success {
            self.done.store(true, Ordering::SeqCst);
        }
        Ok(RemoteTaskInfo {
            state: self.terminal.clone(),
            progress: Some(100),
        })
    }

    /// Accepted only while the task still has running polls left.
    async fn cancel(&self) -> Result<(), ConnectorError> {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        if self.remaining.load(Ordering::SeqCst) == 0 {
            return Err(ConnectorError::Rejected("task already finishing".to_string()));
        }
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// MockVm
// =============================================================================

/// How a mock VM answers destroy requests.
#[derive(Debug, Clone)]
pub enum DestroyBehavior {
    /// Accept and succeed after the given number of running polls.
    Succeed { polls: usize },
    /// Accept and fail remotely with a message.
    Fail { message: String },
    /// Refuse the submission.
    Reject { message: String },
}

#[derive(Debug, Clone)]
struct MockVmState {
    config_error: Option<ConnectorError>,
    extra_config_error: Option<ConnectorError>,
    configured: bool,
    properties: HashMap<String, String>,
    template: bool,
    change_version: Option<String>,
    runtime: Option<VmRuntime>,
    ip_address: Option<String>,
    datacenter: Result<Option<String>, ConnectorError>,
    destroy: DestroyBehavior,
}

/// In-memory VM implementing [`RemoteVm`].
pub struct MockVm {
    id: String,
    name: String,
    state: Mutex<MockVmState>,
    datacenter_lookups: AtomicUsize,
    destroy_submissions: AtomicUsize,
    submit_delay: Duration,
    destroyed: Arc<AtomicBool>,
}

impl MockVm {
    /// A configured, powered-off VM.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state: Mutex::new(MockVmState {
                config_error: None,
                extra_config_error: None,
                configured: true,
                properties: HashMap::new(),
                template: false,
                change_version: Some("1".to_string()),
                runtime: Some(VmRuntime {
                    power_state: PowerState::Off,
                    boot_time: None,
                }),
                ip_address: None,
                datacenter: Ok(Some("datacenter-1".to_string())),
                destroy: DestroyBehavior::Succeed { polls: 0 },
            }),
            datacenter_lookups: AtomicUsize::new(0),
            destroy_submissions: AtomicUsize::new(0),
            submit_delay: Duration::ZERO,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A VM whose configuration has not been populated yet (still cloning).
    pub fn cloning(id: &str, name: &str) -> Self {
        let vm = Self::new(id, name);
        vm.update(|s| {
            s.configured = false;
            s.runtime = None;
        });
        vm
    }

    pub fn with_property(self, key: &str, value: &str) -> Self {
        self.update(|s| {
            s.properties.insert(key.to_string(), value.to_string());
        });
        self
    }

    pub fn with_template(self, template: bool) -> Self {
        self.update(|s| s.template = template);
        self
    }

    pub fn with_config_error(self, error: ConnectorError) -> Self {
        self.update(|s| s.config_error = Some(error));
        self
    }

    pub fn with_extra_config_error(self, error: ConnectorError) -> Self {
        self.update(|s| s.extra_config_error = Some(error));
        self
    }

    pub fn with_runtime(self, runtime: Option<VmRuntime>) -> Self {
        self.update(|s| s.runtime = runtime);
        self
    }

    pub fn with_datacenter(self, datacenter: Result<Option<String>, ConnectorError>) -> Self {
        self.update(|s| s.datacenter = datacenter);
        self
    }

    pub fn with_destroy(self, behavior: DestroyBehavior) -> Self {
        self.update(|s| s.destroy = behavior);
        self
    }

    /// Delays every destroy submission, to widen race windows in tests.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    /// Powers the VM on with the given boot time and guest address.
    pub fn power_on(&self, boot_time: DateTime<Utc>, ip_address: Option<&str>) {
        info!(vm = %self.name, "[MOCK] Powering on VM");
        self.update(|s| {
            s.runtime = Some(VmRuntime {
                power_state: PowerState::On,
                boot_time: Some(boot_time),
            });
            s.ip_address = ip_address.map(str::to_string);
        });
    }

    pub fn power_off(&self) {
        info!(vm = %self.name, "[MOCK] Powering off VM");
        self.update(|s| {
            if let Some(runtime) = s.runtime.as_mut() {
                runtime.power_state = PowerState::Off;
                runtime.boot_time = None;
            }
            s.ip_address = None;
        });
    }

    /// Finishes cloning: configuration becomes readable.
    pub fn finish_cloning(&self) {
        self.update(|s| {
            s.configured = true;
            if s.runtime.is_none() {
                s.runtime = Some(VmRuntime {
                    power_state: PowerState::Off,
                    boot_time: None,
                });
            }
        });
    }

    /// Number of datacenter lookups performed.
    pub fn datacenter_lookups(&self) -> usize {
        self.datacenter_lookups.load(Ordering::SeqCst)
    }

    /// Number of destroy calls received.
    pub fn destroy_submissions(&self) -> usize {
        self.destroy_submissions.load(Ordering::SeqCst)
    }

    /// Returns true once a destroy task has completed successfully.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn update<F: FnOnce(&mut MockVmState)>(&self, f: F) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    fn read(&self) -> MockVmState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RemoteVm for MockVm {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> Result<Option<VmConfig>, ConnectorError> {
        let state = self.read();
        if let Some(e) = state.config_error {
            return Err(e);
        }
        if !state.configured {
            return Ok(None);
        }

        let extra_config = match state.extra_config_error {
            Some(e) => Err(e),
            None => Ok(state.properties.into_iter().collect()),
        };
        Ok(Some(VmConfig {
            name: self.name.clone(),
            extra_config,
            template: state.template,
            change_version: state.change_version,
        }))
    }

    fn runtime(&self) -> Option<VmRuntime> {
        self.read().runtime
    }

    fn guest_ip_address(&self) -> Option<String> {
        self.read().ip_address
    }

    fn lookup_datacenter_id(&self) -> Result<Option<String>, ConnectorError> {
        self.datacenter_lookups.fetch_add(1, Ordering::SeqCst);
        self.read().datacenter
    }

    async fn submit_destroy(&self) -> Result<Arc<dyn RemoteTask>, ConnectorError> {
        self.destroy_submissions.fetch_add(1, Ordering::SeqCst);
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        debug!(vm = %self.name, "[MOCK] Destroy requested");
        match self.read().destroy {
            DestroyBehavior::Succeed { polls } => Ok(Arc::new(
                MockTask::succeeding_after(polls).with_done_flag(Arc::clone(&self.destroyed)),
            )),
            DestroyBehavior::Fail { message } => {
                Ok(Arc::new(MockTask::failing_after(0, &message)))
            }
            DestroyBehavior::Reject { message } => Err(ConnectorError::Rejected(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_task_script() {
        let task = MockTask::succeeding_after(1);
        assert_eq!(task.info().await.unwrap().state, RemoteTaskState::Running);
        assert_eq!(task.info().await.unwrap().state, RemoteTaskState::Success);
    }

    #[tokio::test]
    async fn test_mock_task_refuses_late_cancel() {
        let task = MockTask::succeeding_after(1);
        assert!(task.cancel().await.is_ok());
        assert_eq!(
            task.info().await.unwrap().state,
            RemoteTaskState::Error("cancelled".to_string())
        );

        let finishing = MockTask::succeeding_after(0);
        assert!(finishing.cancel().await.is_err());
        assert_eq!(finishing.info().await.unwrap().state, RemoteTaskState::Success);
        assert_eq!(finishing.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_vm_destroy_marks_destroyed() {
        let vm = MockVm::new("vm-1", "agent-1");
        let task = vm.submit_destroy().await.unwrap();
        assert!(!vm.is_destroyed());

        task.info().await.unwrap();
        assert!(vm.is_destroyed());
        assert_eq!(vm.destroy_submissions(), 1);
    }

    #[test]
    fn test_cloning_vm_has_no_config() {
        let vm = MockVm::cloning("vm-2", "agent-2");
        assert!(vm.config().unwrap().is_none());
        vm.finish_cloning();
        assert!(vm.config().unwrap().is_some());
    }
}
