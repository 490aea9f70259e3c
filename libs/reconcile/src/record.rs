//! The reconciled view of one cloud instance.
//!
//! ## Reconciliation
//!
//! [`InstanceRecord::reconcile`] applies a fresh [`VmSnapshot`]:
//!
//! ```text
//! uninitialized            -> unknown (unless scheduled_to_start)
//! powered on               -> stopped becomes running; start date and address refreshed
//! powered off / unreadable -> stopped (unless scheduled_to_start or already stopped)
//! ```
//!
//! `scheduled_to_start` is never overwritten by a reconciliation: a start
//! request may have been issued before the platform caught up.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};
use vmcloud_connector::{keys, Memo, TaskError, VmSnapshot};

use crate::errors::{CloudErrorInfo, ErrorKind, ErrorTracker};
use crate::status::InstanceStatus;

/// Provisioning metadata last read from the instance's property bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceMetadata {
    pub image_source_id: Option<String>,
    pub server_uuid: Option<String>,
    pub profile_id: Option<String>,
    pub is_clone: bool,
}

impl InstanceMetadata {
    pub fn from_snapshot(snapshot: &VmSnapshot) -> Self {
        Self {
            image_source_id: snapshot.image_source_id().map(str::to_string),
            server_uuid: snapshot.server_uuid().map(str::to_string),
            profile_id: snapshot.profile_id().map(str::to_string),
            is_clone: snapshot.is_clone(),
        }
    }
}

/// Serializable read of a record, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceView {
    pub instance_id: String,
    pub image_id: String,
    pub status: InstanceStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub network_address: Option<String>,
    pub snapshot_name: Option<String>,
    pub error: Option<CloudErrorInfo>,
}

#[derive(Debug)]
struct RecordState {
    status: InstanceStatus,
    start_date: Option<DateTime<Utc>>,
    network_address: Option<String>,
    metadata: Option<InstanceMetadata>,
    last_reported_status: Option<InstanceStatus>,
    transition_count: u64,
}

/// Local state of one cloud instance.
///
/// Mutable fields sit behind one lock, so a reconciliation is applied
/// atomically and concurrent reconciliations of the same record are
/// serialized. The lock is never held across a remote call: fetch the
/// snapshot first, then reconcile.
pub struct InstanceRecord {
    instance_id: String,
    image_id: String,
    snapshot_name: Option<String>,
    state: RwLock<RecordState>,
    errors: ErrorTracker,
    datacenter_id: Memo<String>,
    status_tx: watch::Sender<InstanceStatus>,
}

impl InstanceRecord {
    /// Creates a record for a freshly requested instance.
    pub fn new(
        instance_id: impl Into<String>,
        image_id: impl Into<String>,
        snapshot_name: Option<String>,
    ) -> Self {
        let status = InstanceStatus::ScheduledToStart;
        let (status_tx, _) = watch::channel(status);
        Self {
            instance_id: instance_id.into(),
            image_id: image_id.into(),
            snapshot_name,
            state: RwLock::new(RecordState {
                status,
                start_date: Some(Utc::now()),
                network_address: None,
                metadata: None,
                last_reported_status: None,
                transition_count: 0,
            }),
            errors: ErrorTracker::new(),
            datacenter_id: Memo::new(),
            status_tx,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Snapshot the instance was created from; fixed at creation.
    pub fn snapshot_name(&self) -> Option<&str> {
        self.snapshot_name.as_deref()
    }

    pub fn status(&self) -> InstanceStatus {
        self.read_state().status
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.read_state().start_date
    }

    pub fn network_address(&self) -> Option<String> {
        self.read_state().network_address.clone()
    }

    pub fn metadata(&self) -> Option<InstanceMetadata> {
        self.read_state().metadata.clone()
    }

    /// Number of actual status changes since creation.
    pub fn transition_count(&self) -> u64 {
        self.read_state().transition_count
    }

    /// Receives every actual status change.
    pub fn subscribe(&self) -> watch::Receiver<InstanceStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_in_permanent_status(&self) -> bool {
        self.status().is_permanent()
    }

    /// Source image id from the last initialized snapshot.
    pub fn image_source_id(&self) -> Option<String> {
        self.read_state()
            .metadata
            .as_ref()
            .and_then(|m| m.image_source_id.clone())
    }

    /// Clone flag from the last initialized snapshot.
    pub fn is_clone(&self) -> bool {
        self.read_state()
            .metadata
            .as_ref()
            .is_some_and(|m| m.is_clone)
    }

    /// Owning datacenter, looked up through `snapshot` at most once per record.
    pub fn datacenter_id(&self, snapshot: &VmSnapshot) -> Option<String> {
        self.datacenter_id
            .get_or_compute(|| snapshot.datacenter_id().map(str::to_string))
            .cloned()
    }

    /// Returns true if the agent described by `params` runs on this instance.
    pub fn contains_agent(&self, params: &HashMap<String, String>) -> bool {
        params.get(keys::INSTANCE_NAME).map(String::as_str) == Some(self.instance_id.as_str())
    }

    /// Sets the status. Returns true if it changed.
    ///
    /// Assigning the current status is a no-op: nothing is logged, counted
    /// or published.
    pub fn set_status(&self, status: InstanceStatus) -> bool {
        let mut state = self.write_state();
        self.transition(&mut state, status)
    }

    /// Applies a freshly fetched snapshot.
    pub fn reconcile(&self, snapshot: &VmSnapshot) {
        let mut state = self.write_state();

        if !snapshot.is_initialized() {
            debug!(instance_id = %self.instance_id, "Instance is still being provisioned");
            if state.status != InstanceStatus::ScheduledToStart {
                self.transition(&mut state, InstanceStatus::Unknown);
            }
            return;
        }

        state.metadata = Some(InstanceMetadata::from_snapshot(snapshot));

        if snapshot.is_powered_on() {
            state.start_date = snapshot.start_date();
            if state.status == InstanceStatus::Stopped {
                self.transition(&mut state, InstanceStatus::Running);
            }
            state.network_address = snapshot.ip_address();
        } else if !matches!(
            state.status,
            InstanceStatus::ScheduledToStart | InstanceStatus::Stopped
        ) {
            self.transition(&mut state, InstanceStatus::Stopped);
        }
    }

    pub fn set_error(&self, kind: ErrorKind, message: Option<String>) {
        self.errors.set_error(kind, message);
    }

    pub fn clear_error(&self, kind: ErrorKind) {
        self.errors.clear_error(kind);
    }

    pub fn clear_all_errors(&self) {
        self.errors.clear_all();
    }

    pub fn error_info(&self) -> Option<CloudErrorInfo> {
        self.errors.current_error()
    }

    /// Records the outcome of a remote task run for `kind`.
    ///
    /// Submission failures are filed under [`ErrorKind::TaskSubmitFailed`];
    /// remote failures under `kind`. Success clears both. A cancelled task
    /// leaves errors untouched.
    pub fn record_task_result(&self, kind: ErrorKind, result: &Result<(), TaskError>) {
        match result {
            Ok(()) => {
                self.errors.clear_error(kind);
                self.errors.clear_error(ErrorKind::TaskSubmitFailed);
            }
            Err(TaskError::Cancelled { .. }) => {}
            Err(e @ TaskError::SubmitFailed { .. }) => {
                self.errors
                    .set_error(ErrorKind::TaskSubmitFailed, Some(e.to_string()));
            }
            Err(e @ TaskError::Failed { .. }) => {
                self.errors.set_error(kind, Some(e.to_string()));
            }
        }
    }

    /// Returns the current view if the status changed since the last call,
    /// and marks it reported. A status change between the check and the mark
    /// cannot be lost.
    pub fn take_status_report(&self) -> Option<InstanceView> {
        let mut state = self.write_state();
        if state.last_reported_status == Some(state.status) {
            return None;
        }
        state.last_reported_status = Some(state.status);
        Some(self.view_of(&state))
    }

    pub fn view(&self) -> InstanceView {
        self.view_of(&self.read_state())
    }

    fn view_of(&self, state: &RecordState) -> InstanceView {
        InstanceView {
            instance_id: self.instance_id.clone(),
            image_id: self.image_id.clone(),
            status: state.status,
            start_date: state.start_date,
            network_address: state.network_address.clone(),
            snapshot_name: self.snapshot_name.clone(),
            error: self.errors.current_error(),
        }
    }

    fn transition(&self, state: &mut RecordState, status: InstanceStatus) -> bool {
        if state.status == status {
            return false;
        }

        info!(
            instance_id = %self.instance_id,
            from = %state.status,
            to = %status,
            "Changing instance status"
        );
        state.status = status;
        state.transition_count += 1;
        self.status_tx.send_replace(status);
        true
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RecordState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RecordState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InstanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("instance_id", &self.instance_id)
            .field("image_id", &self.image_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
