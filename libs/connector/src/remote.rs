//! The seam to the vendor SDK.
//!
//! A [`RemoteVm`] is one remote object as the SDK returned it from a fetch.
//! Reads are synchronous views over already-fetched data; only the
//! destroy call and the task handle it returns talk to the platform.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorError;

/// Power state of a remote VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    Off,
    /// Suspended, or a state the SDK could not classify.
    Unknown,
}

/// Configuration metadata of a remote VM.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Name as recorded in the VM configuration.
    pub name: String,

    /// Custom key/value pairs written at provisioning time.
    pub extra_config: Result<Vec<(String, String)>, ConnectorError>,

    /// Templates cannot be modified or powered on.
    pub template: bool,

    /// Opaque token that changes whenever the configuration changes.
    pub change_version: Option<String>,
}

/// Runtime information of a remote VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmRuntime {
    pub power_state: PowerState,
    pub boot_time: Option<DateTime<Utc>>,
}

/// One VM as returned by the virtualization platform.
#[async_trait]
pub trait RemoteVm: Send + Sync {
    /// Stable managed-object identifier.
    fn id(&self) -> &str;

    /// Inventory name.
    fn name(&self) -> &str;

    /// Configuration metadata.
    ///
    /// `Ok(None)` while the platform has not populated it yet (e.g. the VM is
    /// still being cloned).
    fn config(&self) -> Result<Option<VmConfig>, ConnectorError>;

    /// Runtime information, if readable.
    fn runtime(&self) -> Option<VmRuntime>;

    /// Address reported by guest tooling.
    fn guest_ip_address(&self) -> Option<String>;

    /// Walks the inventory to find the owning datacenter.
    fn lookup_datacenter_id(&self) -> Result<Option<String>, ConnectorError>;

    /// Submits a destroy request and returns the platform task tracking it.
    async fn submit_destroy(&self) -> Result<Arc<dyn RemoteTask>, ConnectorError>;
}

/// Progress of a platform-side task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTaskState {
    Queued,
    Running,
    Success,
    Error(String),
}

impl RemoteTaskState {
    /// Returns true once the task will not change state anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error(_))
    }
}

/// Snapshot of a platform task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTaskInfo {
    pub state: RemoteTaskState,

    /// Completion percentage when the platform reports one.
    pub progress: Option<u8>,
}

/// Handle to a long-running task executing on the platform.
#[async_trait]
pub trait RemoteTask: Send + Sync {
    /// Queries the current task state without blocking on completion.
    async fn info(&self) -> Result<RemoteTaskInfo, ConnectorError>;

    /// Requests cancellation. The platform may ignore it.
    async fn cancel(&self) -> Result<(), ConnectorError>;
}
