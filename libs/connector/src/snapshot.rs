//! Point-in-time read view of one remote VM.
//!
//! [`VmSnapshot`] never fails to build. If configuration metadata cannot be
//! read, the snapshot is simply uninitialized and has no property bag; the
//! failure is logged and swallowed. Callers treat "uninitialized" as "still
//! being provisioned".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::keys;
use crate::memo::Memo;
use crate::remote::{PowerState, RemoteVm, VmConfig, VmRuntime};
use crate::task::AsyncTask;

/// Status derived from power state alone, without any local history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedStatus {
    Running,
    Stopped,
    Unknown,
}

/// Read view of a remote VM.
///
/// Configuration, runtime and guest address are read once at construction;
/// later changes on the platform need a new snapshot.
pub struct VmSnapshot {
    vm: Arc<dyn RemoteVm>,
    id: String,
    name: String,
    config: Option<VmConfig>,
    runtime: Option<VmRuntime>,
    ip_address: Option<String>,
    properties: Option<HashMap<String, String>>,
    datacenter_id: Memo<String>,
}

impl VmSnapshot {
    /// Builds a snapshot from a fetched remote object.
    pub fn from_remote(vm: Arc<dyn RemoteVm>) -> Self {
        let config = match vm.config() {
            Ok(config) => config,
            Err(e) => {
                info!(vm = %vm.name(), error = %e, "Unable to retrieve VM configuration");
                None
            }
        };

        let name = config
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| vm.name().to_string());
        let properties = config.as_ref().and_then(|c| extract_properties(&name, c));

        Self {
            id: vm.id().to_string(),
            name,
            config,
            runtime: vm.runtime(),
            ip_address: vm.guest_ip_address(),
            properties,
            datacenter_id: Memo::new(),
            vm,
        }
    }

    /// Stable identifier of the remote object.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False until provisioning metadata has been read at least once.
    pub fn is_initialized(&self) -> bool {
        self.properties.is_some()
    }

    pub fn power_state(&self) -> PowerState {
        self.runtime
            .map(|r| r.power_state)
            .unwrap_or(PowerState::Unknown)
    }

    pub fn is_powered_on(&self) -> bool {
        self.power_state() == PowerState::On
    }

    /// Boot time, only while powered on.
    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        let runtime = self.runtime?;
        if runtime.power_state != PowerState::On {
            return None;
        }
        runtime.boot_time
    }

    /// Address reported by guest tooling.
    pub fn ip_address(&self) -> Option<String> {
        self.ip_address.clone()
    }

    /// Status as seen from the platform alone.
    pub fn instance_status(&self) -> ObservedStatus {
        match self.runtime.map(|r| r.power_state) {
            None | Some(PowerState::Off) => ObservedStatus::Stopped,
            Some(PowerState::On) => ObservedStatus::Running,
            Some(PowerState::Unknown) => ObservedStatus::Unknown,
        }
    }

    /// True for templates, and whenever configuration is unavailable.
    pub fn is_readonly(&self) -> bool {
        self.config.as_ref().map(|c| c.template).unwrap_or(true)
    }

    pub fn change_version(&self) -> Option<&str> {
        self.config.as_ref()?.change_version.as_deref()
    }

    /// Owning datacenter id. Looked up on first access only; a failed or
    /// empty lookup is cached as `None`.
    pub fn datacenter_id(&self) -> Option<&str> {
        self.datacenter_id
            .get_or_compute(|| match self.vm.lookup_datacenter_id() {
                Ok(id) => id,
                Err(e) => {
                    info!(vm = %self.name, error = %e, "Unable to determine datacenter");
                    None
                }
            })
            .map(String::as_str)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.as_ref()?.get(key).map(String::as_str)
    }

    /// The full property bag; `None` when uninitialized.
    pub fn properties(&self) -> Option<&HashMap<String, String>> {
        self.properties.as_ref()
    }

    /// Source image id, falling back to the legacy source VM name key.
    pub fn image_source_id(&self) -> Option<&str> {
        self.property(keys::IMAGE_SOURCE_ID)
            .or_else(|| self.property(keys::IMAGE_SOURCE_VM_NAME))
    }

    pub fn snapshot_name(&self) -> Option<&str> {
        self.property(keys::IMAGE_SNAPSHOT).filter(|s| !s.is_empty())
    }

    pub fn server_uuid(&self) -> Option<&str> {
        self.property(keys::SERVER_UUID)
    }

    pub fn profile_id(&self) -> Option<&str> {
        self.property(keys::PROFILE_ID)
    }

    /// True only for the exact string `"true"`.
    pub fn is_clone(&self) -> bool {
        self.property(keys::CLONED_INSTANCE) == Some("true")
    }

    /// Builds the task that destroys this VM. Nothing is sent until the
    /// task is started or polled.
    pub fn delete_instance(&self) -> AsyncTask {
        let vm = Arc::clone(&self.vm);
        AsyncTask::new(format!("Delete instance {}", self.name), move || async move {
            vm.submit_destroy().await
        })
    }
}

impl std::fmt::Debug for VmSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmSnapshot")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn extract_properties(name: &str, config: &VmConfig) -> Option<HashMap<String, String>> {
    match &config.extra_config {
        Ok(pairs) => {
            debug!(vm = %name, count = pairs.len(), "Read VM properties");
            Some(pairs.iter().cloned().collect())
        }
        Err(e) => {
            info!(vm = %name, error = %e, "Unable to retrieve instance properties");
            None
        }
    }
}
