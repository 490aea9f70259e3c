//! Source of remote VM objects.
//!
//! The provider is the agent's handle on the vendor SDK. Fetches may block
//! on network I/O and are always made outside record locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use vmcloud_connector::mock::MockVm;
use vmcloud_connector::RemoteVm;

/// Fetches remote VMs by instance name.
#[async_trait]
pub trait VmProvider: Send + Sync {
    /// Returns the VM, or `None` if the platform has no such object.
    async fn fetch(&self, name: &str) -> Result<Option<Arc<dyn RemoteVm>>>;
}

/// In-memory provider backed by [`MockVm`]s.
pub struct MockProvider {
    vms: RwLock<HashMap<String, Arc<MockVm>>>,

    /// Whether fetches should "fail" with a transport error.
    fail_fetches: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            vms: RwLock::new(HashMap::new()),
            fail_fetches: AtomicBool::new(false),
        }
    }

    /// Registers a VM under its name.
    pub async fn insert(&self, vm: MockVm) -> Arc<MockVm> {
        let vm = Arc::new(vm);
        self.vms
            .write()
            .await
            .insert(vm.name().to_string(), Arc::clone(&vm));
        vm
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<MockVm>> {
        self.vms.write().await.remove(name)
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VmProvider for MockProvider {
    async fn fetch(&self, name: &str) -> Result<Option<Arc<dyn RemoteVm>>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            anyhow::bail!("mock provider configured to fail");
        }

        let vm = self.vms.read().await.get(name).cloned();
        match vm {
            Some(vm) if vm.is_destroyed() => {
                debug!(vm = %name, "[MOCK] VM destroyed");
                Ok(None)
            }
            Some(vm) => Ok(Some(vm as Arc<dyn RemoteVm>)),
            None => Ok(None),
        }
    }
}
