//! The collection of instances created from one image.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use vmcloud_connector::VmSnapshot;

use crate::record::{InstanceRecord, InstanceView};
use crate::ReconcileError;

/// Owns the instance records of one image.
///
/// Records are handed out as `Arc`s so a caller can fetch a snapshot and
/// reconcile without holding the pool lock.
pub struct ImagePool {
    image_id: String,
    instances: RwLock<HashMap<String, Arc<InstanceRecord>>>,
}

impl ImagePool {
    pub fn new(image_id: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Creates a record for a newly requested instance, in `scheduled_to_start`.
    pub async fn provision(
        &self,
        instance_id: &str,
        snapshot_name: Option<String>,
    ) -> Result<Arc<InstanceRecord>, ReconcileError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(instance_id) {
            return Err(ReconcileError::AlreadyExists(instance_id.to_string()));
        }

        info!(
            image_id = %self.image_id,
            instance_id = %instance_id,
            snapshot = ?snapshot_name,
            "Provisioning instance"
        );
        let record = Arc::new(InstanceRecord::new(
            instance_id,
            self.image_id.clone(),
            snapshot_name,
        ));
        instances.insert(instance_id.to_string(), Arc::clone(&record));
        Ok(record)
    }

    pub async fn get(&self, instance_id: &str) -> Option<Arc<InstanceRecord>> {
        self.instances.read().await.get(instance_id).cloned()
    }

    /// All records, in no particular order.
    pub async fn instances(&self) -> Vec<Arc<InstanceRecord>> {
        self.instances.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    /// Drops a record once its remote object is gone.
    pub async fn remove(&self, instance_id: &str) -> Option<Arc<InstanceRecord>> {
        let removed = self.instances.write().await.remove(instance_id);
        if removed.is_some() {
            info!(image_id = %self.image_id, instance_id = %instance_id, "Instance removed");
        }
        removed
    }

    /// Applies a snapshot to the named record.
    pub async fn reconcile(
        &self,
        instance_id: &str,
        snapshot: &VmSnapshot,
    ) -> Result<(), ReconcileError> {
        let record = self
            .get(instance_id)
            .await
            .ok_or_else(|| ReconcileError::NotFound(instance_id.to_string()))?;

        debug!(instance_id = %instance_id, vm_id = %snapshot.id(), "Reconciling instance");
        record.reconcile(snapshot);
        Ok(())
    }

    /// Views of records whose status changed since last reported; each
    /// change is returned once.
    pub async fn take_status_reports(&self) -> Vec<InstanceView> {
        self.instances
            .read()
            .await
            .values()
            .filter_map(|r| r.take_status_report())
            .collect()
    }
}
