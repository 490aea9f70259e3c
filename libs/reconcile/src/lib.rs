//! Instance reconciliation primitives.
//!
//! This library holds the local view of cloud instances and keeps it in
//! step with the virtualization platform. Key concepts:
//!
//! - **Snapshot**: a point-in-time read of one remote VM ([`VmSnapshot`]).
//! - **Record**: the reconciled, mutable view of one instance ([`InstanceRecord`]).
//! - **Reconciliation**: applying a fresh snapshot to a record.
//!
//! # Invariants
//!
//! - Status assignment is idempotent: side effects fire only on change
//! - Reconciliation of one record is serialized and atomic for readers
//! - Read failures never propagate; they degrade to "unknown"
//! - Only task submission and task outcomes become instance errors
//!
//! [`VmSnapshot`]: vmcloud_connector::VmSnapshot

use std::time::Duration;

use thiserror::Error;

mod errors;
mod pool;
mod record;
mod status;

pub use errors::{CloudErrorInfo, ErrorKind, ErrorTracker};
pub use pool::ImagePool;
pub use record::{InstanceMetadata, InstanceRecord, InstanceView};
pub use status::InstanceStatus;

/// Reconciliation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// No record with this instance id.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// A record with this instance id already exists.
    #[error("instance already exists: {0}")]
    AlreadyExists(String),
}

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between polls of an in-flight remote task.
pub const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_millis(500);
