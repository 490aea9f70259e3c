//! # vmcloud-connector
//!
//! Read-side adapter over the virtualization platform.
//!
//! The vendor SDK is abstracted behind [`RemoteVm`] and [`RemoteTask`].
//! On top of it this crate provides:
//!
//! - [`VmSnapshot`]: a point-in-time view of one VM that never fails to
//!   build; unreadable metadata degrades to "uninitialized"
//! - [`Memo`]: compute-once caching that also remembers absent results
//! - [`AsyncTask`]: a lazily submitted, pollable and cancellable remote
//!   operation with exactly-once submission
//! - [`mock`]: in-memory platform objects for tests and local runs

mod error;
pub mod keys;
mod memo;
pub mod mock;
mod remote;
mod snapshot;
mod task;

pub use error::{ConnectorError, TaskError};
pub use memo::Memo;
pub use remote::{
    PowerState, RemoteTask, RemoteTaskInfo, RemoteTaskState, RemoteVm, VmConfig, VmRuntime,
};
pub use snapshot::{ObservedStatus, VmSnapshot};
pub use task::{AsyncTask, TaskStatus};
