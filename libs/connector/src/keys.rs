//! Property keys written into a VM's extra configuration at provisioning time.
//!
//! These names are a contract with the provisioning layer.

/// Id of the image the instance was created from.
pub const IMAGE_SOURCE_ID: &str = "vmcloud.image.source.id";

/// Source VM name; written by older provisioning code instead of the id.
pub const IMAGE_SOURCE_VM_NAME: &str = "vmcloud.image.source.vm.name";

/// Snapshot the instance was cloned from.
pub const IMAGE_SNAPSHOT: &str = "vmcloud.image.snapshot";

/// Id of the server instance that created the VM.
pub const SERVER_UUID: &str = "vmcloud.server.uuid";

/// Cloud profile the instance belongs to.
pub const PROFILE_ID: &str = "vmcloud.profile.id";

/// `"true"` when the VM is a clone rather than a started template/VM.
pub const CLONED_INSTANCE: &str = "vmcloud.cloned.instance";

/// Agent configuration parameter carrying the instance name.
pub const INSTANCE_NAME: &str = "vmcloud.instance.name";
