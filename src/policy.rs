//! Per-user access policy
//!
//! NIST 800-53: AC-3 (Access Enforcement), AC-6 (Least Privilege), SC-6 (Resource Availability)
//! STIG: V-222596 - Authorization enforcement
//! Implementation: Maps each SFTP operation to the permission it requires
//! and runs the quota preflight for writes. Attribute changes (setstat)
//! are accepted without a permission so they can be acknowledged and
//! ignored, which keeps host permission bits out of the virtual view.

use crate::user::{Permission, User};
use crate::{Error, Result};

/// The operations the filesystem backend dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SftpOperation {
    /// readdir / stat / lstat
    ListItems,
    /// open for reading
    OpenRead,
    /// open for writing (new file, truncate or append)
    OpenWrite,
    /// remove a file or directory
    Remove,
    /// rename a file or directory
    Rename,
    /// create a directory
    Mkdir,
    /// create a symbolic link
    Symlink,
    /// chmod / chown / utimes
    Setstat,
}

/// The permission an operation requires, if any
///
/// `Setstat` maps to no permission: it is acknowledged as success and
/// deliberately not applied.
pub fn required_permission(op: SftpOperation) -> Option<Permission> {
    match op {
        SftpOperation::ListItems => Some(Permission::ListItems),
        SftpOperation::OpenRead => Some(Permission::Download),
        SftpOperation::OpenWrite => Some(Permission::Upload),
        SftpOperation::Remove => Some(Permission::Delete),
        SftpOperation::Rename => Some(Permission::Rename),
        SftpOperation::Mkdir => Some(Permission::CreateDirs),
        SftpOperation::Symlink => Some(Permission::CreateSymlinks),
        SftpOperation::Setstat => None,
    }
}

/// Check whether a user may perform an operation
///
/// NIST 800-53: AC-3 (Access Enforcement)
pub fn check(user: &User, op: SftpOperation) -> Result<()> {
    match required_permission(op) {
        Some(perm) if user.has_perm(perm) => Ok(()),
        Some(perm) => Err(Error::PermissionDenied(format!(
            "user '{}' lacks {:?} for {:?}",
            user.username, perm, op
        ))),
        None => Ok(()),
    }
}

/// Quota preflight for an open-for-write
///
/// Denies when a new file would exceed the file-count cap. Byte caps are
/// enforced during the write since SFTP does not announce the final size
/// up front.
///
/// NIST 800-53: SC-6 (Resource Availability)
pub fn check_open_for_write(user: &User, target_exists: bool) -> Result<()> {
    check(user, SftpOperation::OpenWrite)?;
    if !target_exists && user.quota_files > 0 && user.used_files >= user.quota_files {
        return Err(Error::QuotaExceeded(format!(
            "user '{}' at file quota ({}/{})",
            user.username, user.used_files, user.quota_files
        )));
    }
    Ok(())
}

/// Whether a projected total size for the home stays within the byte cap
///
/// `projected` is the user's used-bytes counter adjusted for the bytes the
/// current transfer has produced so far.
pub fn within_byte_quota(user: &User, projected: u64) -> bool {
    user.quota_bytes == 0 || projected <= user.quota_bytes
}
