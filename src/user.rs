//! User accounts and the per-user permission set
//!
//! NIST 800-53: AC-2 (Account Management), AC-3 (Access Enforcement), AC-6 (Least Privilege)
//! Implementation: Account records with granular per-operation permissions,
//! quota caps and bandwidth ceilings. Accounts are owned by the user store;
//! the server holds read-mostly snapshots taken at connection time.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Granular permission kinds (closed set)
///
/// `Any` implies all other permissions.
///
/// NIST 800-53: AC-6 (Least Privilege)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Wildcard: grants every other permission
    Any,
    /// List directory contents and stat paths
    ListItems,
    /// Open files for reading
    Download,
    /// Open files for writing (create, truncate, append)
    Upload,
    /// Remove files and directories
    Delete,
    /// Rename files and directories
    Rename,
    /// Create directories
    CreateDirs,
    /// Create symbolic links
    CreateSymlinks,
}

impl Permission {
    /// All concrete permissions (everything except the wildcard)
    pub const ALL: [Permission; 7] = [
        Permission::ListItems,
        Permission::Download,
        Permission::Upload,
        Permission::Delete,
        Permission::Rename,
        Permission::CreateDirs,
        Permission::CreateSymlinks,
    ];
}

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Enabled,
    Disabled,
}

/// A server account
///
/// Credential material: at least one of `password_hash` (argon2 PHC string)
/// and `public_keys` (OpenSSH public key lines) must be set. Leaving one
/// empty disables that authentication method for the account.
///
/// NIST 800-53: AC-2 (Account Management), IA-5 (Authenticator Management)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique numeric id, assigned by the user store
    #[serde(default)]
    pub id: i64,
    /// Unique login name
    pub username: String,
    /// Argon2 PHC-string hash of the account password, if password auth is enabled
    #[serde(default)]
    pub password_hash: Option<String>,
    /// Authorized public keys in OpenSSH format, if key auth is enabled
    #[serde(default)]
    pub public_keys: Vec<String>,
    /// Absolute host path forming the root of the user's virtual filesystem
    pub home_dir: PathBuf,
    /// Granted permissions; `any` implies all
    pub permissions: Vec<Permission>,
    /// Maximum concurrent sessions, 0 = unlimited
    #[serde(default)]
    pub max_sessions: u32,
    /// Maximum number of files, 0 = unlimited
    #[serde(default)]
    pub quota_files: u64,
    /// Maximum total bytes, 0 = unlimited
    #[serde(default)]
    pub quota_bytes: u64,
    /// Running counter of files under the home
    #[serde(default)]
    pub used_files: u64,
    /// Running counter of bytes under the home
    #[serde(default)]
    pub used_bytes: u64,
    /// Upload bandwidth ceiling in KB/s, 0 = unlimited
    #[serde(default)]
    pub upload_kbps: u64,
    /// Download bandwidth ceiling in KB/s, 0 = unlimited
    #[serde(default)]
    pub download_kbps: u64,
    /// Whether the account may authenticate
    #[serde(default = "default_status")]
    pub status: UserStatus,
    /// Account creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Time of the most recent successful login
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

fn default_status() -> UserStatus {
    UserStatus::Enabled
}

impl User {
    /// Check whether the account holds a permission
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    pub fn has_perm(&self, perm: Permission) -> bool {
        self.permissions.contains(&Permission::Any) || self.permissions.contains(&perm)
    }

    /// Whether password authentication is enabled for this account
    pub fn password_auth_enabled(&self) -> bool {
        self.password_hash
            .as_deref()
            .map(|h| !h.is_empty())
            .unwrap_or(false)
    }

    /// Whether public-key authentication is enabled for this account
    pub fn pubkey_auth_enabled(&self) -> bool {
        self.public_keys.iter().any(|k| !k.is_empty())
    }

    /// Validate account invariants
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory is not absolute, the username
    /// is empty, or the account carries no credential of either kind.
    ///
    /// # NIST 800-53: AC-2 (Account Management), SI-10 (Input Validation)
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::Config("username must not be empty".into()));
        }
        if !self.home_dir.is_absolute() {
            return Err(Error::Config(format!(
                "home_dir must be absolute: {:?}",
                self.home_dir
            )));
        }
        if !self.password_auth_enabled() && !self.pubkey_auth_enabled() {
            return Err(Error::Config(format!(
                "user '{}' has no credentials of either kind",
                self.username
            )));
        }
        if self.permissions.is_empty() {
            return Err(Error::Config(format!(
                "user '{}' has an empty permission set",
                self.username
            )));
        }
        Ok(())
    }
}
