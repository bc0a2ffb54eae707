//! Quota accounting and home-directory rescans
//!
//! NIST 800-53: SC-6 (Resource Availability), AU-2 (Audit Events)
//! Implementation: Applies incremental counter deltas through the user
//! store and runs full home-directory rescans on background tasks, at
//! most one per username. A rescan result overwrites the counters;
//! deltas committed while a scan is walking the tree are absorbed by the
//! overwrite, an accepted imprecision.

use crate::store::UserStore;
use crate::user::User;
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Per-user quota bookkeeping backed by the user store
pub struct QuotaAccountant {
    store: Arc<dyn UserStore>,
    active_scans: Mutex<HashSet<String>>,
}

impl QuotaAccountant {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            active_scans: Mutex::new(HashSet::new()),
        }
    }

    /// Commit the counter delta for a completed write
    ///
    /// Replacing an existing file keeps the file count and adjusts the
    /// byte counter by the size difference; a new file adds both. Caps
    /// were enforced at open and during the write, so the commit itself
    /// is unconditional.
    pub fn reserve(&self, user_id: i64, new_size: u64, replaced_size: Option<u64>) -> Result<()> {
        let (files_delta, bytes_delta) = match replaced_size {
            Some(old) => (0, new_size as i64 - old as i64),
            None => (1, new_size as i64),
        };
        self.store
            .update_quota(user_id, files_delta, bytes_delta, false)
    }

    /// Return counter headroom after a delete
    pub fn refund(&self, user_id: i64, size: u64, removed_file: bool) -> Result<()> {
        let files_delta = if removed_file { -1 } else { 0 };
        self.store
            .update_quota(user_id, files_delta, -(size as i64), false)
    }

    /// Return the headroom for a whole removed subtree
    pub fn refund_tree(&self, user_id: i64, files: u64, bytes: u64) -> Result<()> {
        self.store
            .update_quota(user_id, -(files as i64), -(bytes as i64), false)
    }

    /// Atomically claim the scan slot for a username
    ///
    /// Returns false when a scan is already running for that user; the
    /// caller must not start another.
    pub fn start_scan(&self, username: &str) -> bool {
        let mut scans = self.active_scans.lock().expect("scan set lock poisoned");
        scans.insert(username.to_string())
    }

    /// Release the scan slot for a username
    pub fn finish_scan(&self, username: &str) {
        let mut scans = self.active_scans.lock().expect("scan set lock poisoned");
        scans.remove(username);
    }

    /// Usernames with a scan currently running
    pub fn active_scans(&self) -> Vec<String> {
        let scans = self.active_scans.lock().expect("scan set lock poisoned");
        let mut names: Vec<String> = scans.iter().cloned().collect();
        names.sort();
        names
    }

    /// Walk the user's home and overwrite the stored counters
    ///
    /// The caller must hold the scan slot; it is released on every exit
    /// path. A missing home counts as zero files and zero bytes.
    pub async fn rescan(&self, user: &User) -> Result<(u64, u64)> {
        let result = self.rescan_inner(user).await;
        self.finish_scan(&user.username);
        result
    }

    async fn rescan_inner(&self, user: &User) -> Result<(u64, u64)> {
        let (files, bytes) = if user.home_dir.exists() {
            walk_home(user.home_dir.clone()).await?
        } else {
            (0, 0)
        };
        self.store
            .update_quota(user.id, files as i64, bytes as i64, true)?;
        info!(
            event = "quota_scan_completed",
            username = %user.username,
            files,
            bytes,
            "Quota rescan completed"
        );
        Ok((files, bytes))
    }

    /// Claim the scan slot and run the rescan on a background task
    ///
    /// Returns false when a scan for the user is already running. Scan
    /// failures are logged and never propagate to sessions.
    pub fn spawn_rescan(self: &Arc<Self>, user: User) -> bool {
        if !self.start_scan(&user.username) {
            warn!(
                event = "quota_scan_already_running",
                username = %user.username,
                "Refusing to start a second quota scan"
            );
            return false;
        }
        let accountant = self.clone();
        tokio::spawn(async move {
            if let Err(e) = accountant.rescan(&user).await {
                error!(
                    event = "quota_scan_failed",
                    username = %user.username,
                    error = %e,
                    "Quota rescan failed"
                );
            }
        });
        true
    }
}

/// Sum regular files and their sizes under a directory
///
/// Symlinks are not followed and count for neither files nor bytes, so a
/// link pointing outside the home cannot inflate the user's usage.
async fn walk_home(root: PathBuf) -> Result<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    let mut pending = vec![root];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| scan_error(&dir, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| scan_error(&dir, e))? {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| scan_error(&entry.path(), e))?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                files += 1;
                bytes += metadata.len();
            }
        }
    }
    Ok((files, bytes))
}

fn scan_error(path: &Path, e: std::io::Error) -> Error {
    Error::Other(format!("quota scan failed at {:?}: {}", path, e))
}
