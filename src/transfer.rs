//! Scoped transfer handles
//!
//! NIST 800-53: AC-3 (Access Enforcement), SC-6 (Resource Availability), SI-11 (Error Handling)
//! Implementation: One handle per open file, created after the policy
//! checks pass and released deterministically on close or session
//! teardown. Release always commits the quota delta for uploads and
//! removes the registry record; the hook event fires only for transfers
//! that completed without error.

use crate::hooks::{HookAction, HookDispatcher, HookEvent};
use crate::quota::QuotaAccountant;
use crate::registry::{ConnectionRegistry, TransferDirection};
use crate::throttle::BandwidthLimiter;
use crate::{Error, Result};
use chrono::Utc;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// One open file on the server side
pub struct TransferHandle {
    file: tokio::fs::File,
    direction: TransferDirection,
    virtual_path: String,
    absolute_path: PathBuf,
    user_id: i64,
    username: String,
    connection_id: String,
    transfer_id: u64,
    /// Byte-cap snapshot taken at open, used for mid-write enforcement
    quota_bytes: u64,
    used_bytes_at_open: u64,
    /// Size of the file this write replaces, if it already existed
    replaced_size: Option<u64>,
    /// Highest byte offset written, a proxy for the upload size
    max_write_end: u64,
    bytes_read: u64,
    limiter: BandwidthLimiter,
    errored: bool,
    finalized: bool,
    registry: Arc<ConnectionRegistry>,
    accountant: Arc<QuotaAccountant>,
    hooks: Arc<HookDispatcher>,
}

/// Everything a handle needs beyond the file itself
pub struct TransferContext {
    pub direction: TransferDirection,
    pub virtual_path: String,
    pub absolute_path: PathBuf,
    pub user_id: i64,
    pub username: String,
    pub connection_id: String,
    pub transfer_id: u64,
    pub quota_bytes: u64,
    pub used_bytes_at_open: u64,
    pub replaced_size: Option<u64>,
    pub bandwidth_kbps: u64,
}

impl TransferHandle {
    pub fn new(
        file: tokio::fs::File,
        ctx: TransferContext,
        registry: Arc<ConnectionRegistry>,
        accountant: Arc<QuotaAccountant>,
        hooks: Arc<HookDispatcher>,
    ) -> Self {
        Self {
            file,
            direction: ctx.direction,
            virtual_path: ctx.virtual_path,
            absolute_path: ctx.absolute_path,
            user_id: ctx.user_id,
            username: ctx.username,
            connection_id: ctx.connection_id,
            transfer_id: ctx.transfer_id,
            quota_bytes: ctx.quota_bytes,
            used_bytes_at_open: ctx.used_bytes_at_open,
            replaced_size: ctx.replaced_size,
            max_write_end: 0,
            bytes_read: 0,
            limiter: BandwidthLimiter::new(ctx.bandwidth_kbps),
            errored: false,
            finalized: false,
            registry,
            accountant,
            hooks,
        }
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn absolute_path(&self) -> &PathBuf {
        &self.absolute_path
    }

    /// Read a chunk at an offset; an empty result means end of file
    pub async fn read_chunk(&mut self, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
            self.errored = true;
            Error::Io(e)
        })?;

        let mut buffer = vec![0u8; (len as usize).min(256 * 1024)];
        let n = match self.file.read(&mut buffer).await {
            Ok(n) => n,
            Err(e) => {
                self.errored = true;
                return Err(Error::Io(e));
            }
        };
        buffer.truncate(n);

        self.bytes_read += n as u64;
        self.registry
            .record_transfer_bytes(&self.connection_id, self.transfer_id, n as u64);
        self.limiter.throttle(n as u64).await;
        Ok(buffer)
    }

    /// Write a chunk at an offset, enforcing the byte quota as it grows
    ///
    /// A write that would push the home past `quota_bytes` fails with a
    /// quota error; bytes already on disk stay there and are committed at
    /// close.
    pub async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let write_end = offset + data.len() as u64;
        let projected_size = self.max_write_end.max(write_end);
        if self.quota_bytes > 0 {
            // Counters may lag behind the disk (e.g. before a rescan), so
            // the replaced size is clamped instead of trusted blindly.
            let projected_total = self
                .used_bytes_at_open
                .saturating_sub(self.replaced_size.unwrap_or(0))
                + projected_size;
            if projected_total > self.quota_bytes {
                self.errored = true;
                return Err(Error::QuotaExceeded(format!(
                    "user '{}' write would reach {} of {} bytes",
                    self.username, projected_total, self.quota_bytes
                )));
            }
        }

        self.file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
            self.errored = true;
            Error::Io(e)
        })?;
        if let Err(e) = self.file.write_all(data).await {
            self.errored = true;
            return Err(Error::Io(e));
        }

        self.max_write_end = projected_size;
        self.registry
            .record_transfer_bytes(&self.connection_id, self.transfer_id, data.len() as u64);
        self.limiter.throttle(data.len() as u64).await;
        Ok(())
    }

    /// Mark the transfer as failed; suppresses the completion hook
    pub fn mark_errored(&mut self) {
        self.errored = true;
    }

    /// Release the handle: commit quota, emit the hook, drop the record
    pub fn close(mut self) {
        self.finalize();
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        self.registry
            .remove_transfer(&self.connection_id, self.transfer_id);

        let mut hook_size = self.bytes_read;
        if self.direction == TransferDirection::Upload {
            // The host file is authoritative for the final size; truncated
            // or sparse uploads may differ from the highest offset seen.
            let final_size = std::fs::metadata(&self.absolute_path)
                .map(|m| m.len())
                .unwrap_or(self.max_write_end);
            hook_size = final_size;
            if let Err(e) = self
                .accountant
                .reserve(self.user_id, final_size, self.replaced_size)
            {
                warn!(
                    event = "quota_commit_failed",
                    username = %self.username,
                    path = %self.virtual_path,
                    error = %e,
                    "Failed to commit quota for upload"
                );
            }
        }

        if !self.errored {
            let action = match self.direction {
                TransferDirection::Upload => HookAction::Upload,
                TransferDirection::Download => HookAction::Download,
            };
            self.hooks.enqueue(HookEvent {
                action,
                username: self.username.clone(),
                virtual_path: self.virtual_path.clone(),
                absolute_path: self.absolute_path.clone(),
                size: hook_size,
                timestamp: Utc::now(),
            });
        }

        debug!(
            event = "transfer_closed",
            connection_id = %self.connection_id,
            transfer_id = self.transfer_id,
            direction = ?self.direction,
            path = %self.virtual_path,
            errored = self.errored,
            "Transfer released"
        );
    }
}

impl Drop for TransferHandle {
    /// Session teardown with the handle still open runs the same release
    /// path as a normal close
    fn drop(&mut self) {
        self.finalize();
    }
}
