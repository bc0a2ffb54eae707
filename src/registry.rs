//! Live connection and transfer registry
//!
//! NIST 800-53: AC-10 (Concurrent Session Control), AC-12 (Session Termination)
//! STIG: V-222601 - The application must terminate sessions after organization-defined conditions
//! Implementation: Process-wide mutex-guarded map of authenticated sessions
//! and their in-flight transfers. Enumeration returns deep-copied snapshots
//! so no caller iterates under the lock, and no lock is ever held across
//! I/O. Forced close and idle eviction signal the session task, which
//! closes the network channel and unblocks any pending I/O on it.

use crate::user::User;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Direction of an open file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

struct TransferEntry {
    transfer_id: u64,
    direction: TransferDirection,
    virtual_path: String,
    absolute_path: PathBuf,
    bytes_transferred: u64,
    start_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

struct ConnectionEntry {
    username: String,
    client_version: String,
    remote_addr: Option<SocketAddr>,
    start_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    transfers: Vec<TransferEntry>,
    next_transfer_id: u64,
    close_signal: Arc<Notify>,
}

/// Deep-copied view of one in-flight transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub transfer_id: u64,
    pub direction: TransferDirection,
    pub virtual_path: String,
    pub absolute_path: PathBuf,
    pub bytes_transferred: u64,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Deep-copied view of one live connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: String,
    pub username: String,
    pub client_version: String,
    pub remote_addr: Option<SocketAddr>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transfers: Vec<TransferSnapshot>,
}

/// Process-wide registry of live sessions
///
/// NIST 800-53: AC-10 (Concurrent Session Control), AC-12 (Session Termination)
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection for an authenticated user
    ///
    /// The session cap is checked and the connection inserted under one
    /// lock acquisition, so two racing logins cannot both slip past the
    /// cap. Returns the connection id and the close signal the session
    /// task must watch, or `None` when `max_sessions` is reached.
    ///
    /// NIST 800-53: AC-10 (Concurrent Session Control)
    pub fn register(
        &self,
        user: &User,
        client_version: &str,
        remote_addr: Option<SocketAddr>,
    ) -> Option<(String, Arc<Notify>)> {
        let mut connections = self.connections.lock().expect("registry lock poisoned");

        let live = connections
            .values()
            .filter(|c| c.username == user.username)
            .count();
        if user.max_sessions > 0 && live >= user.max_sessions as usize {
            warn!(
                event = "session_limit_reached",
                username = %user.username,
                live,
                max_sessions = user.max_sessions,
                "Rejecting connection over session cap"
            );
            return None;
        }

        let connection_id = Uuid::new_v4().to_string();
        let close_signal = Arc::new(Notify::new());
        let now = Utc::now();
        connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                username: user.username.clone(),
                client_version: client_version.to_string(),
                remote_addr,
                start_time: now,
                last_activity: now,
                transfers: Vec::new(),
                next_transfer_id: 1,
                close_signal: close_signal.clone(),
            },
        );

        info!(
            event = "connection_registered",
            connection_id = %connection_id,
            username = %user.username,
            remote_addr = ?remote_addr,
            live = live + 1,
            "Registered connection"
        );
        Some((connection_id, close_signal))
    }

    /// Remove a connection and all its transfers
    ///
    /// NIST 800-53: AC-12 (Session Termination)
    pub fn unregister(&self, connection_id: &str) {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if let Some(entry) = connections.remove(connection_id) {
            info!(
                event = "connection_unregistered",
                connection_id,
                username = %entry.username,
                open_transfers = entry.transfers.len(),
                "Unregistered connection"
            );
        }
    }

    /// Count live connections for a username
    pub fn count_for_user(&self, username: &str) -> usize {
        let connections = self.connections.lock().expect("registry lock poisoned");
        connections
            .values()
            .filter(|c| c.username == username)
            .count()
    }

    /// Record a newly opened transfer; returns its id within the connection
    pub fn add_transfer(
        &self,
        connection_id: &str,
        direction: TransferDirection,
        virtual_path: &str,
        absolute_path: &std::path::Path,
    ) -> Option<u64> {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        let entry = connections.get_mut(connection_id)?;
        let transfer_id = entry.next_transfer_id;
        entry.next_transfer_id += 1;
        let now = Utc::now();
        entry.last_activity = now;
        entry.transfers.push(TransferEntry {
            transfer_id,
            direction,
            virtual_path: virtual_path.to_string(),
            absolute_path: absolute_path.to_path_buf(),
            bytes_transferred: 0,
            start_time: now,
            last_activity: now,
        });
        debug!(
            event = "transfer_opened",
            connection_id,
            transfer_id,
            direction = ?direction,
            path = virtual_path,
            "Transfer opened"
        );
        Some(transfer_id)
    }

    /// Drop a transfer record
    pub fn remove_transfer(&self, connection_id: &str, transfer_id: u64) {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if let Some(entry) = connections.get_mut(connection_id) {
            entry.transfers.retain(|t| t.transfer_id != transfer_id);
            entry.last_activity = Utc::now();
        }
    }

    /// Advance the activity timestamp of a connection
    pub fn touch(&self, connection_id: &str) {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if let Some(entry) = connections.get_mut(connection_id) {
            entry.last_activity = Utc::now();
        }
    }

    /// Add transferred bytes to a transfer and advance both activity clocks
    pub fn record_transfer_bytes(&self, connection_id: &str, transfer_id: u64, bytes: u64) {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if let Some(entry) = connections.get_mut(connection_id) {
            let now = Utc::now();
            entry.last_activity = now;
            if let Some(transfer) = entry
                .transfers
                .iter_mut()
                .find(|t| t.transfer_id == transfer_id)
            {
                transfer.bytes_transferred += bytes;
                transfer.last_activity = now;
            }
        }
    }

    /// Deep-copied snapshot of every live connection, safe to iterate
    /// without holding the lock
    pub fn list(&self) -> Vec<ConnectionSnapshot> {
        let connections = self.connections.lock().expect("registry lock poisoned");
        let mut snapshots: Vec<ConnectionSnapshot> = connections
            .iter()
            .map(|(id, entry)| ConnectionSnapshot {
                connection_id: id.clone(),
                username: entry.username.clone(),
                client_version: entry.client_version.clone(),
                remote_addr: entry.remote_addr,
                start_time: entry.start_time,
                last_activity: entry.last_activity,
                transfers: entry
                    .transfers
                    .iter()
                    .map(|t| TransferSnapshot {
                        transfer_id: t.transfer_id,
                        direction: t.direction,
                        virtual_path: t.virtual_path.clone(),
                        absolute_path: t.absolute_path.clone(),
                        bytes_transferred: t.bytes_transferred,
                        start_time: t.start_time,
                        last_activity: t.last_activity,
                    })
                    .collect(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        snapshots
    }

    /// Signal a session to tear down
    ///
    /// The session task closes the network channel; I/O blocked on it
    /// fails and the transfer handles run their scoped release.
    ///
    /// NIST 800-53: AC-12 (Session Termination)
    pub fn close(&self, connection_id: &str) -> bool {
        let signal = {
            let connections = self.connections.lock().expect("registry lock poisoned");
            connections
                .get(connection_id)
                .map(|entry| entry.close_signal.clone())
        };
        match signal {
            Some(signal) => {
                info!(
                    event = "connection_close_requested",
                    connection_id, "Forced close requested"
                );
                // notify_one stores a permit, so the signal is not lost
                // when the watcher has not started waiting yet
                signal.notify_one();
                true
            }
            None => false,
        }
    }

    /// Close every connection idle longer than `idle_timeout` with no
    /// in-flight transfers; returns how many were signalled
    ///
    /// NIST 800-53: AC-12 (Session Termination)
    /// STIG: V-222601
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(idle_timeout).unwrap_or(ChronoDuration::zero());
        let stale: Vec<String> = {
            let connections = self.connections.lock().expect("registry lock poisoned");
            connections
                .iter()
                .filter(|(_, entry)| entry.transfers.is_empty() && entry.last_activity < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &stale {
            info!(event = "idle_connection_evicted", connection_id = %id, "Closing idle connection");
            self.close(id);
        }
        stale.len()
    }

    /// Overall statistics: (live connections, in-flight transfers)
    pub fn stats(&self) -> (usize, usize) {
        let connections = self.connections.lock().expect("registry lock poisoned");
        let transfers = connections.values().map(|c| c.transfers.len()).sum();
        (connections.len(), transfers)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::{Permission, UserStatus};
    use std::path::Path;

    fn test_user(username: &str, max_sessions: u32) -> User {
        User {
            id: 1,
            username: username.to_string(),
            password_hash: Some("$argon2id$fake".to_string()),
            public_keys: Vec::new(),
            home_dir: PathBuf::from("/srv/sftp").join(username),
            permissions: vec![Permission::Any],
            max_sessions,
            quota_files: 0,
            quota_bytes: 0,
            used_files: 0,
            used_bytes: 0,
            upload_kbps: 0,
            download_kbps: 0,
            status: UserStatus::Enabled,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    #[test]
    fn test_session_cap_enforced() {
        let registry = ConnectionRegistry::new();
        let user = test_user("alice", 1);

        let first = registry.register(&user, "SSH-2.0-client", None);
        assert!(first.is_some());
        // Second concurrent login must be refused
        assert!(registry.register(&user, "SSH-2.0-client", None).is_none());

        // After the first disconnects, a new login succeeds
        let (id, _) = first.unwrap();
        registry.unregister(&id);
        assert!(registry.register(&user, "SSH-2.0-client", None).is_some());
    }

    #[test]
    fn test_zero_cap_means_unlimited() {
        let registry = ConnectionRegistry::new();
        let user = test_user("bob", 0);
        for _ in 0..5 {
            assert!(registry.register(&user, "", None).is_some());
        }
        assert_eq!(registry.count_for_user("bob"), 5);
    }

    #[test]
    fn test_transfers_tracked_and_counted() {
        let registry = ConnectionRegistry::new();
        let user = test_user("carol", 0);
        let (id, _) = registry.register(&user, "", None).unwrap();

        let t1 = registry
            .add_transfer(&id, TransferDirection::Upload, "/a.dat", Path::new("/srv/a"))
            .unwrap();
        let t2 = registry
            .add_transfer(&id, TransferDirection::Download, "/b.dat", Path::new("/srv/b"))
            .unwrap();
        assert_ne!(t1, t2);

        registry.record_transfer_bytes(&id, t1, 4096);
        let snapshot = registry.list();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].transfers.len(), 2);
        let up = snapshot[0]
            .transfers
            .iter()
            .find(|t| t.transfer_id == t1)
            .unwrap();
        assert_eq!(up.bytes_transferred, 4096);
        assert_eq!(up.direction, TransferDirection::Upload);

        registry.remove_transfer(&id, t1);
        let (_, transfers) = registry.stats();
        assert_eq!(transfers, 1);
    }

    #[tokio::test]
    async fn test_close_signals_session() {
        let registry = ConnectionRegistry::new();
        let user = test_user("dave", 0);
        let (id, signal) = registry.register(&user, "", None).unwrap();

        let notified = signal.notified();
        assert!(registry.close(&id));
        // The waiter wakes once the signal fires
        tokio::time::timeout(std::time::Duration::from_secs(1), notified)
            .await
            .expect("close signal not delivered");

        assert!(!registry.close("no-such-connection"));
    }

    #[test]
    fn test_sweep_idle_skips_active_transfers() {
        let registry = ConnectionRegistry::new();
        let user = test_user("erin", 0);

        let (idle_id, _) = registry.register(&user, "", None).unwrap();
        let (busy_id, _) = registry.register(&user, "", None).unwrap();
        registry
            .add_transfer(&busy_id, TransferDirection::Upload, "/x", Path::new("/srv/x"))
            .unwrap();

        // Backdate both connections past the timeout
        {
            let mut connections = registry.connections.lock().unwrap();
            for entry in connections.values_mut() {
                entry.last_activity = Utc::now() - ChronoDuration::seconds(600);
            }
        }

        let swept = registry.sweep_idle(Duration::from_secs(300));
        assert_eq!(swept, 1);

        // A touched connection is not considered idle
        registry.touch(&idle_id);
        let swept = registry.sweep_idle(Duration::from_secs(300));
        assert_eq!(swept, 0);
    }

    #[test]
    fn test_snapshot_is_deep_copy() {
        let registry = ConnectionRegistry::new();
        let user = test_user("frank", 0);
        let (id, _) = registry.register(&user, "", None).unwrap();

        let snapshot = registry.list();
        registry.unregister(&id);
        // The snapshot outlives the registry entry
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].username, "frank");
        assert!(registry.list().is_empty());
    }
}
