//! User store contract and the in-memory reference implementation
//!
//! NIST 800-53: AC-2 (Account Management), IA-5 (Authenticator Management)
//! Implementation: The server core depends only on the `UserStore` trait;
//! persistent backends plug in behind it. Reads are atomic per user and
//! writes are serialized per store, so callers observe read-your-writes
//! on quota counters.

use crate::{Error, Result, User};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use tracing::info;

/// Read/write contract the server core requires from a user backend
///
/// NIST 800-53: AC-2 (Account Management)
pub trait UserStore: Send + Sync {
    /// Look up an account by login name
    fn get_by_username(&self, username: &str) -> Result<User>;

    /// Look up an account by numeric id
    fn get_by_id(&self, id: i64) -> Result<User>;

    /// Enumerate all accounts
    fn list(&self) -> Result<Vec<User>>;

    /// Add an account; assigns and returns the record with its new id
    fn add(&self, user: User) -> Result<User>;

    /// Replace an account record, matched by id
    fn update(&self, user: User) -> Result<()>;

    /// Remove an account by id
    fn remove(&self, id: i64) -> Result<()>;

    /// Adjust quota counters for an account
    ///
    /// With `reset` the counters are overwritten with the deltas (a rescan
    /// result is authoritative); otherwise the signed deltas are applied.
    /// Counters never go below zero.
    fn update_quota(&self, id: i64, files_delta: i64, bytes_delta: i64, reset: bool) -> Result<()>;

    /// Record a successful login on the account
    fn record_login(&self, id: i64) -> Result<()>;
}

/// In-memory user store
///
/// Backs the server binary (populated from a users file at startup) and the
/// test suite. All mutations take the write lock, which gives the per-user
/// write serialization the core expects.
pub struct MemoryUserStore {
    users: RwLock<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Load accounts from a JSON users file
    ///
    /// The file holds a JSON array of account records. Each record is
    /// validated before insertion; a single invalid record fails the load.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read users file {:?}: {}", path, e)))?;
        let users: Vec<User> = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse users file {:?}: {}", path, e)))?;

        let store = Self::new();
        for user in users {
            store.add(user)?;
        }
        info!(
            event = "users_loaded",
            count = store.users.read().expect("store lock poisoned").len(),
            file = ?path,
            "Loaded accounts from users file"
        );
        Ok(store)
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for MemoryUserStore {
    fn get_by_username(&self, username: &str) -> Result<User> {
        let users = self.users.read().map_err(|_| Error::store("lock poisoned"))?;
        users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| Error::store(format!("no such user: {}", username)))
    }

    fn get_by_id(&self, id: i64) -> Result<User> {
        let users = self.users.read().map_err(|_| Error::store("lock poisoned"))?;
        users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::store(format!("no such user id: {}", id)))
    }

    fn list(&self) -> Result<Vec<User>> {
        let users = self.users.read().map_err(|_| Error::store("lock poisoned"))?;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by_key(|u| u.id);
        Ok(all)
    }

    fn add(&self, mut user: User) -> Result<User> {
        user.validate()?;
        let mut users = self.users.write().map_err(|_| Error::store("lock poisoned"))?;
        if users.values().any(|u| u.username == user.username) {
            return Err(Error::store(format!(
                "username already exists: {}",
                user.username
            )));
        }
        user.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        users.insert(user.id, user.clone());
        Ok(user)
    }

    fn update(&self, user: User) -> Result<()> {
        user.validate()?;
        let mut users = self.users.write().map_err(|_| Error::store("lock poisoned"))?;
        if !users.contains_key(&user.id) {
            return Err(Error::store(format!("no such user id: {}", user.id)));
        }
        users.insert(user.id, user);
        Ok(())
    }

    fn remove(&self, id: i64) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Error::store("lock poisoned"))?;
        users
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::store(format!("no such user id: {}", id)))
    }

    fn update_quota(&self, id: i64, files_delta: i64, bytes_delta: i64, reset: bool) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Error::store("lock poisoned"))?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| Error::store(format!("no such user id: {}", id)))?;

        if reset {
            user.used_files = files_delta.max(0) as u64;
            user.used_bytes = bytes_delta.max(0) as u64;
        } else {
            user.used_files = apply_delta(user.used_files, files_delta);
            user.used_bytes = apply_delta(user.used_bytes, bytes_delta);
        }
        Ok(())
    }

    fn record_login(&self, id: i64) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Error::store("lock poisoned"))?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| Error::store(format!("no such user id: {}", id)))?;
        user.last_login = Some(Utc::now());
        Ok(())
    }
}

fn apply_delta(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta as u64)
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}
