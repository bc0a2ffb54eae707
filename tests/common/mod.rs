//! Shared fixtures for backend integration tests
#![allow(dead_code)]

use chrono::Utc;
use driftgate::{
    ConnectionRegistry, HookDispatcher, MemoryUserStore, Permission, QuotaAccountant, SftpBackend,
    User, UserStatus, UserStore,
};
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use russh_sftp::server::Handler;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestContext {
    pub store: Arc<MemoryUserStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub accountant: Arc<QuotaAccountant>,
    pub user: User,
    pub connection_id: String,
    pub home: TempDir,
}

pub fn build_user(home: &Path, permissions: Vec<Permission>) -> User {
    User {
        id: 0,
        username: "test_user_sftp".to_string(),
        password_hash: Some("$argon2id$fake".to_string()),
        public_keys: Vec::new(),
        home_dir: home.to_path_buf(),
        permissions,
        max_sessions: 0,
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

pub fn context() -> TestContext {
    context_with(|_| {})
}

pub fn context_with(customize: impl FnOnce(&mut User)) -> TestContext {
    let home = TempDir::new().expect("temp home");
    let mut user = build_user(home.path(), vec![Permission::Any]);
    customize(&mut user);

    let store = Arc::new(MemoryUserStore::new());
    let user = store.add(user).expect("add user");
    let registry = Arc::new(ConnectionRegistry::new());
    let (connection_id, _) = registry
        .register(&user, "SSH-2.0-test", None)
        .expect("register connection");
    let accountant = Arc::new(QuotaAccountant::new(
        store.clone() as Arc<dyn driftgate::UserStore>
    ));

    TestContext {
        store,
        registry,
        accountant,
        user,
        connection_id,
        home,
    }
}

pub fn backend(ctx: &TestContext) -> SftpBackend {
    backend_with_hooks(ctx, HookDispatcher::disabled())
}

pub fn backend_with_hooks(ctx: &TestContext, hooks: Arc<HookDispatcher>) -> SftpBackend {
    let user = ctx.store.get_by_id(ctx.user.id).expect("user exists");
    SftpBackend::new(
        user,
        ctx.connection_id.clone(),
        ctx.store.clone() as Arc<dyn driftgate::UserStore>,
        ctx.registry.clone(),
        ctx.accountant.clone(),
        hooks,
    )
    .expect("backend")
}

pub async fn upload(
    backend: &mut SftpBackend,
    name: &str,
    data: &[u8],
) -> Result<(), StatusCode> {
    let handle = backend
        .open(
            1,
            name.to_string(),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            FileAttributes::default(),
        )
        .await?
        .handle;
    let mut offset = 0u64;
    for chunk in data.chunks(32 * 1024) {
        backend.write(2, handle.clone(), offset, chunk.to_vec()).await?;
        offset += chunk.len() as u64;
    }
    backend.close(3, handle).await?;
    Ok(())
}

pub async fn download(backend: &mut SftpBackend, name: &str) -> Result<Vec<u8>, StatusCode> {
    let handle = backend
        .open(4, name.to_string(), OpenFlags::READ, FileAttributes::default())
        .await?
        .handle;
    let mut data = Vec::new();
    loop {
        match backend.read(5, handle.clone(), data.len() as u64, 32 * 1024).await {
            Ok(chunk) => data.extend_from_slice(&chunk.data),
            Err(StatusCode::Eof) => break,
            Err(e) => {
                let _ = backend.close(6, handle).await;
                return Err(e);
            }
        }
    }
    backend.close(6, handle).await?;
    Ok(data)
}

pub fn quota_counters(ctx: &TestContext) -> (u64, u64) {
    let user = ctx.store.get_by_id(ctx.user.id).expect("user exists");
    (user.used_files, user.used_bytes)
}
