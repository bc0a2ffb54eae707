//! Per-permission enforcement integration tests
//!
//! NIST 800-53: AC-3 (Access Enforcement), AC-6 (Least Privilege)
//! STIG: V-222596

mod common;

use driftgate::Permission;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use russh_sftp::server::Handler;

fn all_but(removed: Permission) -> Vec<Permission> {
    Permission::ALL.into_iter().filter(|p| *p != removed).collect()
}

#[tokio::test]
async fn test_upload_without_download_permission() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::Download);
    });
    let mut backend = common::backend(&ctx);

    // Upload succeeds, download of the same file is denied, delete works
    common::upload(&mut backend, "mine.dat", b"payload")
        .await
        .expect("upload allowed");
    let err = common::download(&mut backend, "mine.dat").await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    backend
        .remove(1, "mine.dat".to_string())
        .await
        .expect("delete allowed");
}

#[tokio::test]
async fn test_download_without_upload_permission() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::Upload);
    });
    std::fs::write(ctx.home.path().join("served.dat"), b"content").unwrap();
    let mut backend = common::backend(&ctx);

    let data = common::download(&mut backend, "served.dat").await.unwrap();
    assert_eq!(data, b"content");

    let err = backend
        .open(
            2,
            "new.dat".to_string(),
            OpenFlags::WRITE | OpenFlags::CREATE,
            FileAttributes::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
}

#[tokio::test]
async fn test_list_permission_gates_stat_and_readdir() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::ListItems);
    });
    std::fs::write(ctx.home.path().join("hidden.dat"), b"x").unwrap();
    let mut backend = common::backend(&ctx);

    let err = backend.stat(3, "hidden.dat".to_string()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    let err = backend.opendir(4, "/".to_string()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
}

#[tokio::test]
async fn test_delete_permission_gates_remove_and_rmdir() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::Delete);
    });
    std::fs::write(ctx.home.path().join("keep.dat"), b"x").unwrap();
    std::fs::create_dir(ctx.home.path().join("keepdir")).unwrap();
    let mut backend = common::backend(&ctx);

    let err = backend.remove(5, "keep.dat".to_string()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    let err = backend.rmdir(6, "keepdir".to_string()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    assert!(ctx.home.path().join("keep.dat").exists());
}

#[tokio::test]
async fn test_rename_permission() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::Rename);
    });
    std::fs::write(ctx.home.path().join("old.dat"), b"x").unwrap();
    let mut backend = common::backend(&ctx);

    let err = backend
        .rename(7, "old.dat".to_string(), "new.dat".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    assert!(ctx.home.path().join("old.dat").exists());
}

#[tokio::test]
async fn test_create_dirs_permission() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::CreateDirs);
    });
    let mut backend = common::backend(&ctx);

    let err = backend
        .mkdir(8, "newdir".to_string(), FileAttributes::default())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    assert!(!ctx.home.path().join("newdir").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_create_symlinks_permission() {
    let ctx = common::context_with(|user| {
        user.permissions = all_but(Permission::CreateSymlinks);
    });
    std::fs::write(ctx.home.path().join("target.dat"), b"x").unwrap();
    let mut backend = common::backend(&ctx);

    let err = backend
        .symlink(9, "link.dat".to_string(), "target.dat".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    // With the permission present the same call succeeds
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    std::fs::write(ctx.home.path().join("target.dat"), b"x").unwrap();
    backend
        .symlink(10, "link.dat".to_string(), "target.dat".to_string())
        .await
        .expect("symlink allowed");
}
