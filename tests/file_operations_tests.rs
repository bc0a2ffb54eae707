//! File transfer integration tests
//!
//! NIST 800-53: AC-3 (Access Enforcement), SC-6 (Resource Availability)
//! Implementation: Drives the filesystem backend through the protocol
//! handler interface: uploads, downloads, deletion, quota accounting and
//! chroot containment.

mod common;

use rand::RngCore;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use russh_sftp::server::Handler;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

#[tokio::test]
async fn test_upload_download_delete_accounting() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);

    let payload = random_bytes(65535);
    common::upload(&mut backend, "test_file.dat", &payload)
        .await
        .expect("upload");
    assert_eq!(common::quota_counters(&ctx), (1, 65535));

    let downloaded = common::download(&mut backend, "test_file.dat")
        .await
        .expect("download");
    assert_eq!(downloaded.len(), 65535);
    assert_eq!(downloaded, payload);

    backend
        .remove(10, "test_file.dat".to_string())
        .await
        .expect("remove");
    assert_eq!(common::quota_counters(&ctx), (0, 0));

    let err = backend
        .lstat(11, "test_file.dat".to_string())
        .await
        .expect_err("stat on deleted file must fail");
    assert_eq!(err, StatusCode::NoSuchFile);
}

#[tokio::test]
async fn test_replace_keeps_file_count() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);

    common::upload(&mut backend, "replace.dat", &random_bytes(65535))
        .await
        .expect("first upload");
    common::upload(&mut backend, "replace.dat", &random_bytes(1000))
        .await
        .expect("replacing upload");

    // Replacing adjusts bytes by the size delta and leaves the count alone
    assert_eq!(common::quota_counters(&ctx), (1, 1000));
}

#[tokio::test]
async fn test_traversal_upload_lands_at_root() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);

    common::upload(&mut backend, "../../test_file.dat", &random_bytes(64))
        .await
        .expect("upload with traversal path");

    // The file exists at the user's root under its leaf name
    backend
        .stat(20, "test_file.dat".to_string())
        .await
        .expect("stat at root");
    assert!(ctx.home.path().join("test_file.dat").exists());

    // Nothing was written above the home directory
    let above = ctx.home.path().parent().unwrap().join("test_file.dat");
    assert!(!above.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escape_is_unreadable() {
    let outside = tempfile::TempDir::new().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();

    let ctx = common::context();
    std::os::unix::fs::symlink(
        outside.path().join("secret.txt"),
        ctx.home.path().join("leak.txt"),
    )
    .unwrap();
    let mut backend = common::backend(&ctx);

    // Reading through the link fails as no-such-file, not permission-denied
    let err = common::download(&mut backend, "leak.txt").await.unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);
    let err = backend
        .stat(30, "leak.txt".to_string())
        .await
        .expect_err("stat through escaping link");
    assert_eq!(err, StatusCode::NoSuchFile);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escape_is_unwritable() {
    let outside = tempfile::TempDir::new().unwrap();
    let target = outside.path().join("victim.txt");
    std::fs::write(&target, b"original").unwrap();

    // A dirty home left behind by a removed account carries an escaping link
    let ctx = common::context();
    std::os::unix::fs::symlink(&target, ctx.home.path().join("leak.txt")).unwrap();
    let mut backend = common::backend(&ctx);

    let err = common::upload(&mut backend, "leak.txt", b"overwritten")
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);

    // The outside target was neither truncated nor rewritten
    assert_eq!(std::fs::read(&target).unwrap(), b"original");
}

#[cfg(unix)]
#[tokio::test]
async fn test_setstat_is_accepted_but_ignored() {
    use std::os::unix::fs::MetadataExt;

    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    common::upload(&mut backend, "modes.dat", b"data").await.unwrap();

    let before = std::fs::metadata(ctx.home.path().join("modes.dat"))
        .unwrap()
        .mode();

    let chmod = FileAttributes {
        permissions: Some(0o600),
        ..Default::default()
    };
    backend
        .setstat(40, "modes.dat".to_string(), chmod)
        .await
        .expect("setstat must be acknowledged");

    let chown = FileAttributes {
        uid: Some(1000),
        gid: Some(1000),
        ..Default::default()
    };
    backend
        .setstat(41, "modes.dat".to_string(), chown)
        .await
        .expect("chown must be acknowledged");

    // The host mode is exactly what it was after the upload
    let after = std::fs::metadata(ctx.home.path().join("modes.dat"))
        .unwrap()
        .mode();
    assert_eq!(before, after);

    let attrs = backend.stat(42, "modes.dat".to_string()).await.unwrap();
    assert_eq!(attrs.attrs.permissions, Some(after));
}

#[tokio::test]
async fn test_setstat_missing_path_fails() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    let err = backend
        .setstat(43, "ghost.dat".to_string(), FileAttributes::default())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);
}

#[tokio::test]
async fn test_read_on_unknown_handle() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    let err = backend
        .read(50, "bogus".to_string(), 0, 1024)
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);
}

#[tokio::test]
async fn test_open_missing_file_for_read() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    let err = backend
        .open(
            60,
            "missing.dat".to_string(),
            OpenFlags::READ,
            FileAttributes::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);
}

#[tokio::test]
async fn test_abandoned_upload_still_counted() {
    let ctx = common::context();
    {
        let mut backend = common::backend(&ctx);
        let handle = backend
            .open(
                70,
                "orphan.dat".to_string(),
                OpenFlags::WRITE | OpenFlags::CREATE,
                FileAttributes::default(),
            )
            .await
            .unwrap()
            .handle;
        backend
            .write(71, handle, 0, vec![9u8; 4096])
            .await
            .unwrap();
        // The session dies without closing the handle
        drop(backend);
    }
    // The scoped release committed the bytes that made it to disk
    assert_eq!(common::quota_counters(&ctx), (1, 4096));
    let (_, transfers) = ctx.registry.stats();
    assert_eq!(transfers, 0);
}
