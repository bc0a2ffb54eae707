//! Directory operation integration tests

mod common;

use russh_sftp::protocol::{FileAttributes, StatusCode};
use russh_sftp::server::Handler;

#[tokio::test]
async fn test_mkdir_readdir_roundtrip() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);

    backend
        .mkdir(1, "docs".to_string(), FileAttributes::default())
        .await
        .expect("mkdir");
    common::upload(&mut backend, "docs/a.txt", b"a").await.unwrap();
    common::upload(&mut backend, "docs/b.txt", b"bb").await.unwrap();

    let handle = backend.opendir(2, "docs".to_string()).await.unwrap().handle;
    let listing = backend.readdir(3, handle.clone()).await.unwrap();
    let mut names: Vec<String> = listing.files.iter().map(|f| f.filename.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);

    // The listing is exhausted on the second call
    let err = backend.readdir(4, handle.clone()).await.unwrap_err();
    assert_eq!(err, StatusCode::Eof);
    backend.close(5, handle).await.unwrap();
}

#[tokio::test]
async fn test_mkdir_existing_fails() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    backend
        .mkdir(1, "dup".to_string(), FileAttributes::default())
        .await
        .unwrap();
    let err = backend
        .mkdir(2, "dup".to_string(), FileAttributes::default())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::Failure);
}

#[tokio::test]
async fn test_rmdir_recursive_refunds_quota() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);

    backend
        .mkdir(1, "tree".to_string(), FileAttributes::default())
        .await
        .unwrap();
    backend
        .mkdir(2, "tree/sub".to_string(), FileAttributes::default())
        .await
        .unwrap();
    common::upload(&mut backend, "tree/one.dat", &vec![1u8; 100]).await.unwrap();
    common::upload(&mut backend, "tree/sub/two.dat", &vec![2u8; 200]).await.unwrap();
    assert_eq!(common::quota_counters(&ctx), (2, 300));

    backend.rmdir(3, "tree".to_string()).await.expect("rmdir");
    assert!(!ctx.home.path().join("tree").exists());
    assert_eq!(common::quota_counters(&ctx), (0, 0));
}

#[tokio::test]
async fn test_rmdir_of_virtual_root_refused() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    let err = backend.rmdir(1, "/".to_string()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    assert!(ctx.home.path().exists());
}

#[tokio::test]
async fn test_rename_file() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    common::upload(&mut backend, "old.dat", b"content").await.unwrap();

    backend
        .rename(1, "old.dat".to_string(), "new.dat".to_string())
        .await
        .expect("rename");
    assert!(!ctx.home.path().join("old.dat").exists());
    assert_eq!(common::download(&mut backend, "new.dat").await.unwrap(), b"content");

    // Rename never changes the counters
    assert_eq!(common::quota_counters(&ctx), (1, 7));
}

#[tokio::test]
async fn test_rename_onto_existing_target_fails() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    common::upload(&mut backend, "src.dat", b"1").await.unwrap();
    common::upload(&mut backend, "dst.dat", b"2").await.unwrap();

    let err = backend
        .rename(1, "src.dat".to_string(), "dst.dat".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::Failure);
}

#[tokio::test]
async fn test_rename_missing_source_fails() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    let err = backend
        .rename(1, "ghost.dat".to_string(), "new.dat".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);
}

#[tokio::test]
async fn test_realpath_is_virtualized() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);

    let name = backend.realpath(1, ".".to_string()).await.unwrap();
    assert_eq!(name.files[0].filename, "/");
    let name = backend.realpath(2, "/a/../b/c".to_string()).await.unwrap();
    assert_eq!(name.files[0].filename, "/b/c");
    let name = backend.realpath(3, "../../..".to_string()).await.unwrap();
    assert_eq!(name.files[0].filename, "/");
}

#[cfg(unix)]
#[tokio::test]
async fn test_readlink_inside_home() {
    let ctx = common::context();
    let mut backend = common::backend(&ctx);
    common::upload(&mut backend, "real.dat", b"x").await.unwrap();
    backend
        .symlink(1, "alias.dat".to_string(), "real.dat".to_string())
        .await
        .unwrap();

    let name = backend.readlink(2, "alias.dat".to_string()).await.unwrap();
    assert_eq!(name.files[0].filename, "/real.dat");
}

#[cfg(unix)]
#[tokio::test]
async fn test_readlink_escaping_link_hidden() {
    let ctx = common::context();
    std::os::unix::fs::symlink("/etc/passwd", ctx.home.path().join("leak")).unwrap();
    let mut backend = common::backend(&ctx);

    let err = backend.readlink(1, "leak".to_string()).await.unwrap_err();
    assert_eq!(err, StatusCode::NoSuchFile);
}
