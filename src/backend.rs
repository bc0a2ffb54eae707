//! SFTP filesystem backend
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-10 (Input Validation), SI-11 (Error Handling)
//! STIG: V-222396, V-222596
//! Implementation: Realizes the SFTP operation set behind the protocol
//! handler. Every request resolves its virtual path through the user's
//! root, consults the per-user policy, performs the host call and maps
//! the outcome to an SFTP status. Request errors are returned to the
//! client and never tear down the session.

use crate::hooks::{HookAction, HookDispatcher, HookEvent};
use crate::policy::{self, SftpOperation};
use crate::quota::QuotaAccountant;
use crate::registry::{ConnectionRegistry, TransferDirection};
use crate::store::UserStore;
use crate::transfer::{TransferContext, TransferHandle};
use crate::user::User;
use crate::{Error, PathResolver, Result};
use chrono::Utc;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Open handles per session
const MAX_OPEN_HANDLES: usize = 256;

/// Directory entries per READDIR response
const READDIR_CHUNK: usize = 128;

enum BackendHandle {
    File(TransferHandle),
    Dir(DirHandle),
}

struct DirHandle {
    entries: Vec<File>,
}

/// Per-session filesystem backend, keyed to one authenticated user
pub struct SftpBackend {
    user: User,
    resolver: PathResolver,
    connection_id: String,
    store: Arc<dyn UserStore>,
    registry: Arc<ConnectionRegistry>,
    accountant: Arc<QuotaAccountant>,
    hooks: Arc<HookDispatcher>,
    handles: HashMap<String, BackendHandle>,
    next_handle_id: u64,
}

impl SftpBackend {
    /// Build the backend for a session
    ///
    /// Creates the user's home (with parents) when it does not exist yet,
    /// so a freshly provisioned account can log in immediately.
    pub fn new(
        user: User,
        connection_id: String,
        store: Arc<dyn UserStore>,
        registry: Arc<ConnectionRegistry>,
        accountant: Arc<QuotaAccountant>,
        hooks: Arc<HookDispatcher>,
    ) -> Result<Self> {
        if !user.home_dir.exists() {
            std::fs::create_dir_all(&user.home_dir)?;
            info!(
                event = "home_directory_created",
                username = %user.username,
                home = ?user.home_dir,
                "Created missing home directory"
            );
        }
        let resolver = PathResolver::new(&user.home_dir)?;
        Ok(Self {
            user,
            resolver,
            connection_id,
            store,
            registry,
            accountant,
            hooks,
            handles: HashMap::new(),
            next_handle_id: 1,
        })
    }

    /// The canonical root of the session's virtual filesystem
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    fn next_handle(&mut self) -> String {
        let id = self.next_handle_id;
        self.next_handle_id += 1;
        format!("{:x}", id)
    }

    fn touch(&self) {
        self.registry.touch(&self.connection_id);
    }

    /// Map an internal error to the client status, logging security events
    fn reject(&self, op: &'static str, path: &str, err: Error) -> StatusCode {
        if err.is_security_event() {
            warn!(
                event = "sftp_request_denied",
                op,
                path,
                username = %self.user.username,
                error = %err,
                "Request denied"
            );
        } else {
            debug!(op, path, error = %err, "Request failed");
        }
        err.to_status_code()
    }

    fn ok_status(id: u32) -> Status {
        Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Success".to_string(),
            language_tag: "en".to_string(),
        }
    }

    /// The account as the store sees it right now; counters read at open
    /// time must not be stale
    fn fresh_user(&self) -> Result<User> {
        self.store
            .get_by_id(self.user.id)
            .map_err(|_| Error::PermissionDenied(format!("user '{}' no longer exists", self.user.username)))
    }

    fn emit_delete_hook(&self, virtual_path: &str, absolute_path: &Path, size: u64) {
        self.hooks.enqueue(HookEvent {
            action: HookAction::Delete,
            username: self.user.username.clone(),
            virtual_path: virtual_path.to_string(),
            absolute_path: absolute_path.to_path_buf(),
            size,
            timestamp: Utc::now(),
        });
    }

    async fn open_transfer(
        &mut self,
        filename: &str,
        pflags: OpenFlags,
    ) -> Result<String> {
        let wants_write = pflags.intersects(
            OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        );
        let user = self.fresh_user()?;

        let (absolute, direction, replaced_size) = if wants_write {
            let absolute = self.resolver.resolve_leaf(filename)?;
            let (absolute, replaced_size) = match std::fs::symlink_metadata(&absolute) {
                Ok(md) if md.is_dir() => {
                    return Err(Error::Other(format!("{} is a directory", filename)))
                }
                Ok(md) if md.file_type().is_symlink() => {
                    // The leaf already exists as a symlink; the open would
                    // follow it, so the real target must pass the same
                    // containment check reads get. A link that leaves the
                    // home fails as no-such-file here.
                    let resolved = self.resolver.resolve_existing(filename)?;
                    let target_md = std::fs::metadata(&resolved)?;
                    if target_md.is_dir() {
                        return Err(Error::Other(format!("{} is a directory", filename)));
                    }
                    (resolved, Some(target_md.len()))
                }
                Ok(md) => (absolute, Some(md.len())),
                Err(_) => (absolute, None),
            };
            policy::check_open_for_write(&user, replaced_size.is_some())?;
            (absolute, TransferDirection::Upload, replaced_size)
        } else {
            policy::check(&user, SftpOperation::OpenRead)?;
            let absolute = self.resolver.resolve_existing(filename)?;
            let md = std::fs::metadata(&absolute)?;
            if !md.is_file() {
                return Err(Error::not_found(filename));
            }
            (absolute, TransferDirection::Download, None)
        };

        if self.handles.len() >= MAX_OPEN_HANDLES {
            return Err(Error::Other("too many open handles".into()));
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.read(pflags.contains(OpenFlags::READ) || !wants_write);
        if pflags.contains(OpenFlags::WRITE) {
            options.write(true);
        }
        if pflags.contains(OpenFlags::APPEND) {
            options.append(true);
        }
        if pflags.contains(OpenFlags::CREATE) {
            options.create(true);
        }
        if pflags.contains(OpenFlags::TRUNCATE) {
            options.truncate(true);
        }
        if pflags.contains(OpenFlags::EXCLUDE) {
            options.create_new(true);
        }
        let file = options.open(&absolute).await?;

        let virtual_path = self.resolver.virtualize(&absolute);
        let transfer_id = self
            .registry
            .add_transfer(&self.connection_id, direction, &virtual_path, &absolute)
            .ok_or_else(|| Error::Connection("connection no longer registered".into()))?;

        let bandwidth_kbps = match direction {
            TransferDirection::Upload => user.upload_kbps,
            TransferDirection::Download => user.download_kbps,
        };
        let handle = TransferHandle::new(
            file,
            TransferContext {
                direction,
                virtual_path,
                absolute_path: absolute,
                user_id: user.id,
                username: user.username.clone(),
                connection_id: self.connection_id.clone(),
                transfer_id,
                quota_bytes: user.quota_bytes,
                used_bytes_at_open: user.used_bytes,
                replaced_size: if wants_write { replaced_size } else { None },
                bandwidth_kbps,
            },
            self.registry.clone(),
            self.accountant.clone(),
            self.hooks.clone(),
        );

        let handle_id = self.next_handle();
        self.handles
            .insert(handle_id.clone(), BackendHandle::File(handle));
        Ok(handle_id)
    }
}

impl russh_sftp::server::Handler for SftpBackend {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> std::result::Result<Version, Self::Error> {
        debug!(
            client_version = version,
            username = %self.user.username,
            "SFTP subsystem initialized"
        );
        self.touch();
        Ok(Version {
            version: russh_sftp::protocol::VERSION,
            extensions: HashMap::new(),
        })
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> std::result::Result<Handle, Self::Error> {
        self.touch();
        match self.open_transfer(&filename, pflags).await {
            Ok(handle) => Ok(Handle { id, handle }),
            Err(e) => Err(self.reject("open", &filename, e)),
        }
    }

    async fn close(&mut self, id: u32, handle: String) -> std::result::Result<Status, Self::Error> {
        self.touch();
        match self.handles.remove(&handle) {
            Some(BackendHandle::File(transfer)) => {
                transfer.close();
                Ok(Self::ok_status(id))
            }
            Some(BackendHandle::Dir(_)) => Ok(Self::ok_status(id)),
            None => Err(StatusCode::NoSuchFile),
        }
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> std::result::Result<Data, Self::Error> {
        self.touch();
        let transfer = match self.handles.get_mut(&handle) {
            Some(BackendHandle::File(transfer)) => transfer,
            _ => return Err(StatusCode::NoSuchFile),
        };
        let data = transfer
            .read_chunk(offset, len)
            .await
            .map_err(|e| e.to_status_code())?;
        if data.is_empty() {
            return Err(StatusCode::Eof);
        }
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let connection_id = self.connection_id.clone();
        let username = self.user.username.clone();
        let transfer = match self.handles.get_mut(&handle) {
            Some(BackendHandle::File(transfer)) => transfer,
            _ => return Err(StatusCode::NoSuchFile),
        };
        match transfer.write_chunk(offset, &data).await {
            Ok(()) => Ok(Self::ok_status(id)),
            Err(e) => {
                if e.is_security_event() {
                    warn!(
                        event = "sftp_request_denied",
                        op = "write",
                        connection_id = %connection_id,
                        username = %username,
                        error = %e,
                        "Write denied"
                    );
                }
                Err(e.to_status_code())
            }
        }
    }

    async fn stat(
        &mut self,
        id: u32,
        path: String,
    ) -> std::result::Result<Attrs, Self::Error> {
        self.touch();
        // Follows symlinks: resolution canonicalizes all the way, so a
        // link pointing outside the home fails containment here
        let result = policy::check(&self.user, SftpOperation::ListItems)
            .and_then(|_| self.resolver.resolve_existing(&path))
            .and_then(|p| std::fs::metadata(&p).map_err(|_| Error::not_found(&path)));
        match result {
            Ok(md) => Ok(Attrs {
                id,
                attrs: metadata_to_attrs(&md),
            }),
            Err(e) => Err(self.reject("stat", &path, e)),
        }
    }

    async fn lstat(
        &mut self,
        id: u32,
        path: String,
    ) -> std::result::Result<Attrs, Self::Error> {
        self.touch();
        let result = policy::check(&self.user, SftpOperation::ListItems)
            .and_then(|_| self.resolver.resolve_leaf(&path))
            .and_then(|p| std::fs::symlink_metadata(&p).map_err(|_| Error::not_found(&path)));
        match result {
            Ok(md) => Ok(Attrs {
                id,
                attrs: metadata_to_attrs(&md),
            }),
            Err(e) => Err(self.reject("lstat", &path, e)),
        }
    }

    async fn fstat(
        &mut self,
        id: u32,
        handle: String,
    ) -> std::result::Result<Attrs, Self::Error> {
        self.touch();
        let path = match self.handles.get(&handle) {
            Some(BackendHandle::File(transfer)) => transfer.absolute_path().clone(),
            _ => return Err(StatusCode::NoSuchFile),
        };
        match std::fs::metadata(&path) {
            Ok(md) => Ok(Attrs {
                id,
                attrs: metadata_to_attrs(&md),
            }),
            Err(_) => Err(StatusCode::NoSuchFile),
        }
    }

    /// Attribute changes are acknowledged and deliberately not applied:
    /// host mode and ownership stay behind the virtualization barrier
    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let result = self
            .resolver
            .resolve_leaf(&path)
            .and_then(|p| std::fs::symlink_metadata(&p).map_err(|_| Error::not_found(&path)));
        match result {
            Ok(_) => {
                debug!(
                    event = "setstat_ignored",
                    path,
                    username = %self.user.username,
                    "Attribute change acknowledged without effect"
                );
                Ok(Self::ok_status(id))
            }
            Err(e) => Err(self.reject("setstat", &path, e)),
        }
    }

    async fn fsetstat(
        &mut self,
        id: u32,
        handle: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        if self.handles.contains_key(&handle) {
            Ok(Self::ok_status(id))
        } else {
            Err(StatusCode::NoSuchFile)
        }
    }

    async fn opendir(
        &mut self,
        id: u32,
        path: String,
    ) -> std::result::Result<Handle, Self::Error> {
        self.touch();
        if let Err(e) = policy::check(&self.user, SftpOperation::ListItems) {
            return Err(self.reject("opendir", &path, e));
        }
        let absolute = match self.resolver.resolve_existing(&path) {
            Ok(p) => p,
            Err(e) => return Err(self.reject("opendir", &path, e)),
        };
        if self.handles.len() >= MAX_OPEN_HANDLES {
            return Err(StatusCode::Failure);
        }

        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&absolute).await {
            Ok(rd) => rd,
            Err(e) => return Err(self.reject("opendir", &path, Error::Io(e))),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Ok(md) = entry.metadata().await {
                entries.push(File::new(
                    entry.file_name().to_string_lossy().to_string(),
                    metadata_to_attrs(&md),
                ));
            }
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));

        let handle_id = self.next_handle();
        self.handles.insert(
            handle_id.clone(),
            BackendHandle::Dir(DirHandle { entries }),
        );
        Ok(Handle {
            id,
            handle: handle_id,
        })
    }

    async fn readdir(
        &mut self,
        id: u32,
        handle: String,
    ) -> std::result::Result<Name, Self::Error> {
        self.touch();
        let dir = match self.handles.get_mut(&handle) {
            Some(BackendHandle::Dir(dir)) => dir,
            _ => return Err(StatusCode::NoSuchFile),
        };
        if dir.entries.is_empty() {
            return Err(StatusCode::Eof);
        }
        let count = READDIR_CHUNK.min(dir.entries.len());
        let files: Vec<File> = dir.entries.drain(..count).collect();
        Ok(Name { id, files })
    }

    async fn remove(
        &mut self,
        id: u32,
        filename: String,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let result = async {
            policy::check(&self.user, SftpOperation::Remove)?;
            let absolute = self.resolver.resolve_leaf(&filename)?;
            let md = std::fs::symlink_metadata(&absolute)
                .map_err(|_| Error::not_found(&filename))?;
            if md.is_dir() {
                return Err(Error::Other(format!("{} is a directory", filename)));
            }
            let is_file = md.is_file();
            let size = if is_file { md.len() } else { 0 };
            tokio::fs::remove_file(&absolute).await?;
            if let Err(e) = self.accountant.refund(self.user.id, size, is_file) {
                warn!(
                    event = "quota_refund_failed",
                    username = %self.user.username,
                    error = %e,
                    "Failed to refund quota after remove"
                );
            }
            self.emit_delete_hook(&self.resolver.virtualize(&absolute), &absolute, size);
            info!(
                event = "file_removed",
                username = %self.user.username,
                path = %filename,
                size,
                "File removed"
            );
            Ok(())
        }
        .await;
        match result {
            Ok(()) => Ok(Self::ok_status(id)),
            Err(e) => Err(self.reject("remove", &filename, e)),
        }
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let result = async {
            policy::check(&self.user, SftpOperation::Mkdir)?;
            let absolute = self.resolver.resolve_leaf(&path)?;
            tokio::fs::create_dir(&absolute).await?;
            Ok(())
        }
        .await;
        match result {
            Ok(()) => Ok(Self::ok_status(id)),
            Err(e) => Err(self.reject("mkdir", &path, e)),
        }
    }

    async fn rmdir(
        &mut self,
        id: u32,
        path: String,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let result = async {
            policy::check(&self.user, SftpOperation::Remove)?;
            let absolute = self.resolver.resolve_existing(&path)?;
            if absolute == self.resolver.root() {
                return Err(Error::PermissionDenied(
                    "cannot remove the virtual root".into(),
                ));
            }
            if !std::fs::symlink_metadata(&absolute)?.is_dir() {
                return Err(Error::not_found(&path));
            }

            // Directory removal is recursive; a mid-way failure leaves
            // partial state but refunds everything already deleted.
            let mut removed = (0u64, 0u64);
            let outcome = remove_tree(absolute.clone(), &mut removed).await;
            if removed.0 > 0 || removed.1 > 0 {
                if let Err(e) =
                    self.accountant
                        .refund_tree(self.user.id, removed.0, removed.1)
                {
                    warn!(
                        event = "quota_refund_failed",
                        username = %self.user.username,
                        error = %e,
                        "Failed to refund quota after rmdir"
                    );
                }
            }
            outcome?;
            self.emit_delete_hook(&self.resolver.virtualize(&absolute), &absolute, removed.1);
            info!(
                event = "directory_removed",
                username = %self.user.username,
                path = %path,
                files = removed.0,
                bytes = removed.1,
                "Directory removed"
            );
            Ok(())
        }
        .await;
        match result {
            Ok(()) => Ok(Self::ok_status(id)),
            Err(e) => Err(self.reject("rmdir", &path, e)),
        }
    }

    async fn realpath(
        &mut self,
        id: u32,
        path: String,
    ) -> std::result::Result<Name, Self::Error> {
        self.touch();
        let cleaned = PathResolver::clean_virtual(&path);
        let virtual_form = if cleaned.as_os_str().is_empty() {
            "/".to_string()
        } else {
            format!("/{}", cleaned.display())
        };
        Ok(Name {
            id,
            files: vec![File::dummy(virtual_form)],
        })
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let result = async {
            policy::check(&self.user, SftpOperation::Rename)?;
            let old_abs = self.resolver.resolve_leaf(&oldpath)?;
            let old_md = std::fs::symlink_metadata(&old_abs)
                .map_err(|_| Error::not_found(&oldpath))?;
            let new_abs = self.resolver.resolve_leaf(&newpath)?;
            if std::fs::symlink_metadata(&new_abs).is_ok() {
                return Err(Error::Other(format!("{} already exists", newpath)));
            }

            match tokio::fs::rename(&old_abs, &new_abs).await {
                Ok(()) => Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EXDEV) && old_md.is_file() => {
                    // Cross-device rename of a regular file: copy, then
                    // delete the source. Quota is replace-in-place, the
                    // bytes stay attributed to the same home.
                    tokio::fs::copy(&old_abs, &new_abs).await?;
                    tokio::fs::remove_file(&old_abs).await?;
                    Ok(())
                }
                Err(e) => Err(Error::Io(e)),
            }?;
            info!(
                event = "file_renamed",
                username = %self.user.username,
                from = %oldpath,
                to = %newpath,
                "Renamed"
            );
            Ok(())
        }
        .await;
        match result {
            Ok(()) => Ok(Self::ok_status(id)),
            Err(e) => Err(self.reject("rename", &oldpath, e)),
        }
    }

    #[cfg(unix)]
    async fn readlink(
        &mut self,
        id: u32,
        path: String,
    ) -> std::result::Result<Name, Self::Error> {
        self.touch();
        let result = async {
            policy::check(&self.user, SftpOperation::ListItems)?;
            let absolute = self.resolver.resolve_leaf(&path)?;
            let target = tokio::fs::read_link(&absolute)
                .await
                .map_err(|_| Error::not_found(&path))?;

            let resolved_target = if target.is_absolute() {
                lexical_normalize(&target)
            } else {
                let base = absolute.parent().unwrap_or(self.resolver.root());
                lexical_normalize(&base.join(&target))
            };
            // A link that leaves the virtual root is unreadable, and its
            // existence is not confirmed to the client.
            if !resolved_target.starts_with(self.resolver.root()) {
                return Err(Error::PathEscape(format!(
                    "{} points to {:?}",
                    path, resolved_target
                )));
            }
            Ok(self.resolver.virtualize(&resolved_target))
        }
        .await;
        match result {
            Ok(virtual_target) => Ok(Name {
                id,
                files: vec![File::dummy(virtual_target)],
            }),
            Err(e) => Err(self.reject("readlink", &path, e)),
        }
    }

    #[cfg(unix)]
    async fn symlink(
        &mut self,
        id: u32,
        linkpath: String,
        targetpath: String,
    ) -> std::result::Result<Status, Self::Error> {
        self.touch();
        let result = async {
            policy::check(&self.user, SftpOperation::Symlink)?;
            let link_abs = self.resolver.resolve_leaf(&linkpath)?;
            if std::fs::symlink_metadata(&link_abs).is_ok() {
                return Err(Error::Other(format!("{} already exists", linkpath)));
            }
            // The target is stored verbatim; reading through the link is
            // what the containment check gates.
            tokio::fs::symlink(Path::new(&targetpath), &link_abs).await?;
            Ok(())
        }
        .await;
        match result {
            Ok(()) => Ok(Self::ok_status(id)),
            Err(e) => Err(self.reject("symlink", &linkpath, e)),
        }
    }
}

impl Drop for SftpBackend {
    /// Channel teardown with handles still open releases every transfer
    /// through its scoped path
    fn drop(&mut self) {
        let open = self.handles.len();
        if open > 0 {
            debug!(
                event = "session_handles_released",
                connection_id = %self.connection_id,
                open,
                "Releasing handles on session end"
            );
            self.handles.clear();
        }
    }
}

/// Depth-first removal that counts what it deletes
///
/// `removed` accumulates (files, bytes) across the whole walk so the
/// caller can refund even when the walk errors part-way.
fn remove_tree<'a>(
    dir: PathBuf,
    removed: &'a mut (u64, u64),
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let md = entry.metadata().await?;
            if md.is_dir() {
                remove_tree(entry.path(), removed).await?;
            } else {
                let counted = md.is_file();
                let len = md.len();
                tokio::fs::remove_file(entry.path()).await?;
                if counted {
                    removed.0 += 1;
                    removed.1 += len;
                }
            }
        }
        tokio::fs::remove_dir(&dir).await?;
        Ok(())
    })
}

/// Collapse `.` and `..` lexically in an absolute path
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

fn metadata_to_attrs(metadata: &std::fs::Metadata) -> FileAttributes {
    let mut attrs = FileAttributes {
        size: Some(metadata.len()),
        ..Default::default()
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        attrs.permissions = Some(metadata.mode());
        attrs.uid = Some(metadata.uid());
        attrs.gid = Some(metadata.gid());
        attrs.atime = Some(metadata.atime() as u32);
        attrs.mtime = Some(metadata.mtime() as u32);
    }
    #[cfg(not(unix))]
    {
        attrs.mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32);
    }
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        attrs.set_dir(true);
    } else if file_type.is_symlink() {
        attrs.set_symlink(true);
    } else {
        attrs.set_regular(true);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(
            lexical_normalize(Path::new("/a/../../etc")),
            PathBuf::from("/etc")
        );
    }
}
