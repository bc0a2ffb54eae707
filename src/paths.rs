//! Virtual-root path translation
//!
//! NIST 800-53: SI-10 (Input Validation), AC-3 (Access Enforcement)
//! STIG: V-222396, V-222596
//! Implementation: Translates client-supplied virtual paths into absolute
//! host paths confined to the user's home. Client paths are normalized
//! lexically first, so `../../x` lands at the virtual root instead of
//! escaping it, then the joined result is canonicalized and checked for
//! containment, which also defeats symlink traversal out of the home.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Per-session path translator rooted at a user's canonical home
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for a home directory
    ///
    /// The home is canonicalized (symlinks followed to a real absolute
    /// path); it must exist.
    pub fn new(home_dir: &Path) -> Result<Self> {
        let root = home_dir.canonicalize().map_err(|e| {
            Error::Config(format!("cannot canonicalize home {:?}: {}", home_dir, e))
        })?;
        Ok(Self { root })
    }

    /// The canonical root of this user's virtual filesystem
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically normalize a virtual path to a relative path under the root
    ///
    /// Leading separators are stripped, `.` components dropped, and `..`
    /// components clamped at the virtual root. The result never points
    /// above the root by construction.
    pub fn clean_virtual(virtual_path: &str) -> PathBuf {
        let mut cleaned = PathBuf::new();
        for component in Path::new(virtual_path).components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    cleaned.pop();
                }
                Component::Normal(part) => cleaned.push(part),
            }
        }
        cleaned
    }

    /// Resolve a virtual path that must already exist
    ///
    /// Follows symlinks all the way: a symlink inside the home pointing
    /// outside of it fails the containment check here, before any host
    /// filesystem operation sees the path.
    ///
    /// # Errors
    ///
    /// `NotFound` when the path does not exist, `PathEscape` when the
    /// canonical result lies outside the root.
    pub fn resolve_existing(&self, virtual_path: &str) -> Result<PathBuf> {
        validate_raw(virtual_path)?;
        let joined = self.root.join(Self::clean_virtual(virtual_path));
        let canonical = joined.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(virtual_path)
            } else {
                Error::Io(e)
            }
        })?;
        self.ensure_contained(&canonical, virtual_path)?;
        Ok(canonical)
    }

    /// Resolve a virtual path without following its final component
    ///
    /// Used for operations that create a new leaf (open-for-write, mkdir,
    /// symlink, rename target) and for operations that must address a
    /// symlink itself (lstat, readlink, remove). The parent directory is
    /// canonicalized and containment-checked; the leaf is appended as-is.
    ///
    /// # Errors
    ///
    /// `NotFound` when the parent does not exist, `PathEscape` when the
    /// canonical parent lies outside the root.
    pub fn resolve_leaf(&self, virtual_path: &str) -> Result<PathBuf> {
        validate_raw(virtual_path)?;
        let cleaned = Self::clean_virtual(virtual_path);
        let leaf = match cleaned.file_name() {
            Some(name) => name.to_os_string(),
            // The cleaned path collapsed to the virtual root itself
            None => return Ok(self.root.clone()),
        };

        let parent_joined = match cleaned.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.root.join(parent),
            _ => self.root.clone(),
        };
        let canonical_parent = parent_joined.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(virtual_path)
            } else {
                Error::Io(e)
            }
        })?;
        self.ensure_contained(&canonical_parent, virtual_path)?;
        Ok(canonical_parent.join(leaf))
    }

    /// Map an absolute host path back to its virtual form
    pub fn virtualize(&self, absolute: &Path) -> String {
        match absolute.strip_prefix(&self.root) {
            Ok(rest) if rest.as_os_str().is_empty() => "/".to_string(),
            Ok(rest) => format!("/{}", rest.display()),
            Err(_) => "/".to_string(),
        }
    }

    fn ensure_contained(&self, canonical: &Path, virtual_path: &str) -> Result<()> {
        // Path::starts_with compares whole components, so /srv/alice-extra
        // does not pass for a root of /srv/alice.
        if canonical == self.root || canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(Error::PathEscape(format!(
                "{} resolves to {:?}",
                virtual_path, canonical
            )))
        }
    }
}

fn validate_raw(virtual_path: &str) -> Result<()> {
    if virtual_path.contains('\0') {
        return Err(Error::InvalidPath("path contains null bytes".into()));
    }
    Ok(())
}
