//! Linkers: materialize a resolved graph into `node_modules`.
//!
//! Two closed strategies implement one [`Linker`] capability. The strategy
//! is selected once per project from configuration; nothing branches on it
//! per node.

pub mod hoisted;
pub mod isolated;

use crate::cache::PackageCache;
use crate::error::PkgError;
use crate::graph::Graph;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use hoisted::HoistedLinker;
pub use isolated::IsolatedLinker;

/// Which linking strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkerKind {
    /// Flat `node_modules` with nested overrides for conflicts.
    #[default]
    Hoisted,
    /// Content-addressed store with symlinked consumers.
    Isolated,
}

impl LinkerKind {
    /// Parse a configured linker name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hoisted" => Some(Self::Hoisted),
            "isolated" => Some(Self::Isolated),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hoisted => "hoisted",
            Self::Isolated => "isolated",
        }
    }

    /// Run the selected strategy.
    ///
    /// # Errors
    /// Returns an error if linking fails.
    pub fn link(self, request: &LinkRequest<'_>) -> Result<LinkReport, PkgError> {
        match self {
            Self::Hoisted => HoistedLinker.link(request),
            Self::Isolated => IsolatedLinker.link(request),
        }
    }
}

/// Everything a linker needs.
#[derive(Debug)]
pub struct LinkRequest<'a> {
    /// Project root (parent of `node_modules`).
    pub root: &'a Path,
    pub graph: &'a Graph,
    pub cache: &'a PackageCache,
}

/// What a linker did.
#[derive(Debug, Default)]
pub struct LinkReport {
    /// Entries placed into `node_modules` trees.
    pub linked: usize,
    /// Store directories populated (isolated strategy only).
    pub store_entries: usize,
}

/// A linking strategy.
pub trait Linker {
    /// Materialize the graph under the request's root.
    ///
    /// # Errors
    /// Returns an error if the tree cannot be built.
    fn link(&self, request: &LinkRequest<'_>) -> Result<LinkReport, PkgError>;
}

/// Compute the entry path for a package name inside a `node_modules`
/// directory, creating the scope directory for scoped names.
pub(crate) fn entry_path(node_modules: &Path, name: &str) -> Result<PathBuf, PkgError> {
    if let Some((scope, bare)) = name.split_once('/') {
        let scope_dir = node_modules.join(scope);
        fs::create_dir_all(&scope_dir).map_err(|e| {
            PkgError::link_failed(format!("Failed to create scope directory {scope}: {e}"))
        })?;
        Ok(scope_dir.join(bare))
    } else {
        Ok(node_modules.join(name))
    }
}

/// Replace whatever occupies a link path with a symlink to `target`.
///
/// An existing symlink is replaced silently. An existing real file or
/// directory is a filesystem conflict and fatal; the linker never deletes
/// data it does not own.
pub(crate) fn force_symlink(target: &Path, link: &Path) -> Result<(), PkgError> {
    if let Ok(metadata) = fs::symlink_metadata(link) {
        if metadata.file_type().is_symlink() {
            remove_symlink(link)?;
        } else {
            return Err(PkgError::fs_conflict(link));
        }
    }

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }

    create_dir_link(target, link)
}

fn remove_symlink(path: &Path) -> Result<(), PkgError> {
    #[cfg(unix)]
    let result = fs::remove_file(path);
    #[cfg(windows)]
    let result = fs::remove_dir(path).or_else(|_| fs::remove_file(path));

    result.map_err(|e| PkgError::link_failed(format!("Failed to remove existing symlink: {e}")))
}

/// Create a directory link (symlink on Unix, directory symlink on Windows).
pub(crate) fn create_dir_link(target: &Path, link: &Path) -> Result<(), PkgError> {
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(target, link);
    #[cfg(windows)]
    let result = std::os::windows::fs::symlink_dir(target, link);

    result.map_err(|e| map_symlink_error(&e, target, link))
}

fn map_symlink_error(e: &io::Error, target: &Path, link: &Path) -> PkgError {
    match e.kind() {
        io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied => {
            PkgError::symlink_unsupported(format!(
                "Cannot create symlink at {}: {e}",
                link.display()
            ))
        }
        _ => PkgError::link_failed(format!(
            "Failed to create symlink from {} to {}: {e}",
            link.display(),
            target.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_linker_kind() {
        assert_eq!(LinkerKind::parse("hoisted"), Some(LinkerKind::Hoisted));
        assert_eq!(LinkerKind::parse("isolated"), Some(LinkerKind::Isolated));
        assert_eq!(LinkerKind::parse("pnp"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_force_symlink_replaces_symlink_but_not_dir() {
        let dir = tempdir().unwrap();
        let target_a = dir.path().join("a");
        let target_b = dir.path().join("b");
        fs::create_dir_all(&target_a).unwrap();
        fs::create_dir_all(&target_b).unwrap();

        let link = dir.path().join("link");
        force_symlink(&target_a, &link).unwrap();
        force_symlink(&target_b, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target_b);

        let occupied = dir.path().join("occupied");
        fs::create_dir_all(&occupied).unwrap();
        let err = force_symlink(&target_a, &occupied).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_FS_CONFLICT);
    }

    #[test]
    fn test_entry_path_scoped() {
        let dir = tempdir().unwrap();
        let nm = dir.path().join("node_modules");
        fs::create_dir_all(&nm).unwrap();

        let path = entry_path(&nm, "@scope/pkg").unwrap();
        assert_eq!(path, nm.join("@scope").join("pkg"));
        assert!(nm.join("@scope").is_dir());

        assert_eq!(entry_path(&nm, "plain").unwrap(), nm.join("plain"));
    }
}
