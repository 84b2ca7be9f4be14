//! Global package cache.
//!
//! Downloaded packages are stored once per (name, version) as extracted
//! directories, with the verified integrity string in a sidecar file.
//! Original tarballs are kept content-addressed under `cas/` so a wiped
//! `node_modules` can be relinked without re-downloading anything.

use crate::config::Channel;
use crate::error::PkgError;
use crate::manifest::{self, Manifest, ManifestOptions};
use crate::paths::cache_dir;
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar file holding the verified integrity string for an extracted package.
const INTEGRITY_FILE: &str = ".integrity";

/// Package cache manager.
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    /// Create a cache for the given channel, rooted in the platform cache dir.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            root: cache_dir(channel).join("packages").join("npm"),
        }
    }

    /// Create a cache with an explicit root. Used by tests.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for the extracted contents of a package version.
    ///
    /// Scoped names keep their scope as a path component:
    /// `@scope/name` lives at `@scope/name/<version>/package`.
    #[must_use]
    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.version_dir(name, version).join("package")
    }

    /// The version directory (parent of `package/`).
    #[must_use]
    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        if let Some((scope, bare)) = name.split_once('/') {
            self.root.join(scope).join(bare).join(version)
        } else {
            self.root.join(name).join(version)
        }
    }

    /// Content-addressed path for a stored tarball.
    ///
    /// Keyed by the integrity string with filesystem-hostile characters
    /// replaced, so the same bytes are never stored twice.
    #[must_use]
    pub fn tarball_path(&self, integrity: &str) -> PathBuf {
        let sanitized: String = integrity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join("cas").join(format!("{sanitized}.tgz"))
    }

    /// Check whether a package version is extracted in the cache.
    #[must_use]
    pub fn is_cached(&self, name: &str, version: &str) -> bool {
        self.package_dir(name, version).is_dir()
    }

    /// Record the verified integrity for an extracted package.
    ///
    /// # Errors
    /// Returns an error if the sidecar cannot be written.
    pub fn write_integrity(
        &self,
        name: &str,
        version: &str,
        integrity: &str,
    ) -> Result<(), PkgError> {
        let path = self.version_dir(name, version).join(INTEGRITY_FILE);
        fern_util::fs::atomic_write(&path, integrity.as_bytes())?;
        Ok(())
    }

    /// Read the recorded integrity for a cached package, if any.
    #[must_use]
    pub fn read_integrity(&self, name: &str, version: &str) -> Option<String> {
        let path = self.version_dir(name, version).join(INTEGRITY_FILE);
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    /// All cached versions of a package, ascending.
    ///
    /// This is what lets offline modes resolve without a catalog fetch.
    #[must_use]
    pub fn cached_versions(&self, name: &str) -> Vec<Version> {
        let name_dir = if let Some((scope, bare)) = name.split_once('/') {
            self.root.join(scope).join(bare)
        } else {
            self.root.join(name)
        };

        let Ok(entries) = fs::read_dir(&name_dir) else {
            return Vec::new();
        };

        let mut versions: Vec<Version> = entries
            .flatten()
            .filter(|e| e.path().join("package").is_dir())
            .filter_map(|e| Version::parse(&e.file_name().to_string_lossy()).ok())
            .collect();
        versions.sort();
        versions
    }

    /// Read the manifest of a cached package.
    ///
    /// Offline resolution uses this to learn a cached package's own
    /// dependencies without a registry round-trip.
    ///
    /// # Errors
    /// Returns an error if the package is not cached or its manifest is invalid.
    pub fn read_cached_manifest(&self, name: &str, version: &str) -> Result<Manifest, PkgError> {
        let dir = self.package_dir(name, version);
        if !dir.is_dir() {
            return Err(PkgError::cache_error(format!(
                "'{name}@{version}' is not in the cache"
            )));
        }
        manifest::read_manifest(&dir, &ManifestOptions::default())
    }

    /// Ensure the cache root and CAS directory exist.
    ///
    /// # Errors
    /// Returns an error if the directories cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), PkgError> {
        fs::create_dir_all(self.root.join("cas"))?;
        Ok(())
    }
}
