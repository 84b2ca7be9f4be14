//! Workspace discovery for monorepos.
//!
//! Expands the `workspaces` glob patterns from the root manifest and reads
//! each member's own manifest, so workspace packages can participate in the
//! shared dependency graph without network access.

use crate::manifest::{self, Manifest, ManifestOptions};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A discovered workspace package.
#[derive(Debug, Clone)]
pub struct WorkspacePackage {
    /// Package name from its package.json.
    pub name: String,
    /// Version from its package.json ("0.0.0" when absent).
    pub version: String,
    /// Absolute path to the workspace directory.
    pub path: PathBuf,
    /// The member's parsed manifest (requirements, scripts).
    pub manifest: Manifest,
}

/// Workspace configuration: root plus discovered members.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSet {
    /// Root directory of the monorepo.
    pub root: PathBuf,
    /// Members keyed by package name, in name order.
    pub packages: BTreeMap<String, WorkspacePackage>,
}

impl WorkspaceSet {
    /// Check if a name belongs to a workspace member.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Get a member by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkspacePackage> {
        self.packages.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Discover workspace packages from the root manifest's glob patterns.
///
/// Globs that match nothing are skipped; directories without a readable
/// package.json are skipped. Discovery never fails the install.
#[must_use]
pub fn discover_workspaces(root: &Path, patterns: &[String], opts: &ManifestOptions) -> WorkspaceSet {
    let mut packages = BTreeMap::new();

    for pattern in patterns {
        let full_pattern = root.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        if let Ok(entries) = glob::glob(&pattern_str) {
            for entry in entries.flatten() {
                if let Some(pkg) = read_member(&entry, opts) {
                    packages.insert(pkg.name.clone(), pkg);
                }
            }
        }
    }

    WorkspaceSet {
        root: root.to_path_buf(),
        packages,
    }
}

/// Find the workspace root by walking up the directory tree.
///
/// Returns the first directory whose package.json has a "workspaces" field.
#[must_use]
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let manifest_path = current.join(manifest::MANIFEST_NAME);
        if manifest_path.exists() {
            if let Ok(content) = std::fs::read_to_string(&manifest_path) {
                if let Ok(json) = serde_json::from_str::<Value>(&content) {
                    if json.get("workspaces").is_some() {
                        return Some(current);
                    }
                }
            }
        }

        if !current.pop() {
            return None;
        }
    }
}

fn read_member(dir: &Path, opts: &ManifestOptions) -> Option<WorkspacePackage> {
    if !dir.is_dir() {
        return None;
    }

    let m = manifest::read_manifest(dir, opts).ok()?;
    if m.name == "unnamed" {
        return None;
    }

    Some(WorkspacePackage {
        name: m.name.clone(),
        version: m.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
        path: dir.to_path_buf(),
        manifest: m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_member(root: &Path, rel: &str, json: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), json).unwrap();
    }

    #[test]
    fn test_discover_members() {
        let root = tempdir().unwrap();
        write_member(
            root.path(),
            "packages/a",
            r#"{"name": "a", "version": "1.0.0"}"#,
        );
        write_member(
            root.path(),
            "packages/b",
            r#"{"name": "b", "version": "0.2.0", "dependencies": {"a": "workspace:*"}}"#,
        );

        let set = discover_workspaces(
            root.path(),
            &["packages/*".to_string()],
            &ManifestOptions::default(),
        );

        assert_eq!(set.packages.len(), 2);
        assert!(set.contains("a"));
        let b = set.get("b").unwrap();
        assert_eq!(b.version, "0.2.0");
        assert_eq!(b.manifest.requirements.len(), 1);
        assert_eq!(b.manifest.requirements[0].range, "workspace:*");
    }

    #[test]
    fn test_unnamed_member_skipped() {
        let root = tempdir().unwrap();
        write_member(root.path(), "packages/x", r#"{"version": "1.0.0"}"#);

        let set = discover_workspaces(
            root.path(),
            &["packages/*".to_string()],
            &ManifestOptions::default(),
        );
        assert!(set.is_empty());
    }

    #[test]
    fn test_find_workspace_root() {
        let root = tempdir().unwrap();
        fs::write(
            root.path().join("package.json"),
            r#"{"name": "mono", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();

        let nested = root.path().join("packages").join("deep").join("deeper");
        fs::create_dir_all(&nested).unwrap();

        let found = find_workspace_root(&nested).unwrap();
        assert_eq!(found, root.path());
    }
}
