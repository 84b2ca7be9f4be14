//! Lockfile types for deterministic package installation.
//!
//! The lockfile records exact versions and integrity hashes for every package
//! in the dependency tree, enabling reproducible installs across environments.
//! Serialization is fully deterministic: all maps are `BTreeMap` and no
//! timestamps or environment data are recorded, so re-saving an unchanged
//! resolution produces byte-identical output.
//!
//! ## File Format
//!
//! The lockfile is a JSON file named `fern.lock`:
//!
//! ```json
//! {
//!   "lockfile_version": 1,
//!   "root": { "name": "my-project", "version": "1.0.0" },
//!   "packages": { ... },
//!   "dependencies": { ... }
//! }
//! ```

use crate::graph::{Graph, Resolution};
use crate::manifest::DepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Schema version for the lockfile format.
///
/// Older versions are never migrated silently; a mismatch is an error.
pub const PKG_LOCK_SCHEMA_VERSION: u32 = 1;

/// The lockfile filename.
pub const LOCKFILE_NAME: &str = "fern.lock";

/// Lockfile error codes.
pub mod codes {
    /// Lockfile does not exist.
    pub const PKG_LOCK_NOT_FOUND: &str = "PKG_LOCK_NOT_FOUND";
    /// Lockfile is not valid JSON or cannot be read.
    pub const PKG_LOCK_INVALID_JSON: &str = "PKG_LOCK_INVALID_JSON";
    /// Lockfile schema version is not supported.
    pub const PKG_LOCK_VERSION_MISMATCH: &str = "PKG_LOCK_VERSION_MISMATCH";
    /// Lockfile no longer matches the manifests under a frozen install.
    pub const PKG_LOCK_STALE: &str = "PKG_LOCK_STALE";
    /// Lockfile could not be written.
    pub const PKG_LOCK_WRITE_FAILED: &str = "PKG_LOCK_WRITE_FAILED";
}

/// Root project identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRoot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
}

impl LockRoot {
    #[must_use]
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// A direct dependency of the root project or a workspace member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDep {
    /// The version range as declared in package.json.
    pub range: String,
    /// Dependency kind ("dep", "dev", "optional", "peer").
    pub kind: String,
    /// Identity key of the package this resolved to.
    pub resolved: String,
}

/// One resolved package in the lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPackage {
    pub version: String,
    /// Integrity hash from the registry (empty for workspace packages).
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub integrity: String,
    /// How the package was resolved. Omitted for plain registry packages.
    #[serde(skip_serializing_if = "is_default_resolution", default)]
    pub resolution: Resolution,
    /// The package's own dependency ranges, so frozen installs never need
    /// to re-contact the registry.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub peer_dependencies: BTreeMap<String, String>,
}

fn is_default_resolution(r: &Resolution) -> bool {
    *r == Resolution::default()
}

/// The complete lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    /// Schema version. Must match [`PKG_LOCK_SCHEMA_VERSION`].
    pub lockfile_version: u32,
    pub root: LockRoot,
    /// Direct dependencies of the root project, by name. Mirrors the root
    /// manifest; workspace bindings live in `workspaces`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub dependencies: BTreeMap<String, LockDep>,
    /// Workspace members bound into the graph, by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub workspaces: BTreeMap<String, LockDep>,
    /// Every package in the tree, keyed by identity (`name@version`,
    /// `name@workspace:path`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub packages: BTreeMap<String, LockPackage>,
    /// Committed patches, keyed by `name@version`, valued by the
    /// root-relative patch file path.
    #[serde(
        rename = "patchedDependencies",
        skip_serializing_if = "BTreeMap::is_empty",
        default
    )]
    pub patched: BTreeMap<String, String>,
}

impl Lockfile {
    #[must_use]
    pub fn new(root: LockRoot) -> Self {
        Self {
            lockfile_version: PKG_LOCK_SCHEMA_VERSION,
            root,
            dependencies: BTreeMap::new(),
            workspaces: BTreeMap::new(),
            packages: BTreeMap::new(),
            patched: BTreeMap::new(),
        }
    }

    /// Build a lockfile from a resolved graph.
    ///
    /// Only nodes reachable from the root's edges are recorded; entries for
    /// anything the resolution no longer references are dropped here, which
    /// is the lockfile's garbage collection.
    #[must_use]
    pub fn from_graph(root: LockRoot, graph: &Graph) -> Self {
        let mut lockfile = Self::new(root);

        for id in graph.reachable() {
            let node = graph.node(id);
            lockfile.packages.insert(
                node.key(),
                LockPackage {
                    version: node.version.clone(),
                    integrity: node.integrity.clone(),
                    resolution: node.resolution.clone(),
                    dependencies: node.dependencies.clone(),
                    optional_dependencies: node.optional_dependencies.clone(),
                    peer_dependencies: node.peer_dependencies.clone(),
                },
            );
        }

        for edge in graph.edges_from(None) {
            let kind = match edge.kind {
                DepKind::Normal => "dep",
                DepKind::Dev => "dev",
                DepKind::Optional => "optional",
                DepKind::Peer => "peer",
            };
            let target = graph.node(edge.to);
            let dep = LockDep {
                range: edge.range.clone(),
                kind: kind.to_string(),
                resolved: target.key(),
            };
            // Root edges to workspace members include the synthetic
            // bindings resolution seeds for every member; keeping them out
            // of `dependencies` leaves that map mirroring the manifest.
            if target.is_workspace() {
                lockfile.workspaces.insert(edge.name.clone(), dep);
            } else {
                lockfile.dependencies.insert(edge.name.clone(), dep);
            }
        }

        lockfile
    }

    /// Look up a package entry by name and version.
    #[must_use]
    pub fn get_package(&self, name: &str, version: &str) -> Option<&LockPackage> {
        self.packages.get(&format!("{name}@{version}"))
    }

    /// Registry entries as (name, version) pairs, for lockfile reuse.
    ///
    /// Workspace entries are excluded: a workspace member's identity is its
    /// path, and its contents are never pinned.
    pub fn registry_entries(&self) -> impl Iterator<Item = (&str, &str, &LockPackage)> {
        self.packages.iter().filter_map(|(key, pkg)| {
            if !matches!(pkg.resolution, Resolution::Registry { .. }) {
                return None;
            }
            // Split on the last '@' so scoped names survive.
            let at = key.rfind('@')?;
            if at == 0 {
                return None;
            }
            Some((&key[..at], &key[at + 1..], pkg))
        })
    }

    /// Read a lockfile from a path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_from(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LockfileError::new(
                    codes::PKG_LOCK_NOT_FOUND,
                    format!("Lockfile not found: {}", path.display()),
                )
            } else {
                LockfileError::new(
                    codes::PKG_LOCK_INVALID_JSON,
                    format!("Failed to read lockfile: {e}"),
                )
            }
        })?;

        let lockfile: Self = serde_json::from_str(&content).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_INVALID_JSON,
                format!("Invalid lockfile JSON: {e}"),
            )
        })?;

        if lockfile.lockfile_version != PKG_LOCK_SCHEMA_VERSION {
            return Err(LockfileError::new(
                codes::PKG_LOCK_VERSION_MISMATCH,
                format!(
                    "Lockfile version {} not supported (expected {})",
                    lockfile.lockfile_version, PKG_LOCK_SCHEMA_VERSION
                ),
            ));
        }

        Ok(lockfile)
    }

    /// Write the lockfile to a path atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<(), LockfileError> {
        fern_util::fs::atomic_write(path, self.to_json().as_bytes()).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to write lockfile: {e}"),
            )
        })
    }

    /// Serialize to JSON string.
    ///
    /// # Panics
    /// Panics if serialization fails (should not happen with valid data).
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("Lockfile serialization should not fail")
    }

    /// Deserialize from JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self, LockfileError> {
        serde_json::from_str(json).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_INVALID_JSON,
                format!("Invalid lockfile JSON: {e}"),
            )
        })
    }
}

impl Default for Lockfile {
    fn default() -> Self {
        Self::new(LockRoot::new("unknown", None))
    }
}

/// What changed between two lockfiles, by package key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LockDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl LockDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Diff two lockfiles package-by-package.
#[must_use]
pub fn diff(old: &Lockfile, new: &Lockfile) -> LockDiff {
    let mut result = LockDiff::default();

    for (key, pkg) in &new.packages {
        match old.packages.get(key) {
            None => result.added.push(key.clone()),
            Some(old_pkg) if old_pkg != pkg => result.changed.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in old.packages.keys() {
        if !new.packages.contains_key(key) {
            result.removed.push(key.clone());
        }
    }

    result
}

/// Lockfile error.
#[derive(Debug)]
pub struct LockfileError {
    code: &'static str,
    message: String,
}

impl LockfileError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LockfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for LockfileError {}

/// Compute a deterministic hash of a lockfile's content.
///
/// Serializes the lockfile to JSON (BTreeMap guarantees deterministic order)
/// and returns a BLAKE3 hex digest. Used to detect whether `node_modules`
/// is already up-to-date with the lockfile.
#[must_use]
pub fn lockfile_content_hash(lockfile: &Lockfile) -> String {
    let json = serde_json::to_string(lockfile).expect("Lockfile serialization should not fail");
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DepEdge, NodeId, PackageNode};
    use crate::manifest::DepKind;

    fn node(name: &str, version: &str) -> PackageNode {
        PackageNode {
            name: name.to_string(),
            version: version.to_string(),
            resolution: Resolution::default(),
            integrity: format!("sha512-{name}"),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            peer_dependencies: BTreeMap::new(),
            hoisted: true,
            requester: None,
        }
    }

    fn edge(from: Option<NodeId>, name: &str, range: &str, to: NodeId) -> DepEdge {
        DepEdge {
            from,
            name: name.to_string(),
            range: range.to_string(),
            kind: DepKind::Normal,
            to,
        }
    }

    #[test]
    fn test_from_graph_prunes_unreachable() {
        let mut graph = Graph::new();
        let a = graph.add_node(node("a", "1.0.0"));
        graph.add_node(node("stale", "0.1.0"));
        graph.add_edge(edge(None, "a", "^1.0.0", a));

        let lockfile = Lockfile::from_graph(LockRoot::new("app", None), &graph);
        assert!(lockfile.packages.contains_key("a@1.0.0"));
        assert!(!lockfile.packages.contains_key("stale@0.1.0"));
        assert_eq!(lockfile.dependencies.get("a").unwrap().resolved, "a@1.0.0");
    }

    #[test]
    fn test_workspace_bindings_kept_out_of_dependencies() {
        let mut graph = Graph::new();
        let mut member = node("lib", "1.0.0");
        member.resolution = Resolution::Workspace {
            path: "packages/lib".to_string(),
        };
        let lib = graph.add_node(member);
        let a = graph.add_node(node("a", "1.0.0"));
        graph.add_edge(edge(None, "lib", "workspace:*", lib));
        graph.add_edge(edge(None, "a", "^1.0.0", a));

        let lockfile = Lockfile::from_graph(LockRoot::new("app", None), &graph);
        assert!(!lockfile.dependencies.contains_key("lib"));
        assert_eq!(
            lockfile.workspaces.get("lib").unwrap().resolved,
            "lib@workspace:packages/lib"
        );
        assert_eq!(lockfile.dependencies.get("a").unwrap().resolved, "a@1.0.0");
    }

    #[test]
    fn test_serialization_is_byte_stable() {
        let mut graph = Graph::new();
        let a = graph.add_node(node("a", "1.0.0"));
        let b = graph.add_node(node("@scope/b", "2.0.0"));
        graph.add_edge(edge(None, "a", "^1.0.0", a));
        graph.add_edge(edge(Some(a), "@scope/b", "~2.0.0", b));

        let lockfile = Lockfile::from_graph(LockRoot::new("app", None), &graph);
        let first = lockfile.to_json();
        let reparsed = Lockfile::from_json(&first).unwrap();
        assert_eq!(reparsed.to_json(), first);
        assert_eq!(
            lockfile_content_hash(&reparsed),
            lockfile_content_hash(&lockfile)
        );
    }

    #[test]
    fn test_registry_entries_split_scoped_keys() {
        let mut lockfile = Lockfile::default();
        lockfile.packages.insert(
            "@scope/b@2.0.0".to_string(),
            LockPackage {
                version: "2.0.0".to_string(),
                integrity: String::new(),
                resolution: Resolution::default(),
                dependencies: BTreeMap::new(),
                optional_dependencies: BTreeMap::new(),
                peer_dependencies: BTreeMap::new(),
            },
        );
        lockfile.packages.insert(
            "ws@workspace:packages/ws".to_string(),
            LockPackage {
                version: "1.0.0".to_string(),
                integrity: String::new(),
                resolution: Resolution::Workspace {
                    path: "packages/ws".to_string(),
                },
                dependencies: BTreeMap::new(),
                optional_dependencies: BTreeMap::new(),
                peer_dependencies: BTreeMap::new(),
            },
        );

        let entries: Vec<_> = lockfile.registry_entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "@scope/b");
        assert_eq!(entries[0].1, "2.0.0");
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let json = r#"{"lockfile_version": 99, "root": {"name": "x"}}"#;
        let lockfile = Lockfile::from_json(json).unwrap();
        // from_json does not enforce the version; read_from does.
        assert_eq!(lockfile.lockfile_version, 99);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);
        fs::write(&path, json).unwrap();
        let err = Lockfile::read_from(&path).unwrap_err();
        assert_eq!(err.code(), codes::PKG_LOCK_VERSION_MISMATCH);
    }

    #[test]
    fn test_diff() {
        let pkg = |v: &str| LockPackage {
            version: v.to_string(),
            integrity: String::new(),
            resolution: Resolution::default(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            peer_dependencies: BTreeMap::new(),
        };

        let mut old = Lockfile::default();
        old.packages.insert("a@1.0.0".to_string(), pkg("1.0.0"));
        old.packages.insert("b@1.0.0".to_string(), pkg("1.0.0"));

        let mut new = Lockfile::default();
        new.packages.insert("a@1.0.0".to_string(), pkg("1.0.0"));
        new.packages.insert("c@3.0.0".to_string(), pkg("3.0.0"));
        let mut changed = pkg("1.0.0");
        changed.integrity = "sha512-x".to_string();
        new.packages.insert("a@1.0.0".to_string(), changed);

        let d = diff(&old, &new);
        assert_eq!(d.added, vec!["c@3.0.0"]);
        assert_eq!(d.removed, vec!["b@1.0.0"]);
        assert_eq!(d.changed, vec!["a@1.0.0"]);
    }

    #[test]
    fn test_missing_lockfile_code() {
        let err = Lockfile::read_from(Path::new("/nonexistent/fern.lock")).unwrap_err();
        assert_eq!(err.code(), codes::PKG_LOCK_NOT_FOUND);
    }
}
