//! Dependency resolution.
//!
//! Breadth-first worklist over unresolved requirements, resolved in waves:
//! each wave's catalog fetches run in parallel, then requirements are
//! processed in order so the outcome is deterministic. For each requirement
//! the resolver tries, in order: workspace binding, reuse of an existing
//! satisfying node, reuse of a lockfile entry, the cache (offline modes),
//! and finally the catalog. Nodes are allocated before their own edges are
//! queued, so dependency cycles land as edges to already-allocated nodes.

use crate::catalog::{CatalogError, CatalogSource, PackageCatalog};
use crate::context::{InstallContext, NetworkMode};
use crate::error::PkgError;
use crate::graph::{DepEdge, Graph, NodeId, PackageNode, Resolution};
use crate::lockfile::{LockRoot, Lockfile};
use crate::manifest::{DepKind, Manifest};
use crate::version::{self, pick_version, version_satisfies};
use crate::workspaces::WorkspaceSet;
use futures::stream::{self, StreamExt};
use semver::Version;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

/// Maximum concurrent catalog fetches.
const MAX_CONCURRENT_FETCHES: usize = 32;

/// Maximum requester-chain depth to prevent runaway resolution.
const MAX_DEPTH: usize = 100;

/// Options for dependency resolution. Network willingness lives on the
/// [`InstallContext`] alongside the catalog and cache it governs.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Include devDependencies of the root and workspace members.
    pub include_dev: bool,
    /// Include optionalDependencies.
    pub include_optional: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_dev: true,
            include_optional: true,
        }
    }
}

/// A peer requirement that resolved badly (or not at all).
///
/// Peer conflicts never fail resolution; they are carried here for the
/// caller to report.
#[derive(Debug, Clone)]
pub struct PeerWarning {
    /// The package declaring the peer requirement.
    pub package: String,
    /// The peer's name.
    pub peer: String,
    /// The declared range.
    pub range: String,
    /// The version actually present in the graph, if any.
    pub found: Option<String>,
}

/// Result of resolving dependencies.
#[derive(Debug)]
pub struct ResolveResult {
    pub graph: Graph,
    pub lockfile: Lockfile,
    pub warnings: Vec<PeerWarning>,
    /// Catalog fetches performed.
    pub fetched_count: usize,
    /// Nodes taken from the previous lockfile without a catalog lookup.
    pub reused_count: usize,
}

/// An unresolved requirement on the worklist.
#[derive(Debug, Clone)]
struct PendingReq {
    requester: Option<NodeId>,
    name: String,
    range: String,
    kind: DepKind,
    /// Requester chain for error messages, root-first.
    chain: Vec<String>,
}

/// Catalog lookup outcome, cached per name for the whole resolution.
enum CatalogEntry {
    Found(PackageCatalog),
    Missing,
    Failed(String),
}

struct Resolver<'a, C: CatalogSource> {
    ctx: &'a InstallContext<'a, C>,
    old: Option<&'a Lockfile>,
    options: &'a ResolveOptions,
    catalogs: HashMap<String, CatalogEntry>,
    graph: Graph,
    workspace_nodes: BTreeMap<String, NodeId>,
    fetched: usize,
    reused: usize,
}

/// Resolve the complete dependency graph for a project.
///
/// # Errors
/// Returns an error on unsatisfiable non-optional ranges, unknown packages,
/// or a network requirement while offline.
pub async fn resolve<C: CatalogSource>(
    root: &Manifest,
    workspaces: &WorkspaceSet,
    old_lockfile: Option<&Lockfile>,
    ctx: &InstallContext<'_, C>,
    options: &ResolveOptions,
) -> Result<ResolveResult, PkgError> {
    let mut resolver = Resolver {
        ctx,
        old: old_lockfile,
        options,
        catalogs: HashMap::new(),
        graph: Graph::new(),
        workspace_nodes: BTreeMap::new(),
        fetched: 0,
        reused: 0,
    };

    let mut pending: VecDeque<PendingReq> = VecDeque::new();

    // Workspace members are part of the graph before anything else, so
    // requirements naming them bind locally instead of hitting the catalog.
    for pkg in workspaces.packages.values() {
        let rel = rel_path(&pkg.path, &workspaces.root);
        let node = PackageNode {
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            resolution: Resolution::Workspace { path: rel },
            integrity: String::new(),
            dependencies: dep_map(&pkg.manifest, DepKind::Normal),
            optional_dependencies: dep_map(&pkg.manifest, DepKind::Optional),
            peer_dependencies: peer_map(&pkg.manifest),
            hoisted: true,
            requester: None,
        };
        let id = resolver.graph.add_node(node);
        resolver.workspace_nodes.insert(pkg.name.clone(), id);
        resolver.graph.add_edge(DepEdge {
            from: None,
            name: pkg.name.clone(),
            range: "workspace:*".to_string(),
            kind: DepKind::Normal,
            to: id,
        });
    }

    for req in filtered_requirements(root, options) {
        pending.push_back(PendingReq {
            requester: None,
            name: req.name.clone(),
            range: req.range.clone(),
            kind: req.kind,
            chain: vec![root.name.clone()],
        });
    }

    for pkg in workspaces.packages.values() {
        let id = resolver.workspace_nodes[&pkg.name];
        for req in filtered_requirements(&pkg.manifest, options) {
            pending.push_back(PendingReq {
                requester: Some(id),
                name: req.name.clone(),
                range: req.range.clone(),
                kind: req.kind,
                chain: vec![root.name.clone(), pkg.name.clone()],
            });
        }
    }

    // Resolve in waves until the worklist drains.
    while !pending.is_empty() {
        let batch: Vec<PendingReq> = pending.drain(..).collect();

        resolver.prefetch_catalogs(&batch).await?;

        for req in batch {
            if req.chain.len() > MAX_DEPTH {
                tracing::warn!(name = %req.name, "dependency chain too deep, skipping");
                continue;
            }
            for next in resolver.resolve_one(&req)? {
                pending.push_back(next);
            }
        }
    }

    let warnings = resolver.peer_warnings();

    let mut lockfile = Lockfile::from_graph(
        LockRoot::new(root.name.clone(), root.version.clone()),
        &resolver.graph,
    );
    lockfile.patched = root.patched_dependencies.clone();

    tracing::debug!(
        nodes = resolver.graph.len(),
        fetched = resolver.fetched,
        reused = resolver.reused,
        "resolution complete"
    );

    Ok(ResolveResult {
        graph: resolver.graph,
        lockfile,
        warnings,
        fetched_count: resolver.fetched,
        reused_count: resolver.reused,
    })
}

impl<C: CatalogSource> Resolver<'_, C> {
    /// Fetch catalogs for every name in the batch that will actually need
    /// one, in parallel.
    async fn prefetch_catalogs(&mut self, batch: &[PendingReq]) -> Result<(), PkgError> {
        if self.ctx.network == NetworkMode::Offline {
            return Ok(());
        }

        let mut names: HashSet<String> = HashSet::new();
        for req in batch {
            if self.catalogs.contains_key(&req.name) || !self.needs_catalog(req) {
                continue;
            }
            names.insert(req.name.clone());
        }

        let catalog = self.ctx.catalog;
        let results: Vec<(String, Result<PackageCatalog, CatalogError>)> =
            stream::iter(names.into_iter())
                .map(|name| async move {
                    let result = catalog.fetch_catalog(&name).await;
                    (name, result)
                })
                .buffer_unordered(MAX_CONCURRENT_FETCHES)
                .collect()
                .await;

        for (name, result) in results {
            self.fetched += 1;
            let entry = match result {
                Ok(catalog) => CatalogEntry::Found(catalog),
                Err(CatalogError::NotFound(_)) => CatalogEntry::Missing,
                Err(e) => CatalogEntry::Failed(e.to_string()),
            };
            self.catalogs.insert(name, entry);
        }

        Ok(())
    }

    /// Whether a requirement can only be satisfied by a catalog lookup.
    fn needs_catalog(&self, req: &PendingReq) -> bool {
        if self.bind_workspace(req).is_some() {
            return false;
        }
        if self.graph.find_satisfying(&req.name, &req.range).is_some() {
            return false;
        }
        if self.lockfile_candidate(req).is_some() {
            return false;
        }
        if self.ctx.network == NetworkMode::PreferOffline
            && self.cache_candidate(req).is_some()
        {
            return false;
        }
        true
    }

    /// Resolve one requirement, returning the newly queued requirements of
    /// any node it allocated.
    fn resolve_one(&mut self, req: &PendingReq) -> Result<Vec<PendingReq>, PkgError> {
        // Workspace names bind locally, bypassing the catalog entirely.
        if let Some(id) = self.bind_workspace(req) {
            self.add_edge(req, id);
            return Ok(Vec::new());
        }
        if version::is_workspace_range(&req.range) {
            return Err(PkgError::unsatisfiable(&req.name, &req.range, &req.chain));
        }

        // Dedup: an existing node of this name that satisfies the range.
        if let Some(id) = self.graph.find_satisfying(&req.name, &req.range) {
            self.add_edge(req, id);
            return Ok(Vec::new());
        }

        // Lockfile reuse: a pinned version still inside the range.
        if let Some((version, deps, optional, peers, integrity)) = self.lockfile_candidate(req) {
            self.reused += 1;
            return Ok(self.allocate(req, &version, integrity, deps, optional, peers));
        }

        // Offline modes: satisfy from the cache before (or instead of) the
        // network.
        if self.ctx.network != NetworkMode::Online {
            if let Some(version) = self.cache_candidate(req) {
                return self.allocate_from_cache(req, &version);
            }
        }

        if self.ctx.network == NetworkMode::Offline {
            if req.kind == DepKind::Optional {
                tracing::debug!(name = %req.name, range = %req.range, "skipping uncached optional dependency while offline");
                return Ok(Vec::new());
            }
            return Err(PkgError::needs_network(&req.name));
        }

        self.resolve_from_catalog(req)
    }

    fn resolve_from_catalog(&mut self, req: &PendingReq) -> Result<Vec<PendingReq>, PkgError> {
        let entry = self
            .catalogs
            .get(&req.name)
            .ok_or_else(|| PkgError::not_found(&req.name))?;

        let catalog = match entry {
            CatalogEntry::Found(catalog) => catalog,
            CatalogEntry::Missing => {
                if req.kind == DepKind::Optional {
                    tracing::debug!(name = %req.name, "skipping missing optional dependency");
                    return Ok(Vec::new());
                }
                return Err(PkgError::not_found(&req.name));
            }
            CatalogEntry::Failed(msg) => {
                return Err(PkgError::registry(msg.clone()));
            }
        };

        let versions = catalog.version_list();
        let version = match pick_version(&req.name, &req.range, &versions) {
            Ok(v) => v,
            Err(_) if req.kind == DepKind::Optional => {
                tracing::debug!(name = %req.name, range = %req.range, "skipping unsatisfiable optional dependency");
                return Ok(Vec::new());
            }
            Err(_) => {
                return Err(PkgError::unsatisfiable(&req.name, &req.range, &req.chain));
            }
        };

        let info = catalog
            .info(&version)
            .cloned()
            .unwrap_or_default();

        Ok(self.allocate(
            req,
            &version.to_string(),
            info.integrity,
            info.dependencies,
            info.optional_dependencies,
            info.peer_dependencies,
        ))
    }

    fn allocate_from_cache(
        &mut self,
        req: &PendingReq,
        version: &Version,
    ) -> Result<Vec<PendingReq>, PkgError> {
        let version = version.to_string();
        let manifest = self.ctx.cache.read_cached_manifest(&req.name, &version)?;
        let integrity = self
            .ctx
            .cache
            .read_integrity(&req.name, &version)
            .unwrap_or_default();
        tracing::debug!(name = %req.name, version = %version, "resolved from cache");

        Ok(self.allocate(
            req,
            &version,
            integrity,
            dep_map(&manifest, DepKind::Normal),
            dep_map(&manifest, DepKind::Optional),
            peer_map(&manifest),
        ))
    }

    /// Allocate a node and queue its own requirements.
    ///
    /// The node exists before any of its edges resolve, which is what makes
    /// cycles safe.
    fn allocate(
        &mut self,
        req: &PendingReq,
        version: &str,
        integrity: String,
        dependencies: BTreeMap<String, String>,
        optional_dependencies: BTreeMap<String, String>,
        peer_dependencies: BTreeMap<String, String>,
    ) -> Vec<PendingReq> {
        // First instance of a name wins the top-level slot; later
        // conflicting instances nest under their requester.
        let hoisted = !self.graph.iter().any(|(_, n)| n.name == req.name);

        let id = self.graph.add_node(PackageNode {
            name: req.name.clone(),
            version: version.to_string(),
            resolution: Resolution::default(),
            integrity,
            dependencies: dependencies.clone(),
            optional_dependencies: optional_dependencies.clone(),
            peer_dependencies,
            hoisted,
            requester: if hoisted { None } else { req.requester },
        });
        self.add_edge(req, id);

        let mut chain = req.chain.clone();
        chain.push(format!("{}@{version}", req.name));

        let mut next = Vec::new();
        for (name, range) in &dependencies {
            next.push(PendingReq {
                requester: Some(id),
                name: name.clone(),
                range: range.clone(),
                kind: DepKind::Normal,
                chain: chain.clone(),
            });
        }
        if self.options.include_optional {
            for (name, range) in &optional_dependencies {
                next.push(PendingReq {
                    requester: Some(id),
                    name: name.clone(),
                    range: range.clone(),
                    kind: DepKind::Optional,
                    chain: chain.clone(),
                });
            }
        }
        next
    }

    fn add_edge(&mut self, req: &PendingReq, to: NodeId) {
        self.graph.add_edge(DepEdge {
            from: req.requester,
            name: req.name.clone(),
            range: req.range.clone(),
            kind: req.kind,
            to,
        });
    }

    /// Bind a requirement to a workspace member when the name matches and
    /// the range allows it.
    fn bind_workspace(&self, req: &PendingReq) -> Option<NodeId> {
        let id = *self.workspace_nodes.get(&req.name)?;
        let node = self.graph.node(id);

        if version::is_workspace_range(&req.range) {
            version::workspace_range_satisfied(&req.range, &node.version).then_some(id)
        } else {
            version_satisfies(&req.range, &node.version).then_some(id)
        }
    }

    /// A previous lockfile entry whose pinned version still satisfies the
    /// range.
    #[allow(clippy::type_complexity)]
    fn lockfile_candidate(
        &self,
        req: &PendingReq,
    ) -> Option<(
        String,
        BTreeMap<String, String>,
        BTreeMap<String, String>,
        BTreeMap<String, String>,
        String,
    )> {
        let old = self.old?;
        for (name, version, pkg) in old.registry_entries() {
            if name == req.name && version_satisfies(&req.range, version) {
                return Some((
                    version.to_string(),
                    pkg.dependencies.clone(),
                    pkg.optional_dependencies.clone(),
                    pkg.peer_dependencies.clone(),
                    pkg.integrity.clone(),
                ));
            }
        }
        None
    }

    /// The best cached version satisfying the range, if any.
    fn cache_candidate(&self, req: &PendingReq) -> Option<Version> {
        self.ctx
            .cache
            .cached_versions(&req.name)
            .into_iter()
            .rev()
            .find(|v| version_satisfies(&req.range, &v.to_string()))
    }

    /// Check every node's peer requirements against what is actually in the
    /// graph. Violations are advisory.
    fn peer_warnings(&self) -> Vec<PeerWarning> {
        let mut warnings = Vec::new();

        for (_, node) in self.graph.iter() {
            for (peer, range) in &node.peer_dependencies {
                let found = self
                    .graph
                    .iter()
                    .find(|(_, n)| &n.name == peer)
                    .map(|(_, n)| n.version.clone());

                let satisfied = found
                    .as_deref()
                    .is_some_and(|v| version_satisfies(range, v));

                if !satisfied {
                    warnings.push(PeerWarning {
                        package: node.key(),
                        peer: peer.clone(),
                        range: range.clone(),
                        found: found.clone(),
                    });
                    tracing::warn!(
                        package = %node.key(),
                        peer = %peer,
                        range = %range,
                        found = found.as_deref().unwrap_or("none"),
                        "peer dependency not satisfied"
                    );
                }
            }
        }

        warnings
    }
}

fn filtered_requirements<'m>(
    manifest: &'m Manifest,
    options: &ResolveOptions,
) -> impl Iterator<Item = &'m crate::manifest::Requirement> {
    let include_dev = options.include_dev;
    let include_optional = options.include_optional;
    manifest.requirements.iter().filter(move |r| match r.kind {
        DepKind::Normal => true,
        DepKind::Dev => include_dev,
        DepKind::Optional => include_optional,
        DepKind::Peer => false,
    })
}

fn dep_map(manifest: &Manifest, kind: DepKind) -> BTreeMap<String, String> {
    manifest
        .requirements
        .iter()
        .filter(|r| r.kind == kind)
        .map(|r| (r.name.clone(), r.range.clone()))
        .collect()
}

fn peer_map(manifest: &Manifest) -> BTreeMap<String, String> {
    manifest
        .peers
        .iter()
        .map(|r| (r.name.clone(), r.range.clone()))
        .collect()
}

fn rel_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PackageCache;
    use crate::catalog::testing::StaticCatalog;
    use crate::manifest::{ManifestOptions, Requirement};
    use crate::workspaces::WorkspacePackage;
    use std::path::PathBuf;

    fn manifest(name: &str, deps: &[(&str, &str)]) -> Manifest {
        Manifest {
            name: name.to_string(),
            version: Some("1.0.0".to_string()),
            requirements: deps
                .iter()
                .map(|(n, r)| Requirement::new(*n, *r, DepKind::Normal))
                .collect(),
            peers: Vec::new(),
            workspaces: Vec::new(),
            linker: None,
            scripts: BTreeMap::new(),
            patched_dependencies: BTreeMap::new(),
        }
    }

    fn empty_workspaces() -> WorkspaceSet {
        WorkspaceSet {
            root: PathBuf::from("/project"),
            packages: BTreeMap::new(),
        }
    }

    fn temp_cache() -> (tempfile::TempDir, PackageCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = PackageCache::with_root(dir.path().to_path_buf());
        (dir, cache)
    }

    #[tokio::test]
    async fn test_picks_max_satisfying_version() {
        let mut catalog = StaticCatalog::new();
        catalog.add("dep", &[("1.0.0", &[]), ("1.2.0", &[]), ("2.0.0", &[])]);
        let (_dir, cache) = temp_cache();

        let result = resolve(
            &manifest("app", &[("dep", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert!(result.lockfile.packages.contains_key("dep@1.2.0"));
        assert_eq!(result.graph.len(), 1);
    }

    #[tokio::test]
    async fn test_intersecting_ranges_dedup_to_one_node() {
        let mut catalog = StaticCatalog::new();
        catalog.add("a", &[("1.0.0", &[("shared", "^1.0.0")])]);
        catalog.add("b", &[("1.0.0", &[("shared", "^1.2.0")])]);
        catalog.add("shared", &[("1.0.0", &[]), ("1.5.0", &[])]);
        let (_dir, cache) = temp_cache();

        let result = resolve(
            &manifest("app", &[("a", "^1.0.0"), ("b", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        // One shared node, at the max satisfying both.
        let shared: Vec<_> = result
            .lockfile
            .packages
            .keys()
            .filter(|k| k.starts_with("shared@"))
            .collect();
        assert_eq!(shared, vec!["shared@1.5.0"]);
        assert_eq!(result.graph.len(), 3);
    }

    #[tokio::test]
    async fn test_disjoint_ranges_create_nested_instance() {
        let mut catalog = StaticCatalog::new();
        catalog.add("a", &[("1.0.0", &[("shared", "^1.0.0")])]);
        catalog.add("b", &[("1.0.0", &[("shared", "^2.0.0")])]);
        catalog.add("shared", &[("1.0.0", &[]), ("2.0.0", &[])]);
        let (_dir, cache) = temp_cache();

        let result = resolve(
            &manifest("app", &[("a", "^1.0.0"), ("b", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert!(result.lockfile.packages.contains_key("shared@1.0.0"));
        assert!(result.lockfile.packages.contains_key("shared@2.0.0"));

        // Exactly one instance of the name is hoisted.
        let hoisted: Vec<_> = result
            .graph
            .iter()
            .filter(|(_, n)| n.name == "shared" && n.hoisted)
            .collect();
        assert_eq!(hoisted.len(), 1);
        assert_eq!(hoisted[0].1.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_names_chain() {
        let mut catalog = StaticCatalog::new();
        catalog.add("a", &[("1.0.0", &[("missing-range", "^9.0.0")])]);
        catalog.add("missing-range", &[("1.0.0", &[])]);
        let (_dir, cache) = temp_cache();

        let err = resolve(
            &manifest("app", &[("a", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), crate::error::codes::PKG_UNSATISFIABLE_RANGE);
        assert!(err.message().contains("app"));
        assert!(err.message().contains("a@1.0.0"));
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let mut catalog = StaticCatalog::new();
        catalog.add("a", &[("1.0.0", &[("b", "^1.0.0")])]);
        catalog.add("b", &[("1.0.0", &[("a", "^1.0.0")])]);
        let (_dir, cache) = temp_cache();

        let result = resolve(
            &manifest("app", &[("a", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.graph.len(), 2);
        // b's edge points back at the already-allocated a node.
        assert!(result.lockfile.packages.contains_key("a@1.0.0"));
        assert!(result.lockfile.packages.contains_key("b@1.0.0"));
    }

    #[tokio::test]
    async fn test_lockfile_reuse_skips_fetch() {
        let mut catalog = StaticCatalog::new();
        catalog.add("dep", &[("1.0.0", &[]), ("1.9.0", &[])]);
        let (_dir, cache) = temp_cache();
        let root = manifest("app", &[("dep", "^1.0.0")]);

        let first = resolve(
            &root,
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(first.fetched_count, 1);

        let second = resolve(
            &root,
            &empty_workspaces(),
            Some(&first.lockfile),
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(second.fetched_count, 0);
        assert_eq!(second.reused_count, 1);
        assert_eq!(second.lockfile.to_json(), first.lockfile.to_json());
    }

    #[tokio::test]
    async fn test_workspace_binding_never_touches_catalog() {
        let catalog = StaticCatalog::new();
        let (_dir, cache) = temp_cache();

        let mut workspaces = empty_workspaces();
        workspaces.packages.insert(
            "lib".to_string(),
            WorkspacePackage {
                name: "lib".to_string(),
                version: "1.0.0".to_string(),
                path: PathBuf::from("/project/packages/lib"),
                manifest: manifest("lib", &[]),
            },
        );

        let result = resolve(
            &manifest("app", &[("lib", "workspace:*")]),
            &workspaces,
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(catalog.fetch_count(), 0);
        assert!(result
            .lockfile
            .packages
            .contains_key("lib@workspace:packages/lib"));

        // The binding is recorded in its own section, so root
        // `dependencies` stays a mirror of the manifest.
        assert!(!result.lockfile.dependencies.contains_key("lib"));
        assert!(result.lockfile.workspaces.contains_key("lib"));
    }

    #[tokio::test]
    async fn test_offline_without_cache_needs_network() {
        let mut catalog = StaticCatalog::new();
        catalog.add("dep", &[("1.0.0", &[])]);
        let (_dir, cache) = temp_cache();

        let err = resolve(
            &manifest("app", &[("dep", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache).with_network(NetworkMode::Offline),
            &ResolveOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(err.is_needs_network());
        assert_eq!(catalog.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_prefer_offline_resolves_from_cache() {
        let mut catalog = StaticCatalog::new();
        catalog.add("dep", &[("1.0.0", &[]), ("1.5.0", &[])]);

        let dir = tempfile::tempdir().unwrap();
        let cache = PackageCache::with_root(dir.path().to_path_buf());
        let pkg_dir = cache.package_dir("dep", "1.5.0");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(
            pkg_dir.join("package.json"),
            r#"{"name":"dep","version":"1.5.0"}"#,
        )
        .unwrap();

        let result = resolve(
            &manifest("app", &[("dep", "^1.0.0")]),
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache).with_network(NetworkMode::PreferOffline),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(catalog.fetch_count(), 0);
        assert!(result.lockfile.packages.contains_key("dep@1.5.0"));
    }

    #[tokio::test]
    async fn test_missing_optional_is_skipped() {
        let mut catalog = StaticCatalog::new();
        catalog.add("a", &[("1.0.0", &[])]);
        let (_dir, cache) = temp_cache();

        let mut root = manifest("app", &[("a", "^1.0.0")]);
        root.requirements
            .push(Requirement::new("ghost", "^1.0.0", DepKind::Optional));

        let result = resolve(
            &root,
            &empty_workspaces(),
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.graph.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_mismatch_warns_but_resolves() {
        let mut catalog = StaticCatalog::new();
        catalog.add("plugin", &[("1.0.0", &[])]);
        catalog.add("host", &[("3.0.0", &[])]);
        let (_dir, cache) = temp_cache();

        // plugin peers on host@^2, but host@3 is what the root asks for.
        let manifest_opts = ManifestOptions::default();
        let json = serde_json::json!({
            "name": "plugin",
            "version": "1.0.0",
            "peerDependencies": { "host": "^2.0.0" }
        });
        let plugin_manifest = crate::manifest::parse_manifest(&json, &manifest_opts).unwrap();
        let mut workspaces = empty_workspaces();
        workspaces.packages.insert(
            "plugin".to_string(),
            WorkspacePackage {
                name: "plugin".to_string(),
                version: "1.0.0".to_string(),
                path: PathBuf::from("/project/packages/plugin"),
                manifest: plugin_manifest,
            },
        );

        let result = resolve(
            &manifest("app", &[("host", "^3.0.0")]),
            &workspaces,
            None,
            &InstallContext::new(&catalog, &cache),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].peer, "host");
        assert_eq!(result.warnings[0].found.as_deref(), Some("3.0.0"));
    }
}
