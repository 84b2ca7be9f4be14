//! Install orchestration: resolve, lock, fetch, link, patch.
//!
//! The lockfile is written exactly once, after the graph fully resolves;
//! a fatal error during fetch or link leaves the previous lockfile intact.
//! Fetching runs in parallel but stops admitting new downloads once a
//! fatal error is seen, letting in-flight work finish before returning.

use crate::cache::PackageCache;
use crate::catalog::{CatalogSource, DEFAULT_REGISTRY};
use crate::context::{InstallContext, NetworkMode};
use crate::error::PkgError;
use crate::graph::{Graph, NodeId, Resolution};
use crate::link::{isolated, LinkReport, LinkRequest, LinkerKind};
use crate::lockfile::{self, LockDiff, Lockfile, LockfileError, LOCKFILE_NAME};
use crate::manifest::{self, Manifest, ManifestOptions};
use crate::patch;
use crate::resolve::{self, PeerWarning, ResolveOptions};
use crate::tarball;
use crate::workspaces;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::path::Path;

/// Concurrent tarball downloads.
const MAX_CONCURRENT_DOWNLOADS: usize = 8;

/// Options for a full install.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub include_dev: bool,
    pub include_optional: bool,
    /// Fail instead of writing a lockfile that differs from the existing one.
    pub frozen_lockfile: bool,
    /// Overrides the linker configured in the manifest.
    pub linker: Option<LinkerKind>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            include_dev: true,
            include_optional: true,
            frozen_lockfile: false,
            linker: None,
        }
    }
}

/// What an install did.
#[derive(Debug)]
pub struct InstallReport {
    pub resolved: usize,
    pub fetched_metadata: usize,
    pub reused: usize,
    pub downloaded: usize,
    pub link: LinkReport,
    pub diff: LockDiff,
    pub warnings: Vec<PeerWarning>,
    pub lockfile_written: bool,
    pub patches_applied: usize,
}

/// Run a complete install in `project_root`.
///
/// # Errors
/// Returns an error on resolution failure, download/extract failure, link
/// failure, or frozen-lockfile violations.
pub async fn install<C: CatalogSource>(
    project_root: &Path,
    ctx: &InstallContext<'_, C>,
    options: &InstallOptions,
) -> Result<InstallReport, PkgError> {
    let manifest_opts = ManifestOptions {
        include_dev: options.include_dev,
        include_optional: options.include_optional,
    };
    let root = manifest::read_manifest(project_root, &manifest_opts)?;
    let ws = workspaces::discover_workspaces(project_root, &root.workspaces, &manifest_opts);

    let lock_path = project_root.join(LOCKFILE_NAME);
    let old_lockfile = load_existing_lockfile(&lock_path, options.frozen_lockfile)?;

    let resolve_opts = ResolveOptions {
        include_dev: options.include_dev,
        include_optional: options.include_optional,
    };
    let resolved = resolve::resolve(&root, &ws, old_lockfile.as_ref(), ctx, &resolve_opts).await?;

    let new_json = resolved.lockfile.to_json();
    let old_json = old_lockfile.as_ref().map(Lockfile::to_json);

    if options.frozen_lockfile && old_json.as_deref() != Some(new_json.as_str()) {
        return Err(PkgError::new(
            lockfile::codes::PKG_LOCK_STALE,
            "Lockfile is out of date for this manifest (frozen lockfile mode)",
        ));
    }

    let diff = match &old_lockfile {
        Some(old) => lockfile::diff(old, &resolved.lockfile),
        None => LockDiff {
            added: resolved.lockfile.packages.keys().cloned().collect(),
            ..LockDiff::default()
        },
    };

    let lockfile_written = old_json.as_deref() != Some(new_json.as_str());
    if lockfile_written {
        resolved
            .lockfile
            .write_to(&lock_path)
            .map_err(lock_to_pkg_error)?;
    }

    let downloaded = fetch_missing(&resolved.graph, ctx).await?;

    let linker = options
        .linker
        .or_else(|| root.linker.as_deref().and_then(LinkerKind::parse))
        .unwrap_or_default();
    let link = linker.link(&LinkRequest {
        root: project_root,
        graph: &resolved.graph,
        cache: ctx.cache,
    })?;

    let patches_applied = apply_committed_patches(project_root, &root, &resolved.graph, linker)?;

    Ok(InstallReport {
        resolved: resolved.lockfile.packages.len(),
        fetched_metadata: resolved.fetched_count,
        reused: resolved.reused_count,
        downloaded,
        link,
        diff,
        warnings: resolved.warnings,
        lockfile_written,
        patches_applied,
    })
}

fn load_existing_lockfile(
    lock_path: &Path,
    frozen: bool,
) -> Result<Option<Lockfile>, PkgError> {
    match Lockfile::read_from(lock_path) {
        Ok(lockfile) => Ok(Some(lockfile)),
        Err(e) if e.code() == lockfile::codes::PKG_LOCK_NOT_FOUND => {
            if frozen {
                Err(lock_to_pkg_error(e))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(lock_to_pkg_error(e)),
    }
}

fn lock_to_pkg_error(e: LockfileError) -> PkgError {
    PkgError::new(e.code(), e.message().to_string())
}

/// Download and extract every reachable registry package missing from the
/// cache.
async fn fetch_missing<C: CatalogSource>(
    graph: &Graph,
    ctx: &InstallContext<'_, C>,
) -> Result<usize, PkgError> {
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for id in graph.reachable() {
        let node = graph.node(id);
        if !node.is_workspace() && !ctx.cache.is_cached(&node.name, &node.version) {
            if ctx.network == NetworkMode::Offline {
                return Err(PkgError::needs_network(&node.key()));
            }
            queue.push_back(id);
        }
    }
    if queue.is_empty() {
        return Ok(0);
    }
    ctx.cache.ensure_dirs()?;

    let fetch_one = |id: NodeId| async move {
        let node = graph.node(id);
        fetch_and_extract(node, ctx.catalog, ctx.cache).await
    };

    let mut in_flight = FuturesUnordered::new();
    for _ in 0..MAX_CONCURRENT_DOWNLOADS {
        if let Some(id) = queue.pop_front() {
            in_flight.push(fetch_one(id));
        }
    }

    let mut downloaded = 0;
    let mut fatal: Option<PkgError> = None;
    while let Some(result) = in_flight.next().await {
        match result {
            Ok(()) => downloaded += 1,
            Err(e) => {
                // Stop admitting new downloads; in-flight ones drain.
                queue.clear();
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }
        if let Some(id) = queue.pop_front() {
            in_flight.push(fetch_one(id));
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(downloaded),
    }
}

async fn fetch_and_extract<C: CatalogSource>(
    node: &crate::graph::PackageNode,
    catalog: &C,
    cache: &PackageCache,
) -> Result<(), PkgError> {
    let url = tarball_url(node);
    tracing::debug!(key = %node.key(), url = %url, "downloading");

    let bytes = catalog.fetch_tarball(&url).await.map_err(PkgError::from)?;
    if bytes.len() as u64 > tarball::MAX_TARBALL_SIZE {
        return Err(PkgError::download_failed(format!(
            "Tarball too large: {} bytes (max: {})",
            bytes.len(),
            tarball::MAX_TARBALL_SIZE
        )));
    }
    tarball::verify_integrity(&bytes, &node.integrity)?;

    if !node.integrity.is_empty() {
        fern_util::fs::atomic_write(&cache.tarball_path(&node.integrity), &bytes)?;
    }
    tarball::extract_tgz_atomic(&bytes, &cache.package_dir(&node.name, &node.version))?;
    cache.write_integrity(&node.name, &node.version, &node.integrity)?;
    Ok(())
}

/// Conventional registry tarball URL for a resolved package.
fn tarball_url(node: &crate::graph::PackageNode) -> String {
    match &node.resolution {
        Resolution::Tarball { url } => url.clone(),
        Resolution::Registry { registry } => {
            let base = if registry.is_empty() {
                DEFAULT_REGISTRY
            } else {
                registry.as_str()
            };
            let base = base.trim_end_matches('/');
            let bare = node.name.rsplit('/').next().unwrap_or(&node.name);
            format!("{base}/{}/-/{bare}-{}.tgz", node.name, node.version)
        }
        _ => String::new(),
    }
}

/// Re-apply committed patches to the freshly linked tree.
fn apply_committed_patches(
    project_root: &Path,
    root: &Manifest,
    graph: &Graph,
    linker: LinkerKind,
) -> Result<usize, PkgError> {
    let mut applied = 0;

    for (key, patch_rel) in &root.patched_dependencies {
        let Some(at) = key.rfind('@').filter(|&i| i > 0) else {
            tracing::warn!(key = %key, "ignoring malformed patched dependency key");
            continue;
        };
        let (name, version) = (&key[..at], &key[at + 1..]);

        if graph.find_exact(name, version).is_none() {
            tracing::warn!(key = %key, "patched dependency is not installed, skipping");
            continue;
        }

        let target = match linker {
            LinkerKind::Hoisted => {
                let mut dir = project_root.join("node_modules");
                for part in name.split('/') {
                    dir = dir.join(part);
                }
                dir
            }
            LinkerKind::Isolated => {
                let mut dir = project_root
                    .join("node_modules")
                    .join(isolated::STORE_DIR)
                    .join(isolated::store_key(name, version))
                    .join("node_modules");
                for part in name.split('/') {
                    dir = dir.join(part);
                }
                dir
            }
        };

        patch::apply_patch(&project_root.join(patch_rel), &target)?;
        applied += 1;
        tracing::info!(key = %key, "patch applied");
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::StaticCatalog;
    use std::fs;
    use tempfile::tempdir;

    fn write_manifest(root: &Path, json: &str) {
        fs::write(root.join("package.json"), json).unwrap();
    }

    fn setup_catalog() -> StaticCatalog {
        let mut catalog = StaticCatalog::new();
        catalog.add("a", &[("1.0.0", &[("b", "^1.0.0")])]);
        catalog.add("b", &[("1.0.0", &[]), ("1.4.0", &[])]);
        catalog
    }

    /// StaticCatalog serves empty tarballs, so pre-extract contents the way
    /// a real download would have.
    fn seed_cache(cache: &PackageCache, name: &str, version: &str) {
        let dir = cache.package_dir(name, version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .unwrap();
    }

    fn seed_all(cache: &PackageCache) {
        seed_cache(cache, "a", "1.0.0");
        seed_cache(cache, "b", "1.4.0");
    }

    #[tokio::test]
    async fn test_install_writes_lockfile_once_and_stays_stable() {
        let project = tempdir().unwrap();
        write_manifest(
            project.path(),
            r#"{"name":"app","version":"1.0.0","dependencies":{"a":"^1.0.0"}}"#,
        );
        let cache_dir = tempdir().unwrap();
        let cache = PackageCache::with_root(cache_dir.path().to_path_buf());
        seed_all(&cache);
        let catalog = setup_catalog();

        let ctx = InstallContext::new(&catalog, &cache);
        let first = install(project.path(), &ctx, &InstallOptions::default())
            .await
            .unwrap();
        assert!(first.lockfile_written);
        assert_eq!(first.resolved, 2);

        let bytes_after_first = fs::read(project.path().join(LOCKFILE_NAME)).unwrap();

        let second = install(project.path(), &ctx, &InstallOptions::default())
            .await
            .unwrap();
        assert!(!second.lockfile_written);
        assert_eq!(second.fetched_metadata, 0);
        assert_eq!(second.reused, 2);

        let bytes_after_second = fs::read(project.path().join(LOCKFILE_NAME)).unwrap();
        assert_eq!(bytes_after_first, bytes_after_second);
    }

    #[tokio::test]
    async fn test_frozen_without_lockfile_fails() {
        let project = tempdir().unwrap();
        write_manifest(
            project.path(),
            r#"{"name":"app","dependencies":{"a":"^1.0.0"}}"#,
        );
        let cache_dir = tempdir().unwrap();
        let cache = PackageCache::with_root(cache_dir.path().to_path_buf());
        let catalog = setup_catalog();

        let ctx = InstallContext::new(&catalog, &cache);
        let err = install(
            project.path(),
            &ctx,
            &InstallOptions {
                frozen_lockfile: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), lockfile::codes::PKG_LOCK_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_frozen_with_stale_lockfile_fails() {
        let project = tempdir().unwrap();
        write_manifest(
            project.path(),
            r#"{"name":"app","dependencies":{"a":"^1.0.0"}}"#,
        );
        let cache_dir = tempdir().unwrap();
        let cache = PackageCache::with_root(cache_dir.path().to_path_buf());
        seed_all(&cache);
        let catalog = setup_catalog();

        let ctx = InstallContext::new(&catalog, &cache);
        install(project.path(), &ctx, &InstallOptions::default())
            .await
            .unwrap();

        // The manifest changes under the lockfile.
        write_manifest(
            project.path(),
            r#"{"name":"app","dependencies":{"a":"^1.0.0","b":"^1.0.0"}}"#,
        );
        let err = install(
            project.path(),
            &ctx,
            &InstallOptions {
                frozen_lockfile: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), lockfile::codes::PKG_LOCK_STALE);

        // The lockfile on disk is untouched.
        let on_disk = Lockfile::read_from(&project.path().join(LOCKFILE_NAME)).unwrap();
        assert!(!on_disk.dependencies.contains_key("b"));
    }

    #[tokio::test]
    async fn test_offline_install_from_warm_cache() {
        let project = tempdir().unwrap();
        write_manifest(
            project.path(),
            r#"{"name":"app","dependencies":{"b":"^1.0.0"}}"#,
        );
        let cache_dir = tempdir().unwrap();
        let cache = PackageCache::with_root(cache_dir.path().to_path_buf());
        seed_cache(&cache, "b", "1.4.0");
        let catalog = setup_catalog();

        let ctx = InstallContext::new(&catalog, &cache).with_network(NetworkMode::Offline);
        let report = install(project.path(), &ctx, &InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(catalog.fetch_count(), 0);
        assert_eq!(report.downloaded, 0);
        assert!(project
            .path()
            .join("node_modules")
            .join("b")
            .join("package.json")
            .is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_isolated_layout() {
        let project = tempdir().unwrap();
        write_manifest(
            project.path(),
            r#"{"name":"app","dependencies":{"b":"^1.0.0"}}"#,
        );
        let cache_dir = tempdir().unwrap();
        let cache = PackageCache::with_root(cache_dir.path().to_path_buf());
        seed_cache(&cache, "b", "1.4.0");
        let catalog = setup_catalog();

        let ctx = InstallContext::new(&catalog, &cache);
        install(
            project.path(),
            &ctx,
            &InstallOptions {
                linker: Some(LinkerKind::Isolated),
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

        let link = project.path().join("node_modules").join("b");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert!(link
            .canonicalize()
            .unwrap()
            .ends_with("b@1.4.0/node_modules/b"));
    }

    #[test]
    fn test_tarball_url_scoped() {
        let node = crate::graph::PackageNode {
            name: "@scope/pkg".to_string(),
            version: "1.0.0".to_string(),
            resolution: Resolution::default(),
            integrity: String::new(),
            dependencies: Default::default(),
            optional_dependencies: Default::default(),
            peer_dependencies: Default::default(),
            hoisted: true,
            requester: None,
        };
        assert_eq!(
            tarball_url(&node),
            "https://registry.npmjs.org/@scope/pkg/-/pkg-1.0.0.tgz"
        );
    }
}
