//! Isolated linking: a content-addressed store with symlinked consumers.
//!
//! Every registry package lives exactly once under
//! `node_modules/.fern/<key>/node_modules/<name>`, and every consumer edge
//! becomes a relative symlink into the store. The store owns all contents;
//! nothing outside it is a real directory. Three passes (store dirs,
//! contents, symlinks) mean cycles need no special casing: by the time any
//! symlink is created, every target directory already exists.

use super::{entry_path, force_symlink, LinkReport, LinkRequest, Linker};
use crate::error::PkgError;
use crate::graph::{NodeId, Resolution};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Store directory name under the project's `node_modules`.
pub const STORE_DIR: &str = ".fern";

pub struct IsolatedLinker;

impl Linker for IsolatedLinker {
    fn link(&self, request: &LinkRequest<'_>) -> Result<LinkReport, PkgError> {
        let mut report = LinkReport::default();
        let store_root = request.root.join("node_modules").join(STORE_DIR);
        let reachable = request.graph.reachable();

        // Pass 1: create every store entry's private node_modules.
        let mut store_dirs: HashMap<NodeId, PathBuf> = HashMap::new();
        for &id in &reachable {
            let node = request.graph.node(id);
            if node.is_workspace() {
                continue;
            }
            let entry_nm = store_root
                .join(store_key(&node.name, &node.version))
                .join("node_modules");
            fs::create_dir_all(&entry_nm)?;
            store_dirs.insert(id, entry_path(&entry_nm, &node.name)?);
        }

        // Pass 2: populate contents from the cache.
        for &id in &reachable {
            let Some(dir) = store_dirs.get(&id) else {
                continue;
            };
            let node = request.graph.node(id);

            if dir.join("package.json").is_file() {
                tracing::trace!(key = %node.key(), "store entry already populated");
            } else {
                let src = request.cache.package_dir(&node.name, &node.version);
                if !src.is_dir() {
                    return Err(PkgError::link_failed(format!(
                        "'{}' is not in the cache",
                        node.key()
                    )));
                }
                fern_util::fs::copy_dir_all(&src, dir)?;
            }
            report.store_entries += 1;
        }

        // Pass 3: one relative symlink per consumer edge, plus top-level
        // umbrella links mirroring hoist visibility.
        for edge in request.graph.edges() {
            let target = link_target(request, &store_dirs, edge.to);
            let consumer_nm = match edge.from {
                None => request.root.join("node_modules"),
                Some(from) => {
                    let from_node = request.graph.node(from);
                    if let Resolution::Workspace { path } = &from_node.resolution {
                        request.root.join(path).join("node_modules")
                    } else if let Some(dir) = store_dirs.get(&from) {
                        // Sibling inside the consumer's private node_modules.
                        dir.parent().map(Path::to_path_buf).ok_or_else(|| {
                            PkgError::link_failed("store entry has no parent".to_string())
                        })?
                    } else {
                        continue;
                    }
                }
            };

            fs::create_dir_all(&consumer_nm)?;
            let link = entry_path(&consumer_nm, &edge.name)?;
            if link == target {
                // A workspace member depending on itself-by-name.
                continue;
            }
            relative_symlink(&target, &link)?;
            report.linked += 1;
        }

        for &id in &reachable {
            let node = request.graph.node(id);
            if !node.hoisted || node.is_workspace() {
                continue;
            }
            let nm = request.root.join("node_modules");
            fs::create_dir_all(&nm)?;
            let link = entry_path(&nm, &node.name)?;
            let existed = fs::symlink_metadata(&link).is_ok();
            relative_symlink(&link_target(request, &store_dirs, id), &link)?;
            if !existed {
                report.linked += 1;
            }
        }

        Ok(report)
    }
}

/// Flatten a package identity into a store directory name.
///
/// `@scope/name` becomes `scope+name@version` so the key is a single path
/// component.
#[must_use]
pub fn store_key(name: &str, version: &str) -> String {
    let flat = name.trim_start_matches('@').replace('/', "+");
    format!("{flat}@{version}")
}

fn link_target(
    request: &LinkRequest<'_>,
    store_dirs: &HashMap<NodeId, PathBuf>,
    id: NodeId,
) -> PathBuf {
    let node = request.graph.node(id);
    if let Resolution::Workspace { path } = &node.resolution {
        request.root.join(path)
    } else {
        store_dirs[&id].clone()
    }
}

/// Create a relative symlink so the tree survives being moved.
fn relative_symlink(target: &Path, link: &Path) -> Result<(), PkgError> {
    let base = link
        .parent()
        .ok_or_else(|| PkgError::link_failed("link path has no parent".to_string()))?;
    let rel = fern_util::fs::relative_from(target, base);
    force_symlink(&rel, link)
}
