//! Hoisted linking: a single flat `node_modules`.
//!
//! Each name that won hoisting gets one top-level entry; conflicting
//! versions are written inside the `node_modules` of every package that
//! depends on them, where Node's resolution walk shadows the top-level
//! entry. Registry packages are copied out of the cache so a nested
//! override can never write through into shared cache contents; workspace
//! members are symlinked in place.

use super::{entry_path, force_symlink, LinkReport, LinkRequest, Linker};
use crate::error::PkgError;
use crate::graph::{NodeId, Resolution};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

pub struct HoistedLinker;

impl Linker for HoistedLinker {
    fn link(&self, request: &LinkRequest<'_>) -> Result<LinkReport, PkgError> {
        let mut report = LinkReport::default();
        let reachable = request.graph.reachable();

        let root_nm = request.root.join("node_modules");
        fs::create_dir_all(&root_nm)?;

        // Names visible at the top level. Plain BTreeMap so the placement
        // walk below is deterministic.
        let mut top: BTreeMap<String, NodeId> = BTreeMap::new();
        for &id in &reachable {
            let node = request.graph.node(id);
            if node.hoisted || node.is_workspace() {
                top.insert(node.name.clone(), id);
            }
        }

        let mut placements: Vec<(NodeId, PathBuf)> = Vec::new();
        let mut seen: HashSet<(NodeId, PathBuf)> = HashSet::new();
        for &id in top.values() {
            plan(request, id, &root_nm, &top, &mut placements, &mut seen, 0)?;
        }

        for (id, dir) in &placements {
            let node = request.graph.node(*id);
            match &node.resolution {
                Resolution::Workspace { path } => {
                    let target = request.root.join(path);
                    force_symlink(&target, dir)?;
                    tracing::trace!(name = %node.name, "linked workspace member");
                }
                _ => {
                    let src = request.cache.package_dir(&node.name, &node.version);
                    if !src.is_dir() {
                        return Err(PkgError::link_failed(format!(
                            "'{}' is not in the cache",
                            node.key()
                        )));
                    }
                    if already_installed(dir, &node.version) {
                        tracing::trace!(key = %node.key(), "already linked");
                    } else {
                        if dir.exists() {
                            fs::remove_dir_all(dir)?;
                        }
                        fern_util::fs::copy_dir_all(&src, dir)?;
                    }
                }
            }
            report.linked += 1;
        }

        Ok(report)
    }
}

/// Plan the physical entry for `id` under `node_modules`, then recurse
/// into every dependency edge whose target the surrounding scope does not
/// already resolve. A name that resolves to a different node gets a shadow
/// copy here, so every edge the graph encodes is honored at this location.
fn plan(
    request: &LinkRequest<'_>,
    id: NodeId,
    node_modules: &std::path::Path,
    scope: &BTreeMap<String, NodeId>,
    placements: &mut Vec<(NodeId, PathBuf)>,
    seen: &mut HashSet<(NodeId, PathBuf)>,
    depth: usize,
) -> Result<(), PkgError> {
    if depth > request.graph.len() {
        return Err(PkgError::link_failed(
            "dependency nesting exceeded the graph size; refusing to recurse further",
        ));
    }

    let node = request.graph.node(id);
    let dir = entry_path(node_modules, &node.name)?;
    if !seen.insert((id, dir.clone())) {
        return Ok(());
    }

    // Parents land before the shadows nested inside them, so replacing a
    // stale parent copy can never clobber a child placed earlier.
    placements.push((id, dir.clone()));

    let mut inner = scope.clone();
    inner.insert(node.name.clone(), id);

    for edge in request.graph.edges_from(Some(id)) {
        let target = request.graph.node(edge.to);
        // Workspace members only ever live at the top level.
        if target.is_workspace() {
            continue;
        }
        if inner.get(&target.name) == Some(&edge.to) {
            continue;
        }
        plan(
            request,
            edge.to,
            &dir.join("node_modules"),
            &inner,
            placements,
            seen,
            depth + 1,
        )?;
    }

    Ok(())
}

/// A previous install of the same version can be left alone.
fn already_installed(dir: &std::path::Path, version: &str) -> bool {
    let manifest = dir.join("package.json");
    let Ok(content) = fs::read_to_string(manifest) else {
        return false;
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    json.get("version").and_then(|v| v.as_str()) == Some(version)
}
