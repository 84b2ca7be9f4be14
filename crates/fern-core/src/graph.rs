//! The resolved dependency graph.
//!
//! Nodes live in an arena indexed by integer handle; edges are handle pairs.
//! Cycles are therefore plain index pairs with no special-casing needed for
//! teardown or traversal. Each node records whether it is hoisted (wins the
//! top-level slot for its name) or nested under its requester; the linkers
//! materialize exactly these decisions without re-deciding placement.

use crate::manifest::DepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handle into the graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a package was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Resolved from the registry.
    Registry {
        /// Registry URL (empty string = default registry).
        #[serde(skip_serializing_if = "String::is_empty", default)]
        registry: String,
    },
    /// Resolved from a tarball URL.
    Tarball { url: String },
    /// Resolved from a git repository.
    Git {
        url: String,
        #[serde(rename = "ref")]
        git_ref: String,
    },
    /// Resolved from the local filesystem.
    File { path: String },
    /// A sibling workspace package, identified by root-relative path.
    Workspace { path: String },
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Registry {
            registry: String::new(),
        }
    }
}

/// A node in the graph: one resolved package identity.
///
/// Identity is (name, version, resolution); two nodes are the same package
/// iff all three match. The flattened dependency maps make the lockfile
/// self-sufficient without re-contacting the registry.
#[derive(Debug, Clone)]
pub struct PackageNode {
    pub name: String,
    pub version: String,
    pub resolution: Resolution,
    /// Integrity/checksum for the package contents (empty for workspaces).
    pub integrity: String,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
    /// Whether this node wins the top-level slot for its name.
    pub hoisted: bool,
    /// For nested instances, the node whose `node_modules` shadows the
    /// top-level entry.
    pub requester: Option<NodeId>,
}

impl PackageNode {
    /// The identity key, e.g. `lodash@4.17.21` or `a@workspace:packages/a`.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.resolution {
            Resolution::Registry { .. } => format!("{}@{}", self.name, self.version),
            Resolution::Tarball { url } => format!("{}@{url}", self.name),
            Resolution::Git { url, git_ref } => format!("{}@git+{url}#{git_ref}", self.name),
            Resolution::File { path } => format!("{}@file:{path}", self.name),
            Resolution::Workspace { path } => format!("{}@workspace:{path}", self.name),
        }
    }

    /// Whether this node is a workspace member.
    #[must_use]
    pub fn is_workspace(&self) -> bool {
        matches!(self.resolution, Resolution::Workspace { .. })
    }
}

/// A satisfied dependency requirement.
///
/// `from == None` means the project root is the requester.
#[derive(Debug, Clone)]
pub struct DepEdge {
    pub from: Option<NodeId>,
    pub name: String,
    pub range: String,
    pub kind: DepKind,
    pub to: NodeId,
}

/// The complete dependency graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<PackageNode>,
    edges: Vec<DepEdge>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its handle.
    pub fn add_node(&mut self, node: PackageNode) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("graph too large"));
        self.nodes.push(node);
        id
    }

    /// Add a satisfied edge.
    pub fn add_edge(&mut self, edge: DepEdge) {
        self.edges.push(edge);
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &PackageNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PackageNode {
        &mut self.nodes[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PackageNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(u32::try_from(i).expect("graph too large")), n))
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[DepEdge] {
        &self.edges
    }

    /// Edges whose requester is `from`.
    pub fn edges_from(&self, from: Option<NodeId>) -> impl Iterator<Item = &DepEdge> {
        self.edges.iter().filter(move |e| e.from == from)
    }

    /// Find an existing node of this name whose version satisfies the range.
    ///
    /// This is the dedup lookup: ranges that intersect an already-chosen
    /// version reuse its node, which is what keeps the graph flat.
    #[must_use]
    pub fn find_satisfying(&self, name: &str, range: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, n)| n.name == name && crate::version::version_satisfies(range, &n.version))
            .map(|(id, _)| id)
    }

    /// Find a node by exact name and version.
    #[must_use]
    pub fn find_exact(&self, name: &str, version: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, n)| n.name == name && n.version == version)
            .map(|(id, _)| id)
    }

    /// Nodes reachable from the root's edges, in handle order.
    ///
    /// Used for garbage collection: lockfile entries for unreachable nodes
    /// are pruned on save.
    #[must_use]
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue: Vec<NodeId> = self.edges_from(None).map(|e| e.to).collect();

        while let Some(id) = queue.pop() {
            if seen[id.index()] {
                continue;
            }
            seen[id.index()] = true;
            for edge in self.edges_from(Some(id)) {
                if !seen[edge.to.index()] {
                    queue.push(edge.to);
                }
            }
        }

        seen.iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| NodeId(u32::try_from(i).expect("graph too large")))
            .collect()
    }
}
