#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod install;
pub mod link;
pub mod lockfile;
pub mod manifest;
pub mod patch;
pub mod paths;
pub mod resolve;
pub mod scripts;
pub mod tarball;
pub mod version;
pub mod workspaces;

pub use cache::PackageCache;
pub use catalog::{CatalogError, CatalogSource, PackageCatalog, RegistryClient};
pub use config::{Channel, Config};
pub use context::{InstallContext, NetworkMode};
pub use error::PkgError;
pub use graph::{DepEdge, Graph, NodeId, PackageNode, Resolution};
pub use install::{install, InstallOptions, InstallReport};
pub use link::{LinkReport, LinkRequest, Linker, LinkerKind};
pub use lockfile::{Lockfile, LOCKFILE_NAME, PKG_LOCK_SCHEMA_VERSION};
pub use manifest::{DepKind, Manifest, ManifestOptions, Requirement};
pub use resolve::{resolve, PeerWarning, ResolveOptions, ResolveResult};
pub use scripts::{
    run_workspace_scripts, ProcessRunner, ScheduleMode, ScriptReport, ScriptRunner,
};
pub use workspaces::{discover_workspaces, WorkspacePackage, WorkspaceSet};
