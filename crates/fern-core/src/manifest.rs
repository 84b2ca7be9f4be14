//! Manifest reading: package.json into typed requirements.
//!
//! Converts a project descriptor (name, version, dependency fields by kind,
//! workspace globs, patch map, scripts) into the in-memory form the resolver
//! consumes. Dependency kinds have npm precedence: `dependencies` wins over
//! `devDependencies`, which wins over `optionalDependencies`.

use crate::error::PkgError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest filename.
pub const MANIFEST_NAME: &str = "package.json";

/// The kind of a dependency requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    #[serde(rename = "dep")]
    Normal,
    Dev,
    Optional,
    Peer,
}

impl DepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "dep",
            Self::Dev => "dev",
            Self::Optional => "optional",
            Self::Peer => "peer",
        }
    }
}

/// A single dependency requirement: name plus range expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub range: String,
    pub kind: DepKind,
}

impl Requirement {
    #[must_use]
    pub fn new(name: impl Into<String>, range: impl Into<String>, kind: DepKind) -> Self {
        Self {
            name: name.into(),
            range: range.into(),
            kind,
        }
    }
}

/// Which dependency sections to read.
#[derive(Debug, Clone, Copy)]
pub struct ManifestOptions {
    /// Include devDependencies.
    pub include_dev: bool,
    /// Include optionalDependencies.
    pub include_optional: bool,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            include_dev: true,
            include_optional: true,
        }
    }
}

/// A parsed project manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Package name ("unnamed" when absent).
    pub name: String,
    /// Package version, if declared.
    pub version: Option<String>,
    /// Requirements in name order, precedence already applied.
    pub requirements: Vec<Requirement>,
    /// Peer requirements, advisory only.
    pub peers: Vec<Requirement>,
    /// Workspace glob patterns (empty = no workspaces).
    pub workspaces: Vec<String>,
    /// Linker strategy from the workspaces object, if configured.
    pub linker: Option<String>,
    /// Lifecycle scripts (name -> shell command).
    pub scripts: BTreeMap<String, String>,
    /// Patched dependencies: "name@version" -> patch file path.
    pub patched_dependencies: BTreeMap<String, String>,
}

/// Read and parse a manifest from a project directory.
///
/// # Errors
/// Returns an error if package.json is missing, unreadable, or invalid.
pub fn read_manifest(dir: &Path, opts: &ManifestOptions) -> Result<Manifest, PkgError> {
    let path = dir.join(MANIFEST_NAME);
    if !path.exists() {
        return Err(PkgError::manifest_not_found(&path));
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| PkgError::manifest_invalid(format!("Failed to read: {e}")))?;
    let json: Value = serde_json::from_str(&content)
        .map_err(|e| PkgError::manifest_invalid(format!("Invalid JSON: {e}")))?;

    parse_manifest(&json, opts)
}

/// Parse an already-loaded package.json value.
///
/// # Errors
/// Returns an error if the root is not an object or a section is malformed.
pub fn parse_manifest(json: &Value, opts: &ManifestOptions) -> Result<Manifest, PkgError> {
    let root = json
        .as_object()
        .ok_or_else(|| PkgError::manifest_invalid("package.json must be a JSON object"))?;

    let name = root
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed")
        .to_string();
    let version = root
        .get("version")
        .and_then(Value::as_str)
        .map(String::from);

    // Lowest precedence first; later sections overwrite.
    let mut merged: BTreeMap<String, (String, DepKind)> = BTreeMap::new();
    if opts.include_optional {
        extract_section(root, "optionalDependencies", DepKind::Optional, &mut merged)?;
    }
    if opts.include_dev {
        extract_section(root, "devDependencies", DepKind::Dev, &mut merged)?;
    }
    extract_section(root, "dependencies", DepKind::Normal, &mut merged)?;

    let requirements = merged
        .into_iter()
        .map(|(name, (range, kind))| Requirement::new(name, range, kind))
        .collect();

    let mut peer_map: BTreeMap<String, (String, DepKind)> = BTreeMap::new();
    extract_section(root, "peerDependencies", DepKind::Peer, &mut peer_map)?;
    let peers = peer_map
        .into_iter()
        .map(|(name, (range, kind))| Requirement::new(name, range, kind))
        .collect();

    let (workspaces, linker) = parse_workspaces_field(root.get("workspaces"));

    let scripts = root
        .get("scripts")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let patched_dependencies = root
        .get("patchedDependencies")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(Manifest {
        name,
        version,
        requirements,
        peers,
        workspaces,
        linker,
        scripts,
        patched_dependencies,
    })
}

/// Workspaces can be an array of globs or an object:
/// `{ "packages": ["packages/*"], "linker": "isolated" }`.
fn parse_workspaces_field(value: Option<&Value>) -> (Vec<String>, Option<String>) {
    match value {
        Some(Value::Array(arr)) => (
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            None,
        ),
        Some(Value::Object(obj)) => {
            let patterns = obj
                .get("packages")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            let linker = obj
                .get("linker")
                .and_then(Value::as_str)
                .map(String::from);
            (patterns, linker)
        }
        _ => (Vec::new(), None),
    }
}

fn extract_section(
    root: &serde_json::Map<String, Value>,
    section: &str,
    kind: DepKind,
    out: &mut BTreeMap<String, (String, DepKind)>,
) -> Result<(), PkgError> {
    let Some(section_value) = root.get(section) else {
        return Ok(());
    };

    let Some(section_obj) = section_value.as_object() else {
        return Err(PkgError::manifest_invalid(format!(
            "'{section}' must be an object"
        )));
    };

    for (name, range_value) in section_obj {
        let Some(range) = range_value.as_str() else {
            return Err(PkgError::manifest_invalid(format!(
                "Invalid range for '{name}' in '{section}': expected string"
            )));
        };
        out.insert(name.clone(), (range.to_string(), kind));
    }

    Ok(())
}

/// Set or update an entry in the manifest's `patchedDependencies` map,
/// preserving all other fields, and write the file atomically.
///
/// # Errors
/// Returns an error if the manifest cannot be read, parsed, or written.
pub fn record_patched_dependency(
    dir: &Path,
    key: &str,
    patch_path: &str,
) -> Result<(), PkgError> {
    let path = dir.join(MANIFEST_NAME);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| PkgError::manifest_invalid(format!("Failed to read: {e}")))?;
    let mut json: Value = serde_json::from_str(&content)
        .map_err(|e| PkgError::manifest_invalid(format!("Invalid JSON: {e}")))?;

    let root = json
        .as_object_mut()
        .ok_or_else(|| PkgError::manifest_invalid("package.json must be a JSON object"))?;

    let patched = root
        .entry("patchedDependencies")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let Some(map) = patched.as_object_mut() else {
        return Err(PkgError::manifest_invalid(
            "'patchedDependencies' must be an object",
        ));
    };
    map.insert(key.to_string(), Value::String(patch_path.to_string()));

    let serialized = serde_json::to_string_pretty(&json)
        .map_err(|e| PkgError::manifest_invalid(format!("Failed to serialize: {e}")))?;
    fern_util::fs::atomic_write(&path, serialized.as_bytes())
        .map_err(|e| PkgError::manifest_invalid(format!("Failed to write: {e}")))?;
    Ok(())
}
