//! Package catalogs and the sources that serve them.
//!
//! The resolver never talks to the network directly; it goes through a
//! [`CatalogSource`], so tests can resolve against an in-memory catalog and
//! assert on exactly how many fetches happened.

use crate::error::{codes, PkgError};
use bytes::Bytes;
use reqwest::Client;
use semver::Version;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "FERN_NPM_REGISTRY";

/// Metadata for one published version of a package.
#[derive(Debug, Clone, Default)]
pub struct VersionInfo {
    pub integrity: String,
    pub tarball: String,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
}

/// The full version listing for one package name.
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    pub name: String,
    /// Versions in ascending order; selection walks from the back.
    pub versions: Vec<(Version, VersionInfo)>,
}

impl PackageCatalog {
    /// Look up metadata for an exact version.
    #[must_use]
    pub fn info(&self, version: &Version) -> Option<&VersionInfo> {
        self.versions
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, i)| i)
    }

    /// Version list alone, still ascending.
    #[must_use]
    pub fn version_list(&self) -> Vec<Version> {
        self.versions.iter().map(|(v, _)| v.clone()).collect()
    }
}

/// Errors a catalog source can produce.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Package '{0}' not found")]
    NotFound(String),
    #[error("'{0}' requires network access but offline mode is active")]
    NeedsNetwork(String),
    #[error("{0}")]
    Network(String),
}

impl From<CatalogError> for PkgError {
    fn from(err: CatalogError) -> Self {
        match &err {
            CatalogError::NotFound(name) => PkgError::not_found(name),
            CatalogError::NeedsNetwork(name) => PkgError::needs_network(name),
            CatalogError::Network(msg) => PkgError::new(codes::PKG_REGISTRY_ERROR, msg.clone()),
        }
    }
}

/// Where package metadata and tarballs come from.
///
/// Implementations must be safe to call concurrently; the resolver issues
/// batched fetches.
pub trait CatalogSource: Sync {
    /// Fetch the catalog for a package name.
    fn fetch_catalog(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<PackageCatalog, CatalogError>> + Send;

    /// Fetch a tarball by URL.
    fn fetch_tarball(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<Bytes, CatalogError>> + Send;
}

/// Registry-backed catalog source.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("fern/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// Create a client using the registry URL from environment or default.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_env() -> Result<Self, PkgError> {
        let url = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&url)
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch_packument(&self, name: &str) -> Result<serde_json::Value, CatalogError> {
        // URL-encode the name for scoped packages
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        let url = self
            .base_url
            .join(&encoded_name)
            .map_err(|e| CatalogError::Network(format!("Failed to build URL for '{name}': {e}")))?;

        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| CatalogError::Network(format!("Request for '{name}' failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(name.to_string()));
        }

        if !response.status().is_success() {
            return Err(CatalogError::Network(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::Network(format!("Invalid packument for '{name}': {e}")))
    }
}

impl CatalogSource for RegistryClient {
    async fn fetch_catalog(&self, name: &str) -> Result<PackageCatalog, CatalogError> {
        let packument = self.fetch_packument(name).await?;
        Ok(parse_packument(name, &packument))
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, CatalogError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(format!("Download of '{url}' failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CatalogError::Network(format!(
                "Download of '{url}' returned status {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| CatalogError::Network(format!("Download of '{url}' failed: {e}")))
    }
}

/// Convert a raw npm packument into a sorted catalog.
///
/// Versions that fail to parse as semver are skipped rather than failing the
/// whole catalog; registries do carry the occasional junk version.
#[must_use]
pub fn parse_packument(name: &str, packument: &serde_json::Value) -> PackageCatalog {
    let mut versions: Vec<(Version, VersionInfo)> = Vec::new();

    if let Some(map) = packument.get("versions").and_then(|v| v.as_object()) {
        for (ver_str, meta) in map {
            let Ok(version) = Version::parse(ver_str) else {
                continue;
            };
            versions.push((version, parse_version_meta(meta)));
        }
    }

    versions.sort_by(|(a, _), (b, _)| a.cmp(b));
    tracing::trace!(name, count = versions.len(), "parsed packument");

    PackageCatalog {
        name: name.to_string(),
        versions,
    }
}

fn parse_version_meta(meta: &serde_json::Value) -> VersionInfo {
    let dep_map = |field: &str| -> BTreeMap<String, String> {
        meta.get(field)
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };

    let dist = meta.get("dist");
    let dist_str = |field: &str| -> String {
        dist.and_then(|d| d.get(field))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    VersionInfo {
        integrity: dist_str("integrity"),
        tarball: dist_str("tarball"),
        dependencies: dep_map("dependencies"),
        optional_dependencies: dep_map("optionalDependencies"),
        peer_dependencies: dep_map("peerDependencies"),
    }
}
