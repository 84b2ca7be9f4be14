//! Shared install-time context.

use crate::cache::PackageCache;
use crate::catalog::CatalogSource;

/// How willing an operation is to touch the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Always consult the catalog for metadata.
    #[default]
    Online,
    /// Satisfy ranges from the cache when possible, fetch otherwise.
    PreferOffline,
    /// Never touch the network; uncached requirements fail.
    Offline,
}

/// The external world an install runs against: the catalog source, the
/// package cache, and how the network may be used. Built once per
/// invocation and passed by reference through resolver and install calls,
/// so tests can substitute an in-memory catalog and a scratch cache.
pub struct InstallContext<'a, C: CatalogSource> {
    pub catalog: &'a C,
    pub cache: &'a PackageCache,
    pub network: NetworkMode,
}

impl<'a, C: CatalogSource> InstallContext<'a, C> {
    #[must_use]
    pub fn new(catalog: &'a C, cache: &'a PackageCache) -> Self {
        Self {
            catalog,
            cache,
            network: NetworkMode::default(),
        }
    }

    #[must_use]
    pub fn with_network(mut self, network: NetworkMode) -> Self {
        self.network = network;
        self
    }
}

impl<C: CatalogSource> Clone for InstallContext<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: CatalogSource> Copy for InstallContext<'_, C> {}
