//! Identity-aware entry point over the handle cache.
//!
//! [`HandleProvider`] composes the pieces: it resolves a URI to a
//! [`Destination`], checks the scheme's opt-out flag, finds the factory, and
//! either goes through the [`HandleCache`] or constructs directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conduit_core::{
    CacheSettingsSource, CallerIdentity, ConduitResult, ConfigError, Destination, SchemeRegistry,
    SharedHandle,
};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::factory::FactoryRegistry;
use crate::handle_cache::HandleCache;
use crate::key::HandleKey;
use crate::traits::CacheStats;

static GLOBAL: OnceCell<HandleProvider> = OnceCell::new();

/// Hands out backend handles for the active caller identity.
///
/// # Example
///
/// ```ignore
/// let factories = Arc::new(FactoryRegistry::new());
/// factories.register("hdfs", Arc::new(HdfsFactory::default()))?;
/// let provider = HandleProvider::new(Arc::new(SchemeRegistry::new()), factories);
///
/// let alice = CallerIdentity::new("alice")?;
/// let handle = alice.run_as(|| provider.acquire("hdfs://nn:8020/data"))?;
/// ```
pub struct HandleProvider {
    /// Opt-out flags, aliases and the default destination.
    settings: Arc<dyn CacheSettingsSource>,
    /// Factories by scheme.
    factories: Arc<FactoryRegistry>,
    /// Shared handle cache.
    cache: Arc<HandleCache>,
    /// Acquires that skipped the cache, shared between clones.
    bypasses: Arc<AtomicU64>,
}

impl Clone for HandleProvider {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            factories: Arc::clone(&self.factories),
            cache: Arc::clone(&self.cache),
            bypasses: Arc::clone(&self.bypasses),
        }
    }
}

impl Default for HandleProvider {
    fn default() -> Self {
        Self::new(
            Arc::new(SchemeRegistry::new()),
            Arc::new(FactoryRegistry::new()),
        )
    }
}

impl HandleProvider {
    /// Create a provider with an empty cache.
    pub fn new(settings: Arc<dyn CacheSettingsSource>, factories: Arc<FactoryRegistry>) -> Self {
        Self {
            settings,
            factories,
            cache: Arc::new(HandleCache::new()),
            bypasses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Share an existing cache instead of the provider's own.
    pub fn with_cache(mut self, cache: Arc<HandleCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Resolve `uri` against the configured default destination.
    ///
    /// A default that is configured but malformed is reported as such, even
    /// when `uri` carries its own scheme.
    pub fn resolve(&self, uri: &str) -> ConduitResult<Destination> {
        let default = self.settings.default_destination()?;
        Ok(Destination::resolve(uri, default.as_ref())?)
    }

    /// Handle for `uri`, acting as the current identity.
    pub fn acquire(&self, uri: &str) -> ConduitResult<SharedHandle> {
        let destination = self.resolve(uri)?;
        self.acquire_as(&destination, &CallerIdentity::current())
    }

    /// Handle for `destination`, acting as the current identity.
    pub fn acquire_destination(&self, destination: &Destination) -> ConduitResult<SharedHandle> {
        self.acquire_as(destination, &CallerIdentity::current())
    }

    /// Handle for `destination`, acting as `identity`.
    ///
    /// The opt-out flag is read on every call. An opted-out scheme gets a
    /// fresh handle each time and the cache is not consulted.
    pub fn acquire_as(
        &self,
        destination: &Destination,
        identity: &CallerIdentity,
    ) -> ConduitResult<SharedHandle> {
        let bypass = self.settings.is_cache_disabled(destination.scheme());
        let factory = self
            .factories
            .resolve(destination.scheme(), self.settings.as_ref())?;

        if bypass {
            self.bypasses.fetch_add(1, Ordering::Relaxed);
            debug!(
                scheme = destination.scheme(),
                authority = destination.authority(),
                principal = identity.principal(),
                "handle cache disabled for scheme, constructing"
            );
            return Ok(factory.construct(destination, identity)?);
        }

        let key = HandleKey::derive(destination, identity)?;
        self.cache
            .acquire(&key, || factory.construct(destination, identity))
    }

    /// Fresh, uncached handle for `uri`, acting as the current identity.
    ///
    /// The caller owns the handle and must close it.
    pub fn new_instance(&self, uri: &str) -> ConduitResult<SharedHandle> {
        let destination = self.resolve(uri)?;
        self.new_instance_as(&destination, &CallerIdentity::current())
    }

    /// Fresh, uncached handle for `destination`, acting as `identity`.
    pub fn new_instance_as(
        &self,
        destination: &Destination,
        identity: &CallerIdentity,
    ) -> ConduitResult<SharedHandle> {
        let factory = self
            .factories
            .resolve(destination.scheme(), self.settings.as_ref())?;
        debug!(
            scheme = destination.scheme(),
            authority = destination.authority(),
            principal = identity.principal(),
            "constructing uncached handle"
        );
        Ok(factory.construct(destination, identity)?)
    }

    /// Close every cached handle. See [`HandleCache::close_all`].
    pub fn close_all(&self) -> ConduitResult<usize> {
        self.cache.close_all()
    }

    /// Close every cached handle belonging to `identity`'s principal.
    pub fn close_all_for(&self, identity: &CallerIdentity) -> ConduitResult<usize> {
        self.cache.close_all_for(identity.principal())
    }

    /// Cache statistics plus the bypasses counted by this provider.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            bypasses: self.bypasses.load(Ordering::Relaxed),
            ..self.cache.stats()
        }
    }

    pub fn cache(&self) -> &Arc<HandleCache> {
        &self.cache
    }

    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    pub fn settings(&self) -> &Arc<dyn CacheSettingsSource> {
        &self.settings
    }

    /// Make `self` the process-wide provider.
    ///
    /// # Errors
    ///
    /// `ConfigError::AlreadyInstalled` if a provider was installed before.
    pub fn install_global(self) -> Result<&'static HandleProvider, ConfigError> {
        GLOBAL
            .try_insert(self)
            .map_err(|_| ConfigError::AlreadyInstalled)
    }

    /// The process-wide provider, if one was installed.
    pub fn global() -> Option<&'static HandleProvider> {
        GLOBAL.get()
    }
}

impl std::fmt::Debug for HandleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleProvider")
            .field("factories", &self.factories)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
