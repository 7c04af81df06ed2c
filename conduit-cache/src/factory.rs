//! Scheme-to-factory registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use conduit_core::{BackendFactory, CacheSettingsSource, ConfigError, Destination};

/// Registry of backend factories by scheme.
/// Factories must be explicitly registered - no auto-discovery.
///
/// A scheme may also be routed to another scheme's factory through the
/// settings' alias entries (`fs.<scheme>.impl`). Aliases are read at resolve
/// time, so they can change while the registry is in use.
///
/// # Example
/// ```ignore
/// let registry = FactoryRegistry::new();
/// registry.register("file", Arc::new(LocalFileFactory::default()))?;
///
/// // "cachedfile" handles are built by the "file" factory.
/// let settings = CacheSettings::new().with_alias("cachedfile", "file");
/// let factory = registry.resolve("cachedfile", &settings)?;
/// ```
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn BackendFactory>>>,
}

impl FactoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `scheme`.
    /// Replaces any previously registered factory for that scheme.
    ///
    /// # Arguments
    /// * `scheme` - Scheme name, validated like a destination scheme
    /// * `factory` - The factory to register
    pub fn register(
        &self,
        scheme: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<(), ConfigError> {
        let scheme = scheme.into();
        // Reuse destination validation so registered names are always reachable.
        Destination::new(scheme.as_str(), "", "")?;
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scheme, factory);
        Ok(())
    }

    /// Remove the factory for `scheme`, returning it.
    pub fn unregister(&self, scheme: &str) -> Option<Arc<dyn BackendFactory>> {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scheme)
    }

    /// Check if a factory is registered directly under `scheme`.
    pub fn contains(&self, scheme: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(scheme)
    }

    /// Find the factory that builds handles for `scheme`.
    ///
    /// Alias entries in `settings` are followed first, so an alias can
    /// shadow a direct registration.
    ///
    /// # Returns
    /// * `Ok(factory)` - The factory at the end of the alias chain
    /// * `Err(ConfigError::UnknownScheme)` - If nothing is registered there
    /// * `Err(ConfigError::InvalidValue)` - If the aliases form a cycle
    pub fn resolve(
        &self,
        scheme: &str,
        settings: &dyn CacheSettingsSource,
    ) -> Result<Arc<dyn BackendFactory>, ConfigError> {
        let mut current = scheme.to_string();
        let mut seen = HashSet::from([current.clone()]);

        while let Some(target) = settings.alias_of(&current) {
            if !seen.insert(target.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("fs.{}.impl", current),
                    value: target,
                    reason: format!("alias cycle while resolving scheme '{}'", scheme),
                });
            }
            current = target;
        }

        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&current)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownScheme {
                scheme: scheme.to_string(),
            })
    }

    /// Registered scheme names, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
