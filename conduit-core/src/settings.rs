//! Cache settings and the per-scheme opt-out registry.
//!
//! Settings are consulted on every lookup through [`CacheSettingsSource`],
//! never captured at startup, so a change is visible to the next acquire.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::destination::{validate_scheme, Destination};
use crate::error::ConfigError;

/// Environment variable holding the default destination.
pub const ENV_DEFAULT_DESTINATION: &str = "CONDUIT_DEFAULT_DESTINATION";

/// Environment variable holding a comma-separated list of uncached schemes.
pub const ENV_DISABLE_CACHE: &str = "CONDUIT_DISABLE_CACHE";

/// Read-only view of cache configuration, consulted at lookup time.
pub trait CacheSettingsSource: Send + Sync {
    /// Whether handles for `scheme` must bypass the cache.
    fn is_cache_disabled(&self, scheme: &str) -> bool;

    /// Scheme whose factory backs `scheme`, if it is an alias.
    fn alias_of(&self, _scheme: &str) -> Option<String> {
        None
    }

    /// Destination used to resolve URIs without a scheme.
    ///
    /// A configured value that does not parse is an error, not an absence.
    fn default_destination(&self) -> Result<Option<Destination>, ConfigError> {
        Ok(None)
    }
}

/// Per-scheme settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemeSettings {
    /// Never cache handles for this scheme.
    pub disable_cache: bool,
    /// Construct handles for this scheme with another scheme's factory.
    pub alias_of: Option<String>,
}

/// Cache configuration.
///
/// ```toml
/// default_destination = "hdfs://nn:8020"
///
/// [schemes.uncachedfile]
/// disable_cache = true
/// alias_of = "file"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_destination: Option<String>,
    pub schemes: HashMap<String, SchemeSettings>,
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the opt-out flag for a scheme.
    pub fn with_cache_disabled(mut self, scheme: impl Into<String>, disabled: bool) -> Self {
        self.set_cache_disabled(scheme, disabled);
        self
    }

    /// Back `scheme` with the factory registered for `target`.
    pub fn with_alias(mut self, scheme: impl Into<String>, target: impl Into<String>) -> Self {
        self.schemes.entry(scheme.into()).or_default().alias_of = Some(target.into());
        self
    }

    /// Set the default destination.
    pub fn with_default_destination(mut self, destination: impl Into<String>) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    pub fn set_cache_disabled(&mut self, scheme: impl Into<String>, disabled: bool) {
        self.schemes.entry(scheme.into()).or_default().disable_cache = disabled;
    }

    /// Apply a properties-style key.
    ///
    /// Recognised keys:
    /// - `fs.default.name`: default destination
    /// - `fs.<scheme>.impl`: alias `<scheme>` to the scheme named by the value
    /// - `fs.<scheme>.impl.disable.cache`: `true`/`false`
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if key == "fs.default.name" {
            let value = value.trim();
            Destination::parse(value)?;
            self.default_destination = Some(value.to_string());
            return Ok(());
        }

        let scheme_key = key.strip_prefix("fs.").ok_or_else(|| unknown_property(key))?;
        if let Some(scheme) = scheme_key.strip_suffix(".impl.disable.cache") {
            let disabled = value
                .trim()
                .parse::<bool>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: key.to_string(),
                    value: value.to_string(),
                    reason: "expected true or false".to_string(),
                })?;
            validate_scheme(scheme)?;
            self.set_cache_disabled(scheme, disabled);
            Ok(())
        } else if let Some(scheme) = scheme_key.strip_suffix(".impl") {
            validate_scheme(scheme)?;
            self.schemes.entry(scheme.to_string()).or_default().alias_of =
                Some(value.trim().to_string());
            Ok(())
        } else {
            Err(unknown_property(key))
        }
    }

    /// Parse settings from TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let settings: CacheSettings =
            toml::from_str(input).map_err(|e| ConfigError::ParseFailed {
                source_name: "cache settings".to_string(),
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from environment variables.
    ///
    /// Environment variables:
    /// - `CONDUIT_DEFAULT_DESTINATION`: default destination (default: none)
    /// - `CONDUIT_DISABLE_CACHE`: comma-separated schemes to opt out (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self {
            default_destination: lookup(ENV_DEFAULT_DESTINATION)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            schemes: HashMap::new(),
        };
        if let Some(list) = lookup(ENV_DISABLE_CACHE) {
            for scheme in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                settings.set_cache_disabled(scheme, true);
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    ///
    /// Validates:
    /// - every scheme name is a valid scheme
    /// - no scheme aliases itself, and alias targets are valid schemes
    /// - the default destination, if set, parses
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (scheme, entry) in &self.schemes {
            validate_scheme(scheme)?;
            if let Some(target) = &entry.alias_of {
                if target == scheme {
                    return Err(ConfigError::InvalidValue {
                        field: format!("schemes.{}.alias_of", scheme),
                        value: target.clone(),
                        reason: "a scheme cannot alias itself".to_string(),
                    });
                }
                validate_scheme(target)?;
            }
        }

        self.parsed_default_destination()?;
        Ok(())
    }

    /// The default destination, parsed.
    pub fn parsed_default_destination(&self) -> Result<Option<Destination>, ConfigError> {
        self.default_destination
            .as_deref()
            .map(Destination::parse)
            .transpose()
    }
}

impl CacheSettingsSource for CacheSettings {
    fn is_cache_disabled(&self, scheme: &str) -> bool {
        self.schemes
            .get(scheme)
            .map(|s| s.disable_cache)
            .unwrap_or(false)
    }

    fn alias_of(&self, scheme: &str) -> Option<String> {
        self.schemes.get(scheme).and_then(|s| s.alias_of.clone())
    }

    fn default_destination(&self) -> Result<Option<Destination>, ConfigError> {
        self.parsed_default_destination()
    }
}

impl CacheSettingsSource for HashMap<String, bool> {
    fn is_cache_disabled(&self, scheme: &str) -> bool {
        self.get(scheme).copied().unwrap_or(false)
    }
}

/// Runtime-mutable opt-out registry.
///
/// Wraps [`CacheSettings`] behind a lock so that flags can be flipped while
/// lookups are running.
#[derive(Debug, Default)]
pub struct SchemeRegistry {
    settings: RwLock<CacheSettings>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from validated settings.
    pub fn from_settings(settings: CacheSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings: RwLock::new(settings),
        })
    }

    pub fn set_cache_disabled(&self, scheme: &str, disabled: bool) -> Result<(), ConfigError> {
        validate_scheme(scheme)?;
        self.write().set_cache_disabled(scheme, disabled);
        Ok(())
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.write().set_property(key, value)
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> CacheSettings {
        self.read().clone()
    }

    // Settings are plain values; a panic mid-write cannot leave them torn.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, CacheSettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheSettings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheSettingsSource for SchemeRegistry {
    fn is_cache_disabled(&self, scheme: &str) -> bool {
        self.read().is_cache_disabled(scheme)
    }

    fn alias_of(&self, scheme: &str) -> Option<String> {
        CacheSettingsSource::alias_of(&*self.read(), scheme)
    }

    fn default_destination(&self) -> Result<Option<Destination>, ConfigError> {
        CacheSettingsSource::default_destination(&*self.read())
    }
}

fn unknown_property(key: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: key.to_string(),
        value: String::new(),
        reason: "unrecognised property".to_string(),
    }
}
