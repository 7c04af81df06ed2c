//! CONDUIT Cache - Identity-Aware Backend Handle Cache
//!
//! Backend clients are expensive to build and hold connections, so one live
//! handle is shared by every caller that would have built an identical one.
//!
//! # Identity Isolation
//!
//! The [`HandleKey`] type cannot be constructed without a principal and a
//! snapshot of that principal's credentials. Two callers share a handle only
//! when scheme, authority, principal and credential set all match; a caller
//! holding one extra token gets its own handle.
//!
//! # Opting Out
//!
//! A scheme flagged with `disable_cache` bypasses the cache entirely: every
//! acquire constructs a fresh handle that the caller owns. The flag is read on
//! every call, so it can be flipped at runtime through [`SchemeRegistry`].
//!
//! # Example
//!
//! ```ignore
//! let factories = Arc::new(FactoryRegistry::new());
//! factories.register("file", Arc::new(LocalFileFactory::default()))?;
//!
//! let settings = CacheSettings::from_toml_str(r#"
//!     [schemes.scratch]
//!     disable_cache = true
//!     alias_of = "file"
//! "#)?;
//! let provider = HandleProvider::new(Arc::new(SchemeRegistry::from_settings(settings)?), factories);
//!
//! // Same identity, same destination: same handle.
//! let a = alice.run_as(|| provider.acquire("file:///data"))?;
//! let b = alice.run_as(|| provider.acquire("file:///logs"))?;
//! assert!(Arc::ptr_eq(&a, &b));
//!
//! // At shutdown.
//! provider.close_all()?;
//! ```
//!
//! [`SchemeRegistry`]: conduit_core::SchemeRegistry

pub mod factory;
pub mod handle_cache;
pub mod key;
pub mod provider;
pub mod traits;

pub use factory::FactoryRegistry;
pub use handle_cache::HandleCache;
pub use key::HandleKey;
pub use provider::HandleProvider;
pub use traits::{CacheStats, EntryInfo};
