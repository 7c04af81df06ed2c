//! CONDUIT Core - Identity, Credential, and Destination Types
//!
//! Data types shared by the handle cache and the backends it caches:
//! caller identities and their credential sets, destination descriptors,
//! cache settings, the backend handle/factory traits, and the record
//! serialization boundary. No caching logic lives here.

pub mod backend;
pub mod codec;
pub mod credential;
pub mod destination;
pub mod error;
pub mod identity;
pub mod settings;

pub use backend::{BackendFactory, Handle, SharedHandle};
pub use codec::{JsonCodec, RecordCodec, RecordDeserializer, RecordSerialization, RecordSerializer};
pub use credential::{Credential, CredentialId, CredentialSet, CredentialSnapshot};
pub use destination::Destination;
pub use error::{
    BackendError, CacheError, CloseFailure, CodecError, ConduitError, ConduitResult, ConfigError,
    IdentityError,
};
pub use identity::CallerIdentity;
pub use settings::{CacheSettings, CacheSettingsSource, SchemeRegistry, SchemeSettings};
