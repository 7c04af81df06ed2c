//! Identity-scoped cache key.
//!
//! The key's private constructor makes it impossible to build a key without
//! a principal and a credential snapshot. A key is a value derived at lookup
//! time: later changes to the identity's credentials never reach it.

use std::fmt;

use conduit_core::{
    CallerIdentity, ConduitResult, ConfigError, CredentialSnapshot, Destination, IdentityError,
};

/// Number of digest bytes shown in a key fingerprint.
const FINGERPRINT_BYTES: usize = 8;

/// Cache key: (scheme, authority, principal, credential snapshot).
///
/// # Equality
///
/// Two keys are equal iff all four components are equal. Scheme and
/// authority compare as exact strings. The credential component compares
/// as a set of token identities, so insertion order and duplicate tokens
/// have no effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    /// Private inner data - cannot be constructed externally
    inner: HandleKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandleKeyInner {
    scheme: String,
    authority: String,
    principal: String,
    credentials: CredentialSnapshot,
}

impl HandleKey {
    /// Create a key from explicit components.
    ///
    /// Fails fast on an empty scheme or principal rather than caching under
    /// a degenerate key.
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        principal: impl Into<String>,
        credentials: CredentialSnapshot,
    ) -> ConduitResult<Self> {
        let scheme = scheme.into();
        if scheme.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "scheme".to_string(),
                value: scheme,
                reason: "cache key scheme must not be empty".to_string(),
            }
            .into());
        }
        let principal = principal.into();
        if principal.is_empty() {
            return Err(IdentityError::EmptyPrincipal.into());
        }

        Ok(Self {
            inner: HandleKeyInner {
                scheme,
                authority: authority.into(),
                principal,
                credentials,
            },
        })
    }

    /// Derive the key for `destination` as seen by `identity` right now.
    pub fn derive(destination: &Destination, identity: &CallerIdentity) -> ConduitResult<Self> {
        let credentials = identity.credential_snapshot()?;
        Self::new(
            destination.scheme(),
            destination.authority(),
            identity.principal(),
            credentials,
        )
    }

    pub fn scheme(&self) -> &str {
        &self.inner.scheme
    }

    pub fn authority(&self) -> &str {
        &self.inner.authority
    }

    pub fn principal(&self) -> &str {
        &self.inner.principal
    }

    pub fn credentials(&self) -> &CredentialSnapshot {
        &self.inner.credentials
    }

    /// Short hex digest of the credential component, safe to log.
    pub fn credential_fingerprint(&self) -> String {
        let digest = self.inner.credentials.digest();
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{} ({}, {} credential(s), {})",
            self.inner.scheme,
            self.inner.authority,
            self.inner.principal,
            self.inner.credentials.len(),
            self.credential_fingerprint()
        )
    }
}
