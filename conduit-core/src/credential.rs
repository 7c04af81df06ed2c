//! Credential tokens and the per-identity credential set.
//!
//! A token's identity is its `(kind, service, identifier)` triple. The secret
//! material never takes part in equality, hashing, ordering, or `Debug`.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// The identity of a credential token.
///
/// Ordering is derived so that snapshots of a set are canonical regardless
/// of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId {
    kind: String,
    service: String,
    identifier: Vec<u8>,
}

impl CredentialId {
    pub fn new(kind: impl Into<String>, service: impl Into<String>, identifier: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            service: service.into(),
            identifier,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}#{}",
            self.kind,
            self.service,
            hex::encode(&self.identifier)
        )
    }
}

/// An opaque credential token: an identifier plus secret material.
#[derive(Clone)]
pub struct Credential {
    id: CredentialId,
    secret: Vec<u8>,
}

impl Credential {
    /// Create a new credential token.
    ///
    /// # Arguments
    ///
    /// * `kind` - Token kind, e.g. `"HDFS_DELEGATION_TOKEN"`
    /// * `service` - The service the token authenticates against
    /// * `identifier` - Opaque identifier bytes issued with the token
    /// * `secret` - Opaque secret material (password)
    pub fn new(
        kind: impl Into<String>,
        service: impl Into<String>,
        identifier: Vec<u8>,
        secret: Vec<u8>,
    ) -> Self {
        Self {
            id: CredentialId::new(kind, service, identifier),
            secret,
        }
    }

    pub fn id(&self) -> &CredentialId {
        &self.id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Credential {}

impl std::hash::Hash for Credential {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Unordered set of credential tokens held by one caller identity.
///
/// Adding a token equal to one already present replaces the stored secret
/// but does not change the set's identity.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    tokens: BTreeMap<CredentialId, Credential>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token, returning `true` if its identity was not already present.
    pub fn insert(&mut self, credential: Credential) -> bool {
        self.tokens
            .insert(credential.id().clone(), credential)
            .is_none()
    }

    /// Remove a token by identity.
    pub fn remove(&mut self, id: &CredentialId) -> Option<Credential> {
        self.tokens.remove(id)
    }

    pub fn get(&self, id: &CredentialId) -> Option<&Credential> {
        self.tokens.get(id)
    }

    pub fn contains(&self, id: &CredentialId) -> bool {
        self.tokens.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens in canonical (identity) order.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.tokens.values()
    }

    /// Freeze the current contents into an immutable snapshot.
    pub fn snapshot(&self) -> CredentialSnapshot {
        CredentialSnapshot {
            ids: self.tokens.keys().cloned().collect(),
        }
    }
}

impl Extend<Credential> for CredentialSet {
    fn extend<I: IntoIterator<Item = Credential>>(&mut self, iter: I) {
        for credential in iter {
            self.insert(credential);
        }
    }
}

impl FromIterator<Credential> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = Credential>>(iter: I) -> Self {
        let mut set = CredentialSet::new();
        set.extend(iter);
        set
    }
}

/// Immutable, order-independent view of a credential set at one instant.
///
/// Holds the sorted, deduplicated token identities. Two snapshots are equal
/// iff they contain the same identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialSnapshot {
    ids: Vec<CredentialId>,
}

impl CredentialSnapshot {
    /// Snapshot with no credentials.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[CredentialId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// SHA-256 over the canonical encoding of the token identities.
    ///
    /// Each field is length-prefixed so that adjacent fields cannot alias.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.ids.len() as u64).to_be_bytes());
        for id in &self.ids {
            for field in [id.kind.as_bytes(), id.service.as_bytes(), &id.identifier] {
                hasher.update((field.len() as u64).to_be_bytes());
                hasher.update(field);
            }
        }
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }
}
