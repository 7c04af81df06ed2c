//! Caller identities and the active-identity scope.
//!
//! A [`CallerIdentity`] is a shared handle: clones refer to the same principal
//! and observe the same credential set. Identities created separately never
//! share credentials, even when their principal names match.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::credential::{Credential, CredentialId, CredentialSet, CredentialSnapshot};
use crate::error::IdentityError;

/// Environment variable consulted first for the process login principal.
pub const LOGIN_USER_ENV: &str = "CONDUIT_USER";

/// Principal used when no login name can be determined.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

struct IdentityInner {
    principal: String,
    credentials: RwLock<CredentialSet>,
}

/// A principal plus the credential tokens it currently holds.
///
/// `PartialEq` compares principal names only. Cache lookups additionally
/// take a [`CredentialSnapshot`] so that credential contents participate in
/// cache identity.
#[derive(Clone)]
pub struct CallerIdentity {
    inner: Arc<IdentityInner>,
}

static LOGIN_IDENTITY: Lazy<CallerIdentity> = Lazy::new(|| {
    let principal = [LOGIN_USER_ENV, "USER"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_PRINCIPAL.to_string());
    CallerIdentity::from_parts(principal, CredentialSet::new())
});

thread_local! {
    static ACTIVE: RefCell<Vec<CallerIdentity>> = const { RefCell::new(Vec::new()) };
}

impl CallerIdentity {
    /// Create a new identity with an empty credential set.
    pub fn new(principal: impl Into<String>) -> Result<Self, IdentityError> {
        Self::with_credentials(principal, CredentialSet::new())
    }

    /// Create a new identity holding the given credentials.
    pub fn with_credentials(
        principal: impl Into<String>,
        credentials: CredentialSet,
    ) -> Result<Self, IdentityError> {
        let principal = principal.into();
        if principal.is_empty() {
            return Err(IdentityError::EmptyPrincipal);
        }
        Ok(Self::from_parts(principal, credentials))
    }

    fn from_parts(principal: String, credentials: CredentialSet) -> Self {
        Self {
            inner: Arc::new(IdentityInner {
                principal,
                credentials: RwLock::new(credentials),
            }),
        }
    }

    pub fn principal(&self) -> &str {
        &self.inner.principal
    }

    /// Add a credential token, returning `true` if it was not already held.
    pub fn add_credential(&self, credential: Credential) -> Result<bool, IdentityError> {
        let mut set = self
            .inner
            .credentials
            .write()
            .map_err(|_| IdentityError::LockPoisoned)?;
        Ok(set.insert(credential))
    }

    pub fn remove_credential(&self, id: &CredentialId) -> Result<Option<Credential>, IdentityError> {
        let mut set = self
            .inner
            .credentials
            .write()
            .map_err(|_| IdentityError::LockPoisoned)?;
        Ok(set.remove(id))
    }

    /// Copy of the credential set as it is right now.
    pub fn credentials(&self) -> Result<CredentialSet, IdentityError> {
        let set = self
            .inner
            .credentials
            .read()
            .map_err(|_| IdentityError::LockPoisoned)?;
        Ok(set.clone())
    }

    /// Immutable snapshot of the credential identities held right now.
    pub fn credential_snapshot(&self) -> Result<CredentialSnapshot, IdentityError> {
        let set = self
            .inner
            .credentials
            .read()
            .map_err(|_| IdentityError::LockPoisoned)?;
        Ok(set.snapshot())
    }

    /// Whether both values refer to the same identity object.
    pub fn same_instance(&self, other: &CallerIdentity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` with this identity as the active identity of the current thread.
    ///
    /// Scopes nest; the previous identity is restored when `f` returns or
    /// unwinds.
    pub fn run_as<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = ActiveScope::enter(self.clone());
        f()
    }

    /// The innermost identity entered with [`run_as`](Self::run_as) on this
    /// thread, or the process login identity.
    pub fn current() -> CallerIdentity {
        ACTIVE
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(Self::login)
    }

    /// The identity the process runs under when nothing else is active.
    pub fn login() -> CallerIdentity {
        LOGIN_IDENTITY.clone()
    }
}

impl PartialEq for CallerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.principal == other.inner.principal
    }
}

impl Eq for CallerIdentity {}

impl std::hash::Hash for CallerIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.principal.hash(state);
    }
}

impl fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credentials = self
            .inner
            .credentials
            .read()
            .map(|set| set.len())
            .unwrap_or_default();
        f.debug_struct("CallerIdentity")
            .field("principal", &self.inner.principal)
            .field("credentials", &credentials)
            .finish()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.principal)
    }
}

/// Pops the active identity on drop.
struct ActiveScope;

impl ActiveScope {
    fn enter(identity: CallerIdentity) -> Self {
        ACTIVE.with(|stack| stack.borrow_mut().push(identity));
        ActiveScope
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
