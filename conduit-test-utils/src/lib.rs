//! CONDUIT Test Utilities
//!
//! Centralized test infrastructure for the CONDUIT workspace:
//! - Mock handles and factories with observable construction and close counts
//! - Proptest generators for identities, credentials, and destinations
//! - Test fixtures for common scenarios
//! - Tracing setup for tests

// Re-export core types for convenience
pub use conduit_core::{
    BackendError, BackendFactory, CacheSettings, CallerIdentity, ConduitError, ConduitResult,
    Credential, CredentialId, CredentialSet, Destination, Handle, SchemeRegistry, SharedHandle,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;

use uuid::Uuid;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MOCK HANDLES
// ============================================================================

/// In-memory handle recording how often it was closed.
#[derive(Debug)]
pub struct MockHandle {
    id: Uuid,
    destination: Destination,
    principal: String,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_close: bool,
}

impl MockHandle {
    pub fn new(destination: Destination, principal: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            destination,
            principal: principal.into(),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_close: false,
        }
    }

    /// A handle whose `close` always fails.
    pub fn failing_close(destination: Destination, principal: impl Into<String>) -> Self {
        Self {
            fail_close: true,
            ..Self::new(destination, principal)
        }
    }

    /// Unique per construction; two handles with the same id are the same handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Principal the factory was acting as.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Handle for MockHandle {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    fn close(&self) -> Result<(), BackendError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(BackendError::close_failed(
                &self.destination,
                "injected close failure",
            ));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BackendError::AlreadyClosed {
                destination: self.destination.root(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// MOCK FACTORIES
// ============================================================================

/// Factory producing [`MockHandle`]s and counting every call.
///
/// Failures can be scripted for the first N calls, and each call can be
/// slowed down to widen race windows.
#[derive(Debug, Default)]
pub struct CountingFactory {
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Option<Duration>,
    failing_close: bool,
    created: Mutex<Vec<Arc<MockHandle>>>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` calls with [`BackendError::ConstructionFailed`].
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Sleep for `delay` inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hand out handles whose `close` fails.
    pub fn with_failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Number of calls so far, including failed ones.
    pub fn constructions(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every handle successfully built, in construction order.
    pub fn created(&self) -> Vec<Arc<MockHandle>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a concrete handle, for callers that do not want a trait object.
    pub fn make(
        &self,
        destination: &Destination,
        identity: &CallerIdentity,
    ) -> Result<Arc<MockHandle>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let scripted_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(BackendError::construction(destination, "scripted failure"));
        }

        let handle = if self.failing_close {
            MockHandle::failing_close(destination.clone(), identity.principal())
        } else {
            MockHandle::new(destination.clone(), identity.principal())
        };
        let handle = Arc::new(handle);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&handle));
        Ok(handle)
    }
}

impl BackendFactory for CountingFactory {
    fn construct(
        &self,
        destination: &Destination,
        identity: &CallerIdentity,
    ) -> Result<SharedHandle, BackendError> {
        let handle: SharedHandle = self.make(destination, identity)?;
        Ok(handle)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating test data.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid scheme name.
    pub fn arb_scheme() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9+.-]{0,9}"
    }

    /// Generate a host[:port] authority, possibly empty.
    pub fn arb_authority() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z][a-z0-9-]{0,11}",
            ("[a-z][a-z0-9-]{0,11}", 1u16..).prop_map(|(host, port)| format!("{}:{}", host, port)),
        ]
    }

    /// Generate a non-empty principal name.
    pub fn arb_principal() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    pub fn arb_destination() -> impl Strategy<Value = Destination> {
        (arb_scheme(), arb_authority(), "(/[a-z0-9]{1,6}){0,3}").prop_filter_map(
            "valid destination",
            |(scheme, authority, path)| Destination::new(scheme, authority, path).ok(),
        )
    }

    pub fn arb_credential() -> impl Strategy<Value = Credential> {
        (
            prop_oneof![Just("DELEGATION"), Just("BLOCK_ACCESS"), Just("KERBEROS")],
            "[a-z0-9]{1,8}(:[0-9]{2,5})?",
            prop::collection::vec(any::<u8>(), 1..16),
            prop::collection::vec(any::<u8>(), 0..16),
        )
            .prop_map(|(kind, service, identifier, secret)| {
                Credential::new(kind, service, identifier, secret)
            })
    }

    /// Generate a list of credentials, possibly with repeated identities.
    pub fn arb_credentials() -> impl Strategy<Value = Vec<Credential>> {
        prop::collection::vec(arb_credential(), 0..6).prop_flat_map(|creds| {
            let len = creds.len();
            (Just(creds), prop::collection::vec(0..len.max(1), 0..3)).prop_map(
                |(mut creds, repeats)| {
                    let extra: Vec<Credential> = repeats
                        .into_iter()
                        .filter_map(|i| creds.get(i).cloned())
                        .collect();
                    creds.extend(extra);
                    creds
                },
            )
        })
    }

    /// Generate an identity holding arbitrary credentials.
    pub fn arb_identity() -> impl Strategy<Value = CallerIdentity> {
        (arb_principal(), arb_credentials()).prop_filter_map(
            "valid identity",
            |(principal, credentials)| {
                CallerIdentity::with_credentials(principal, credentials.into_iter().collect()).ok()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Scheme cached normally.
    pub const CACHED_SCHEME: &str = "cachedfile";

    /// Scheme that opts out of caching.
    pub const UNCACHED_SCHEME: &str = "uncachedfile";

    /// Settings with `uncachedfile` opted out and both schemes aliased to `file`.
    pub fn aliased_settings() -> CacheSettings {
        CacheSettings::new()
            .with_alias(CACHED_SCHEME, "file")
            .with_alias(UNCACHED_SCHEME, "file")
            .with_cache_disabled(UNCACHED_SCHEME, true)
    }

    /// Identity with no credentials.
    pub fn identity(principal: &str) -> CallerIdentity {
        CallerIdentity::new(principal).unwrap_or_else(|e| panic!("bad principal: {}", e))
    }

    /// A delegation token for `service`.
    pub fn delegation_token(service: &str, id: &[u8]) -> Credential {
        Credential::new("DELEGATION", service, id.to_vec(), b"secret".to_vec())
    }

    pub fn destination(uri: &str) -> Destination {
        Destination::parse(uri).unwrap_or_else(|e| panic!("bad destination {}: {}", uri, e))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over handle identity.

    use super::*;

    /// Assert that two handles are the same instance.
    #[track_caller]
    pub fn assert_same_handle<A, B>(a: &Arc<A>, b: &Arc<B>)
    where
        A: ?Sized,
        B: ?Sized,
    {
        assert!(
            std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            "expected the same handle instance"
        );
    }

    /// Assert that two handles are distinct instances.
    #[track_caller]
    pub fn assert_distinct_handles<A, B>(a: &Arc<A>, b: &Arc<B>)
    where
        A: ?Sized,
        B: ?Sized,
    {
        assert!(
            !std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            "expected distinct handle instances"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
