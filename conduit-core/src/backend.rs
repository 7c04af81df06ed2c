//! Backend handle and factory traits.
//!
//! The cache treats both as black boxes: a factory turns a destination into
//! a live handle, and a handle can be closed.

use std::fmt;
use std::sync::Arc;

use crate::destination::Destination;
use crate::error::BackendError;
use crate::identity::CallerIdentity;

/// A live, stateful client bound to one backend destination.
///
/// Implementations must be thread-safe: a cached handle is shared by every
/// caller that resolves to the same cache key.
pub trait Handle: fmt::Debug + Send + Sync {
    /// The destination this handle was constructed for.
    fn destination(&self) -> &Destination;

    /// Release the handle's resources.
    ///
    /// Calling `close` twice should return [`BackendError::AlreadyClosed`]
    /// rather than panic.
    fn close(&self) -> Result<(), BackendError>;
}

/// Reference-counted handle as stored in and returned from the cache.
pub type SharedHandle = Arc<dyn Handle>;

/// Constructs new handles on cache miss.
pub trait BackendFactory: Send + Sync {
    /// Build a handle for `destination`, acting as `identity`.
    ///
    /// Errors are returned to the caller of `acquire` as-is.
    fn construct(
        &self,
        destination: &Destination,
        identity: &CallerIdentity,
    ) -> Result<SharedHandle, BackendError>;
}

impl<F> BackendFactory for F
where
    F: Fn(&Destination, &CallerIdentity) -> Result<SharedHandle, BackendError> + Send + Sync,
{
    fn construct(
        &self,
        destination: &Destination,
        identity: &CallerIdentity,
    ) -> Result<SharedHandle, BackendError> {
        self(destination, identity)
    }
}

impl BackendError {
    /// Construction failure for `destination`.
    pub fn construction(destination: &Destination, reason: impl Into<String>) -> Self {
        BackendError::ConstructionFailed {
            scheme: destination.scheme().to_string(),
            authority: destination.authority().to_string(),
            reason: reason.into(),
        }
    }

    /// Close failure for `destination`.
    pub fn close_failed(destination: &Destination, reason: impl Into<String>) -> Self {
        BackendError::CloseFailed {
            destination: destination.root(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct Noop {
        destination: Destination,
        closed: AtomicBool,
    }

    impl Handle for Noop {
        fn destination(&self) -> &Destination {
            &self.destination
        }

        fn close(&self) -> Result<(), BackendError> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Err(BackendError::AlreadyClosed {
                    destination: self.destination.root(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_closure_is_a_factory() {
        let factory = |d: &Destination, _: &CallerIdentity| -> Result<SharedHandle, BackendError> {
            Ok(Arc::new(Noop {
                destination: d.clone(),
                closed: AtomicBool::new(false),
            }))
        };
        let identity = CallerIdentity::new("foo").unwrap();
        let d = Destination::parse("mem://a").unwrap();

        let handle = factory.construct(&d, &identity).unwrap();
        assert_eq!(handle.destination(), &d);
        assert!(handle.close().is_ok());
        assert!(matches!(
            handle.close(),
            Err(BackendError::AlreadyClosed { .. })
        ));
    }

    #[test]
    fn test_construction_error_helper() {
        let d = Destination::parse("hdfs://nn:8020/x").unwrap();
        let err = BackendError::construction(&d, "refused");
        assert_eq!(
            err,
            BackendError::ConstructionFailed {
                scheme: "hdfs".to_string(),
                authority: "nn:8020".to_string(),
                reason: "refused".to_string(),
            }
        );
        assert!(matches!(
            BackendError::close_failed(&d, "x"),
            BackendError::CloseFailed { ref destination, .. } if destination == "hdfs://nn:8020"
        ));
    }
}
