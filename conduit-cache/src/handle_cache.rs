//! Get-or-create handle cache.
//!
//! # Locking
//!
//! Slots live in a [`DashMap`]; a shard guard is held only long enough to
//! find or insert a key's slot, never across a factory call. Construction
//! runs under the slot's own build lock, so racers on one key wait for a
//! single factory call while other keys proceed independently.
//!
//! A ready handle sits in the slot's [`OnceCell`]. Hits and peeks read it
//! without taking any lock, so they never contend with each other or with
//! construction of other keys.
//!
//! The build lock may be held while a slot is unlinked from the map. Nothing
//! waits for a build lock while holding a shard guard.
//!
//! # Slot lifecycle
//!
//! A slot starts empty and becomes ready on successful construction. It
//! leaves the map by removal, sweep, or failed construction, and is marked
//! retired only after it is unlinked. Anyone still holding a retired slot
//! starts over and finds a fresh one, so a handle is never stored where no
//! sweep can reach it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use conduit_core::{BackendError, CacheError, CloseFailure, ConduitResult, Handle};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::key::HandleKey;
use crate::traits::{CacheStats, EntryInfo, StatCounters};

struct Ready<H: ?Sized> {
    handle: Arc<H>,
    cached_at: DateTime<Utc>,
}

struct Slot<H: ?Sized> {
    ready: OnceCell<Ready<H>>,
    retired: AtomicBool,
    build: Mutex<()>,
}

impl<H: ?Sized> Slot<H> {
    fn new() -> Self {
        Self {
            ready: OnceCell::new(),
            retired: AtomicBool::new(false),
            build: Mutex::new(()),
        }
    }

    // The build lock guards no data, so a factory panic leaves nothing torn.
    fn lock_build(&self) -> MutexGuard<'_, ()> {
        self.build.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// The ready handle, unless the slot has left the map.
    fn live(&self) -> Option<&Ready<H>> {
        if self.is_retired() {
            return None;
        }
        self.ready.get()
    }
}

/// Map from [`HandleKey`] to a live handle with get-or-create semantics.
pub struct HandleCache<H: ?Sized = dyn Handle> {
    slots: DashMap<HandleKey, Arc<Slot<H>>>,
    counters: StatCounters,
}

impl<H: ?Sized + Handle> Default for HandleCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized + Handle> HandleCache<H> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            counters: StatCounters::default(),
        }
    }

    /// Return the handle cached for `key`, constructing it with `factory` if
    /// there is none.
    ///
    /// `factory` runs at most once per call, and only while this caller owns
    /// the key's construction. Concurrent callers for the same key wait and
    /// receive the handle it stores. If `factory` fails, nothing is stored and
    /// the error is returned unchanged; the next call for the key retries.
    pub fn acquire<F>(&self, key: &HandleKey, factory: F) -> ConduitResult<Arc<H>>
    where
        F: FnOnce() -> Result<Arc<H>, BackendError>,
    {
        let mut factory = Some(factory);
        loop {
            let slot = self.slot_for(key);
            if let Some(ready) = slot.live() {
                return Ok(self.hit(key, ready));
            }

            let build = slot.lock_build();
            if slot.is_retired() {
                // Unlinked before the flag was set; the map already has room
                // for a fresh slot.
                continue;
            }
            if let Some(ready) = slot.ready.get() {
                return Ok(self.hit(key, ready));
            }

            // Every path below returns, so the factory is taken at most once.
            let Some(construct) = factory.take() else {
                continue;
            };
            self.counters.miss();
            debug!(
                scheme = key.scheme(),
                authority = key.authority(),
                principal = key.principal(),
                credentials = %key.credential_fingerprint(),
                "handle cache miss, constructing"
            );

            return match construct() {
                Ok(handle) => {
                    let _ = slot.ready.set(Ready {
                        handle: Arc::clone(&handle),
                        cached_at: Utc::now(),
                    });
                    self.counters.constructed();
                    Ok(handle)
                }
                Err(err) => {
                    self.slots
                        .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
                    slot.retired.store(true, Ordering::Release);
                    drop(build);
                    self.counters.construction_failed();
                    warn!(
                        scheme = key.scheme(),
                        authority = key.authority(),
                        principal = key.principal(),
                        error = %err,
                        "handle construction failed"
                    );
                    Err(err.into())
                }
            };
        }
    }

    /// The handle cached for `key`, without constructing one.
    ///
    /// Returns `None` while the key's first construction is still running.
    pub fn get(&self, key: &HandleKey) -> Option<Arc<H>> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        slot.live().map(|ready| Arc::clone(&ready.handle))
    }

    /// Remove the entry for `key` without closing it.
    ///
    /// The handle, if any, is handed back to the caller, who becomes
    /// responsible for closing it.
    pub fn remove(&self, key: &HandleKey) -> Option<Arc<H>> {
        let (_, slot) = self.slots.remove(key)?;
        self.retire(&slot)
    }

    /// Close every cached handle and empty the cache.
    ///
    /// A failing close is logged and collected; the remaining handles are
    /// still closed. Returns the number of handles closed successfully.
    pub fn close_all(&self) -> ConduitResult<usize> {
        self.close_matching(|_| true)
    }

    /// Close and remove every entry cached for `principal`.
    pub fn close_all_for(&self, principal: &str) -> ConduitResult<usize> {
        self.close_matching(|key| key.principal() == principal)
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.counters.snapshot().entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Cached entries, skipping keys still under first construction.
    pub fn entries(&self) -> Vec<EntryInfo> {
        self.slots
            .iter()
            .filter_map(|entry| {
                entry.value().live().map(|ready| EntryInfo {
                    key: entry.key().clone(),
                    cached_at: ready.cached_at,
                })
            })
            .collect()
    }

    fn hit(&self, key: &HandleKey, ready: &Ready<H>) -> Arc<H> {
        self.counters.hit();
        debug!(
            scheme = key.scheme(),
            authority = key.authority(),
            principal = key.principal(),
            credentials = %key.credential_fingerprint(),
            "handle cache hit"
        );
        Arc::clone(&ready.handle)
    }

    fn slot_for(&self, key: &HandleKey) -> Arc<Slot<H>> {
        // The entry guard is dropped at the end of this statement.
        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }

    /// Mark an unlinked slot retired, returning its handle if it had one.
    ///
    /// Waits for an in-flight construction, so a handle built concurrently
    /// with a sweep is still returned here and closed.
    fn retire(&self, slot: &Slot<H>) -> Option<Arc<H>> {
        let _build = slot.lock_build();
        if slot.retired.swap(true, Ordering::AcqRel) {
            return None;
        }
        let ready = slot.ready.get()?;
        self.counters.removed();
        Some(Arc::clone(&ready.handle))
    }

    fn close_matching(&self, matches: impl Fn(&HandleKey) -> bool) -> ConduitResult<usize> {
        let keys: Vec<HandleKey> = self
            .slots
            .iter()
            .filter(|entry| matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        let drained: Vec<(HandleKey, Arc<Slot<H>>)> = keys
            .iter()
            .filter_map(|key| self.slots.remove(key))
            .collect();

        let mut closed = 0;
        let mut failures = Vec::new();

        for (key, slot) in drained {
            let Some(handle) = self.retire(&slot) else {
                continue;
            };
            match handle.close() {
                Ok(()) => closed += 1,
                Err(error) => {
                    warn!(
                        scheme = key.scheme(),
                        authority = key.authority(),
                        principal = key.principal(),
                        error = %error,
                        "failed to close cached handle"
                    );
                    failures.push(CloseFailure {
                        entry: key.to_string(),
                        error,
                    });
                }
            }
        }

        info!(closed, failed = failures.len(), "handle cache sweep complete");
        if failures.is_empty() {
            Ok(closed)
        } else {
            Err(CacheError::SweepIncomplete { failures }.into())
        }
    }
}

impl<H: ?Sized> std::fmt::Debug for HandleCache<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCache")
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{CallerIdentity, ConduitError, Credential, Destination};
    use conduit_test_utils::{CountingFactory, MockHandle};
    use std::sync::Barrier;
    use std::time::Duration;

    fn key_for(uri: &str, identity: &CallerIdentity) -> HandleKey {
        HandleKey::derive(&Destination::parse(uri).unwrap(), identity).unwrap()
    }

    fn foo() -> CallerIdentity {
        CallerIdentity::new("foo").unwrap()
    }

    #[test]
    fn test_second_acquire_is_a_hit() {
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new();
        let identity = foo();
        let d = Destination::parse("cachedfile://a").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();

        let first = cache.acquire(&key, || factory.make(&d, &identity)).unwrap();
        let second = cache.acquire(&key, || factory.make(&d, &identity)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entry_count), (1, 1, 1));
    }

    #[test]
    fn test_failure_stores_nothing_and_retries() {
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::failing_first(1);
        let identity = foo();
        let d = Destination::parse("cachedfile://a").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();

        let err = cache
            .acquire(&key, || factory.make(&d, &identity))
            .unwrap_err();
        assert!(matches!(
            err,
            ConduitError::Backend(BackendError::ConstructionFailed { .. })
        ));
        assert!(cache.is_empty());
        assert!(cache.get(&key).is_none());

        let handle = cache.acquire(&key, || factory.make(&d, &identity)).unwrap();
        assert_eq!(factory.constructions(), 2);
        assert!(Arc::ptr_eq(&handle, &cache.get(&key).unwrap()));
        assert_eq!(cache.stats().construction_failures, 1);
    }

    #[test]
    fn test_construction_error_is_returned_unchanged() {
        let cache = HandleCache::<MockHandle>::new();
        let key = key_for("hdfs://nn", &foo());
        let expected = BackendError::ConstructionFailed {
            scheme: "hdfs".to_string(),
            authority: "nn".to_string(),
            reason: "kerberos ticket expired".to_string(),
        };

        let err = cache.acquire(&key, || Err(expected.clone())).unwrap_err();
        assert_eq!(err, ConduitError::Backend(expected));
    }

    #[test]
    fn test_remove_returns_handle_without_closing() {
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new();
        let identity = foo();
        let d = Destination::parse("cachedfile://a").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();

        let handle = cache.acquire(&key, || factory.make(&d, &identity)).unwrap();
        let removed = cache.remove(&key).unwrap();
        assert!(Arc::ptr_eq(&handle, &removed));
        assert!(!removed.is_closed());
        assert!(cache.is_empty());
        assert!(cache.remove(&key).is_none());

        let fresh = cache.acquire(&key, || factory.make(&d, &identity)).unwrap();
        assert!(!Arc::ptr_eq(&handle, &fresh));
    }

    #[test]
    fn test_close_all_closes_and_empties() {
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new();
        let identity = foo();
        let mut handles = Vec::new();
        for uri in ["mem://a", "mem://b", "mem://c"] {
            let d = Destination::parse(uri).unwrap();
            let key = HandleKey::derive(&d, &identity).unwrap();
            handles.push(cache.acquire(&key, || factory.make(&d, &identity)).unwrap());
        }

        assert_eq!(cache.close_all().unwrap(), 3);
        assert!(cache.is_empty());
        assert!(cache.entries().is_empty());
        assert!(handles.iter().all(|h| h.is_closed()));
        assert_eq!(cache.close_all().unwrap(), 0);
    }

    #[test]
    fn test_close_failure_does_not_block_others() {
        let cache = HandleCache::<MockHandle>::new();
        let identity = foo();
        let good = Destination::parse("mem://good").unwrap();
        let bad = Destination::parse("mem://bad").unwrap();

        let good_handle = cache
            .acquire(&HandleKey::derive(&good, &identity).unwrap(), || {
                Ok(Arc::new(MockHandle::new(good.clone(), "foo")))
            })
            .unwrap();
        cache
            .acquire(&HandleKey::derive(&bad, &identity).unwrap(), || {
                Ok(Arc::new(MockHandle::failing_close(bad.clone(), "foo")))
            })
            .unwrap();

        match cache.close_all().unwrap_err() {
            ConduitError::Cache(CacheError::SweepIncomplete { failures }) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].entry.contains("mem://bad"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(good_handle.is_closed());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_close_all_for_principal() {
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new();
        let d = Destination::parse("mem://a").unwrap();
        let foo = foo();
        let bar = CallerIdentity::new("bar").unwrap();

        let foo_handle = cache
            .acquire(&HandleKey::derive(&d, &foo).unwrap(), || factory.make(&d, &foo))
            .unwrap();
        let bar_handle = cache
            .acquire(&HandleKey::derive(&d, &bar).unwrap(), || factory.make(&d, &bar))
            .unwrap();

        assert_eq!(cache.close_all_for("foo").unwrap(), 1);
        assert!(foo_handle.is_closed());
        assert!(!bar_handle.is_closed());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_lists_ready_keys() {
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new();
        let identity = foo();
        identity
            .add_credential(Credential::new("K", "svc", b"t".to_vec(), vec![]))
            .unwrap();
        let d = Destination::parse("mem://a").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();
        cache.acquire(&key, || factory.make(&d, &identity)).unwrap();

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key);
        assert!(entries[0].cached_at <= Utc::now());
    }

    #[test]
    fn test_concurrent_first_construction_single_factory_call() {
        const THREADS: usize = 16;
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new().with_delay(Duration::from_millis(20));
        let identity = foo();
        let d = Destination::parse("cachedfile://race").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();
        let barrier = Barrier::new(THREADS);

        let handles: Vec<Arc<MockHandle>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.acquire(&key, || factory.make(&d, &identity)).unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(factory.constructions(), 1);
        let retained = cache.get(&key).unwrap();
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &retained)));
    }

    #[test]
    fn test_peeks_see_ready_entry_during_concurrent_hits() {
        const HITTERS: usize = 4;
        const PEEKS: usize = 20_000;
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::new();
        let identity = foo();
        let d = Destination::parse("cachedfile://busy").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();
        let cached = cache.acquire(&key, || factory.make(&d, &identity)).unwrap();
        let done = AtomicBool::new(false);

        let missed = std::thread::scope(|s| {
            for _ in 0..HITTERS {
                s.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        cache.acquire(&key, || factory.make(&d, &identity)).unwrap();
                    }
                });
            }

            let mut missed = 0;
            for _ in 0..PEEKS {
                let seen = cache.get(&key).is_some_and(|h| Arc::ptr_eq(&h, &cached));
                if !seen || cache.entries().len() != 1 {
                    missed += 1;
                }
            }
            done.store(true, Ordering::Relaxed);
            missed
        });

        assert_eq!(missed, 0);
        assert_eq!(factory.constructions(), 1);
    }

    #[test]
    fn test_slow_construction_does_not_block_other_keys() {
        let cache = HandleCache::<MockHandle>::new();
        let identity = foo();
        let slow = Destination::parse("mem://slow").unwrap();
        let fast = Destination::parse("mem://fast").unwrap();
        let slow_key = HandleKey::derive(&slow, &identity).unwrap();
        let fast_key = HandleKey::derive(&fast, &identity).unwrap();
        let started = Barrier::new(2);
        let release = Barrier::new(2);

        std::thread::scope(|s| {
            let slow_worker = s.spawn(|| {
                cache
                    .acquire(&slow_key, || {
                        started.wait();
                        release.wait();
                        Ok(Arc::new(MockHandle::new(slow.clone(), "foo")))
                    })
                    .unwrap()
            });

            started.wait();
            // The slow key is mid-construction; the fast key must not wait for it.
            cache
                .acquire(&fast_key, || Ok(Arc::new(MockHandle::new(fast.clone(), "foo"))))
                .unwrap();
            assert!(cache.get(&slow_key).is_none());
            assert_eq!(cache.entries().len(), 1);
            release.wait();
            slow_worker.join().unwrap();
        });

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_construction_under_race_retries_once() {
        const THREADS: usize = 8;
        let cache = HandleCache::<MockHandle>::new();
        let factory = CountingFactory::failing_first(1).with_delay(Duration::from_millis(30));
        let identity = foo();
        let d = Destination::parse("cachedfile://flaky").unwrap();
        let key = HandleKey::derive(&d, &identity).unwrap();
        let barrier = Barrier::new(THREADS);

        let results: Vec<_> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.acquire(&key, || factory.make(&d, &identity))
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let (oks, errs): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
        assert_eq!(errs.len(), 1);
        assert_eq!(factory.constructions(), 2);
        let retained = cache.get(&key).unwrap();
        for ok in oks {
            assert!(Arc::ptr_eq(&ok.unwrap(), &retained));
        }
        assert_eq!(cache.len(), 1);
    }
}
