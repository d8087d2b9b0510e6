//! Memoization of effectful functions.
//!
//! [`memoize`] wraps a function `K -> Effect<E, R>` so that each distinct
//! key is computed once: the first call runs the effect and caches its
//! result, later calls produce the cached value without running anything.
//! Recoverable errors are never cached, so a failed key is computed again
//! on its next call.
//!
//! The cache is shared by every clone of a [`Memoized`] and by every run
//! using it. While one run computes a key, other runs asking for the same
//! key suspend on the [`Await`] ability until its result is stored, so the
//! blocking handler of [`Runtime`](crate::Runtime) waits on the thread and
//! the tokio driver keeps polling its other futures meanwhile. If the
//! computing run fails or is dropped, one waiter computes in its place. A
//! computation that re-enters its own key runs uncached instead of waiting
//! on itself.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use stateless::{Effect, Runtime, memoize};
//! use stateless::error::ErrNil;
//!
//! let calls = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&calls);
//! let square = memoize(move |value: u64| -> Effect<ErrNil, u64> {
//!     let counter = Arc::clone(&counter);
//!     Effect::sync(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         value * value
//!     })
//! });
//!
//! let runtime = Runtime::new();
//! assert_eq!(runtime.run(square.call(12)).unwrap(), 144);
//! assert_eq!(runtime.run(square.call(12)).unwrap(), 144);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! assert_eq!(square.hits(), 1);
//! ```

use crate::config::MemoizeConfig;
use crate::effect::{Effect, RunId, current_run};
use crate::error::{ErrorSet, Fault, TaskFailure, TaskFailureReason};
use crate::parallel::Await;
use crossbeam_channel::{Receiver, Sender};
use lru::LruCache;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

const AWAITED_TASK: &str = "memoized call";

// =============================================================================
// Cache
// =============================================================================

/// A key being computed: the run computing it and the calls waiting for it.
struct Flight<R> {
    owner: Option<RunId>,
    waiters: Vec<Sender<Option<R>>>,
}

struct Entries<K: Hash + Eq, R> {
    computed: LruCache<K, R>,
    in_progress: HashMap<K, Flight<R>>,
}

struct MemoCache<K: Hash + Eq, R> {
    entries: Mutex<Entries<K, R>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

enum Lookup<R> {
    Hit(R),
    Reentrant,
    Wait(Receiver<Option<R>>),
    Miss,
}

impl<K: Hash + Eq + Clone, R: Clone> MemoCache<K, R> {
    fn new(capacity: Option<NonZeroUsize>) -> Self {
        let computed = capacity.map_or_else(LruCache::unbounded, LruCache::new);
        Self {
            entries: Mutex::new(Entries {
                computed,
                in_progress: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks `key` up for the current run. A miss leaves `key` in flight,
    /// owned by that run; a key another run owns hands back a receiver for
    /// its outcome.
    fn lookup(&self, key: &K) -> Lookup<R> {
        let current = current_run();
        let mut entries = self.entries.lock();
        if let Some(value) = entries.computed.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Hit(value.clone());
        }
        match entries.in_progress.get_mut(key) {
            Some(flight) if current.is_some() && flight.owner == current => Lookup::Reentrant,
            Some(flight) => {
                let (sender, receiver) = crossbeam_channel::bounded(1);
                flight.waiters.push(sender);
                Lookup::Wait(receiver)
            }
            None => {
                entries.in_progress.insert(
                    key.clone(),
                    Flight {
                        owner: current,
                        waiters: Vec::new(),
                    },
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss
            }
        }
    }

    /// Ends the flight of `key`, storing `value` if there is one and
    /// handing it to every waiter.
    fn finish(&self, key: &K, value: Option<R>) {
        let mut entries = self.entries.lock();
        let waiters = entries.in_progress.remove(key).map(|flight| flight.waiters).unwrap_or_default();
        if let Some(value) = &value {
            entries.computed.put(key.clone(), value.clone());
        }
        drop(entries);
        for waiter in waiters {
            // A waiter whose run was dropped has hung up.
            let _ = waiter.send(value.clone());
        }
    }
}

/// Keeps a key in flight until its value is stored. Dropped without
/// completing, it releases the waiters to compute themselves.
struct InFlight<K: Hash + Eq + Clone, R: Clone> {
    cache: Arc<MemoCache<K, R>>,
    key: Option<K>,
}

impl<K: Hash + Eq + Clone, R: Clone> InFlight<K, R> {
    fn complete(mut self, value: R) {
        if let Some(key) = self.key.take() {
            self.cache.finish(&key, Some(value));
        }
    }
}

impl<K: Hash + Eq + Clone, R: Clone> Drop for InFlight<K, R> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            trace!("memoized computation abandoned");
            self.cache.finish(&key, None);
        }
    }
}

/// The `Await` request resolving to the outcome an owning run sends.
fn awaiting<R: Send + 'static>(receiver: Receiver<Option<R>>) -> Await {
    Await::from_joiner(AWAITED_TASK, move || {
        // A disconnected sender means the owner went away without a value.
        let outcome = receiver.recv().ok().flatten();
        Ok(Box::new(outcome) as Box<dyn Any + Send>)
    })
}

// =============================================================================
// Memoized
// =============================================================================

/// A memoized effectful function. Clones share the cache.
pub struct Memoized<K: Hash + Eq, E, R, F> {
    function: Arc<F>,
    cache: Arc<MemoCache<K, R>>,
    _marker: PhantomData<fn() -> E>,
}

impl<K: Hash + Eq, E, R, F> Clone for Memoized<K, E, R, F> {
    fn clone(&self) -> Self {
        Self {
            function: Arc::clone(&self.function),
            cache: Arc::clone(&self.cache),
            _marker: PhantomData,
        }
    }
}

impl<K, E, R, F> Memoized<K, E, R, F>
where
    K: Hash + Eq + Clone + 'static,
    E: ErrorSet,
    R: Clone + Send + 'static,
    F: Fn(K) -> Effect<E, R> + 'static,
{
    /// Memoizes `function` with the cache bounds of `config`.
    pub fn with_config(config: &MemoizeConfig, function: F) -> Self {
        Self {
            function: Arc::new(function),
            cache: Arc::new(MemoCache::new(config.capacity())),
            _marker: PhantomData,
        }
    }

    /// The effect computing, or recalling, the result for `key`.
    ///
    /// The cache is consulted when the effect runs, not when it is built.
    /// A call finding `key` in flight in another run performs [`Await`]
    /// until that run stores its value.
    pub fn call(&self, key: K) -> Effect<E, R> {
        Self::resolve(Arc::clone(&self.function), Arc::clone(&self.cache), key)
    }

    fn resolve(function: Arc<F>, cache: Arc<MemoCache<K, R>>, key: K) -> Effect<E, R> {
        Effect::lazy(move || {
            let lookup = cache.lookup(&key);
            Self::step(function, cache, key, lookup)
        })
    }

    fn step(function: Arc<F>, cache: Arc<MemoCache<K, R>>, key: K, lookup: Lookup<R>) -> Effect<E, R> {
        match lookup {
            Lookup::Hit(value) => {
                debug!("memoized call hit");
                Effect::pure(value)
            }
            Lookup::Reentrant => {
                warn!("memoized function re-entered its own key; computing without the cache");
                (*function)(key)
            }
            Lookup::Wait(receiver) => {
                debug!("memoized key is being computed by another run; waiting");
                Effect::perform(awaiting(receiver)).flat_map(move |outcome| match outcome {
                    Ok(shared) => match shared.downcast::<Option<R>>().map(|shared| *shared) {
                        Ok(Some(value)) => {
                            cache.hits.fetch_add(1, Ordering::Relaxed);
                            debug!("memoized call hit after waiting");
                            Effect::pure(value)
                        }
                        Ok(None) => Self::resolve(function, cache, key),
                        Err(_) => Effect::abort(Fault::TaskFailed(TaskFailure::new(
                            AWAITED_TASK,
                            TaskFailureReason::Decode("unexpected result type".to_owned()),
                        ))),
                    },
                    Err(failure) => Effect::abort(Fault::TaskFailed(failure)),
                })
            }
            Lookup::Miss => {
                debug!("memoized call missed; computing");
                let guard = InFlight {
                    cache,
                    key: Some(key.clone()),
                };
                (*function)(key).inspect(move |value| guard.complete(value.clone()))
            }
        }
    }

    /// Calls that found a cached value.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.cache.hits.load(Ordering::Relaxed)
    }

    /// Calls that had to compute.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.cache.misses.load(Ordering::Relaxed)
    }

    /// Number of cached values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.entries.lock().computed.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every cached value. Computations in progress still store
    /// their results.
    pub fn clear(&self) {
        self.cache.entries.lock().computed.clear();
    }
}

impl<K: Hash + Eq, E, R, F> Debug for Memoized<K, E, R, F> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Memoized")
            .field("hits", &self.cache.hits.load(Ordering::Relaxed))
            .field("misses", &self.cache.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Memoizes `function` with an unbounded cache.
pub fn memoize<K, E, R, F>(function: F) -> Memoized<K, E, R, F>
where
    K: Hash + Eq + Clone + 'static,
    E: ErrorSet,
    R: Clone + Send + 'static,
    F: Fn(K) -> Effect<E, R> + 'static,
{
    Memoized::with_config(&MemoizeConfig::unbounded(), function)
}

/// Memoizes `function`, keeping at most `capacity` results and evicting
/// the least recently used.
pub fn memoize_with_capacity<K, E, R, F>(capacity: NonZeroUsize, function: F) -> Memoized<K, E, R, F>
where
    K: Hash + Eq + Clone + 'static,
    E: ErrorSet,
    R: Clone + Send + 'static,
    F: Fn(K) -> Effect<E, R> + 'static,
{
    Memoized::with_config(&MemoizeConfig::bounded(capacity), function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrNil;
    use crate::{Runtime, errors};
    use rstest::rstest;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct Unlucky;

    fn counted(calls: &Arc<AtomicU32>) -> impl Fn(u32) -> Effect<ErrNil, u32> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move |key| {
            let calls = Arc::clone(&calls);
            Effect::sync(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                key * 10
            })
        }
    }

    #[rstest]
    fn distinct_keys_compute_independently() {
        let calls = Arc::new(AtomicU32::new(0));
        let memo = memoize(counted(&calls));
        let runtime = Runtime::new();
        let program = memo.call(1).product(memo.call(2)).product(memo.call(1));
        assert_eq!(runtime.run(program).unwrap(), ((10, 20), 10));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!((memo.hits(), memo.misses(), memo.len()), (1, 2, 2));
    }

    #[rstest]
    fn building_a_call_runs_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let memo = memoize(counted(&calls));
        let pending = memo.call(3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(pending);
        assert!(memo.is_empty());
    }

    #[rstest]
    fn errors_are_not_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let memo = memoize(move |key: u32| -> Effect<errors![Unlucky], u32> {
            let counter = Arc::clone(&counter);
            Effect::lazy(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Effect::fail(Unlucky)
                } else {
                    Effect::pure(key)
                }
            })
        });
        let runtime = Runtime::new();
        assert!(runtime.run(memo.call(7)).is_err());
        assert_eq!(runtime.run(memo.call(7)).unwrap(), 7);
        assert_eq!(runtime.run(memo.call(7)).unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn bounded_cache_evicts_least_recently_used() {
        let calls = Arc::new(AtomicU32::new(0));
        let memo = memoize_with_capacity(NonZeroUsize::MIN.saturating_add(1), counted(&calls));
        let runtime = Runtime::new();
        for key in [1, 2, 1, 3, 1, 2] {
            runtime.run(memo.call(key)).unwrap();
        }
        assert_eq!(memo.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[rstest]
    fn reentering_a_key_computes_without_deadlock() {
        type Recurse = Box<dyn Fn(u32) -> Effect<ErrNil, u32> + Send + Sync>;
        let slot: Arc<OnceLock<Recurse>> = Arc::new(OnceLock::new());
        let depth = Arc::new(AtomicU32::new(0));
        let inner = Arc::clone(&slot);
        let memo = memoize(move |key: u32| -> Effect<ErrNil, u32> {
            if depth.fetch_add(1, Ordering::SeqCst) == 0 {
                let recurse = inner.get().expect("slot is filled before running");
                recurse(key).fmap(|value| value + 1)
            } else {
                Effect::pure(10)
            }
        });
        let reentrant = memo.clone();
        assert!(slot.set(Box::new(move |key| reentrant.call(key))).is_ok());
        let runtime = Runtime::new();
        assert_eq!(runtime.run(memo.call(5)).unwrap(), 11);
        assert_eq!(runtime.run(memo.call(5)).unwrap(), 11);
        assert_eq!(memo.hits(), 1);
    }

    #[rstest]
    fn clear_forgets_cached_values() {
        let calls = Arc::new(AtomicU32::new(0));
        let memo = memoize(counted(&calls));
        let runtime = Runtime::new();
        runtime.run(memo.call(1)).unwrap();
        memo.clear();
        runtime.run(memo.call(1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
