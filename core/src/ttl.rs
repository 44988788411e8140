//! TTL-expiring associative store.
//!
//! Every entry carries an optional expiration time. An entry is logically
//! absent as soon as `now > expires_at`, even while it is still physically
//! stored. Physical removal happens in two ways:
//!
//! - **Lazy**: [`TtlStore::get`] removes the single key it was asked for when
//!   that key turns out to be expired.
//! - **Eager**: [`TtlStore::len`], [`TtlStore::keys`], [`TtlStore::values`],
//!   [`TtlStore::items`] and [`TtlStore::purge_expired`] drop every expired
//!   entry before doing their work.
//!
//! [`TtlStore::scan`] is the cheap traversal: it skips expired entries but
//! leaves them in storage.
//!
//! ## Locking
//!
//! Each public method holds the store mutex for its whole body. Multi-step
//! work ("is it expired, then delete") runs on the unlocked [`TtlMap`] inside
//! that single acquisition, so no public method ever re-enters the lock.
//! Atomicity covers one call only: a caller-side sequence such as
//! "check, then insert" is not atomic.
//!
//! ## Example
//!
//! ```
//! use correlate_core::ttl::TtlStore;
//! use correlate_core::Duration;
//!
//! let store = TtlStore::new(Some(Duration::seconds(30)));
//! store.insert("session", 42);
//! assert_eq!(store.get("session"), Ok(42));
//! assert_eq!(store.len(), 1);
//! ```

use crate::config::StoreConfig;
use crate::environment::{Clock, SystemClock};
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `now + ttl`, saturating instead of overflowing the calendar
///
/// A deadline past the last representable instant means the entry never
/// expires; one before the first means it is already expired.
pub(crate) fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    match now.checked_add_signed(ttl) {
        Some(at) => Some(at),
        None if ttl < Duration::zero() => Some(DateTime::<Utc>::MIN_UTC),
        None => None,
    }
}

/// A stored value and its expiration time (`None` = never expires)
#[derive(Clone, Debug)]
pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) expires_at: Option<DateTime<Utc>>,
}

impl<V> Entry<V> {
    /// Strictly past its expiration time.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Unlocked TTL map.
///
/// All expiry rules live here. [`TtlStore`] and the join aggregator wrap it in
/// their own mutex and call these helpers while already holding the lock.
#[derive(Debug)]
pub(crate) struct TtlMap<K, V> {
    entries: HashMap<K, Entry<V>>,
    default_ttl: Option<Duration>,
}

impl<K: Eq + Hash, V> TtlMap<K, V> {
    /// A zero or negative default TTL means entries never expire.
    pub(crate) fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl: default_ttl.filter(|ttl| *ttl > Duration::zero()),
        }
    }

    pub(crate) const fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Insert or overwrite, recomputing expiry from the default TTL.
    pub(crate) fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        let expires_at = self.default_ttl.and_then(|ttl| deadline(now, ttl));
        self.entries.insert(key, Entry { value, expires_at });
    }

    pub(crate) fn is_expired<Q>(&self, key: &Q, now: DateTime<Utc>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).is_some_and(|entry| entry.is_expired(now))
    }

    /// Live entry for `key`; an expired entry is removed on the way out.
    fn live_entry_mut<Q>(&mut self, key: &Q, now: DateTime<Utc>) -> Result<&mut Entry<V>, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_expired(key, now) {
            self.entries.remove(key);
            metrics::counter!("ttl_store.expired_on_read").increment(1);
            return Err(StoreError::NotFound);
        }
        self.entries.get_mut(key).ok_or(StoreError::NotFound)
    }

    pub(crate) fn get<Q>(&mut self, key: &Q, now: DateTime<Utc>) -> Result<&V, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.live_entry_mut(key, now).map(|entry| &entry.value)
    }

    /// Live entry for `key`, inserting `make()` with `expires_at` when absent.
    ///
    /// The expiry of an existing entry is left untouched. The caller is
    /// responsible for clearing an expired entry first (see [`Self::take_expired`]).
    pub(crate) fn get_or_insert_with(
        &mut self,
        key: K,
        expires_at: Option<DateTime<Utc>>,
        make: impl FnOnce() -> V,
    ) -> &mut V {
        &mut self
            .entries
            .entry(key)
            .or_insert_with(|| Entry {
                value: make(),
                expires_at,
            })
            .value
    }

    /// Remove and return the value for `key` only if it has expired.
    pub(crate) fn take_expired<Q>(&mut self, key: &Q, now: DateTime<Utc>) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_expired(key, now) {
            self.entries.remove(key).map(|entry| entry.value)
        } else {
            None
        }
    }

    pub(crate) fn set_ttl<Q>(&mut self, key: &Q, ttl: Duration, now: DateTime<Utc>) -> Result<(), StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.live_entry_mut(key, now)?;
        entry.expires_at = deadline(now, ttl);
        Ok(())
    }

    pub(crate) fn expire_at<Q>(
        &mut self,
        key: &Q,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.live_entry_mut(key, now)?;
        entry.expires_at = Some(timestamp);
        Ok(())
    }

    /// Remaining lifetime. Does not remove anything.
    pub(crate) fn get_ttl<Q>(&self, key: &Q, now: DateTime<Utc>) -> Result<Option<Duration>, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.map(|at| at - now))
            .ok_or(StoreError::NotFound)
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry and hand them back.
    pub(crate) fn purge_expired(&mut self, now: DateTime<Utc>) -> Vec<(K, V)> {
        if !self.entries.values().any(|entry| entry.is_expired(now)) {
            return Vec::new();
        }

        let (expired, live): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(_, entry)| entry.is_expired(now));
        self.entries = live;

        metrics::counter!("ttl_store.purged").increment(expired.len() as u64);
        tracing::trace!(purged = expired.len(), remaining = self.entries.len(), "Purged expired entries");

        expired.into_iter().map(|(key, entry)| (key, entry.value)).collect()
    }

    /// Physically stored entries, expired ones included.
    pub(crate) fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Unexpired entries, without removing the expired ones.
    pub(crate) fn iter_live(&self, now: DateTime<Utc>) -> impl Iterator<Item = (&K, &V)> {
        self.entries
            .iter()
            .filter(move |(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key, &entry.value))
    }
}

/// Thread-safe TTL-expiring key/value store
///
/// # Type Parameters
///
/// - `K`: Key type
/// - `V`: Value type
/// - `C`: Clock used for "now" (wall clock by default)
///
/// Share between threads with `Arc<TtlStore<..>>`; all methods take `&self`.
pub struct TtlStore<K, V, C = SystemClock> {
    inner: Mutex<TtlMap<K, V>>,
    clock: C,
}

impl<K: Eq + Hash, V> TtlStore<K, V, SystemClock> {
    /// Create a store on the wall clock
    ///
    /// `default_ttl` applies to every [`insert`](Self::insert). `None` or a
    /// zero duration means inserted entries never expire.
    #[must_use]
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self::with_clock(default_ttl, SystemClock)
    }

    /// Create a store from configuration
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.default_ttl())
    }
}

impl<K: Eq + Hash, V, C: Clock> TtlStore<K, V, C> {
    /// Create a store that reads time from `clock`
    #[must_use]
    pub fn with_clock(default_ttl: Option<Duration>, clock: C) -> Self {
        Self {
            inner: Mutex::new(TtlMap::new(default_ttl)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TtlMap<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time according to the store's clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The default TTL applied by [`insert`](Self::insert)
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.lock().default_ttl()
    }

    /// Insert or overwrite a value
    ///
    /// Expiry is always recomputed from the default TTL, so overwriting a key
    /// discards any custom TTL previously set with [`set_ttl`](Self::set_ttl)
    /// or [`expire_at`](Self::expire_at).
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        self.lock().insert(key, value, now);
    }

    /// Set a new TTL for a live key, measured from the clock's current time
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent or expired.
    pub fn set_ttl<Q>(&self, key: &Q, ttl: Duration) -> Result<(), StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.set_ttl_at(key, ttl, now)
    }

    /// Set a new TTL for a live key, measured from `now`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent or expired at `now`.
    pub fn set_ttl_at<Q>(&self, key: &Q, ttl: Duration, now: DateTime<Utc>) -> Result<(), StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().set_ttl(key, ttl, now)
    }

    /// Remaining lifetime of a live key
    ///
    /// Returns `Ok(None)` for an entry that never expires.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent or expired.
    pub fn get_ttl<Q>(&self, key: &Q) -> Result<Option<Duration>, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.get_ttl_at(key, now)
    }

    /// Remaining lifetime of a live key relative to `now`
    ///
    /// Other keys are not purged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent or expired at `now`.
    pub fn get_ttl_at<Q>(&self, key: &Q, now: DateTime<Utc>) -> Result<Option<Duration>, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get_ttl(key, now)
    }

    /// Set the absolute expiration time of a live key
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent or expired.
    pub fn expire_at<Q>(&self, key: &Q, timestamp: DateTime<Utc>) -> Result<(), StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.lock().expire_at(key, timestamp, now)
    }

    /// Whether the key exists and has expired
    ///
    /// `false` for live entries, never-expiring entries and missing keys; use
    /// [`get`](Self::get) to test existence.
    #[must_use]
    pub fn is_expired<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.is_expired_at(key, now)
    }

    /// Whether the key exists and has expired relative to `now`
    #[must_use]
    pub fn is_expired_at<Q>(&self, key: &Q, now: DateTime<Utc>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().is_expired(key, now)
    }

    /// Get a copy of a live value
    ///
    /// An expired entry is removed as a side effect.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent or expired.
    pub fn get<Q>(&self, key: &Q) -> Result<V, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let now = self.clock.now();
        self.lock().get(key, now).cloned()
    }

    /// Remove a key, returning its value if it was stored
    ///
    /// Idempotent; the value is returned even if it had already expired.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key)
    }

    /// Number of live entries, after purging every expired one
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut map = self.lock();
        map.purge_expired(now);
        map.stored_len()
    }

    /// Whether the store holds no live entries (purges first)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of physically stored entries, including expired ones not yet purged
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.lock().stored_len()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.lock().purge_expired(now).len()
    }

    /// Snapshot of live keys (purges first)
    #[must_use]
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let now = self.clock.now();
        let mut map = self.lock();
        map.purge_expired(now);
        map.iter_live(now).map(|(key, _)| key.clone()).collect()
    }

    /// Snapshot of live values (purges first)
    #[must_use]
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let now = self.clock.now();
        let mut map = self.lock();
        map.purge_expired(now);
        map.iter_live(now).map(|(_, value)| value.clone()).collect()
    }

    /// Snapshot of live `(key, value)` pairs (purges first)
    #[must_use]
    pub fn items(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let now = self.clock.now();
        let mut map = self.lock();
        map.purge_expired(now);
        map.iter_live(now)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Snapshot of live keys without purging expired ones
    ///
    /// Like [`scan`](Self::scan), but the lock is released before returning.
    #[must_use]
    pub fn keys_unpurged(&self) -> Vec<K>
    where
        K: Clone,
    {
        let now = self.clock.now();
        self.lock().iter_live(now).map(|(key, _)| key.clone()).collect()
    }

    /// Lazy traversal of live entries without purging
    ///
    /// The returned [`Scan`] holds the store lock until it is dropped. Do not
    /// call other methods of the same store on this thread while it is alive.
    pub fn scan(&self) -> Scan<'_, K, V> {
        let now = self.clock.now();
        Scan {
            map: self.lock(),
            now,
        }
    }
}

impl<K, V, C> fmt::Debug for TtlStore<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TtlStore")
            .field("default_ttl", &map.default_ttl)
            .field("stored", &map.entries.len())
            .finish_non_exhaustive()
    }
}

/// Locked, non-purging view over a [`TtlStore`]
///
/// Created by [`TtlStore::scan`]. Expired entries are skipped but stay in
/// storage until an eager operation purges them.
///
/// The store lock is held until the `Scan` is dropped; calling the same
/// store from this thread before then deadlocks. Use
/// [`TtlStore::keys_unpurged`] for a snapshot that releases the lock.
#[must_use = "a Scan holds the store lock until it is dropped"]
pub struct Scan<'a, K, V> {
    map: MutexGuard<'a, TtlMap<K, V>>,
    now: DateTime<Utc>,
}

impl<K: Eq + Hash, V> Scan<'_, K, V> {
    /// The instant live-ness is evaluated against
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Live `(key, value)` pairs, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter_live(self.now)
    }

    /// Live keys, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }
}
