//! Concurrent bimaps between feature keys and dense `J` indices.
//!
//! [`FeatureMap`] interns atomic names, [`ProductMap`] interns cross
//! features; both are [`FeatureBimap`] instantiations. Interning is
//! thread-safe (the hash table is sharded into buckets, each behind its own
//! mutex) and assigns `J`s from a monotone counter. The reverse J-to-key
//! view is a dense vector that must be materialized explicitly with
//! [`FeatureBimap::sync_j_to_key`] after a batch of inserts; it stays valid
//! until the map is modified again.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::{FeatureName, JProduct, Renumbering, INVALID_J, J};

/// Marker trait for types usable as bimap keys.
pub trait FeatureKey: Clone + Eq + Hash + Send + Sync {}

impl FeatureKey for FeatureName {}
impl FeatureKey for JProduct {}

const BUCKET_COUNT: usize = 64;

/// Thread-safe bimap between a feature key and its dense `J`.
///
/// Removal happens only through [`renumber`](Self::renumber): removed keys
/// stay in the table as tombstones carrying [`INVALID_J`], so a pruned
/// feature is never re-interned under a fresh index.
pub struct FeatureBimap<K: FeatureKey> {
    buckets: Vec<Mutex<HashMap<K, J>>>,
    j_sequence: AtomicU32,
    synced: AtomicBool,
    j_to_key: Vec<K>,
}

impl<K: FeatureKey> Default for FeatureBimap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FeatureKey> FeatureBimap<K> {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            j_sequence: AtomicU32::new(0),
            synced: AtomicBool::new(true),
            j_to_key: Vec::new(),
        }
    }

    #[inline]
    fn bucket_of(&self, key: &K) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % BUCKET_COUNT
    }

    /// Interns a key, assigning a fresh `J` if it is new. Thread-safe:
    /// concurrent interns of the same key return the same `J`.
    ///
    /// For a tombstoned key this returns [`INVALID_J`].
    pub fn intern(&self, key: K) -> J {
        let mut bucket = self.buckets[self.bucket_of(&key)].lock().unwrap();
        if let Some(&j) = bucket.get(&key) {
            return j;
        }
        let j = self.j_sequence.fetch_add(1, Ordering::Relaxed);
        assert_ne!(j, INVALID_J, "feature index space exhausted");
        bucket.insert(key, j);
        self.synced.store(false, Ordering::Release);
        j
    }

    /// Thread-safe lookup. Returns `None` for unknown and tombstoned keys.
    pub fn lookup(&self, key: &K) -> Option<J> {
        let bucket = self.buckets[self.bucket_of(key)].lock().unwrap();
        bucket.get(key).copied().filter(|&j| j != INVALID_J)
    }

    /// Whether the key was ever interned (tombstones included). Thread-safe.
    pub fn contains(&self, key: &K) -> bool {
        let bucket = self.buckets[self.bucket_of(key)].lock().unwrap();
        bucket.contains_key(key)
    }

    /// Number of live `J`s, i.e. the current J-space size.
    #[inline]
    pub fn len(&self) -> u32 {
        self.j_sequence.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key for a `J`. Valid only after [`sync_j_to_key`](Self::sync_j_to_key);
    /// stays valid as long as the map is unmodified.
    #[inline]
    pub fn j_to_key(&self, j: J) -> &K {
        assert!(
            self.synced.load(Ordering::Acquire),
            "missing call to sync_j_to_key"
        );
        self.j_to_key_stale(j)
    }

    /// Like [`j_to_key`](Self::j_to_key) but skips the sync check. Entries
    /// present at the last sync remain readable while new keys are being
    /// interned; indices interned since then are not visible.
    #[inline]
    pub fn j_to_key_stale(&self, j: J) -> &K {
        &self.j_to_key[j as usize]
    }

    /// The dense J-to-key view. Requires a prior sync.
    pub fn synced_keys(&self) -> &[K] {
        assert!(
            self.synced.load(Ordering::Acquire),
            "missing call to sync_j_to_key"
        );
        &self.j_to_key
    }

    /// Materializes the dense J-to-key view from the hash table.
    ///
    /// Must not race with concurrent inserts.
    pub fn sync_j_to_key(&mut self) {
        if self.synced.load(Ordering::Acquire) {
            return;
        }
        let next_j = self.j_sequence.load(Ordering::Relaxed) as usize;
        let mut dense: Vec<Option<K>> = vec![None; next_j];
        let mut valid = 0usize;
        for bucket in &self.buckets {
            for (key, &j) in bucket.lock().unwrap().iter() {
                if j != INVALID_J {
                    debug_assert!(dense[j as usize].is_none(), "duplicate J {j}");
                    dense[j as usize] = Some(key.clone());
                    valid += 1;
                }
            }
        }
        assert_eq!(valid, next_j, "gap in J space");
        self.j_to_key = dense
            .into_iter()
            .map(|k| k.expect("gap in J space"))
            .collect();
        self.synced.store(true, Ordering::Release);
    }

    /// Applies a renumbering to the whole map. Removed `J`s become
    /// tombstones; the rest are re-densified. Re-syncs the J-to-key view.
    ///
    /// Must not race with any reader.
    pub fn renumber(&mut self, renumbering: &Renumbering) {
        if renumbering.j_to_new_j().is_empty() {
            return;
        }
        let next_j = renumbering.next_j();
        assert_ne!(next_j, INVALID_J, "feature index space exhausted");
        self.j_sequence.store(next_j, Ordering::Relaxed);
        let mut valid: u32 = 0;
        for bucket in &self.buckets {
            for (_, j) in bucket.lock().unwrap().iter_mut() {
                if *j != INVALID_J {
                    *j = renumbering.j_to_new_j()[*j as usize];
                    if *j != INVALID_J {
                        valid += 1;
                    }
                }
            }
        }
        assert_eq!(valid, next_j, "renumbering does not cover the live J space");
        self.synced.store(false, Ordering::Release);
        self.sync_j_to_key();
    }
}

/// Bimap of atomic feature names. Its `J` space is private to products'
/// factor lists.
pub type FeatureMap = FeatureBimap<FeatureName>;

/// Bimap of cross features. Its `J` space is the engine-wide one: data rows,
/// model weights and dependees are all indexed by product `J`s.
pub type ProductMap = FeatureBimap<JProduct>;

impl FeatureBimap<FeatureName> {
    /// For each atomic `J`, whether its name is in the given set.
    /// Requires a prior sync.
    pub fn feature_set_to_js(&self, names: &[String]) -> Vec<bool> {
        let set: std::collections::HashSet<&str> =
            names.iter().map(String::as_str).collect();
        self.synced_keys()
            .iter()
            .map(|key| set.contains(key.as_str()))
            .collect()
    }
}

impl FeatureBimap<JProduct> {
    /// For each product `J`, whether at least one of its factors is flagged
    /// in `feature_js` (indexed by atomic `J`). Requires a prior sync.
    pub fn have_at_least_one_feature_j(&self, feature_js: &[bool]) -> Vec<bool> {
        self.synced_keys()
            .iter()
            .map(|product| {
                product
                    .factors()
                    .iter()
                    .any(|&j| feature_js.get(j as usize).copied().unwrap_or(false))
            })
            .collect()
    }
}
