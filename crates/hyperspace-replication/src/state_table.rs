//! The state hash table: `(region, key) → per-key state`.
//!
//! This is an ordinary concurrent map with one twist: the piece of state
//! is a state machine that multiple threads manipulate, and an entry may
//! only be collected once the machine reports `finished()` *and* no
//! thread holds a reference. The same instance is returned to every
//! caller until both conditions hold; collection is atomic against new
//! inserters, so there is no window in which a finished key is
//! discoverable again.
//!
//! References are the only access path. Dropping the last reference
//! while the state is finished removes the entry under the shard lock;
//! a concurrent `get` either runs before the removal (and re-pins the
//! entry, deferring collection) or after it (and misses).
//!
//! The table is sharded by key hash so contention stays per-key.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, RandomState};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

/// Number of independently locked shards.
const SHARDS: usize = 64;

/// A piece of state managed by the table.
pub trait TableState: Send + Sync + Sized {
    type Key: Clone + Eq + Hash + Send;

    /// A fresh state for `key`. Must report `finished() == true` until
    /// work arrives.
    fn new_state(key: &Self::Key) -> Self;

    /// True iff the state is quiescent and may be collected. Evaluated
    /// under the shard lock, so it must be fast; it is fine for a state
    /// to become unfinished again after a reference is re-acquired.
    fn finished(&self) -> bool;
}

/// A pinned reference to one entry. Two references with equal keys from
/// the same table refer to the same underlying state.
pub struct StateRef<'a, S: TableState> {
    table: &'a StateTable<S>,
    key: S::Key,
    state: Arc<S>,
}

impl<S: TableState> StateRef<'_, S> {
    pub fn key(&self) -> &S::Key {
        &self.key
    }
}

impl<S: TableState> Deref for StateRef<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

impl<S: TableState> Drop for StateRef<'_, S> {
    fn drop(&mut self) {
        let mut shard = self.table.shard(&self.key).lock().expect("shard poisoned");

        // Two strong counts means this reference and the map itself. The
        // shard lock keeps any new thread from acquiring until the
        // removal decision is made, so finished() cannot flip under us.
        if Arc::strong_count(&self.state) == 2 && self.state.finished() {
            shard.remove(&self.key);
        }
    }
}

/// The table.
pub struct StateTable<S: TableState> {
    shards: Vec<Mutex<HashMap<S::Key, Arc<S>>>>,
    hasher: RandomState,
}

impl<S: TableState> Default for StateTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TableState> StateTable<S> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &S::Key) -> &Mutex<HashMap<S::Key, Arc<S>>> {
        let h = self.hasher.hash_one(key) as usize;
        &self.shards[h % SHARDS]
    }

    /// Pins the existing state for `key`, or returns `None`.
    pub fn get(&self, key: &S::Key) -> Option<StateRef<'_, S>> {
        let shard = self.shard(key).lock().expect("shard poisoned");
        shard.get(key).map(|state| StateRef {
            table: self,
            key: key.clone(),
            state: Arc::clone(state),
        })
    }

    /// Inserts and pins a fresh state iff absent; `None` means another
    /// thread won the race.
    pub fn create(&self, key: &S::Key) -> Option<StateRef<'_, S>> {
        let state = Arc::new(S::new_state(key));
        let mut shard = self.shard(key).lock().expect("shard poisoned");

        if shard.contains_key(key) {
            return None;
        }

        shard.insert(key.clone(), Arc::clone(&state));
        Some(StateRef {
            table: self,
            key: key.clone(),
            state,
        })
    }

    /// Pins the state for `key`, creating it if absent.
    pub fn get_or_create(&self, key: &S::Key) -> StateRef<'_, S> {
        let mut shard = self.shard(key).lock().expect("shard poisoned");
        let state = shard
            .entry(key.clone())
            .or_insert_with(|| Arc::new(S::new_state(key)));
        StateRef {
            table: self,
            key: key.clone(),
            state: Arc::clone(state),
        }
    }

    /// A point-in-time snapshot of the keys, for retransmission walks.
    /// Never blocks inserters on other shards; entries appearing or
    /// vanishing during the walk are naturally tolerated by `get`.
    pub fn snapshot_keys(&self) -> Vec<S::Key> {
        let mut keys = Vec::new();

        for shard in &self.shards {
            let shard = shard.lock().expect("shard poisoned");
            keys.extend(shard.keys().cloned());
        }

        keys
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("shard poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
