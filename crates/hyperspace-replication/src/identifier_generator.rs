//! Per-region sequence id generation.
//!
//! Each region the daemon leads needs a dense monotonic sequence of ids
//! to order writes in the storage engine. `generate` is a single
//! `fetch_add` on a per-region counter; `adopt` swaps the region set on
//! reconfiguration, preserving counters for regions that persist and
//! seeding new ones (normally from the storage engine's resume point).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use hyperspace_types::{RegionId, SequenceId};

/// Ids start at 1; 0 is never issued.
const FIRST_ID: u64 = 1;

#[derive(Debug, Default)]
pub struct IdentifierGenerator {
    counters: RwLock<HashMap<RegionId, Arc<AtomicU64>>>,
}

impl IdentifierGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next id for `region`. Panics if the region was not
    /// adopted; callers only generate for regions the current
    /// configuration assigns to us.
    pub fn generate(&self, region: RegionId) -> SequenceId {
        let counters = self.counters.read().expect("generator lock poisoned");
        let counter = counters
            .get(&region)
            .unwrap_or_else(|| panic!("generating id for unadopted region {region}"));
        SequenceId::new(counter.fetch_add(1, Ordering::Relaxed))
    }

    /// The next id that `generate` would hand out.
    pub fn peek(&self, region: RegionId) -> u64 {
        let counters = self.counters.read().expect("generator lock poisoned");
        counters
            .get(&region)
            .map_or(FIRST_ID, |c| c.load(Ordering::SeqCst))
    }

    /// Raises the counter so the next id is at least `id + 1`. Used when
    /// resuming from ids observed in storage or from a peer.
    pub fn bump(&self, region: RegionId, id: u64) -> bool {
        let counters = self.counters.read().expect("generator lock poisoned");
        let Some(counter) = counters.get(&region) else {
            return false;
        };
        let mut current = counter.load(Ordering::Relaxed);

        while current <= id {
            match counter.compare_exchange_weak(
                current,
                id + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(seen) => current = seen,
            }
        }

        true
    }

    /// Swaps the region set. Counters for regions present in both the
    /// old and new sets carry over; new regions start from `seed`.
    pub fn adopt(&self, regions: &[RegionId], mut seed: impl FnMut(RegionId) -> u64) {
        let mut counters = self.counters.write().expect("generator lock poisoned");
        let mut next = HashMap::with_capacity(regions.len());

        for ri in regions {
            let counter = match counters.get(ri) {
                Some(existing) => Arc::clone(existing),
                None => Arc::new(AtomicU64::new(seed(*ri).max(FIRST_ID))),
            };
            next.insert(*ri, counter);
        }

        *counters = next;
    }

    /// Regions currently adopted, for debug dumps.
    pub fn regions(&self) -> Vec<RegionId> {
        let counters = self.counters.read().expect("generator lock poisoned");
        let mut out: Vec<RegionId> = counters.keys().copied().collect();
        out.sort_unstable();
        out
    }
}
