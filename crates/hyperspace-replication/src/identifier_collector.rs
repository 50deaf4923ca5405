//! Per-region sequence id collection.
//!
//! The collector tracks which issued ids have committed (or been
//! abandoned) so the storage engine can reclaim log prefixes. Committed
//! ids arrive out of order, so each region keeps the least uncollected
//! id plus a compact run representation of everything collected above
//! it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use hyperspace_types::RegionId;

/// Runs of collected ids strictly above `lower`, keyed by run start and
/// mapping to one-past-the-end.
#[derive(Debug, Default)]
struct SeqnoCollector {
    /// The least id not yet collected.
    lower: u64,
    runs: BTreeMap<u64, u64>,
}

impl SeqnoCollector {
    fn new() -> Self {
        // Id 0 is never issued, so it counts as pre-collected.
        Self {
            lower: 1,
            runs: BTreeMap::new(),
        }
    }

    fn collect(&mut self, id: u64) {
        if id < self.lower {
            return;
        }

        if id == self.lower {
            self.lower += 1;
            self.absorb_runs();
            return;
        }

        // Merge into an adjacent run where possible.
        if let Some((&start, &end)) = self.runs.range(..=id).next_back() {
            if id < end {
                return;
            }

            if id == end {
                let new_end = id + 1;
                self.runs.insert(start, new_end);
                self.coalesce_at(start);
                return;
            }
        }

        self.runs.insert(id, id + 1);
        self.coalesce_at(id);
    }

    fn bump(&mut self, lb: u64) {
        if lb <= self.lower {
            return;
        }

        self.lower = lb;
        let keep = self.runs.split_off(&lb);

        // A run straddling the new bound extends it.
        if let Some((_, &end)) = self.runs.iter().next_back() {
            if end > self.lower {
                self.lower = end;
            }
        }

        self.runs = keep;
        self.absorb_runs();
    }

    fn lower_bound(&self) -> u64 {
        self.lower
    }

    fn absorb_runs(&mut self) {
        while let Some((&start, &end)) = self.runs.first_key_value() {
            if start > self.lower {
                break;
            }

            self.runs.pop_first();

            if end > self.lower {
                self.lower = end;
            }
        }
    }

    fn coalesce_at(&mut self, start: u64) {
        let end = self.runs[&start];

        if let Some((&next_start, &next_end)) = self.runs.range(end..).next() {
            if next_start == end {
                self.runs.remove(&next_start);
                self.runs.insert(start, next_end);
            }
        }

        if start <= self.lower {
            self.absorb_runs();
        }
    }
}

/// The per-region collector map. `adopt` swaps the region set on
/// reconfiguration, preserving progress for regions that persist.
#[derive(Debug, Default)]
pub struct IdentifierCollector {
    collectors: RwLock<HashMap<RegionId, Arc<Mutex<SeqnoCollector>>>>,
}

impl IdentifierCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` has committed (or been abandoned) in `region`.
    pub fn collect(&self, region: RegionId, id: u64) {
        let collectors = self.collectors.read().expect("collector lock poisoned");
        let Some(collector) = collectors.get(&region) else {
            tracing::warn!(region = %region, id, "collect for unadopted region");
            return;
        };
        collector.lock().expect("collector poisoned").collect(id);
    }

    /// Declares every id below `lb` collected.
    pub fn bump(&self, region: RegionId, lb: u64) {
        let collectors = self.collectors.read().expect("collector lock poisoned");
        let Some(collector) = collectors.get(&region) else {
            tracing::warn!(region = %region, lb, "bump for unadopted region");
            return;
        };
        collector.lock().expect("collector poisoned").bump(lb);
    }

    /// The least uncollected id for `region`; the storage engine may
    /// reclaim everything below it.
    pub fn lower_bound(&self, region: RegionId) -> u64 {
        let collectors = self.collectors.read().expect("collector lock poisoned");
        collectors
            .get(&region)
            .map_or(1, |c| c.lock().expect("collector poisoned").lower_bound())
    }

    /// Swaps the region set, preserving collectors that persist.
    pub fn adopt(&self, regions: &[RegionId]) {
        let mut collectors = self.collectors.write().expect("collector lock poisoned");
        let mut next = HashMap::with_capacity(regions.len());

        for ri in regions {
            let collector = match collectors.get(ri) {
                Some(existing) => Arc::clone(existing),
                None => Arc::new(Mutex::new(SeqnoCollector::new())),
            };
            next.insert(*ri, collector);
        }

        *collectors = next;
    }
}
