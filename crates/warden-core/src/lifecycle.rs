//! Lifecycle/GC Coordinator
//!
//! Explicit and threshold-driven reclamation of interpreter heap objects.
//! The coordinator needs `&mut Heap`, which the engine only hands out
//! between evaluations. Capabilities never live on the heap.

use tracing::debug;

use crate::config::GcConfig;
use crate::script::{Heap, ScopeRef, Value};

/// Outcome of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectStats {
    pub reclaimed: usize,
    pub live: usize,
}

/// Cumulative collector statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    pub collections: u64,
    pub reclaimed_total: u64,
}

#[derive(Debug)]
pub struct Lifecycle {
    threshold: usize,
    stats: GcStats,
}

impl Lifecycle {
    pub fn new(config: &GcConfig) -> Self {
        Lifecycle { threshold: config.allocation_threshold, stats: GcStats::default() }
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Mark from `roots`, pinned objects and `extra`, then sweep.
    pub fn collect(&mut self, heap: &mut Heap, roots: &[ScopeRef], extra: &[Value]) -> CollectStats {
        let reclaimed = heap.collect(roots, extra);
        self.stats.collections += 1;
        self.stats.reclaimed_total += reclaimed as u64;

        let stats = CollectStats { reclaimed, live: heap.live() };
        debug!(reclaimed, live = stats.live, "heap collected");
        stats
    }

    /// Collect only once allocations since the last collection reach the threshold.
    pub fn collect_if_needed(
        &mut self,
        heap: &mut Heap,
        roots: &[ScopeRef],
        extra: &[Value],
    ) -> Option<CollectStats> {
        if heap.allocated_since_collect() < self.threshold {
            return None;
        }
        Some(self.collect(heap, roots, extra))
    }
}
