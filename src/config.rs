// Engine configuration.
//
// All tunables for the storage engine core live here. Defaults mirror
// the values the engine was tuned with: a 40ms epoch tick, a 100ms GC
// pass, and bounded per-pass batch sizes so reclamation never causes an
// unbounded latency spike.

use serde::{Deserialize, Serialize};

/// Validation strategy used by the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMode {
    /// Defer conflict detection to commit: read set is re-validated
    /// after the commit id is drawn.
    Optimistic,
    /// Acquire on write; commit is a single install pass with no read
    /// validation.
    Pessimistic,
}

impl Default for TransactionMode {
    fn default() -> Self {
        TransactionMode::Optimistic
    }
}

/// Reclamation strategy for dead tuple versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcType {
    /// No reclamation; enqueued metadata is dropped.
    Off,
    /// Cooperative: committing and allocating threads reclaim inline.
    Cooperative,
    /// Background worker over a single global pending queue.
    Vacuum,
    /// Background worker draining per-epoch pending lists.
    Epoch,
}

impl Default for GcType {
    fn default() -> Self {
        GcType::Epoch
    }
}

/// Configuration for the storage engine core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Validation strategy.
    pub transaction_mode: TransactionMode,
    /// Reclamation strategy.
    pub gc_type: GcType,
    /// Sleep between GC passes, in milliseconds.
    pub gc_period_ms: u64,
    /// Interval between epoch ticks, in milliseconds.
    pub epoch_period_ms: u64,
    /// Upper bound on tuples reclaimed in one GC pass.
    pub max_tuples_per_gc: usize,
    /// Upper bound on each per-table recycled freelist.
    pub max_free_list_length: usize,
    /// Upper bound on epochs drained in one GC pass.
    pub max_epochs_per_thread: usize,
    /// Slots per tile group when a table allocates a fresh page.
    pub default_tuples_per_tile_group: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::default(),
            gc_type: GcType::default(),
            gc_period_ms: 100,
            epoch_period_ms: 40,
            max_tuples_per_gc: 100_000,
            max_free_list_length: 100_000,
            max_epochs_per_thread: 5,
            default_tuples_per_tile_group: 1024,
        }
    }
}
