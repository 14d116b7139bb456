// Copyright (c) 2025 TidalDB Contributors
//
// Garbage collector: reclaims superseded tuple versions once the epoch
// watermark guarantees no present or future reader can see them.
//
// Committing transactions enqueue `TupleMetadata` for every version
// they superseded. A reclamation pass computes the watermark, seals and
// drains closed epochs (or the global pending queue, depending on the
// strategy), unlinks each dead version from its table's indexes, resets
// the slot header, and publishes the freed slot on a bounded per-table
// recycled freelist that the allocator front consumes.
//
// Metadata whose end cid is still above the watermark is parked in a
// deferred garbage map keyed by end cid and revisited every pass. The
// GC never propagates errors to transactions: it logs, skips the
// offending metadata, and keeps going.
//
// Four strategies sit behind one contract, chosen at construction:
// OFF drops everything, COOPERATIVE reclaims inline on the caller's
// thread, VACUUM runs a background worker over one global queue, and
// EPOCH runs the full per-epoch design.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::{ArrayQueue, SegQueue};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::common::{CommitId, TableId, TupleCoordinate, TupleMetadata, START_CID};
use crate::config::{EngineConfig, GcType};
use crate::index::IndexMaintainer;
use crate::transaction::epoch::{Epoch, EpochManager};

/// Batch size for inline reclamation under the cooperative strategy.
const INLINE_GC_BATCH: usize = 64;

/// Live counters for the garbage collector.
#[derive(Debug, Default)]
pub struct GcStats {
    passes: AtomicU64,
    reclaimed: AtomicU64,
    deferred: AtomicU64,
    recycled_served: AtomicU64,
    freelist_overflow: AtomicU64,
}

impl GcStats {
    pub fn snapshot(&self) -> GcStatsSnapshot {
        GcStatsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            recycled_served: self.recycled_served.load(Ordering::Relaxed),
            freelist_overflow: self.freelist_overflow.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GcStats`].
#[derive(Debug, Clone, Default)]
pub struct GcStatsSnapshot {
    pub passes: u64,
    pub reclaimed: u64,
    pub deferred: u64,
    pub recycled_served: u64,
    pub freelist_overflow: u64,
}

enum GcStrategy {
    Off,
    Cooperative(Arc<GcCore>),
    Vacuum(Arc<GcCore>),
    Epoch(Arc<GcCore>),
}

/// Facade over the reclamation strategies.
pub struct GcManager {
    strategy: GcStrategy,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GcManager {
    /// Builds a collector for the configured strategy. Strategies that
    /// need a watermark require the epoch manager; without one the
    /// collector degrades to OFF.
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<Catalog>,
        epoch_manager: Option<Arc<EpochManager>>,
    ) -> Self {
        let strategy = match (config.gc_type, epoch_manager) {
            (GcType::Off, _) | (_, None) => GcStrategy::Off,
            (gc_type, Some(epoch_manager)) => {
                let core = Arc::new(GcCore::new(config, catalog, epoch_manager));
                match gc_type {
                    GcType::Cooperative => GcStrategy::Cooperative(core),
                    GcType::Vacuum => GcStrategy::Vacuum(core),
                    GcType::Epoch => GcStrategy::Epoch(core),
                    GcType::Off => unreachable!(),
                }
            }
        };
        Self {
            strategy,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// A collector that drops everything; allocation always falls back
    /// to fresh slots.
    pub fn disabled() -> Self {
        Self {
            strategy: GcStrategy::Off,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Enqueues a dead version for reclamation.
    pub fn recycle_tuple_slot(&self, metadata: TupleMetadata) {
        match &self.strategy {
            GcStrategy::Off => {}
            GcStrategy::Cooperative(core) => {
                core.pending.push(metadata);
                core.collect(false, INLINE_GC_BATCH);
            }
            GcStrategy::Vacuum(core) => core.pending.push(metadata),
            GcStrategy::Epoch(core) => {
                core.epoch_manager.current_epoch().enqueue_free(metadata);
            }
        }
    }

    /// Enqueue variant used by the commit path: the committing
    /// transaction still holds a reference on `epoch`, so the epoch
    /// cannot be sealed out from under the push.
    pub(crate) fn recycle_tuple_slot_in_epoch(&self, epoch: &Arc<Epoch>, metadata: TupleMetadata) {
        match &self.strategy {
            GcStrategy::Epoch(_) => epoch.enqueue_free(metadata),
            _ => self.recycle_tuple_slot(metadata),
        }
    }

    /// Pops a recycled slot for `table_id`, or `None` when the freelist
    /// is empty. Returned slots always carry an empty header.
    pub fn return_free_slot(&self, table_id: TableId) -> Option<TupleCoordinate> {
        let core = match &self.strategy {
            GcStrategy::Off => return None,
            GcStrategy::Cooperative(core) => {
                if let Some(coord) = core.pop_recycled(table_id) {
                    return Some(coord);
                }
                core.collect(false, INLINE_GC_BATCH);
                core
            }
            GcStrategy::Vacuum(core) | GcStrategy::Epoch(core) => core,
        };
        core.pop_recycled(table_id)
    }

    /// Spawns the background worker for strategies that have one.
    pub fn start(&self) {
        let (core, epoch_mode) = match &self.strategy {
            GcStrategy::Vacuum(core) => (Arc::clone(core), false),
            GcStrategy::Epoch(core) => (Arc::clone(core), true),
            _ => return,
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("gc-worker".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    sleep_while(&running, core.gc_period);
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    core.collect(epoch_mode, core.max_tuples_per_gc);
                }
            })
            .expect("failed to spawn gc worker");
        *self.worker.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one reclamation pass on the caller's thread. Exposed so
    /// embedders and tests can drive the collector deterministically.
    pub fn collect_once(&self) {
        match &self.strategy {
            GcStrategy::Off => {}
            GcStrategy::Cooperative(core) | GcStrategy::Vacuum(core) => {
                core.collect(false, core.max_tuples_per_gc)
            }
            GcStrategy::Epoch(core) => core.collect(true, core.max_tuples_per_gc),
        }
    }

    /// The monotonically advancing "smallest epoch cleaned" cursor.
    pub fn smallest_cleaned_cid(&self) -> CommitId {
        match &self.strategy {
            GcStrategy::Off => START_CID,
            GcStrategy::Cooperative(core)
            | GcStrategy::Vacuum(core)
            | GcStrategy::Epoch(core) => core.smallest_cleaned_cid.load(Ordering::SeqCst),
        }
    }

    pub fn stats(&self) -> GcStatsSnapshot {
        match &self.strategy {
            GcStrategy::Off => GcStatsSnapshot::default(),
            GcStrategy::Cooperative(core)
            | GcStrategy::Vacuum(core)
            | GcStrategy::Epoch(core) => core.stats.snapshot(),
        }
    }

    pub fn free_list_len(&self, table_id: TableId) -> usize {
        match &self.strategy {
            GcStrategy::Off => 0,
            GcStrategy::Cooperative(core)
            | GcStrategy::Vacuum(core)
            | GcStrategy::Epoch(core) => core
                .recycled
                .get(&table_id)
                .map(|queue| queue.len())
                .unwrap_or(0),
        }
    }
}

impl Drop for GcManager {
    fn drop(&mut self) {
        self.stop();
    }
}

struct GcCore {
    catalog: Arc<Catalog>,
    index_maintainer: Arc<dyn IndexMaintainer>,
    epoch_manager: Arc<EpochManager>,
    pending: SegQueue<TupleMetadata>,
    recycled: DashMap<TableId, Arc<ArrayQueue<TupleCoordinate>>>,
    deferred: Mutex<BTreeMap<CommitId, Vec<TupleMetadata>>>,
    smallest_cleaned_cid: AtomicU64,
    gc_period: Duration,
    max_tuples_per_gc: usize,
    max_free_list_length: usize,
    max_epochs_per_thread: usize,
    stats: GcStats,
}

impl GcCore {
    fn new(config: &EngineConfig, catalog: Arc<Catalog>, epoch_manager: Arc<EpochManager>) -> Self {
        let index_maintainer: Arc<dyn IndexMaintainer> = Arc::clone(&catalog) as _;
        Self {
            catalog,
            index_maintainer,
            epoch_manager,
            pending: SegQueue::new(),
            recycled: DashMap::new(),
            deferred: Mutex::new(BTreeMap::new()),
            smallest_cleaned_cid: AtomicU64::new(START_CID),
            gc_period: Duration::from_millis(config.gc_period_ms),
            max_tuples_per_gc: config.max_tuples_per_gc.max(1),
            max_free_list_length: config.max_free_list_length.max(1),
            max_epochs_per_thread: config.max_epochs_per_thread.max(1),
            stats: GcStats::default(),
        }
    }

    /// One reclamation pass: gather candidates, reclaim the safe ones,
    /// defer the rest, advance the cleaned cursor.
    fn collect(&self, epoch_mode: bool, budget: usize) {
        let watermark = self.epoch_manager.safe_reclaim_cid();
        let mut batch = Vec::new();

        if epoch_mode {
            let mut processed = 0;
            for epoch in self.epoch_manager.closed_epochs() {
                if processed >= self.max_epochs_per_thread {
                    break;
                }
                if !epoch.try_seal() {
                    continue;
                }
                while let Some(metadata) = epoch.dequeue_free() {
                    batch.push(metadata);
                }
                self.epoch_manager.erase_epoch(epoch.id());
                processed += 1;
            }
        } else {
            while batch.len() < budget {
                match self.pending.pop() {
                    Some(metadata) => batch.push(metadata),
                    None => break,
                }
            }
        }

        // Revisit deferred garbage the watermark has passed.
        {
            let mut deferred = self.deferred.lock();
            let keep = deferred.split_off(&watermark.saturating_add(1));
            let ready = std::mem::replace(&mut *deferred, keep);
            for (_, metas) in ready {
                batch.extend(metas);
            }
        }

        if batch.is_empty() {
            self.advance_cleaned_cursor(watermark);
            return;
        }

        let mut reclaimed = 0usize;
        for metadata in batch {
            if metadata.end_cid <= watermark && reclaimed < budget {
                self.reclaim(&metadata);
                reclaimed += 1;
            } else {
                self.defer(metadata);
            }
        }
        self.advance_cleaned_cursor(watermark);
        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        trace!(watermark, reclaimed, "gc pass");
    }

    /// Unlink from indexes, reset the header, publish on the freelist.
    fn reclaim(&self, metadata: &TupleMetadata) {
        self.index_maintainer
            .delete_from_indexes(metadata.table_id, metadata);
        let Some(tile_group) = self.catalog.tile_group(metadata.tile_group_id) else {
            warn!(
                tile_group = metadata.tile_group_id,
                "reclaim skipped: tile group vanished"
            );
            return;
        };
        tile_group.header().reset_slot(metadata.tuple_id);
        tile_group.clear_tuple(metadata.tuple_id);

        let queue = self
            .recycled
            .entry(metadata.table_id)
            .or_insert_with(|| Arc::new(ArrayQueue::new(self.max_free_list_length)))
            .clone();
        if queue.push(metadata.coordinate()).is_err() {
            // Freelist full: the slot stays empty but unlisted.
            self.stats.freelist_overflow.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    fn defer(&self, metadata: TupleMetadata) {
        self.deferred
            .lock()
            .entry(metadata.end_cid)
            .or_default()
            .push(metadata);
        self.stats.deferred.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_recycled(&self, table_id: TableId) -> Option<TupleCoordinate> {
        let coord = self.recycled.get(&table_id)?.pop()?;
        self.stats.recycled_served.fetch_add(1, Ordering::Relaxed);
        debug!(table = table_id, %coord, "served recycled slot");
        Some(coord)
    }

    /// CAS the cleaned cursor forward; it never moves backwards.
    fn advance_cleaned_cursor(&self, watermark: CommitId) {
        let mut current = self.smallest_cleaned_cid.load(Ordering::SeqCst);
        while watermark > current {
            match self.smallest_cleaned_cid.compare_exchange(
                current,
                watermark,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

fn sleep_while(running: &AtomicBool, period: Duration) {
    let chunk = Duration::from_millis(5);
    let mut slept = Duration::ZERO;
    while slept < period && running.load(Ordering::SeqCst) {
        let step = chunk.min(period - slept);
        thread::sleep(step);
        slept += step;
    }
}
