// Copyright (c) 2025 TidalDB Contributors
//
// Epoch manager: groups transactions into reclamation windows.
//
// An epoch is opened by a background ticker, becomes "current" for new
// enrollments, and stops receiving members once a fresher epoch opens.
// Epoch ids are drawn on the commit-id axis: an epoch's id is the value
// of the commit counter at the moment it opens, so every transaction
// enrolled in it has a snapshot at least as large as the epoch id. The
// smallest id among epochs that still hold members is therefore a lower
// bound on every live snapshot, and versions whose end cid is at or
// below that watermark can never be read again.
//
// The garbage collector claims a drained epoch by CAS-ing its ref count
// from zero to a seal sentinel. A joiner that increments into a sealed
// epoch backs out and retries against the fresh current epoch, so a
// claimed epoch can never grow a new member.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{CommitId, EpochId, TimestampOracle, TupleMetadata};

/// Ref-count value marking an epoch claimed by the garbage collector.
const EPOCH_SEALED: u64 = u64::MAX / 2;

/// A group of transactions reclaimed together.
pub struct Epoch {
    id: EpochId,
    ref_count: AtomicU64,
    pending_frees: SegQueue<TupleMetadata>,
}

impl Epoch {
    pub fn new(id: EpochId) -> Self {
        Self {
            id,
            ref_count: AtomicU64::new(0),
            pending_frees: SegQueue::new(),
        }
    }

    pub fn id(&self) -> EpochId {
        self.id
    }

    pub fn ref_count(&self) -> u64 {
        let count = self.ref_count.load(Ordering::Acquire);
        if count >= EPOCH_SEALED {
            count - EPOCH_SEALED
        } else {
            count
        }
    }

    /// Enrolls a transaction. Fails if the collector already claimed
    /// this epoch, in which case the caller must retry on the current
    /// epoch.
    pub fn try_join(&self) -> bool {
        let prev = self.ref_count.fetch_add(1, Ordering::AcqRel);
        if prev >= EPOCH_SEALED {
            self.ref_count.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    pub fn leave(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0 && prev < EPOCH_SEALED, "unbalanced epoch leave");
    }

    /// Claims an empty epoch for reclamation. Succeeds at most once.
    pub fn try_seal(&self) -> bool {
        self.ref_count
            .compare_exchange(0, EPOCH_SEALED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_sealed(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) >= EPOCH_SEALED
    }

    /// Queues a dead version for reclamation once this epoch closes.
    /// Many committing transactions produce; one collector consumes.
    pub fn enqueue_free(&self, metadata: TupleMetadata) {
        self.pending_frees.push(metadata);
    }

    pub fn dequeue_free(&self) -> Option<TupleMetadata> {
        self.pending_frees.pop()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_frees.len()
    }
}

/// Maintains the monotonic sequence of epochs and the current one.
pub struct EpochManager {
    oracle: Arc<TimestampOracle>,
    epochs: DashMap<EpochId, Arc<Epoch>>,
    current_epoch_id: AtomicU64,
    period: Duration,
    running: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl EpochManager {
    pub fn new(oracle: Arc<TimestampOracle>, period: Duration) -> Self {
        let first_id = oracle.peek_cid();
        let manager = Self {
            oracle,
            epochs: DashMap::new(),
            current_epoch_id: AtomicU64::new(first_id),
            period,
            running: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
        };
        manager.epochs.insert(first_id, Arc::new(Epoch::new(first_id)));
        manager
    }

    /// Spawns the background ticker that opens a fresh epoch every
    /// period.
    pub fn start(manager: &Arc<EpochManager>) {
        if manager.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let running = Arc::clone(&manager.running);
        let ticker_view = Arc::clone(manager);
        let handle = thread::Builder::new()
            .name("epoch-ticker".into())
            .spawn(move || {
                let chunk = Duration::from_millis(5);
                while running.load(Ordering::SeqCst) {
                    let mut slept = Duration::ZERO;
                    while slept < ticker_view.period && running.load(Ordering::SeqCst) {
                        let step = chunk.min(ticker_view.period - slept);
                        thread::sleep(step);
                        slept += step;
                    }
                    if running.load(Ordering::SeqCst) {
                        ticker_view.tick();
                    }
                }
            })
            .expect("failed to spawn epoch ticker");
        *manager.ticker.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Opens a fresh epoch if the commit counter moved since the
    /// current one opened. Idle ticks are free.
    pub fn tick(&self) {
        let id = self.oracle.peek_cid();
        let current = self.current_epoch_id.load(Ordering::SeqCst);
        if id <= current {
            return;
        }
        // entry() keeps a racing tick from replacing an epoch that
        // already collected members.
        self.epochs
            .entry(id)
            .or_insert_with(|| Arc::new(Epoch::new(id)));
        self.current_epoch_id.fetch_max(id, Ordering::SeqCst);
        trace!(epoch = id, "opened epoch");
    }

    pub fn current_epoch_id(&self) -> EpochId {
        self.current_epoch_id.load(Ordering::SeqCst)
    }

    pub fn current_epoch(&self) -> Arc<Epoch> {
        loop {
            let id = self.current_epoch_id.load(Ordering::SeqCst);
            if let Some(epoch) = self.epochs.get(&id) {
                return Arc::clone(&epoch);
            }
            // The map insert and the id store race for one instant
            // around a tick; spin until they agree.
            std::hint::spin_loop();
        }
    }

    /// Enrolls the caller in the current epoch, retrying past epochs
    /// the collector claimed in the meantime.
    pub fn join_current(&self) -> Arc<Epoch> {
        loop {
            let epoch = self.current_epoch();
            if epoch.try_join() {
                return epoch;
            }
        }
    }

    pub fn leave(&self, epoch: &Epoch) {
        epoch.leave();
    }

    /// Watermark: a lower bound on the snapshot of every live
    /// transaction. Versions with `end_cid <= watermark` are
    /// unreachable by any present or future reader.
    pub fn safe_reclaim_cid(&self) -> CommitId {
        let mut watermark = self.oracle.peek_cid();
        for entry in self.epochs.iter() {
            let epoch = entry.value();
            if !epoch.is_sealed() && epoch.ref_count() > 0 {
                watermark = watermark.min(epoch.id());
            }
        }
        watermark
    }

    /// Epochs closed for new enrollments, oldest first. Candidates for
    /// sealing; the caller still races other collectors through
    /// `try_seal`.
    pub fn closed_epochs(&self) -> Vec<Arc<Epoch>> {
        let current = self.current_epoch_id();
        let mut closed: Vec<Arc<Epoch>> = self
            .epochs
            .iter()
            .filter(|entry| entry.key() < &current)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        closed.sort_by_key(|epoch| epoch.id());
        closed
    }

    /// Destroys a sealed, drained epoch.
    pub fn erase_epoch(&self, id: EpochId) {
        if self.epochs.remove(&id).is_some() {
            debug!(epoch = id, "erased epoch");
        }
    }

    pub fn epoch_count(&self) -> usize {
        self.epochs.len()
    }
}

impl Drop for EpochManager {
    fn drop(&mut self) {
        self.stop();
    }
}
