// Engine: the single owner of the storage-engine core.
//
// There are no process-wide singletons. One `Engine` value owns the
// timestamp oracle, catalog, epoch manager, garbage collector, and
// transaction manager, and every session threads its transaction
// context through the methods here. The write-path methods double as
// the embedding executor's insert/update/delete nodes: they run
// constraint checks before any version-store mutation and then drive
// the transaction-manager contract.

use std::sync::Arc;

use tracing::info;

use crate::catalog::{Catalog, Schema, Value};
use crate::common::{TimestampOracle, TupleCoordinate, MAX_CID};
use crate::config::EngineConfig;
use crate::error::DbError;
use crate::executor::SeqScanExecutor;
use crate::gc::GcManager;
use crate::index::HashIndex;
use crate::logging::{LogSink, NoopLogSink};
use crate::storage::{DataTable, Tuple};
use crate::transaction::{EpochManager, TransactionContext, TransactionManager, TxnResult};
use crate::Result;
use std::time::Duration;

pub struct Engine {
    config: EngineConfig,
    oracle: Arc<TimestampOracle>,
    catalog: Arc<Catalog>,
    epoch_manager: Arc<EpochManager>,
    gc: Arc<GcManager>,
    txn_manager: Arc<TransactionManager>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_log_sink(config, Arc::new(NoopLogSink))
    }

    pub fn with_log_sink(config: EngineConfig, log: Arc<dyn LogSink>) -> Self {
        let oracle = Arc::new(TimestampOracle::new());
        let catalog = Arc::new(Catalog::new());
        let epoch_manager = Arc::new(EpochManager::new(
            Arc::clone(&oracle),
            Duration::from_millis(config.epoch_period_ms),
        ));
        let gc = Arc::new(GcManager::new(
            &config,
            Arc::clone(&catalog),
            Some(Arc::clone(&epoch_manager)),
        ));
        let txn_manager = Arc::new(TransactionManager::new(
            config.transaction_mode,
            Arc::clone(&oracle),
            Arc::clone(&catalog),
            Arc::clone(&epoch_manager),
            Arc::clone(&gc),
            log,
        ));
        EpochManager::start(&epoch_manager);
        gc.start();
        info!(
            mode = ?config.transaction_mode,
            gc = ?config.gc_type,
            "storage engine started"
        );
        Self {
            config,
            oracle,
            catalog,
            epoch_manager,
            gc,
            txn_manager,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    pub fn epoch_manager(&self) -> &Arc<EpochManager> {
        &self.epoch_manager
    }

    pub fn gc(&self) -> &Arc<GcManager> {
        &self.gc
    }

    pub fn oracle(&self) -> &Arc<TimestampOracle> {
        &self.oracle
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<DataTable>> {
        self.catalog
            .create_table(name, schema, self.config.default_tuples_per_tile_group)
    }

    /// Creates a hash index over one column and backfills it from every
    /// materialized version.
    pub fn create_index(&self, table: &str, column: &str, unique: bool) -> Result<()> {
        let table = self.catalog.table_by_name(table)?;
        let schema = table.schema();
        let column_index = schema
            .column_index(column)
            .ok_or_else(|| DbError::NotFound(format!("column {}.{}", table.name(), column)))?;
        let index = Arc::new(HashIndex::new(
            format!("{}_{}_idx", table.name(), column),
            table.id(),
            column_index,
            unique,
        ));
        for tile_group in table.tile_groups() {
            for slot in 0..tile_group.allocated_slots() as u32 {
                if let Some(tuple) = tile_group.tuple(slot) {
                    if let Some(key) = tuple.value(column_index) {
                        if !key.is_null() {
                            index.insert_entry(
                                key.clone(),
                                TupleCoordinate::new(tile_group.id(), slot),
                            );
                        }
                    }
                }
            }
        }
        table.add_index(index);
        Ok(())
    }

    pub fn begin(&self) -> TransactionContext {
        self.txn_manager.begin_transaction()
    }

    pub fn commit(&self, ctx: &mut TransactionContext) -> Result<TxnResult> {
        self.txn_manager.commit_transaction(ctx)
    }

    pub fn abort(&self, ctx: &mut TransactionContext) -> Result<TxnResult> {
        self.txn_manager.abort_transaction(ctx)
    }

    /// Inserts a tuple: constraint checks, slot acquisition (recycled
    /// first), payload write, header publication, index maintenance.
    pub fn insert(
        &self,
        ctx: &mut TransactionContext,
        table: &str,
        tuple: Tuple,
    ) -> Result<TupleCoordinate> {
        self.ensure_active(ctx)?;
        let table = self.catalog.table_by_name(table)?;
        table.schema().validate_tuple(&tuple)?;
        self.check_unique(ctx, &table, &tuple, None)?;

        let coord = table.acquire_tuple_slot(&self.catalog, &self.gc)?;
        let tile_group = self
            .catalog
            .tile_group(coord.tile_group)
            .ok_or_else(|| DbError::Storage(format!("unknown tile group for {}", coord)))?;
        tile_group.write_tuple(coord.slot, tuple.clone());
        self.txn_manager.perform_insert(ctx, coord)?;

        for index in table.indexes() {
            if let Some(key) = tuple.value(index.column()) {
                if !key.is_null() {
                    index.insert_entry(key.clone(), coord);
                }
            }
        }
        Ok(coord)
    }

    /// Reads the version at `coord` if it is visible to `ctx`.
    pub fn read(
        &self,
        ctx: &mut TransactionContext,
        coord: TupleCoordinate,
    ) -> Result<Option<Tuple>> {
        self.ensure_active(ctx)?;
        let tile_group = self
            .catalog
            .tile_group(coord.tile_group)
            .ok_or_else(|| DbError::Storage(format!("unknown tile group for {}", coord)))?;
        if !self.txn_manager.is_visible(ctx, tile_group.header(), coord.slot) {
            return Ok(None);
        }
        self.txn_manager.perform_read(ctx, coord);
        Ok(tile_group.tuple(coord.slot))
    }

    /// Updates the row whose current version lives at `coord`. Returns
    /// the coordinate of the new version.
    pub fn update(
        &self,
        ctx: &mut TransactionContext,
        table: &str,
        coord: TupleCoordinate,
        tuple: Tuple,
    ) -> Result<TupleCoordinate> {
        self.ensure_active(ctx)?;
        let table = self.catalog.table_by_name(table)?;
        table.schema().validate_tuple(&tuple)?;
        let tile_group = self
            .catalog
            .tile_group(coord.tile_group)
            .ok_or_else(|| DbError::Storage(format!("unknown tile group for {}", coord)))?;
        let header = tile_group.header();

        if self.txn_manager.is_owner(ctx, header, coord.slot) {
            if header.begin_cid(coord.slot) != MAX_CID {
                return Err(DbError::InvalidOperation(format!(
                    "version at {} already superseded by this transaction",
                    coord
                )));
            }
            // Own pending version: rewrite in place, fixing up indexes.
            self.check_unique(ctx, &table, &tuple, Some(coord))?;
            if let Some(old_tuple) = tile_group.tuple(coord.slot) {
                for index in table.indexes() {
                    if let Some(old_key) = old_tuple.value(index.column()) {
                        if !old_key.is_null() {
                            index.delete_entry(old_key, coord);
                        }
                    }
                }
            }
            tile_group.write_tuple(coord.slot, tuple.clone());
            self.txn_manager.perform_update_in_place(ctx, coord)?;
            for index in table.indexes() {
                if let Some(key) = tuple.value(index.column()) {
                    if !key.is_null() {
                        index.insert_entry(key.clone(), coord);
                    }
                }
            }
            return Ok(coord);
        }

        if !self.txn_manager.acquire_ownership(ctx, coord) {
            return Err(DbError::OwnershipConflict(format!(
                "write-write conflict on {}",
                coord
            )));
        }
        // The old version is locked now, so a duplicate probe cannot
        // see it through the dirty overload.
        if let Err(violation) = self.check_unique(ctx, &table, &tuple, None) {
            header.unlock_slot(coord.slot, ctx.txn_id());
            return Err(violation);
        }

        let new_coord = table.acquire_tuple_slot(&self.catalog, &self.gc)?;
        let new_tile_group = self
            .catalog
            .tile_group(new_coord.tile_group)
            .ok_or_else(|| DbError::Storage(format!("unknown tile group for {}", new_coord)))?;
        new_tile_group.write_tuple(new_coord.slot, tuple.clone());
        self.txn_manager.perform_update(ctx, coord, new_coord)?;

        for index in table.indexes() {
            if let Some(key) = tuple.value(index.column()) {
                if !key.is_null() {
                    index.insert_entry(key.clone(), new_coord);
                }
            }
        }
        Ok(new_coord)
    }

    /// Deletes the row whose current version lives at `coord`. Returns
    /// the coordinate of the tombstone version.
    pub fn delete(
        &self,
        ctx: &mut TransactionContext,
        table: &str,
        coord: TupleCoordinate,
    ) -> Result<TupleCoordinate> {
        self.ensure_active(ctx)?;
        let table = self.catalog.table_by_name(table)?;
        let tile_group = self
            .catalog
            .tile_group(coord.tile_group)
            .ok_or_else(|| DbError::Storage(format!("unknown tile group for {}", coord)))?;
        let header = tile_group.header();

        if self.txn_manager.is_owner(ctx, header, coord.slot)
            && header.begin_cid(coord.slot) == MAX_CID
        {
            // Deleting a version this transaction created.
            self.txn_manager.perform_delete_in_place(ctx, coord)?;
            return Ok(coord);
        }

        if !self.txn_manager.acquire_ownership(ctx, coord) {
            return Err(DbError::OwnershipConflict(format!(
                "write-write conflict on {}",
                coord
            )));
        }
        let new_coord = table.acquire_tuple_slot(&self.catalog, &self.gc)?;
        self.txn_manager.perform_delete(ctx, coord, new_coord)?;
        Ok(new_coord)
    }

    /// Full-table scan of the versions visible to `ctx`.
    pub fn scan(
        &self,
        ctx: &mut TransactionContext,
        table: &str,
    ) -> Result<Vec<(TupleCoordinate, Tuple)>> {
        self.ensure_active(ctx)?;
        let table = self.catalog.table_by_name(table)?;
        SeqScanExecutor::new(table).execute(&self.txn_manager, ctx)
    }

    pub fn shutdown(&self) {
        self.gc.stop();
        self.epoch_manager.stop();
        info!("storage engine stopped");
    }

    fn ensure_active(&self, ctx: &TransactionContext) -> Result<()> {
        if ctx.is_active() {
            Ok(())
        } else {
            Err(DbError::InvalidOperation(format!(
                "transaction {} is not active (result {:?})",
                ctx.txn_id(),
                ctx.result()
            )))
        }
    }

    /// Uniqueness probe over every unique index of `table`, using the
    /// dirty visibility overload so concurrent uncommitted inserts of
    /// the same key conflict conservatively. `exclude` names the
    /// version being rewritten in place, which must not conflict with
    /// itself.
    fn check_unique(
        &self,
        ctx: &TransactionContext,
        table: &Arc<DataTable>,
        tuple: &Tuple,
        exclude: Option<TupleCoordinate>,
    ) -> Result<()> {
        for index in table.indexes() {
            if !index.is_unique() {
                continue;
            }
            let Some(key) = tuple.value(index.column()) else {
                continue;
            };
            if key.is_null() {
                continue;
            }
            for candidate in index.scan_key(key) {
                if Some(candidate) == exclude {
                    continue;
                }
                let Some(tile_group) = self.catalog.tile_group(candidate.tile_group) else {
                    continue;
                };
                if self
                    .txn_manager
                    .is_visible_or_dirty(ctx, tile_group.header(), candidate.slot)
                {
                    return Err(DbError::ConstraintViolation(format!(
                        "duplicate key {} for index {}",
                        key_display(key),
                        index.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn key_display(key: &Value) -> String {
    match key {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Boolean(v) => v.to_string(),
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
