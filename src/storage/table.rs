// Data table: tile-group chain, allocator front, secondary indexes.
//
// The allocator front asks the garbage collector for a recycled slot
// first and only burns a fresh slot on a miss, so long-running
// workloads converge on a stable working set of pages.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::catalog::{Catalog, Schema};
use crate::common::{TableId, TileGroupId, TupleCoordinate, INVALID_TXN_ID};
use crate::error::DbError;
use crate::gc::GcManager;
use crate::index::HashIndex;
use crate::storage::TileGroup;
use crate::Result;

pub struct DataTable {
    id: TableId,
    name: String,
    schema: RwLock<Schema>,
    tuples_per_tile_group: usize,
    tile_groups: RwLock<Vec<Arc<TileGroup>>>,
    indexes: RwLock<Vec<Arc<HashIndex>>>,
}

impl DataTable {
    pub fn new(
        id: TableId,
        name: String,
        schema: Schema,
        tuples_per_tile_group: usize,
    ) -> Self {
        Self {
            id,
            name,
            schema: RwLock::new(schema),
            tuples_per_tile_group,
            tile_groups: RwLock::new(Vec::new()),
            indexes: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Schema {
        self.schema.read().clone()
    }

    pub fn set_column_nullable(&self, column: &str, nullable: bool) -> Result<()> {
        let mut schema = self.schema.write();
        let index = schema
            .column_index(column)
            .ok_or_else(|| DbError::NotFound(format!("column {}.{}", self.name, column)))?;
        schema.columns[index].nullable = nullable;
        Ok(())
    }

    /// Appends a fresh tile group and registers it with the catalog.
    pub fn add_tile_group(&self, catalog: &Catalog) -> Arc<TileGroup> {
        let tile_group = Arc::new(TileGroup::new(
            catalog.next_tile_group_id(),
            self.id,
            self.tuples_per_tile_group,
        ));
        catalog.register_tile_group(Arc::clone(&tile_group));
        self.tile_groups.write().push(Arc::clone(&tile_group));
        tile_group
    }

    pub fn tile_groups(&self) -> Vec<Arc<TileGroup>> {
        self.tile_groups.read().clone()
    }

    pub fn tile_group_ids(&self) -> Vec<TileGroupId> {
        self.tile_groups.read().iter().map(|tg| tg.id()).collect()
    }

    /// Allocator front: recycled slot first, fresh slot on miss.
    ///
    /// A recycled slot must come back with an empty header; anything
    /// else means the freelist was corrupted, in which case the slot is
    /// dropped and allocation falls back to a fresh one.
    pub fn acquire_tuple_slot(
        &self,
        catalog: &Catalog,
        gc: &GcManager,
    ) -> Result<TupleCoordinate> {
        if let Some(coord) = gc.return_free_slot(self.id) {
            match catalog.tile_group(coord.tile_group) {
                Some(tile_group)
                    if tile_group.header().owner(coord.slot) == INVALID_TXN_ID =>
                {
                    return Ok(coord);
                }
                _ => {
                    warn!(table = self.id, %coord, "recycled slot not empty, discarding");
                }
            }
        }
        loop {
            let last = self.tile_groups.read().last().cloned();
            if let Some(tile_group) = last {
                if let Some(slot) = tile_group.allocate_slot() {
                    return Ok(TupleCoordinate::new(tile_group.id(), slot));
                }
            }
            self.add_tile_group(catalog);
        }
    }

    pub fn add_index(&self, index: Arc<HashIndex>) {
        self.indexes.write().push(index);
    }

    pub fn indexes(&self) -> Vec<Arc<HashIndex>> {
        self.indexes.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::config::{EngineConfig, GcType};

    fn small_table(catalog: &Catalog, per_tile_group: usize) -> Arc<DataTable> {
        let schema = Schema::new(vec![Column::new("id", DataType::Integer)]);
        catalog
            .create_table("t", schema, per_tile_group)
            .unwrap()
    }

    #[test]
    fn test_fresh_allocation_spills_to_new_tile_group() {
        let catalog = Catalog::new();
        let gc = GcManager::disabled();
        let table = small_table(&catalog, 2);

        let a = table.acquire_tuple_slot(&catalog, &gc).unwrap();
        let b = table.acquire_tuple_slot(&catalog, &gc).unwrap();
        let c = table.acquire_tuple_slot(&catalog, &gc).unwrap();
        assert_eq!(a.tile_group, b.tile_group);
        assert_ne!(a.tile_group, c.tile_group);
        assert_eq!(table.tile_groups().len(), 2);
        // Every handed-out coordinate resolves through the catalog.
        assert!(catalog.tile_group(c.tile_group).is_some());
    }

    #[test]
    fn test_recycled_slot_preferred() {
        let catalog = Catalog::new();
        let config = EngineConfig {
            gc_type: GcType::Off,
            ..EngineConfig::default()
        };
        let gc = GcManager::new(&config, Arc::new(Catalog::new()), None);
        let table = small_table(&catalog, 4);
        // Off GC never serves recycled slots; allocation must still work.
        let coord = table.acquire_tuple_slot(&catalog, &gc).unwrap();
        assert_eq!(coord.slot, 0);
    }
}
