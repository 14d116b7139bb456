// Secondary indexing for the storage engine core.
//
// One concrete index flavor is provided: a bucketed hash index mapping
// a single column's value to the coordinates of the versions carrying
// it. Unique indexes feed the executor's duplicate probe; the garbage
// collector unlinks dead versions through the `IndexMaintainer` seam
// so it never needs to know index internals.
//
// An index references tuples by coordinate, never by pointer, so there
// are no cycles to manage and a stale entry is always safe to skip.

use dashmap::DashMap;
use tracing::warn;

use crate::catalog::{Catalog, Value};
use crate::common::{TableId, TupleCoordinate, TupleMetadata};

/// Consumed by the garbage collector: unlink a dead version from every
/// index of its table. Must not fail; problems are logged and skipped.
pub trait IndexMaintainer: Send + Sync {
    fn delete_from_indexes(&self, table_id: TableId, metadata: &TupleMetadata);
}

/// Hash index over a single column.
pub struct HashIndex {
    name: String,
    table_id: TableId,
    column: usize,
    unique: bool,
    buckets: DashMap<Value, Vec<TupleCoordinate>>,
}

impl HashIndex {
    pub fn new(name: impl Into<String>, table_id: TableId, column: usize, unique: bool) -> Self {
        Self {
            name: name.into(),
            table_id,
            column,
            unique,
            buckets: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn insert_entry(&self, key: Value, coord: TupleCoordinate) {
        let mut bucket = self.buckets.entry(key).or_default();
        if !bucket.contains(&coord) {
            bucket.push(coord);
        }
    }

    pub fn delete_entry(&self, key: &Value, coord: TupleCoordinate) {
        let emptied = if let Some(mut bucket) = self.buckets.get_mut(key) {
            bucket.retain(|c| *c != coord);
            bucket.is_empty()
        } else {
            false
        };
        if emptied {
            self.buckets.remove_if(key, |_, bucket| bucket.is_empty());
        }
    }

    /// All coordinates filed under `key`. The caller applies the
    /// visibility predicate; the index makes no liveness claims.
    pub fn scan_key(&self, key: &Value) -> Vec<TupleCoordinate> {
        self.buckets
            .get(key)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    /// Whether any bucket still references `coord`.
    pub fn contains_coordinate(&self, coord: TupleCoordinate) -> bool {
        self.buckets.iter().any(|bucket| bucket.contains(&coord))
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }
}

impl IndexMaintainer for Catalog {
    fn delete_from_indexes(&self, table_id: TableId, metadata: &TupleMetadata) {
        let Some(table) = self.table(table_id) else {
            warn!(table_id, "index unlink for unknown table, skipping");
            return;
        };
        let indexes = table.indexes();
        if indexes.is_empty() {
            return;
        }
        let coord = metadata.coordinate();
        let Some(tile_group) = self.tile_group(coord.tile_group) else {
            warn!(%coord, "index unlink for unknown tile group, skipping");
            return;
        };
        let Some(tuple) = tile_group.tuple(coord.slot) else {
            // Payload already cleared; nothing references it anymore.
            return;
        };
        for index in indexes {
            if let Some(key) = tuple.value(index.column()) {
                index.delete_entry(key, coord);
            }
        }
    }
}
