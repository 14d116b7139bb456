// Catalog: schemas, values, and the table / tile-group registries.
//
// The catalog is the engine's name service. It owns the id generators
// for tables and tile groups and maps both id spaces to their live
// objects, so any component holding a `TupleCoordinate` can resolve it
// without a back-pointer. Schema-level constraints (NOT NULL) are
// checked by the insert/update path before any version-store mutation.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::common::{TableId, TileGroupId};
use crate::error::DbError;
use crate::storage::{DataTable, TileGroup, Tuple};
use crate::Result;

/// Supported data types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

/// A single cell value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Float),
            Value::Text(_) => Some(DataType::Text),
            Value::Boolean(_) => Some(DataType::Boolean),
        }
    }
}

// Values are index keys, so they need total equality. Floats compare
// bitwise here; NaN equals NaN, which is what a hash bucket wants.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Boolean(v) => v.hash(state),
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Table schema: an ordered list of columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Checks arity, types, and NOT NULL constraints for a tuple about
    /// to be inserted. Runs before any version-store mutation.
    pub fn validate_tuple(&self, tuple: &Tuple) -> Result<()> {
        if tuple.len() != self.columns.len() {
            return Err(DbError::ConstraintViolation(format!(
                "tuple has {} values, schema has {} columns",
                tuple.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(tuple.values()) {
            if value.is_null() {
                if !column.nullable {
                    return Err(DbError::ConstraintViolation(format!(
                        "NOT NULL constraint on column '{}'",
                        column.name
                    )));
                }
                continue;
            }
            if let Some(dt) = value.data_type() {
                if dt != column.data_type {
                    return Err(DbError::ConstraintViolation(format!(
                        "type mismatch on column '{}': expected {:?}, got {:?}",
                        column.name, column.data_type, dt
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Catalog: owns table and tile-group registries and their id spaces.
pub struct Catalog {
    tables: DashMap<TableId, Arc<DataTable>>,
    table_names: DashMap<String, TableId>,
    tile_groups: DashMap<TileGroupId, Arc<TileGroup>>,
    next_table_id: AtomicU32,
    next_tile_group_id: AtomicU32,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            table_names: DashMap::new(),
            tile_groups: DashMap::new(),
            next_table_id: AtomicU32::new(1),
            next_tile_group_id: AtomicU32::new(1),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
        tuples_per_tile_group: usize,
    ) -> Result<Arc<DataTable>> {
        let name = name.into();
        if self.table_names.contains_key(&name) {
            return Err(DbError::AlreadyExists(format!("table {}", name)));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let table = Arc::new(DataTable::new(
            table_id,
            name.clone(),
            schema,
            tuples_per_tile_group,
        ));
        table.add_tile_group(self);
        self.tables.insert(table_id, Arc::clone(&table));
        self.table_names.insert(name, table_id);
        Ok(table)
    }

    pub fn table(&self, id: TableId) -> Option<Arc<DataTable>> {
        self.tables.get(&id).map(|t| Arc::clone(&t))
    }

    pub fn table_by_name(&self, name: &str) -> Result<Arc<DataTable>> {
        let id = self
            .table_names
            .get(name)
            .map(|id| *id)
            .ok_or_else(|| DbError::NotFound(format!("table {}", name)))?;
        self.table(id)
            .ok_or_else(|| DbError::NotFound(format!("table {}", name)))
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let (_, id) = self
            .table_names
            .remove(name)
            .ok_or_else(|| DbError::NotFound(format!("table {}", name)))?;
        if let Some((_, table)) = self.tables.remove(&id) {
            for tile_group in table.tile_group_ids() {
                self.tile_groups.remove(&tile_group);
            }
        }
        Ok(())
    }

    pub fn next_tile_group_id(&self) -> TileGroupId {
        self.next_tile_group_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register_tile_group(&self, tile_group: Arc<TileGroup>) {
        self.tile_groups.insert(tile_group.id(), tile_group);
    }

    pub fn tile_group(&self, id: TileGroupId) -> Option<Arc<TileGroup>> {
        self.tile_groups.get(&id).map(|tg| Arc::clone(&tg))
    }

    /// ALTER TABLE ... SET NOT NULL. Only future inserts and updates
    /// observe the tightened constraint.
    pub fn add_not_null(&self, table: &str, column: &str) -> Result<()> {
        self.set_column_nullable(table, column, false)
    }

    /// ALTER TABLE ... DROP NOT NULL. Relaxing a constraint never
    /// invalidates in-flight transactions.
    pub fn drop_not_null(&self, table: &str, column: &str) -> Result<()> {
        self.set_column_nullable(table, column, true)
    }

    fn set_column_nullable(&self, table: &str, column: &str, nullable: bool) -> Result<()> {
        let table = self.table_by_name(table)?;
        table.set_column_nullable(column, nullable)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("name", DataType::Text),
        ])
    }

    #[test]
    fn test_create_and_lookup_table() {
        let catalog = Catalog::new();
        let table = catalog.create_table("users", sample_schema(), 16).unwrap();
        assert_eq!(catalog.table_by_name("users").unwrap().id(), table.id());
        assert!(catalog.create_table("users", sample_schema(), 16).is_err());
    }

    #[test]
    fn test_validate_not_null() {
        let schema = sample_schema();
        let bad = Tuple::new(vec![Value::Null, Value::Text("bob".into())]);
        let err = schema.validate_tuple(&bad).unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));

        let ok = Tuple::new(vec![Value::Integer(1), Value::Null]);
        assert!(schema.validate_tuple(&ok).is_ok());
    }

    #[test]
    fn test_validate_type_mismatch() {
        let schema = sample_schema();
        let bad = Tuple::new(vec![Value::Text("oops".into()), Value::Null]);
        assert!(schema.validate_tuple(&bad).is_err());
    }

    #[test]
    fn test_drop_not_null_relaxes_check() {
        let catalog = Catalog::new();
        catalog.create_table("users", sample_schema(), 16).unwrap();
        catalog.drop_not_null("users", "id").unwrap();
        let table = catalog.table_by_name("users").unwrap();
        let tuple = Tuple::new(vec![Value::Null, Value::Null]);
        assert!(table.schema().validate_tuple(&tuple).is_ok());
    }

    #[test]
    fn test_value_hash_floats() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Float(1.5));
        assert!(set.contains(&Value::Float(1.5)));
        assert!(!set.contains(&Value::Float(2.5)));
    }
}
