// In-memory tuple representation.

use serde::{Deserialize, Serialize};

use crate::catalog::Value;

/// A row: an ordered list of values matching its table's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_access() {
        let tuple = Tuple::new(vec![Value::Integer(7), Value::Null]);
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple.value(0), Some(&Value::Integer(7)));
        assert!(tuple.value(1).unwrap().is_null());
        assert_eq!(tuple.value(2), None);
    }
}
