// Executors that consume the visibility predicate.
//
// Only the executors that sit directly on the version store live here:
// sequential scan and limit. Constraint checking for the write path is
// in [`crate::engine`], which plays the role of the embedding
// executor's insert/update/delete nodes.

pub mod limit;
pub mod seq_scan;

pub use limit::LimitExecutor;
pub use seq_scan::SeqScanExecutor;
