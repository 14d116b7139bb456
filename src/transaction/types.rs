// Core transaction types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operation tag recorded in a transaction's read/write set.
///
/// A coordinate carries exactly one tag; upgrades follow the lattice
/// READ -> UPDATE/DELETE and INSERT -> INS_DEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RwOperation {
    /// Version was read; re-validated at commit under the optimistic
    /// protocol.
    Read,
    /// Version was superseded by a new one created by this transaction.
    Update,
    /// Version was superseded by a tombstone.
    Delete,
    /// Version was created by this transaction.
    Insert,
    /// Version was created and deleted by this transaction; the two
    /// cancel at commit.
    InsertDelete,
}

impl RwOperation {
    /// Tags whose slots this transaction created itself (exempt from
    /// read validation).
    pub fn is_own_creation(&self) -> bool {
        matches!(self, RwOperation::Insert | RwOperation::InsertDelete)
    }
}

impl fmt::Display for RwOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RwOperation::Read => "READ",
            RwOperation::Update => "UPDATE",
            RwOperation::Delete => "DELETE",
            RwOperation::Insert => "INSERT",
            RwOperation::InsertDelete => "INS_DEL",
        };
        write!(f, "{}", tag)
    }
}

/// Outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnResult {
    /// Still executing operations.
    InProgress,
    /// Committed.
    Success,
    /// A conflict was detected (lost ownership CAS or failed
    /// validation); the transaction must abort.
    Failure,
    /// Rolled back.
    Aborted,
}

impl TxnResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnResult::Success | TxnResult::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_creation_tags() {
        assert!(RwOperation::Insert.is_own_creation());
        assert!(RwOperation::InsertDelete.is_own_creation());
        assert!(!RwOperation::Read.is_own_creation());
        assert!(!RwOperation::Update.is_own_creation());
    }

    #[test]
    fn test_terminal_results() {
        assert!(TxnResult::Success.is_terminal());
        assert!(TxnResult::Aborted.is_terminal());
        assert!(!TxnResult::InProgress.is_terminal());
        assert!(!TxnResult::Failure.is_terminal());
    }
}
