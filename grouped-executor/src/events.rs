//! Observability events published by the executor.

use crate::types::{StateKey, TxnId};
use std::collections::BTreeSet;

/// Published when a parallel group touched keys an earlier group already
/// touched. Given correct resource declarations this never happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingGroupsFound {
    /// Transactions whose results were re-flagged as conflicts.
    pub transaction_ids: Vec<TxnId>,
    /// The overlapping state keys.
    pub keys: BTreeSet<StateKey>,
}

/// Receives [`ConflictingGroupsFound`] events.
pub trait ConflictListener: Send + Sync {
    fn conflicting_groups_found(&self, event: &ConflictingGroupsFound);
}
