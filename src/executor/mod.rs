//! Block execution strategies.
//!
//! This module provides the [`Executor`] trait and implementations for
//! executing a workload block by block, either fully serially or through the
//! grouped parallel executor.

mod grouped;
mod plain;
mod sequential;

pub use grouped::GroupedExecutor;
pub use plain::{LedgerPlainExecutor, INVALID_CONTRACT_ADDRESS};
pub use sequential::SequentialExecutor;

use crate::state::ChainStore;
use crate::Workload;
use async_trait::async_trait;
use grouped_executor::{ExecutionReturnSet, ExecutionStatus, Result};
use std::sync::Arc;

/// Result of executing a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Number of successfully executed transactions.
    pub successful: usize,
    /// Number of failed or unexecutable transactions.
    pub failed: usize,
    /// Number of transactions whose parallel group was discarded.
    pub conflicts: usize,
    /// Number of blocks executed.
    pub blocks: usize,
}

impl ExecutionResult {
    /// Counts one block's outcomes.
    pub fn record_block(&mut self, return_sets: &[ExecutionReturnSet]) {
        self.blocks += 1;
        for set in return_sets {
            match set.status {
                ExecutionStatus::Mined => self.successful += 1,
                ExecutionStatus::Conflict => self.conflicts += 1,
                ExecutionStatus::Failed | ExecutionStatus::Unexecutable => self.failed += 1,
            }
        }
    }

    /// Total number of transactions processed.
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.conflicts
    }
}

/// A strategy for executing a workload's blocks against a chain store.
///
/// Each block is executed and then committed before the next one starts.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, store: Arc<ChainStore>, workload: &Workload) -> Result<ExecutionResult>;

    /// Returns whether transactions execute in exactly the block's order.
    ///
    /// Grouped execution runs the parallel groups before the serial
    /// remainder, so it only keeps order among transactions sharing a resource.
    fn preserves_order(&self) -> bool {
        true
    }

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
