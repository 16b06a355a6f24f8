//! Sequential block executor.
//!
//! The baseline strategy: every block is handed to the plain executor as a
//! whole, in order, and committed.

use super::{ExecutionResult, Executor, LedgerPlainExecutor};
use crate::state::ChainStore;
use crate::Workload;
use async_trait::async_trait;
use grouped_executor::{PlainExecutor, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executor that processes every transaction serially, in block order.
///
/// # Example
///
/// ```ignore
/// use grouping_bench::{Executor, SequentialExecutor, Workload, WorkloadConfig};
///
/// let workload = Workload::generate(WorkloadConfig::default());
/// let store = Arc::new(workload.create_store());
///
/// let result = SequentialExecutor::new().execute(store, &workload).await?;
/// println!("Successful: {}, Failed: {}", result.successful, result.failed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for SequentialExecutor {
    async fn execute(&self, store: Arc<ChainStore>, workload: &Workload) -> Result<ExecutionResult> {
        let plain = LedgerPlainExecutor::new(store.clone());
        let cancel = CancellationToken::new();
        let mut result = ExecutionResult::default();

        for (index, block) in workload.blocks.iter().enumerate() {
            let header = store.next_header(index as u64);
            let return_sets = plain.execute(&header, block, &cancel, false, None).await?;
            store.commit(&header, block, &return_sets);
            result.record_block(&return_sets);
        }

        Ok(result)
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
