//! Grouped parallel block executor.
//!
//! Wires the in-memory ledger collaborators into the `grouped-executor`
//! crate and executes the workload block by block.

use super::{ExecutionResult, Executor, LedgerPlainExecutor};
use crate::pool::ContractExecutivePool;
use crate::state::ChainStore;
use crate::Workload;
use async_trait::async_trait;
use grouped_executor::{
    GroupingOptions, InMemoryResourceCache, ParallelExecutor, ResourceExtractionService,
    ResourceGrouper, Result, TxnId,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Executor that groups each block by declared resources and runs the groups
/// concurrently.
#[derive(Debug, Clone, Default)]
pub struct GroupedExecutor {
    pub options: GroupingOptions,
    /// Keep resource declarations in an in-memory cache, warmed before each block.
    pub cache_declarations: bool,
}

impl GroupedExecutor {
    pub fn new(options: GroupingOptions) -> Self {
        Self {
            options,
            cache_declarations: false,
        }
    }

    pub fn with_declaration_cache(mut self) -> Self {
        self.cache_declarations = true;
        self
    }
}

#[async_trait]
impl Executor for GroupedExecutor {
    async fn execute(&self, store: Arc<ChainStore>, workload: &Workload) -> Result<ExecutionResult> {
        let pool = Arc::new(ContractExecutivePool::new());
        let mut extractor = ResourceExtractionService::new(pool.clone());
        if self.cache_declarations {
            extractor = extractor.with_cache(Arc::new(InMemoryResourceCache::new()));
        }
        let extractor = Arc::new(extractor);

        let grouper = ResourceGrouper::new(extractor.clone(), self.options.clone());
        let plain = LedgerPlainExecutor::new(store.clone());
        let executor = ParallelExecutor::new(Arc::new(grouper), Arc::new(plain))
            .with_conflict_listener(extractor.clone());

        let cancel = CancellationToken::new();
        let mut result = ExecutionResult::default();

        for (index, block) in workload.blocks.iter().enumerate() {
            let header = store.next_header(index as u64);
            if self.cache_declarations {
                extractor.resources_needed(&header.chain_context(), block).await;
            }

            let return_sets = executor
                .execute(&header, block.clone(), &cancel, false, None)
                .await?;
            store.commit(&header, block, &return_sets);

            let packed: Vec<TxnId> = block.iter().map(|tx| tx.id()).collect();
            extractor.resources_no_longer_needed(&packed);
            result.record_block(&return_sets);
        }

        debug!(
            executives = pool.created(),
            blocks = result.blocks,
            conflicts = result.conflicts,
            "grouped execution finished"
        );
        Ok(result)
    }

    fn preserves_order(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "grouped"
    }
}
