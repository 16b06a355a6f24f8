//! Serial plain executor over the in-memory ledger.

use crate::ledger::Contract;
use crate::state::{ChainStore, StateView, TxState};
use async_trait::async_trait;
use grouped_executor::{
    BlockHeader, BlockStateSet, ExecutionReturnSet, ExecutionStatus, ExecutorError, PlainExecutor,
    Result, Transaction,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Error recorded for transactions targeting an address with no contract.
pub const INVALID_CONTRACT_ADDRESS: &str = "Invalid contract address.";

/// Executes transactions one at a time on top of the chain store.
#[derive(Debug, Clone)]
pub struct LedgerPlainExecutor {
    store: Arc<ChainStore>,
}

impl LedgerPlainExecutor {
    pub fn new(store: Arc<ChainStore>) -> Self {
        Self { store }
    }

    fn execute_one(
        &self,
        tx: &Transaction,
        view: &StateView<'_>,
        throw_exception: bool,
    ) -> Result<ExecutionReturnSet> {
        let Some(contract) = Contract::at(tx.to) else {
            if throw_exception {
                return Err(ExecutorError::ContractNotFound(tx.to));
            }
            let mut set = ExecutionReturnSet::new(tx.id(), ExecutionStatus::Unexecutable);
            set.error = Some(INVALID_CONTRACT_ADDRESS.to_string());
            return Ok(set);
        };

        let mut state = TxState::new(view);
        let outcome = contract.invoke(tx, &mut state);
        let (reads, writes) = state.into_parts();

        let set = match outcome {
            Ok(return_value) => ExecutionReturnSet {
                transaction_id: tx.id(),
                status: ExecutionStatus::Mined,
                writes,
                reads,
                error: None,
                return_value,
            },
            Err(err) => {
                if throw_exception {
                    return Err(ExecutorError::PlainExecution(err.to_string()));
                }
                debug!(tx = %tx.id(), %err, "transaction failed");
                let mut set = ExecutionReturnSet::new(tx.id(), ExecutionStatus::Failed);
                set.reads = reads;
                set.error = Some(err.to_string());
                set
            }
        };
        Ok(set)
    }
}

#[async_trait]
impl PlainExecutor for LedgerPlainExecutor {
    async fn execute(
        &self,
        header: &BlockHeader,
        transactions: &[Transaction],
        cancel: &CancellationToken,
        throw_exception: bool,
        baseline: Option<&BlockStateSet>,
    ) -> Result<Vec<ExecutionReturnSet>> {
        trace!(height = header.height, count = transactions.len(), "begin plain execution");
        let mut view = StateView::new(&self.store, baseline);
        let mut return_sets = Vec::with_capacity(transactions.len());

        for tx in transactions {
            if cancel.is_cancelled() {
                debug!(executed = return_sets.len(), "plain execution cancelled");
                break;
            }
            let set = self.execute_one(tx, &view, throw_exception)?;
            view.apply(&set);
            return_sets.push(set);
        }

        trace!("end plain execution");
        Ok(return_sets)
    }
}
