//! Pool of reusable contract executives.

use crate::ledger::Contract;
use alloy_primitives::Address;
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use grouped_executor::{
    ChainContext, Executive, ExecutiveProvider, ExecutorError, ProbeError, ResourceDeclaration,
    Result, Transaction,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// A runtime instance of one deployed contract.
#[derive(Debug)]
pub struct ContractExecutive {
    contract: Contract,
}

#[async_trait]
impl Executive for ContractExecutive {
    async fn declare_resources(
        &mut self,
        _ctx: &ChainContext,
        transaction: &Transaction,
    ) -> std::result::Result<Option<ResourceDeclaration>, ProbeError> {
        self.contract.declare_resources(transaction)
    }
}

/// Lock-free per-contract queues of idle executives.
#[derive(Default)]
pub struct ContractExecutivePool {
    idle: DashMap<Address, SegQueue<Box<dyn Executive>>>,
    created: AtomicUsize,
    checked_out: AtomicUsize,
}

impl ContractExecutivePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executives instantiated so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Executives currently checked out.
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::Acquire)
    }

    fn pop_idle(&self, contract: Address) -> Option<Box<dyn Executive>> {
        self.idle.get(&contract).and_then(|queue| queue.pop())
    }
}

#[async_trait]
impl ExecutiveProvider for ContractExecutivePool {
    async fn checkout(&self, ctx: &ChainContext, contract: Address) -> Result<Box<dyn Executive>> {
        let deployed = Contract::at(contract).ok_or(ExecutorError::ContractNotFound(contract))?;

        let executive = match self.pop_idle(contract) {
            Some(executive) => executive,
            None => {
                self.created.fetch_add(1, Ordering::AcqRel);
                trace!(%contract, %ctx, "instantiating contract executive");
                Box::new(ContractExecutive { contract: deployed })
            }
        };
        self.checked_out.fetch_add(1, Ordering::AcqRel);
        Ok(executive)
    }

    fn put_back(&self, contract: Address, executive: Box<dyn Executive>) {
        self.checked_out.fetch_sub(1, Ordering::AcqRel);
        self.idle.entry(contract).or_default().push(executive);
    }
}
