//! Resource extraction: which state paths each transaction may touch.
//!
//! Every transaction is probed by calling its target contract's
//! resource-declaration method through a pooled contract executive. Probes run
//! concurrently and never fail outward: anything that goes wrong turns the
//! transaction non-parallelizable.

use crate::error::{ProbeError, Result};
use crate::events::{ConflictListener, ConflictingGroupsFound};
use crate::types::{ChainContext, ResourceDeclaration, Transaction, TransactionResourceInfo, TxnId};
use alloy_primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A contract runtime instance able to answer resource-declaration probes.
#[async_trait]
pub trait Executive: Send {
    /// Runs the contract's resource-declaration method for `transaction`.
    ///
    /// Returns `Ok(None)` when the contract does not implement the
    /// declaration interface.
    async fn declare_resources(
        &mut self,
        ctx: &ChainContext,
        transaction: &Transaction,
    ) -> Result<Option<ResourceDeclaration>, ProbeError>;
}

/// Pool of contract executives.
///
/// Every executive obtained from [`checkout`](Self::checkout) must be handed
/// back through [`put_back`](Self::put_back); use [`ExecutiveGuard`] rather than
/// calling these directly.
#[async_trait]
pub trait ExecutiveProvider: Send + Sync {
    async fn checkout(&self, ctx: &ChainContext, contract: Address) -> Result<Box<dyn Executive>>;

    fn put_back(&self, contract: Address, executive: Box<dyn Executive>);
}

/// A checked-out executive that returns itself to its pool when dropped.
pub struct ExecutiveGuard<'a> {
    provider: &'a dyn ExecutiveProvider,
    contract: Address,
    executive: Option<Box<dyn Executive>>,
}

impl<'a> ExecutiveGuard<'a> {
    pub async fn checkout(
        provider: &'a dyn ExecutiveProvider,
        ctx: &ChainContext,
        contract: Address,
    ) -> Result<ExecutiveGuard<'a>> {
        let executive = provider.checkout(ctx, contract).await?;
        Ok(Self {
            provider,
            contract,
            executive: Some(executive),
        })
    }

    pub async fn declare_resources(
        &mut self,
        ctx: &ChainContext,
        transaction: &Transaction,
    ) -> Result<Option<ResourceDeclaration>, ProbeError> {
        match self.executive.as_mut() {
            Some(executive) => executive.declare_resources(ctx, transaction).await,
            None => Err(ProbeError::Failed("executive already returned".to_string())),
        }
    }
}

impl Drop for ExecutiveGuard<'_> {
    fn drop(&mut self) {
        if let Some(executive) = self.executive.take() {
            self.provider.put_back(self.contract, executive);
        }
    }
}

/// Upstream cache of resource declarations, maintained by collaborators.
pub trait ResourceCache: Send + Sync {
    fn get(&self, transaction_id: &TxnId) -> Option<TransactionResourceInfo>;

    fn insert(&self, info: TransactionResourceInfo);

    fn evict(&self, transaction_ids: &[TxnId]);
}

/// [`ResourceCache`] backed by a concurrent hash map.
#[derive(Debug, Default)]
pub struct InMemoryResourceCache {
    entries: DashMap<TxnId, TransactionResourceInfo>,
}

impl InMemoryResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceCache for InMemoryResourceCache {
    fn get(&self, transaction_id: &TxnId) -> Option<TransactionResourceInfo> {
        self.entries.get(transaction_id).map(|entry| entry.value().clone())
    }

    fn insert(&self, info: TransactionResourceInfo) {
        self.entries.insert(info.transaction_id, info);
    }

    fn evict(&self, transaction_ids: &[TxnId]) {
        for id in transaction_ids {
            self.entries.remove(id);
        }
    }
}

/// Produces resource information for a batch of transactions.
#[async_trait]
pub trait ResourceExtractor: Send + Sync {
    /// Returns one entry per input transaction, in input order.
    ///
    /// Probes that have not started by the time `cancel` fires are skipped and
    /// reported non-parallelizable.
    async fn extract(
        &self,
        ctx: &ChainContext,
        transactions: Vec<Transaction>,
        cancel: &CancellationToken,
    ) -> Vec<(Transaction, TransactionResourceInfo)>;
}

/// Extracts resources by probing contracts through an executive pool.
pub struct ResourceExtractionService {
    provider: Arc<dyn ExecutiveProvider>,
    cache: Option<Arc<dyn ResourceCache>>,
}

impl ResourceExtractionService {
    pub fn new(provider: Arc<dyn ExecutiveProvider>) -> Self {
        Self {
            provider,
            cache: None,
        }
    }

    /// Consults and fills `cache` around every completed probe.
    pub fn with_cache(mut self, cache: Arc<dyn ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Hook: these transactions will be grouped soon; warm the cache for them.
    /// Does nothing without a cache.
    pub async fn resources_needed(&self, ctx: &ChainContext, transactions: &[Transaction]) {
        if self.cache.is_none() {
            return;
        }
        let cancel = CancellationToken::new();
        join_all(transactions.iter().map(|tx| self.probe_or_serial(ctx, tx, &cancel))).await;
    }

    /// Hook: these transactions left the pool (packed, expired or conflicting).
    pub fn resources_no_longer_needed(&self, transaction_ids: &[TxnId]) {
        if let Some(cache) = &self.cache {
            cache.evict(transaction_ids);
        }
    }

    /// Runs [`probe`](Self::probe), treating a panicking contract like a
    /// failed one.
    async fn probe_or_serial(
        &self,
        ctx: &ChainContext,
        transaction: &Transaction,
        cancel: &CancellationToken,
    ) -> TransactionResourceInfo {
        match AssertUnwindSafe(self.probe(ctx, transaction, cancel)).catch_unwind().await {
            Ok(info) => info,
            Err(_) => {
                let id = transaction.id();
                warn!(tx = %id, contract = %transaction.to, "resource probe panicked, falling back to serial");
                TransactionResourceInfo::non_parallelizable(id)
            }
        }
    }

    async fn probe(
        &self,
        ctx: &ChainContext,
        transaction: &Transaction,
        cancel: &CancellationToken,
    ) -> TransactionResourceInfo {
        let id = transaction.id();
        if cancel.is_cancelled() {
            return TransactionResourceInfo::non_parallelizable(id);
        }
        if let Some(info) = self.cache.as_ref().and_then(|cache| cache.get(&id)) {
            return info;
        }

        let mut executive =
            match ExecutiveGuard::checkout(self.provider.as_ref(), ctx, transaction.to).await {
                Ok(executive) => executive,
                Err(err) => {
                    debug!(tx = %id, %err, "executive checkout failed, falling back to serial");
                    return TransactionResourceInfo::non_parallelizable(id);
                }
            };

        let info = match executive.declare_resources(ctx, transaction).await {
            Ok(Some(declaration)) => TransactionResourceInfo::from_declaration(id, declaration),
            Ok(None) => TransactionResourceInfo::non_parallelizable(id),
            Err(err) => {
                debug!(tx = %id, %err, "resource probe failed, falling back to serial");
                return TransactionResourceInfo::non_parallelizable(id);
            }
        };
        drop(executive);

        if let Some(cache) = &self.cache {
            cache.insert(info.clone());
        }
        info
    }
}

#[async_trait]
impl ResourceExtractor for ResourceExtractionService {
    async fn extract(
        &self,
        ctx: &ChainContext,
        transactions: Vec<Transaction>,
        cancel: &CancellationToken,
    ) -> Vec<(Transaction, TransactionResourceInfo)> {
        trace!(count = transactions.len(), "begin resource extraction");
        let infos =
            join_all(transactions.iter().map(|tx| self.probe_or_serial(ctx, tx, cancel))).await;
        trace!("end resource extraction");

        transactions.into_iter().zip(infos).collect()
    }
}

impl ConflictListener for ResourceExtractionService {
    fn conflicting_groups_found(&self, event: &ConflictingGroupsFound) {
        self.resources_no_longer_needed(&event.transaction_ids);
    }
}
