//! Grouped parallel executor for blockchain transactions.
//!
//! This crate decides which transactions of a block can run concurrently,
//! runs those groups in parallel and merges their effects deterministically,
//! then runs the remaining transactions serially on top of the merged state.
//!
//! # Core Components
//!
//! - **ResourceExtractionService**: asks each target contract which state
//!   paths a transaction may touch
//! - **ResourceGrouper**: clusters transactions sharing resources with a
//!   union-find, under a time budget
//! - **ParallelExecutor**: runs groups through a [`PlainExecutor`], detects
//!   overlapping groups and executes the serial remainder
//!
//! # Algorithm Overview
//!
//! 1. Every transaction's resources are probed concurrently
//! 2. Transactions that cannot be probed, or are flagged, go to the serial list
//! 3. The rest are grouped into connected components of shared resources
//! 4. Groups execute concurrently against the same baseline state
//! 5. Group results are merged in group order; overlaps are reported
//! 6. The serial list executes against the merged state
//!
//! If the grouping budget elapses before extraction finishes, the whole batch
//! executes serially. Grouping never fails outward.
//!
//! # Example
//!
//! ```rust,ignore
//! use grouped_executor::{GroupingOptions, ParallelExecutor, ResourceExtractionService, ResourceGrouper};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let extractor = Arc::new(ResourceExtractionService::new(executive_pool));
//! let grouper = ResourceGrouper::new(extractor.clone(), GroupingOptions::default());
//! let executor = ParallelExecutor::new(Arc::new(grouper), plain_executor)
//!     .with_conflict_listener(extractor);
//!
//! let return_sets = executor
//!     .execute(&header, transactions, &CancellationToken::new(), false, None)
//!     .await?;
//! ```

pub mod disjoint_set;
pub mod error;
pub mod events;
pub mod executor;
pub mod grouper;
pub mod resource;
pub mod types;

pub use error::{ExecutorError, ProbeError, Result};
pub use events::{ConflictListener, ConflictingGroupsFound};
pub use executor::{ParallelExecutor, PlainExecutor};
pub use grouper::{GroupingOptions, ResourceGrouper, TransactionGrouper, DEFAULT_GROUPING_TIME_BUDGET};
pub use resource::{
    Executive, ExecutiveGuard, ExecutiveProvider, InMemoryResourceCache, ResourceCache,
    ResourceExtractionService, ResourceExtractor,
};
pub use types::{
    BlockHeader, BlockStateSet, ChainContext, ExecutionReturnSet, ExecutionStatus,
    GroupedTransactions, Resource, ResourceDeclaration, StateKey, StateValue, Transaction,
    TransactionResourceInfo, TxnId, TxnIndex,
};
