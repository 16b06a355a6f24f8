//! Error types for grouped execution.

use alloy_primitives::Address;
use thiserror::Error;

/// Errors surfaced by the executor and its collaborators.
///
/// Transaction failures are never represented here; they are recorded in the
/// transaction's [`ExecutionReturnSet`](crate::ExecutionReturnSet).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The parallel executor records failures and cannot propagate them.
    #[error("parallel execution cannot throw on transaction failure; use the plain executor")]
    ThrowExceptionUnsupported,
    /// No contract is deployed at the requested address.
    #[error("no contract deployed at {0}")]
    ContractNotFound(Address),
    /// The plain executor failed for reasons other than a transaction outcome.
    #[error("plain execution failed: {0}")]
    PlainExecution(String),
    /// A group execution task panicked or was cancelled by the runtime.
    #[error("group execution task failed: {0}")]
    GroupTask(#[from] tokio::task::JoinError),
}

/// Failure of a contract's resource-declaration probe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("resource declaration failed: {0}")]
    Failed(String),
    #[error("malformed resource declaration input: {0}")]
    Malformed(String),
}

pub type Result<T, E = ExecutorError> = std::result::Result<T, E>;
