//! Core types for grouped parallel execution.

use alloy_primitives::{keccak256, Address, Bytes, B256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Transaction index in the block (0-based).
pub type TxnIndex = usize;

/// Transaction identity (hash of the transaction contents).
pub type TxnId = B256;

/// Fully scoped state key, e.g. `<contract>/Balances/<account>`.
pub type StateKey = String;

/// An immutable transaction as selected for a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// The sender's address.
    pub from: Address,
    /// The target contract.
    pub to: Address,
    /// Contract method to invoke.
    pub method_name: String,
    /// Opaque, contract-defined parameters.
    pub params: Bytes,
    /// Sender-scoped sequence number; keeps otherwise identical calls distinct.
    pub nonce: u64,
    /// The hash identifying this transaction.
    pub tx_hash: TxnId,
}

impl Transaction {
    /// Creates a new transaction, computing its identity hash.
    pub fn new(
        from: Address,
        to: Address,
        method_name: impl Into<String>,
        params: impl Into<Bytes>,
        nonce: u64,
    ) -> Self {
        let method_name = method_name.into();
        let params = params.into();
        let tx_hash = Self::compute_tx_hash(from, to, &method_name, &params, nonce);

        Self {
            from,
            to,
            method_name,
            params,
            nonce,
            tx_hash,
        }
    }

    /// Returns the identity of this transaction.
    pub fn id(&self) -> TxnId {
        self.tx_hash
    }

    fn compute_tx_hash(
        from: Address,
        to: Address,
        method_name: &str,
        params: &[u8],
        nonce: u64,
    ) -> B256 {
        let mut data = Vec::with_capacity(20 + 20 + 8 + method_name.len() + 8 + params.len());
        data.extend_from_slice(from.as_slice());
        data.extend_from_slice(to.as_slice());
        // Length prefix so method/params boundaries cannot be shifted.
        data.extend_from_slice(&(method_name.len() as u64).to_be_bytes());
        data.extend_from_slice(method_name.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(params);
        keccak256(&data)
    }
}

/// One scoped unit of contract state a transaction may touch.
///
/// Resources are compared by exact string equality; two transactions sharing
/// any resource can never run in different parallel groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resource(String);

impl Resource {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Builds `<contract>/<part>/<part>...`, the same layout used for state keys.
    pub fn scoped(contract: Address, path: &[&str]) -> Self {
        let mut key = contract.to_string();
        for part in path {
            key.push('/');
            key.push_str(part);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_state_key(self) -> StateKey {
        self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Resource {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for Resource {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// What a contract's resource-declaration method reports for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDeclaration {
    pub resources: Vec<Resource>,
    pub non_parallelizable: bool,
}

/// Resource information for one transaction, produced once per grouping attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResourceInfo {
    pub transaction_id: TxnId,
    /// Declared resources, in declaration order.
    pub resources: Vec<Resource>,
    pub non_parallelizable: bool,
}

impl TransactionResourceInfo {
    /// Info that forces the transaction onto the serial path.
    pub fn non_parallelizable(transaction_id: TxnId) -> Self {
        Self {
            transaction_id,
            resources: Vec::new(),
            non_parallelizable: true,
        }
    }

    pub fn from_declaration(transaction_id: TxnId, declaration: ResourceDeclaration) -> Self {
        Self {
            transaction_id,
            resources: declaration.resources,
            non_parallelizable: declaration.non_parallelizable,
        }
    }

    /// True when the transaction can take part in grouping.
    pub fn is_parallelizable(&self) -> bool {
        !self.non_parallelizable && !self.resources.is_empty()
    }
}

/// Output of the grouper.
///
/// Every input transaction appears exactly once, either inside one of the
/// groups or in `non_parallelizables`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedTransactions {
    /// Resource-disjoint groups, ordered by their earliest transaction.
    /// Members keep their original relative order.
    pub parallelizables: Vec<Vec<Transaction>>,
    /// Transactions for serial execution: overflow first, then fallbacks.
    pub non_parallelizables: Vec<Transaction>,
}

impl GroupedTransactions {
    /// Total number of transactions across groups and the serial remainder.
    pub fn len(&self) -> usize {
        self.parallelizables.iter().map(Vec::len).sum::<usize>() + self.non_parallelizables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A written state value, or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Set(Bytes),
    Deleted,
}

/// Outcome of one transaction as recorded by the plain executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Executed successfully; writes are valid.
    Mined,
    /// Executed and failed; carries no writes.
    Failed,
    /// Its group overlapped an earlier group; writes were discarded.
    Conflict,
    /// Could not be executed at all (e.g. no contract at the target address).
    Unexecutable,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Mined)
    }
}

/// Per-transaction state delta produced by the plain executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReturnSet {
    pub transaction_id: TxnId,
    pub status: ExecutionStatus,
    /// State writes, keyed by state key.
    pub writes: BTreeMap<StateKey, StateValue>,
    /// State keys observed by the transaction.
    pub reads: BTreeSet<StateKey>,
    pub error: Option<String>,
    pub return_value: Bytes,
}

impl ExecutionReturnSet {
    pub fn new(transaction_id: TxnId, status: ExecutionStatus) -> Self {
        Self {
            transaction_id,
            status,
            writes: BTreeMap::new(),
            reads: BTreeSet::new(),
            error: None,
            return_value: Bytes::new(),
        }
    }

    /// Re-flags this return set as a parallel conflict and drops its writes.
    pub fn mark_conflict(&mut self) {
        self.status = ExecutionStatus::Conflict;
        self.error = Some("Parallel conflict".to_string());
        self.writes.clear();
    }
}

/// Accumulated writes visible so far in the block being assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStateSet {
    pub changes: BTreeMap<StateKey, Bytes>,
    pub deletes: BTreeSet<StateKey>,
}

impl BlockStateSet {
    /// Builds a state set by applying return sets in order.
    pub fn from_return_sets<'a>(return_sets: impl IntoIterator<Item = &'a ExecutionReturnSet>) -> Self {
        let mut state = Self::default();
        for return_set in return_sets {
            state.apply(return_set);
        }
        state
    }

    /// Applies one transaction's writes; later writes shadow earlier ones.
    pub fn apply(&mut self, return_set: &ExecutionReturnSet) {
        for (key, value) in &return_set.writes {
            match value {
                StateValue::Set(bytes) => {
                    self.deletes.remove(key);
                    self.changes.insert(key.clone(), bytes.clone());
                }
                StateValue::Deleted => {
                    self.changes.remove(key);
                    self.deletes.insert(key.clone());
                }
            }
        }
    }

    /// Looks up a key. `None` means this layer knows nothing about it.
    pub fn get(&self, key: &str) -> Option<StateValue> {
        if self.deletes.contains(key) {
            return Some(StateValue::Deleted);
        }
        self.changes.get(key).cloned().map(StateValue::Set)
    }

    /// Places `base` beneath this set: keys this set already decides on win,
    /// everything else falls through to `base`.
    pub fn layered_over(mut self, base: Option<&BlockStateSet>) -> Self {
        let Some(base) = base else {
            return self;
        };

        for (key, value) in &base.changes {
            if self.changes.contains_key(key) || self.deletes.contains(key) {
                continue;
            }
            self.changes.insert(key.clone(), value.clone());
        }
        for key in &base.deletes {
            if self.changes.contains_key(key) || self.deletes.contains(key) {
                continue;
            }
            self.deletes.insert(key.clone());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }
}

/// Header of the block being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub previous_block_hash: B256,
    /// Block timestamp in seconds.
    pub time: u64,
}

impl BlockHeader {
    /// The chain position transactions of this block execute on top of.
    pub fn chain_context(&self) -> ChainContext {
        ChainContext {
            block_hash: self.previous_block_hash,
            block_height: self.height.saturating_sub(1),
        }
    }
}

/// A point on the chain that state reads resolve against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainContext {
    pub block_hash: B256,
    pub block_height: u64,
}

impl fmt::Display for ChainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.block_height, self.block_hash)
    }
}
