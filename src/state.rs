//! In-memory chain store and the tiered state view transactions execute on.

use alloy_primitives::{keccak256, Bytes, B256};
use grouped_executor::{
    BlockHeader, BlockStateSet, ExecutionReturnSet, ExecutionStatus, StateKey, StateValue,
    Transaction,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct StoreInner {
    values: BTreeMap<StateKey, Bytes>,
    height: u64,
    last_block_hash: B256,
}

/// Committed chain state.
///
/// Return sets flagged as parallel conflicts are never committed.
#[derive(Debug, Default)]
pub struct ChainStore {
    inner: RwLock<StoreInner>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a value outside of any block, e.g. genesis balances.
    pub fn insert(&self, key: impl Into<StateKey>, value: Bytes) {
        self.inner.write().values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.read().values.get(key).cloned()
    }

    pub fn height(&self) -> u64 {
        self.inner.read().height
    }

    /// Header for the next block on top of the current tip.
    pub fn next_header(&self, time: u64) -> BlockHeader {
        let inner = self.inner.read();
        BlockHeader {
            height: inner.height + 1,
            previous_block_hash: inner.last_block_hash,
            time,
        }
    }

    /// Applies a block's writes and advances the tip.
    pub fn commit(&self, header: &BlockHeader, transactions: &[Transaction], return_sets: &[ExecutionReturnSet]) {
        let mut inner = self.inner.write();
        for set in return_sets
            .iter()
            .filter(|set| set.status != ExecutionStatus::Conflict)
        {
            for (key, value) in &set.writes {
                match value {
                    StateValue::Set(bytes) => {
                        inner.values.insert(key.clone(), bytes.clone());
                    }
                    StateValue::Deleted => {
                        inner.values.remove(key);
                    }
                }
            }
        }

        let mut data = Vec::with_capacity(32 + 8 + 32 * transactions.len());
        data.extend_from_slice(header.previous_block_hash.as_slice());
        data.extend_from_slice(&header.height.to_be_bytes());
        for tx in transactions {
            data.extend_from_slice(tx.id().as_slice());
        }
        inner.last_block_hash = keccak256(&data);
        inner.height = header.height;
    }

    /// Copy of all committed values.
    pub fn snapshot(&self) -> BTreeMap<StateKey, Bytes> {
        self.inner.read().values.clone()
    }
}

/// Read path for one plain-execution call: writes of earlier transactions in
/// the call, then the caller's baseline, then the chain store.
pub struct StateView<'a> {
    store: &'a ChainStore,
    baseline: Option<&'a BlockStateSet>,
    local: BlockStateSet,
}

impl<'a> StateView<'a> {
    pub fn new(store: &'a ChainStore, baseline: Option<&'a BlockStateSet>) -> Self {
        Self {
            store,
            baseline,
            local: BlockStateSet::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let tiered = self
            .local
            .get(key)
            .or_else(|| self.baseline.and_then(|baseline| baseline.get(key)));
        match tiered {
            Some(StateValue::Set(bytes)) => Some(bytes),
            Some(StateValue::Deleted) => None,
            None => self.store.get(key),
        }
    }

    /// Makes a finished transaction's writes visible to the next ones.
    pub fn apply(&mut self, return_set: &ExecutionReturnSet) {
        self.local.apply(return_set);
    }
}

/// State access of a single transaction, recording what it reads and writes.
pub struct TxState<'v, 'a> {
    view: &'v StateView<'a>,
    reads: BTreeSet<StateKey>,
    writes: BTreeMap<StateKey, StateValue>,
}

impl<'v, 'a> TxState<'v, 'a> {
    pub fn new(view: &'v StateView<'a>) -> Self {
        Self {
            view,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn read(&mut self, key: &str) -> Option<Bytes> {
        self.reads.insert(key.to_string());
        match self.writes.get(key) {
            Some(StateValue::Set(bytes)) => Some(bytes.clone()),
            Some(StateValue::Deleted) => None,
            None => self.view.get(key),
        }
    }

    pub fn write(&mut self, key: impl Into<StateKey>, value: Bytes) {
        self.writes.insert(key.into(), StateValue::Set(value));
    }

    pub fn delete(&mut self, key: impl Into<StateKey>) {
        self.writes.insert(key.into(), StateValue::Deleted);
    }

    pub fn into_parts(self) -> (BTreeSet<StateKey>, BTreeMap<StateKey, StateValue>) {
        (self.reads, self.writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn set(key: &str, value: &'static [u8]) -> ExecutionReturnSet {
        let mut set = ExecutionReturnSet::new(B256::ZERO, ExecutionStatus::Mined);
        set.writes.insert(key.to_string(), StateValue::Set(Bytes::from_static(value)));
        set
    }

    #[test]
    fn test_view_tiers() {
        let store = ChainStore::new();
        store.insert("a", Bytes::from_static(b"store"));
        store.insert("b", Bytes::from_static(b"store"));
        store.insert("c", Bytes::from_static(b"store"));

        let mut baseline = BlockStateSet::default();
        baseline.changes.insert("b".into(), Bytes::from_static(b"baseline"));
        baseline.deletes.insert("c".into());

        let mut view = StateView::new(&store, Some(&baseline));
        view.apply(&set("a", b"local"));

        assert_eq!(view.get("a"), Some(Bytes::from_static(b"local")));
        assert_eq!(view.get("b"), Some(Bytes::from_static(b"baseline")));
        assert_eq!(view.get("c"), None);
        assert_eq!(view.get("d"), None);
    }

    #[test]
    fn test_tx_state_records_reads_and_sees_own_writes() {
        let store = ChainStore::new();
        let view = StateView::new(&store, None);
        let mut tx = TxState::new(&view);

        assert_eq!(tx.read("x"), None);
        tx.write("x", Bytes::from_static(b"1"));
        assert_eq!(tx.read("x"), Some(Bytes::from_static(b"1")));
        tx.delete("y");

        let (reads, writes) = tx.into_parts();
        assert_eq!(reads, BTreeSet::from(["x".to_string()]));
        assert_eq!(writes.get("y"), Some(&StateValue::Deleted));
    }

    #[test]
    fn test_commit_skips_conflicts_and_advances_tip() {
        let store = ChainStore::new();
        let header = store.next_header(0);
        assert_eq!(header.height, 1);

        let mut charged = set("b", b"2");
        charged.status = ExecutionStatus::Failed;
        let mut conflict = set("c", b"3");
        conflict.status = ExecutionStatus::Conflict;
        let tx = Transaction::new(Address::ZERO, Address::ZERO, "Noop", Bytes::new(), 0);
        store.commit(&header, &[tx], &[set("a", b"1"), charged, conflict]);

        assert_eq!(store.get("a"), Some(Bytes::from_static(b"1")));
        assert_eq!(store.get("b"), Some(Bytes::from_static(b"2")));
        assert_eq!(store.get("c"), None);
        assert_eq!(store.height(), 1);
        assert_ne!(store.next_header(0).previous_block_hash, B256::ZERO);
    }
}
