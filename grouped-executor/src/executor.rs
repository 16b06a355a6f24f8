//! Parallel execution orchestrator.
//!
//! Groups a block, runs every group concurrently through the plain executor
//! against the caller's baseline, merges the group results in group order and
//! finally runs the serial remainder on top of the merged state.

use crate::error::{ExecutorError, Result};
use crate::events::{ConflictListener, ConflictingGroupsFound};
use crate::grouper::TransactionGrouper;
use crate::types::{
    BlockHeader, BlockStateSet, ExecutionReturnSet, ExecutionStatus, StateKey, Transaction,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Executes transactions one after another, recording each outcome.
///
/// Implementations must execute in order, make every transaction observe the
/// writes of the transactions before it in the same call, and stop early once
/// `cancel` fires.
///
/// Writes carried by a returned set are folded into the state later
/// transactions observe whatever its status, so a `Failed` set may keep
/// writes such as fee charges. Only sets re-flagged as `Conflict` are dropped.
#[async_trait]
pub trait PlainExecutor: Send + Sync {
    async fn execute(
        &self,
        header: &BlockHeader,
        transactions: &[Transaction],
        cancel: &CancellationToken,
        throw_exception: bool,
        baseline: Option<&BlockStateSet>,
    ) -> Result<Vec<ExecutionReturnSet>>;
}

/// Grouped parallel executor.
pub struct ParallelExecutor {
    grouper: Arc<dyn TransactionGrouper>,
    plain: Arc<dyn PlainExecutor>,
    listeners: Vec<Arc<dyn ConflictListener>>,
}

impl ParallelExecutor {
    pub fn new(grouper: Arc<dyn TransactionGrouper>, plain: Arc<dyn PlainExecutor>) -> Self {
        Self {
            grouper,
            plain,
            listeners: Vec::new(),
        }
    }

    /// Registers a receiver for conflicting-groups events.
    pub fn with_conflict_listener(mut self, listener: Arc<dyn ConflictListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Executes a block's transactions.
    ///
    /// Returns one return set per transaction: the groups' results in group
    /// order, followed by the serial remainder's. Transaction failures are
    /// recorded in the return sets; only misuse and infrastructure failures
    /// are errors.
    pub async fn execute(
        &self,
        header: &BlockHeader,
        transactions: Vec<Transaction>,
        cancel: &CancellationToken,
        throw_exception: bool,
        baseline: Option<Arc<BlockStateSet>>,
    ) -> Result<Vec<ExecutionReturnSet>> {
        if throw_exception {
            return Err(ExecutorError::ThrowExceptionUnsupported);
        }
        trace!(height = header.height, count = transactions.len(), "begin parallel execution");

        let grouped = self.grouper.group(&header.chain_context(), transactions).await;

        let group_results = self
            .execute_groups(header, grouped.parallelizables, cancel, baseline.clone())
            .await?;
        let mut return_sets = self.merge_results(group_results);

        let updated = BlockStateSet::from_return_sets(
            return_sets
                .iter()
                .filter(|set| set.status != ExecutionStatus::Conflict),
        )
        .layered_over(baseline.as_deref());

        if !grouped.non_parallelizables.is_empty() {
            let serial = self
                .plain
                .execute(header, &grouped.non_parallelizables, cancel, false, Some(&updated))
                .await?;
            debug!(count = serial.len(), "executed serial remainder");
            return_sets.extend(serial);
        }

        trace!(count = return_sets.len(), "end parallel execution");
        Ok(return_sets)
    }

    /// Runs every group concurrently against the same baseline. Results come
    /// back in group order regardless of completion order.
    async fn execute_groups(
        &self,
        header: &BlockHeader,
        groups: Vec<Vec<Transaction>>,
        cancel: &CancellationToken,
        baseline: Option<Arc<BlockStateSet>>,
    ) -> Result<Vec<Vec<ExecutionReturnSet>>> {
        let handles = groups.into_iter().map(|group| {
            let plain = self.plain.clone();
            let header = header.clone();
            let cancel = cancel.clone();
            let baseline = baseline.clone();
            tokio::spawn(async move {
                plain
                    .execute(&header, &group, &cancel, false, baseline.as_deref())
                    .await
            })
        });

        let mut results = Vec::new();
        for joined in join_all(handles).await {
            results.push(joined??);
        }
        Ok(results)
    }

    /// Folds group results together in group order.
    ///
    /// A group that writes a key an earlier group wrote or read, or reads a
    /// key an earlier group wrote, is a conflict: its return sets are
    /// re-flagged and contribute nothing to the merged state. Discarded
    /// groups still count as earlier groups for the ones after them.
    fn merge_results(&self, group_results: Vec<Vec<ExecutionReturnSet>>) -> Vec<ExecutionReturnSet> {
        let mut written: BTreeSet<StateKey> = BTreeSet::new();
        let mut read: BTreeSet<StateKey> = BTreeSet::new();
        let mut merged = Vec::with_capacity(group_results.iter().map(Vec::len).sum());

        for mut group in group_results {
            let group_writes: BTreeSet<StateKey> = group
                .iter()
                .flat_map(|set| set.writes.keys().cloned())
                .collect();
            let group_reads: BTreeSet<StateKey> = group
                .iter()
                .flat_map(|set| set.reads.iter().cloned())
                .collect();

            let overlap: BTreeSet<StateKey> = group_writes
                .iter()
                .filter(|key| written.contains(*key) || read.contains(*key))
                .chain(group_reads.iter().filter(|key| written.contains(*key)))
                .cloned()
                .collect();

            written.extend(group_writes);
            read.extend(group_reads);
            if !overlap.is_empty() {
                for set in &mut group {
                    set.mark_conflict();
                }
                self.report_conflict(ConflictingGroupsFound {
                    transaction_ids: group.iter().map(|set| set.transaction_id).collect(),
                    keys: overlap,
                });
            }
            merged.extend(group);
        }
        merged
    }

    fn report_conflict(&self, event: ConflictingGroupsFound) {
        warn!(
            transactions = event.transaction_ids.len(),
            keys = ?event.keys,
            "conflicting parallel groups found"
        );
        for listener in &self.listeners {
            listener.conflicting_groups_found(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouper::{GroupingOptions, ResourceGrouper};
    use crate::resource::tests::{declaring_tx, tx_to, MockProvider, UNDECLARED};
    use crate::resource::ResourceExtractionService;
    use crate::types::{StateValue, TxnId};
    use alloy_primitives::{Bytes, B256};
    use parking_lot::Mutex;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Treats every params line as a counter key: reads it, then writes it
    /// incremented. `!` lines are ignored, `+key` touches `key`, `-key` only
    /// reads `key`, and `~` marks the transaction failed without dropping its
    /// writes.
    #[derive(Default)]
    struct CounterExecutor {
        calls: AtomicUsize,
        baselines: Mutex<Vec<Option<BlockStateSet>>>,
    }

    fn counter(value: Option<StateValue>) -> u64 {
        match value {
            Some(StateValue::Set(bytes)) => String::from_utf8_lossy(&bytes).parse().unwrap_or(0),
            _ => 0,
        }
    }

    #[async_trait]
    impl PlainExecutor for CounterExecutor {
        async fn execute(
            &self,
            _header: &BlockHeader,
            transactions: &[Transaction],
            cancel: &CancellationToken,
            _throw_exception: bool,
            baseline: Option<&BlockStateSet>,
        ) -> Result<Vec<ExecutionReturnSet>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.baselines.lock().push(baseline.cloned());
            let mut local = BlockStateSet::default();
            let mut return_sets = Vec::new();
            for tx in transactions {
                if cancel.is_cancelled() {
                    break;
                }
                let mut set = ExecutionReturnSet::new(tx.id(), ExecutionStatus::Mined);
                let text = String::from_utf8_lossy(&tx.params).to_string();
                for line in text.lines().filter(|line| !line.is_empty() && *line != "!") {
                    if line == "~" {
                        set.status = ExecutionStatus::Failed;
                        continue;
                    }
                    let read_only = line.starts_with('-');
                    let key = line.trim_start_matches(['+', '-']).to_string();
                    let current = local
                        .get(&key)
                        .or_else(|| baseline.and_then(|base| base.get(&key)));
                    set.reads.insert(key.clone());
                    if !read_only {
                        let next = Bytes::from((counter(current) + 1).to_string().into_bytes());
                        set.writes.insert(key, StateValue::Set(next));
                    }
                }
                local.apply(&set);
                return_sets.push(set);
            }
            Ok(return_sets)
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<ConflictingGroupsFound>>,
    }

    impl ConflictListener for RecordingListener {
        fn conflicting_groups_found(&self, event: &ConflictingGroupsFound) {
            self.events.lock().push(event.clone());
        }
    }

    fn header() -> BlockHeader {
        BlockHeader {
            height: 11,
            previous_block_hash: B256::with_last_byte(9),
            time: 0,
        }
    }

    fn executor(plain: Arc<CounterExecutor>) -> ParallelExecutor {
        let extractor = ResourceExtractionService::new(Arc::new(MockProvider::default()));
        let grouper = ResourceGrouper::new(Arc::new(extractor), GroupingOptions::default());
        ParallelExecutor::new(Arc::new(grouper), plain)
    }

    fn ids(sets: &[ExecutionReturnSet]) -> Vec<TxnId> {
        sets.iter().map(|set| set.transaction_id).collect()
    }

    fn value(set: &ExecutionReturnSet, key: &str) -> Option<u64> {
        set.writes.get(key).map(|value| counter(Some(value.clone())))
    }

    #[tokio::test]
    async fn test_throw_exception_is_rejected() {
        let plain = Arc::new(CounterExecutor::default());
        let executor = executor(plain.clone());

        let result = executor
            .execute(&header(), vec![declaring_tx(0, &["X"])], &CancellationToken::new(), true, None)
            .await;

        assert!(matches!(result, Err(ExecutorError::ThrowExceptionUnsupported)));
        assert_eq!(plain.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_groups_then_serial_remainder_in_order() {
        let plain = Arc::new(CounterExecutor::default());
        let executor = executor(plain.clone());

        let t1 = declaring_tx(1, &["X", "Y"]);
        let t2 = declaring_tx(2, &["Y", "Z"]);
        let t3 = declaring_tx(3, &["W"]);
        let t4 = tx_to(UNDECLARED, 4);

        let results = executor
            .execute(
                &header(),
                vec![t4.clone(), t1.clone(), t2.clone(), t3.clone()],
                &CancellationToken::new(),
                false,
                None,
            )
            .await
            .unwrap();

        assert_eq!(ids(&results), vec![t1.id(), t2.id(), t3.id(), t4.id()]);
        assert!(results.iter().all(|set| set.status == ExecutionStatus::Mined));
        // Two groups plus one serial call.
        assert_eq!(plain.calls.load(Ordering::SeqCst), 3);
        assert_eq!(value(&results[1], "Y"), Some(2));
    }

    #[tokio::test]
    async fn test_serial_remainder_sees_group_writes_and_caller_baseline() {
        let plain = Arc::new(CounterExecutor::default());
        let executor = executor(plain);

        let mut baseline = BlockStateSet::default();
        baseline.changes.insert("X".into(), Bytes::from_static(b"5"));
        baseline.changes.insert("Q".into(), Bytes::from_static(b"10"));

        let grouped = declaring_tx(0, &["X"]);
        let serial = declaring_tx(1, &["!", "X", "Q"]);

        let results = executor
            .execute(
                &header(),
                vec![grouped, serial],
                &CancellationToken::new(),
                false,
                Some(Arc::new(baseline)),
            )
            .await
            .unwrap();

        assert_eq!(value(&results[0], "X"), Some(6));
        assert_eq!(value(&results[1], "X"), Some(7));
        assert_eq!(value(&results[1], "Q"), Some(11));
    }

    #[tokio::test]
    async fn test_overlapping_groups_are_flagged_and_reported() {
        let plain = Arc::new(CounterExecutor::default());
        let listener = Arc::new(RecordingListener::default());
        let executor = executor(plain).with_conflict_listener(listener.clone());

        let t1 = declaring_tx(1, &["X"]);
        // Declares Y but also touches X.
        let t2 = declaring_tx(2, &["Y", "+X"]);
        let t3 = declaring_tx(3, &["!", "X", "Y"]);

        let results = executor
            .execute(
                &header(),
                vec![t1.clone(), t2.clone(), t3.clone()],
                &CancellationToken::new(),
                false,
                None,
            )
            .await
            .unwrap();

        assert_eq!(ids(&results), vec![t1.id(), t2.id(), t3.id()]);
        assert_eq!(results[0].status, ExecutionStatus::Mined);
        assert_eq!(results[1].status, ExecutionStatus::Conflict);
        assert!(results[1].writes.is_empty());

        // Only the first group's write reaches the serial remainder.
        assert_eq!(value(&results[2], "X"), Some(2));
        assert_eq!(value(&results[2], "Y"), Some(1));

        let events = listener.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_ids, vec![t2.id()]);
        assert_eq!(events[0].keys, BTreeSet::from(["X".to_string()]));
    }

    async fn execute_recording(
        transactions: Vec<Transaction>,
    ) -> (Vec<ExecutionReturnSet>, Vec<ConflictingGroupsFound>) {
        let listener = Arc::new(RecordingListener::default());
        let executor = executor(Arc::new(CounterExecutor::default()))
            .with_conflict_listener(listener.clone());
        let results = executor
            .execute(&header(), transactions, &CancellationToken::new(), false, None)
            .await
            .unwrap();
        let events = listener.events.lock().clone();
        (results, events)
    }

    fn statuses(sets: &[ExecutionReturnSet]) -> Vec<ExecutionStatus> {
        sets.iter().map(|set| set.status).collect()
    }

    fn keys(keys: &[&str]) -> BTreeSet<StateKey> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    #[tokio::test]
    async fn test_discarded_group_still_counts_for_later_groups() {
        let t1 = declaring_tx(1, &["A"]);
        let t2 = declaring_tx(2, &["B", "+A", "+C"]);
        let t3 = declaring_tx(3, &["D", "+C"]);

        let (results, events) = execute_recording(vec![t1.clone(), t2.clone(), t3.clone()]).await;

        assert_eq!(ids(&results), vec![t1.id(), t2.id(), t3.id()]);
        assert_eq!(
            statuses(&results),
            vec![ExecutionStatus::Mined, ExecutionStatus::Conflict, ExecutionStatus::Conflict]
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transaction_ids, vec![t2.id()]);
        assert_eq!(events[0].keys, keys(&["A"]));
        assert_eq!(events[1].transaction_ids, vec![t3.id()]);
        assert_eq!(events[1].keys, keys(&["C"]));
    }

    #[tokio::test]
    async fn test_write_after_earlier_read_conflicts() {
        let reader = declaring_tx(1, &["A", "-K"]);
        let writer = declaring_tx(2, &["B", "+K"]);

        let (results, events) = execute_recording(vec![reader, writer.clone()]).await;

        assert_eq!(statuses(&results), vec![ExecutionStatus::Mined, ExecutionStatus::Conflict]);
        assert!(results[1].writes.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_ids, vec![writer.id()]);
        assert_eq!(events[0].keys, keys(&["K"]));
    }

    #[tokio::test]
    async fn test_read_after_earlier_write_conflicts() {
        let writer = declaring_tx(1, &["A", "+K"]);
        let reader = declaring_tx(2, &["B", "-K"]);

        let (results, events) = execute_recording(vec![writer, reader.clone()]).await;

        assert_eq!(statuses(&results), vec![ExecutionStatus::Mined, ExecutionStatus::Conflict]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_ids, vec![reader.id()]);
        assert_eq!(events[0].keys, keys(&["K"]));
    }

    #[tokio::test]
    async fn test_shared_reads_do_not_conflict() {
        let t1 = declaring_tx(1, &["A", "-K"]);
        let t2 = declaring_tx(2, &["B", "-K"]);

        let (results, events) = execute_recording(vec![t1, t2]).await;

        assert_eq!(statuses(&results), vec![ExecutionStatus::Mined, ExecutionStatus::Mined]);
        assert!(results.iter().all(|set| set.reads.contains("K") && !set.writes.contains_key("K")));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_failed_group_writes_reach_serial_remainder() {
        let plain = Arc::new(CounterExecutor::default());
        let charged = declaring_tx(1, &["X", "~"]);
        let serial = declaring_tx(2, &["!", "X"]);
        let txs = vec![charged, serial];

        let expected = plain
            .execute(&header(), &txs, &CancellationToken::new(), false, None)
            .await
            .unwrap();
        let results = executor(plain)
            .execute(&header(), txs, &CancellationToken::new(), false, None)
            .await
            .unwrap();

        assert_eq!(results[0].status, ExecutionStatus::Failed);
        assert_eq!(value(&results[0], "X"), Some(1));
        assert_eq!(value(&results[1], "X"), Some(2));
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn test_every_group_sees_the_caller_baseline() {
        let plain = Arc::new(CounterExecutor::default());
        let executor = executor(plain.clone());

        let mut baseline = BlockStateSet::default();
        baseline.changes.insert("X".into(), Bytes::from_static(b"5"));
        baseline.changes.insert("Y".into(), Bytes::from_static(b"7"));
        let baseline = Arc::new(baseline);

        let txs = vec![
            declaring_tx(1, &["X"]),
            declaring_tx(2, &["Y"]),
            declaring_tx(3, &["Z"]),
        ];
        let results = executor
            .execute(&header(), txs, &CancellationToken::new(), false, Some(baseline.clone()))
            .await
            .unwrap();

        assert_eq!(value(&results[0], "X"), Some(6));
        assert_eq!(value(&results[1], "Y"), Some(8));
        assert_eq!(value(&results[2], "Z"), Some(1));

        let seen = plain.baselines.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|seen| seen.as_ref() == Some(baseline.as_ref())));
    }

    #[tokio::test]
    async fn test_matches_serial_execution() {
        for seed in 0..6u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let txs: Vec<_> = (0..40)
                .map(|i| {
                    let mut lines: Vec<String> = (0..rng.gen_range(1..4))
                        .map(|_| format!("k{}", rng.gen_range(0..25)))
                        .collect();
                    if rng.gen_bool(0.15) {
                        lines.insert(0, "!".to_string());
                    }
                    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
                    declaring_tx(i, &lines)
                })
                .collect();

            let plain = Arc::new(CounterExecutor::default());
            let serial = plain
                .execute(&header(), &txs, &CancellationToken::new(), false, None)
                .await
                .unwrap();
            let parallel = executor(plain)
                .execute(&header(), txs.clone(), &CancellationToken::new(), false, None)
                .await
                .unwrap();

            let serial_ids: BTreeSet<_> = ids(&serial).into_iter().collect();
            let parallel_ids: BTreeSet<_> = ids(&parallel).into_iter().collect();
            assert_eq!(parallel.len(), serial.len(), "seed {seed}");
            assert_eq!(parallel_ids, serial_ids, "seed {seed}");
            assert!(parallel.iter().all(|set| set.status == ExecutionStatus::Mined));
            assert_eq!(
                BlockStateSet::from_return_sets(&serial),
                BlockStateSet::from_return_sets(&parallel),
                "seed {seed}"
            );
        }
    }
}
