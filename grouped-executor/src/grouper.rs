//! Transaction grouping: partitions a block into resource-disjoint groups and
//! a serial remainder.
//!
//! Resource extraction runs under a cooperative time budget. If the budget
//! elapses before extraction finishes, every candidate falls back to serial
//! execution; a partial grouping is never produced.

use crate::disjoint_set::{DisjointSet, NodeId};
use crate::resource::ResourceExtractor;
use crate::types::{ChainContext, GroupedTransactions, Resource, Transaction, TxnIndex};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace, warn};

/// Default bound on the resource-extraction phase.
pub const DEFAULT_GROUPING_TIME_BUDGET: Duration = Duration::from_millis(500);

/// Configuration for grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingOptions {
    /// Time allowed for resource extraction.
    pub time_budget: Duration,
    /// Only this many leading transactions are considered for parallel
    /// execution; the rest run serially. `None` means unbounded.
    pub max_transactions: Option<usize>,
    /// Upper bound on the number of groups (typically the core count). Extra
    /// groups are merged smallest-first. `None` means unbounded.
    pub max_groups: Option<usize>,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            time_budget: DEFAULT_GROUPING_TIME_BUDGET,
            max_transactions: None,
            max_groups: None,
        }
    }
}

/// Splits a block's transactions into parallel groups and a serial remainder.
#[async_trait]
pub trait TransactionGrouper: Send + Sync {
    async fn group(&self, ctx: &ChainContext, transactions: Vec<Transaction>) -> GroupedTransactions;
}

/// Groups transactions by connected components of their declared resources.
pub struct ResourceGrouper {
    extractor: Arc<dyn ResourceExtractor>,
    options: GroupingOptions,
}

impl ResourceGrouper {
    pub fn new(extractor: Arc<dyn ResourceExtractor>, options: GroupingOptions) -> Self {
        Self { extractor, options }
    }

    pub fn options(&self) -> &GroupingOptions {
        &self.options
    }
}

#[async_trait]
impl TransactionGrouper for ResourceGrouper {
    async fn group(
        &self,
        ctx: &ChainContext,
        mut transactions: Vec<Transaction>,
    ) -> GroupedTransactions {
        trace!(count = transactions.len(), "begin grouping");

        // Overflow goes first, untouched.
        let mut non_parallelizables = match self.options.max_transactions {
            Some(max) if transactions.len() > max => transactions.split_off(max),
            _ => Vec::new(),
        };
        let overflow = non_parallelizables.len();
        if transactions.is_empty() {
            return GroupedTransactions {
                parallelizables: Vec::new(),
                non_parallelizables,
            };
        }

        let cancel = CancellationToken::new();
        let _timer = AbortOnDropHandle::new(tokio::spawn({
            let cancel = cancel.clone();
            let budget = self.options.time_budget;
            async move {
                tokio::time::sleep(budget).await;
                cancel.cancel();
            }
        }));

        let resource_infos = self.extractor.extract(ctx, transactions, &cancel).await;

        let mut candidates = Vec::with_capacity(resource_infos.len());
        for (transaction, info) in resource_infos {
            let mut resources = info.resources.into_iter();
            match resources.next() {
                Some(anchor) if !cancel.is_cancelled() && !info.non_parallelizable => {
                    candidates.push(Candidate {
                        transaction,
                        anchor,
                        others: resources.collect(),
                    });
                }
                _ => non_parallelizables.push(transaction),
            }
        }
        if cancel.is_cancelled() {
            warn!(
                budget = ?self.options.time_budget,
                "grouping time budget elapsed, executing candidates serially"
            );
        }

        let mut groups = group_candidates(candidates);
        if let Some(max_groups) = self.options.max_groups {
            groups = merge_smallest_groups(groups, max_groups);
        }

        let grouped = GroupedTransactions {
            parallelizables: groups.into_iter().map(Group::into_transactions).collect(),
            non_parallelizables,
        };
        debug!(
            groups = grouped.parallelizables.len(),
            sizes = ?grouped.parallelizables.iter().map(Vec::len).collect::<Vec<_>>(),
            serial = grouped.non_parallelizables.len(),
            overflow,
            "grouped transactions"
        );
        trace!("end grouping");
        grouped
    }
}

/// A transaction taking part in grouping, with its first declared resource
/// split out as the anchor.
struct Candidate {
    transaction: Transaction,
    anchor: Resource,
    others: Vec<Resource>,
}

/// Transactions of one connected component, tagged with their candidate index.
#[derive(Default)]
struct Group {
    members: Vec<(TxnIndex, Transaction)>,
}

impl Group {
    fn len(&self) -> usize {
        self.members.len()
    }

    /// Index of the earliest member. Members are kept in ascending order.
    fn min_index(&self) -> TxnIndex {
        self.members.first().map_or(TxnIndex::MAX, |(index, _)| *index)
    }

    fn absorb(&mut self, other: Group) {
        self.members.extend(other.members);
        self.members.sort_by_key(|(index, _)| *index);
    }

    fn into_transactions(self) -> Vec<Transaction> {
        self.members.into_iter().map(|(_, tx)| tx).collect()
    }
}

fn node_for(
    set: &mut DisjointSet,
    nodes: &mut HashMap<Resource, NodeId>,
    resource: &Resource,
) -> NodeId {
    if let Some(node) = nodes.get(resource) {
        return *node;
    }
    let node = set.make_node();
    nodes.insert(resource.clone(), node);
    node
}

/// Clusters candidates into connected components, ordered by earliest member.
fn group_candidates(candidates: Vec<Candidate>) -> Vec<Group> {
    let mut set = DisjointSet::with_capacity(candidates.len());
    let mut nodes: HashMap<Resource, NodeId> = HashMap::new();

    let mut anchors = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let anchor = node_for(&mut set, &mut nodes, &candidate.anchor);
        for resource in &candidate.others {
            let node = node_for(&mut set, &mut nodes, resource);
            set.union(anchor, node);
        }
        anchors.push(anchor);
    }

    // Walking candidates in order creates groups in order of their earliest
    // member; the map is only used for lookups.
    let mut position_by_root: HashMap<NodeId, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for (index, (candidate, anchor)) in candidates.into_iter().zip(anchors).enumerate() {
        let root = set.find(anchor);
        let position = *position_by_root.entry(root).or_insert_with(|| {
            groups.push(Group::default());
            groups.len() - 1
        });
        groups[position].members.push((index, candidate.transaction));
    }
    groups
}

/// Repeatedly merges the two smallest groups until at most `max_groups`
/// remain. Among equal sizes the group with the later earliest member counts
/// as smaller.
fn merge_smallest_groups(mut groups: Vec<Group>, max_groups: usize) -> Vec<Group> {
    let max_groups = max_groups.max(1);
    if groups.len() <= max_groups {
        return groups;
    }

    // Largest first, so the smallest sit at the tail.
    groups.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.min_index().cmp(&b.min_index()))
    });
    while groups.len() > max_groups {
        let Some(smallest) = groups.pop() else { break };
        let Some(mut merged) = groups.pop() else {
            groups.push(smallest);
            break;
        };
        merged.absorb(smallest);

        let position = groups
            .iter()
            .position(|group| {
                group.len() < merged.len()
                    || (group.len() == merged.len() && group.min_index() > merged.min_index())
            })
            .unwrap_or(groups.len());
        groups.insert(position, merged);
    }

    groups.sort_by_key(Group::min_index);
    groups
}
