use grouped_executor::{ChainContext, GroupingOptions, ResourceExtractionService, ResourceGrouper, TransactionGrouper};
use grouping_bench::pool::ContractExecutivePool;
use grouping_bench::{Workload, WorkloadConfig};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = WorkloadConfig {
        num_accounts: 50_000,
        num_transactions: 10_000,
        transactions_per_block: 5_000,
        conflict_factor: 0.1,
        undeclared_factor: 0.02,
        non_parallel_factor: 0.01,
        seed: 42,
    };

    let workload = Workload::generate(config);

    let mut sender_counts: HashMap<_, usize> = HashMap::new();
    for tx in workload.transactions() {
        *sender_counts.entry(tx.from).or_insert(0) += 1;
    }

    let multi_tx_accounts = sender_counts.values().filter(|&&count| count > 1).count();

    println!("Total accounts that sent txs: {}", sender_counts.len());
    println!("Accounts that sent >1 tx: {}", multi_tx_accounts);
    println!("Max txs from one account: {}", sender_counts.values().max().copied().unwrap_or(0));

    let extractor = ResourceExtractionService::new(Arc::new(ContractExecutivePool::new()));
    let grouper = ResourceGrouper::new(Arc::new(extractor), GroupingOptions::default());

    for (index, block) in workload.blocks.iter().enumerate() {
        let ctx = ChainContext {
            block_hash: Default::default(),
            block_height: index as u64,
        };
        let grouped = grouper.group(&ctx, block.clone()).await;

        let mut hist: HashMap<usize, usize> = HashMap::new();
        for group in &grouped.parallelizables {
            *hist.entry(group.len()).or_insert(0) += 1;
        }

        println!(
            "\nBlock {}: {} groups, {} serial",
            index,
            grouped.parallelizables.len(),
            grouped.non_parallelizables.len()
        );
        println!("Group size distribution:");
        let mut hist_vec: Vec<_> = hist.into_iter().collect();
        hist_vec.sort_by_key(|(size, _)| *size);
        for (size, groups) in hist_vec {
            println!("  {} tx: {} groups", size, groups);
        }
    }
}
