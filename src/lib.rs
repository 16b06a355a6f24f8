//! Benchmarking and verification harness for grouped parallel execution.
//!
//! This crate drives the `grouped-executor` crate with an in-memory token
//! ledger, comparing grouped execution against plain serial execution.
//!
//! # Architecture
//!
//! The harness is organized around three main concepts:
//!
//! - **Workload**: A pre-generated set of accounts and blocks of transactions
//! - **Executor**: A strategy for executing blocks (sequential, grouped)
//! - **ChainStore**: The in-memory committed state both strategies write to
//!
//! # Quick Start
//!
//! ```ignore
//! use grouping_bench::{Executor, GroupedExecutor, Workload, WorkloadConfig};
//! use std::sync::Arc;
//!
//! let workload = Workload::generate(WorkloadConfig::default());
//! let store = Arc::new(workload.create_store());
//!
//! let result = GroupedExecutor::default().execute(store, &workload).await?;
//! println!("Successful: {}", result.successful);
//! ```

pub mod executor;
pub mod ledger;
pub mod pool;
pub mod state;

pub use executor::{ExecutionResult, Executor, GroupedExecutor, LedgerPlainExecutor, SequentialExecutor};
pub use state::ChainStore;

use alloy_primitives::{keccak256, Address};
use grouped_executor::Transaction;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;

/// Genesis balance of every workload account.
pub const INITIAL_BALANCE: u64 = 1_000_000_000;

/// Derives a deterministic account address from a seed.
pub fn account_address(seed: u64) -> Address {
    let hash = keccak256(seed.to_be_bytes());
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the system.
    pub num_accounts: usize,
    /// Number of transactions to generate.
    pub num_transactions: usize,
    /// Maximum number of transactions per block.
    pub transactions_per_block: usize,
    /// Conflict factor: 0.0 = no conflicts, 1.0 = all transfers touch the same two accounts.
    pub conflict_factor: f64,
    /// Share of registry calls, which declare no resources.
    pub undeclared_factor: f64,
    /// Share of mints, which are declared non-parallelizable.
    pub non_parallel_factor: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 100,
            transactions_per_block: 100,
            conflict_factor: 0.0,
            undeclared_factor: 0.0,
            non_parallel_factor: 0.0,
            seed: 42,
        }
    }
}

/// A complete benchmark workload with pre-generated accounts and blocks.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The accounts participating in this workload.
    pub accounts: Vec<Address>,
    /// Transactions split into blocks of at most `transactions_per_block`.
    pub blocks: Vec<Vec<Transaction>>,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let accounts: Vec<Address> = (0..config.num_accounts)
            .map(|i| account_address(config.seed.wrapping_add(i as u64)))
            .collect();

        // Track nonces per account for proper transaction sequencing.
        let mut nonces: HashMap<usize, u64> = HashMap::new();

        // Calculate "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (config.num_accounts as f64 - 2.0))
                .max(2.0) as usize
        } else {
            config.num_accounts
        };

        let transactions: Vec<Transaction> = (0..config.num_transactions)
            .map(|_| {
                let use_hot = rng.gen::<f64>() < config.conflict_factor;
                let range = if use_hot { hot_account_count } else { config.num_accounts };

                let from_idx = rng.gen_range(0..range);
                let mut to_idx = rng.gen_range(0..range);
                while to_idx == from_idx {
                    to_idx = rng.gen_range(0..range);
                }

                let nonce = nonces.entry(from_idx).or_insert(0);
                let from = accounts[from_idx];
                let to = accounts[to_idx];
                let kind = rng.gen::<f64>();
                let amount = rng.gen_range(1..=100);

                let tx = if kind < config.undeclared_factor {
                    ledger::register(from, &format!("account-{to_idx}"), *nonce)
                } else if kind < config.undeclared_factor + config.non_parallel_factor {
                    ledger::mint(from, to, amount, *nonce)
                } else {
                    ledger::transfer(from, to, amount, *nonce)
                };
                *nonce += 1;
                tx
            })
            .collect();

        let blocks = transactions
            .chunks(config.transactions_per_block.max(1))
            .map(<[Transaction]>::to_vec)
            .collect();

        Self {
            accounts,
            blocks,
            config,
        }
    }

    /// Iterates over all transactions, block by block.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.blocks.iter().flatten()
    }

    /// Creates a chain store with every account funded.
    pub fn create_store(&self) -> ChainStore {
        let store = ChainStore::new();
        for account in &self.accounts {
            store.insert(ledger::balance_key(*account), ledger::encode_u64(INITIAL_BALANCE));
        }
        store
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_generation() {
        // Different seeds produce different accounts.
        assert_ne!(account_address(1), account_address(2));

        // Same seed produces same account.
        assert_eq!(account_address(1), account_address(1));
    }

    #[test]
    fn test_workload_generation() {
        let config = WorkloadConfig {
            num_accounts: 10,
            num_transactions: 25,
            transactions_per_block: 10,
            seed: 123,
            ..Default::default()
        };

        let workload = Workload::generate(config);

        assert_eq!(workload.accounts.len(), 10);
        assert_eq!(workload.blocks.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert!(workload.transactions().all(|tx| tx.to == ledger::LEDGER));

        // Same seed, same transactions.
        let again = Workload::generate(workload.config.clone());
        let ids: Vec<_> = workload.transactions().map(Transaction::id).collect();
        let again_ids: Vec<_> = again.transactions().map(Transaction::id).collect();
        assert_eq!(ids, again_ids);
    }

    #[test]
    fn test_factors_select_transaction_kinds() {
        let config = WorkloadConfig {
            num_accounts: 20,
            num_transactions: 400,
            undeclared_factor: 0.25,
            non_parallel_factor: 0.25,
            ..Default::default()
        };

        let workload = Workload::generate(config);
        let registry = workload.transactions().filter(|tx| tx.to == ledger::REGISTRY).count();
        let mints = workload.transactions().filter(|tx| tx.method_name == "Mint").count();

        assert!(registry > 50 && registry < 150, "registry calls: {registry}");
        assert!(mints > 50 && mints < 150, "mints: {mints}");
    }

    #[test]
    fn test_store_funds_every_account() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 5,
            ..Default::default()
        });
        let store = workload.create_store();

        for account in &workload.accounts {
            assert_eq!(
                store.get(&ledger::balance_key(*account)),
                Some(ledger::encode_u64(INITIAL_BALANCE))
            );
        }
    }
}
