//! CLI comparing grouped parallel execution against serial execution.

use clap::Parser;
use grouped_executor::GroupingOptions;
use grouping_bench::{ExecutionResult, Executor, GroupedExecutor, SequentialExecutor, Workload, WorkloadConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Benchmark grouped parallel execution against serial execution")]
struct Args {
    /// Number of funded accounts.
    #[arg(long, default_value_t = 1000)]
    accounts: usize,
    /// Number of transactions per run.
    #[arg(long, default_value_t = 1000)]
    transactions: usize,
    /// Maximum transactions per block.
    #[arg(long, default_value_t = 500)]
    block_size: usize,
    /// Conflict factors to run, 0.0 to 1.0.
    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.25, 0.5, 0.75, 1.0])]
    conflict_factors: Vec<f64>,
    /// Share of transactions without resource declarations.
    #[arg(long, default_value_t = 0.05)]
    undeclared_factor: f64,
    /// Share of transactions declared non-parallelizable.
    #[arg(long, default_value_t = 0.02)]
    non_parallel_factor: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Resource extraction budget per block, in milliseconds.
    #[arg(long, default_value_t = 500)]
    time_budget_ms: u64,
    /// Only consider this many leading transactions of a block for grouping.
    #[arg(long)]
    max_transactions: Option<usize>,
    /// Cap on parallel groups per block; defaults to the available cores.
    #[arg(long)]
    max_groups: Option<usize>,
    /// Cache resource declarations across the run.
    #[arg(long)]
    cache: bool,
}

#[tokio::main]
async fn main() -> grouped_executor::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let max_groups = args
        .max_groups
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()));

    let mut grouped = GroupedExecutor::new(GroupingOptions {
        time_budget: Duration::from_millis(args.time_budget_ms),
        max_transactions: args.max_transactions,
        max_groups,
    });
    if args.cache {
        grouped = grouped.with_declaration_cache();
    }

    println!("=== Grouped Execution Benchmark ===\n");
    println!(
        "Configuration: {} accounts, {} transactions per run, {} per block, max {} groups\n",
        args.accounts,
        args.transactions,
        args.block_size,
        max_groups.map_or("unbounded".to_string(), |n| n.to_string()),
    );

    let mut mismatches = 0;
    for &conflict_factor in &args.conflict_factors {
        let config = WorkloadConfig {
            num_accounts: args.accounts,
            num_transactions: args.transactions,
            transactions_per_block: args.block_size,
            conflict_factor,
            undeclared_factor: args.undeclared_factor,
            non_parallel_factor: args.non_parallel_factor,
            seed: args.seed,
        };
        let workload = Workload::generate(config);
        let name = format!("{:.0}% conflicts", conflict_factor * 100.0);

        let (sequential_store, sequential) = run(&SequentialExecutor::new(), &workload, &name).await?;
        let (grouped_store, _) = run(&grouped, &workload, &name).await?;

        if grouped_store.snapshot() != sequential_store.snapshot() {
            mismatches += 1;
            error!(%name, "grouped execution diverged from sequential execution");
        } else {
            info!(%name, successful = sequential.successful, "final states match");
        }
    }

    if mismatches > 0 {
        println!("\n{mismatches} run(s) diverged from sequential execution");
        std::process::exit(1);
    }
    println!("\nAll runs match sequential execution.");
    Ok(())
}

async fn run(
    executor: &dyn Executor,
    workload: &Workload,
    name: &str,
) -> grouped_executor::Result<(Arc<grouping_bench::ChainStore>, ExecutionResult)> {
    let store = Arc::new(workload.create_store());

    let start = Instant::now();
    let result = executor.execute(store.clone(), workload).await?;
    let elapsed = start.elapsed();

    let tps = result.total() as f64 / elapsed.as_secs_f64();
    println!(
        "{:15} | {:10} | {:5} successful | {:4} failed | {:4} conflicts | {:8.2} ms | {:8.0} tx/s",
        name,
        executor.name(),
        result.successful,
        result.failed,
        result.conflicts,
        elapsed.as_secs_f64() * 1000.0,
        tps
    );
    Ok((store, result))
}
