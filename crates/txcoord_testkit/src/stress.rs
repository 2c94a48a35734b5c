//! Stress testing utilities.
//!
//! Runs many transactions on many threads against one manager to check that
//! thread associations never leak between threads.

use crate::fixtures::CallLog;
use crate::resources::ScriptedResource;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use txcoord_core::{Status, TransactionManager};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Transactions that ended as expected.
    pub successful_ops: usize,
    /// Transactions that did not.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Transactions per thread.
    pub transactions_per_thread: usize,
    /// Resources enlisted per transaction.
    pub resources_per_transaction: usize,
    /// Every n-th transaction rolls back instead of committing; 0 never.
    pub rollback_every: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            transactions_per_thread: 50,
            resources_per_transaction: 2,
            rollback_every: 5,
        }
    }
}

/// Runs `config.threads` workers, each beginning, enlisting and completing
/// transactions in a loop.
///
/// A transaction counts as successful if the thread saw only its own
/// transaction and the final status matches the requested outcome.
pub fn run_concurrent_transactions(
    tm: &Arc<TransactionManager>,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|worker| {
            let tm = Arc::clone(tm);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();
            thread::spawn(move || {
                let log = CallLog::new();
                for i in 0..config.transactions_per_thread {
                    let ok = run_one(&tm, &log, &config, worker, i);
                    let counter = if ok { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(config.transactions_per_thread, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

fn run_one(
    tm: &TransactionManager,
    log: &CallLog,
    config: &StressConfig,
    worker: usize,
    index: usize,
) -> bool {
    let Ok(tx) = tm.begin() else {
        return false;
    };
    for r in 0..config.resources_per_transaction {
        let resource = ScriptedResource::new(&format!("w{worker}-t{index}-r{r}"), log).into_handle();
        if tx.enlist_resource(resource).is_err() {
            return false;
        }
    }

    let same = tm.transaction().is_some_and(|current| current.id() == tx.id());
    let roll_back = config.rollback_every > 0 && index % config.rollback_every == 0;
    let (result, expected) = if roll_back {
        (tm.rollback(), Status::RolledBack)
    } else {
        (tm.commit(), Status::Committed)
    };
    log.clear();

    same && result.is_ok() && tx.status() == expected && tm.status() == Status::NoTransaction
}
