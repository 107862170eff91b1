//! Synthetic load against a pool
//!
//! Each worker loops until the deadline (or a stop signal), picking a read,
//! a write or a two-statement transaction at random and running it through
//! the pool's scoped helpers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tidepool_connection::ConnectionPool;
use tidepool_core::{TidepoolError, Value};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Shape of the generated load
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub workers: usize,
    pub duration: Duration,
    pub acquire_timeout: Duration,
    /// Share of operations that are single writes
    pub write_ratio: f64,
    /// Share of operations that are transactions
    pub transaction_ratio: f64,
    /// Pause between operations on one worker
    pub think_time: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            duration: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(2),
            write_ratio: 0.3,
            transaction_ratio: 0.1,
            think_time: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Read,
    Write,
    Transaction,
}

impl WorkloadConfig {
    fn pick(&self) -> Operation {
        let roll: f64 = rand::thread_rng().r#gen();
        if roll < self.transaction_ratio {
            Operation::Transaction
        } else if roll < self.transaction_ratio + self.write_ratio {
            Operation::Write
        } else {
            Operation::Read
        }
    }
}

/// Outcome counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadSummary {
    pub operations: u64,
    pub reads: u64,
    pub writes: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub failures: u64,
    pub acquire_timeouts: u64,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct Tally {
    reads: AtomicU64,
    writes: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl Tally {
    fn record(&self, op: Operation, outcome: Result<(), TidepoolError>) {
        match (op, outcome) {
            (Operation::Read, Ok(())) => self.reads.fetch_add(1, Ordering::Relaxed),
            (Operation::Write, Ok(())) => self.writes.fetch_add(1, Ordering::Relaxed),
            (Operation::Transaction, Ok(())) => self.committed.fetch_add(1, Ordering::Relaxed),
            (_, Err(e)) if e.is_timeout() => self.timeouts.fetch_add(1, Ordering::Relaxed),
            (Operation::Transaction, Err(_)) => self.rolled_back.fetch_add(1, Ordering::Relaxed),
            (_, Err(_)) => self.failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn summary(&self, elapsed: Duration) -> WorkloadSummary {
        let reads = self.reads.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let committed = self.committed.load(Ordering::Relaxed);
        let rolled_back = self.rolled_back.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let timeouts = self.timeouts.load(Ordering::Relaxed);
        WorkloadSummary {
            operations: reads + writes + committed + rolled_back + failures + timeouts,
            reads,
            writes,
            transactions_committed: committed,
            transactions_rolled_back: rolled_back,
            failures,
            acquire_timeouts: timeouts,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

async fn run_one(pool: &ConnectionPool, op: Operation, timeout: Duration) -> Result<(), TidepoolError> {
    let sku = rand::thread_rng().gen_range(1..=1_000i64);
    match op {
        Operation::Read => pool
            .execute(
                "SELECT qty FROM stock WHERE sku = ?",
                &[Value::from(sku)],
                timeout,
            )
            .await
            .map(|_| ()),
        Operation::Write => pool
            .execute_statement(
                "UPDATE stock SET seen_at = NOW() WHERE sku = ?",
                &[Value::from(sku)],
                timeout,
            )
            .await
            .map(|_| ()),
        Operation::Transaction => {
            pool.transaction(timeout, move |conn| {
                Box::pin(async move {
                    conn.execute(
                        "UPDATE stock SET qty = qty - 1 WHERE sku = ?",
                        &[Value::from(sku)],
                    )
                    .await?;
                    conn.execute("INSERT INTO orders (sku) VALUES (?)", &[Value::from(sku)])
                        .await?;
                    Ok::<(), TidepoolError>(())
                })
            })
            .await
        }
    }
}

/// Drive `config.workers` concurrent workers until the deadline passes or
/// `stop` flips to true.
#[tracing::instrument(skip_all, fields(workers = config.workers, duration_ms = config.duration.as_millis() as u64))]
pub async fn run(
    pool: Arc<ConnectionPool>,
    config: &WorkloadConfig,
    stop: watch::Receiver<bool>,
) -> WorkloadSummary {
    let started = Instant::now();
    let deadline = started + config.duration;
    let tally = Arc::new(Tally::default());
    let mut workers = JoinSet::new();

    for worker in 0..config.workers {
        let pool = pool.clone();
        let tally = tally.clone();
        let config = config.clone();
        let stop = stop.clone();
        workers.spawn(async move {
            while Instant::now() < deadline && !*stop.borrow() {
                let op = config.pick();
                let outcome = run_one(&pool, op, config.acquire_timeout).await;
                if let Err(e) = &outcome {
                    tracing::debug!(worker, ?op, error = %e, "operation failed");
                }
                tally.record(op, outcome);
                if !config.think_time.is_zero() {
                    tokio::time::sleep(config.think_time).await;
                }
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "worker task panicked");
        }
    }

    let summary = tally.summary(started.elapsed());
    tracing::info!(
        operations = summary.operations,
        failures = summary.failures,
        timeouts = summary.acquire_timeouts,
        "workload finished"
    );
    summary
}
