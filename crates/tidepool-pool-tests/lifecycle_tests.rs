//! Lifecycle Tests
//!
//! Background maintenance on a shared pool, shutdown, and the accounting
//! invariant under concurrent load.

use std::time::Duration;

use anyhow::{Context, Result};
use pretty_assertions::assert_eq;
use tidepool_connection::{MaintenanceConfig, PoolConfig, maintenance};
use tidepool_core::TidepoolError;

use crate::fixtures::{pool, pool_with};

const SECOND: Duration = Duration::from_secs(1);

fn fast_maintenance() -> MaintenanceConfig {
    MaintenanceConfig::new(Duration::from_millis(40), Duration::from_millis(25))
}

#[tokio::test]
async fn test_maintenance_replaces_dead_connections() -> Result<()> {
    let (pool, backend) = pool(2, 6);
    pool.warm_up().await;
    for conn in backend.connections() {
        conn.kill();
    }

    let handle = maintenance::spawn(pool.clone(), fast_maintenance());
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    let stats = pool.stats();
    assert!(stats.current_size >= 2);
    assert_eq!(stats.idle + stats.leased, stats.current_size);
    assert_eq!(backend.open_sessions(), stats.current_size);
    Ok(())
}

#[tokio::test]
async fn test_maintenance_grows_busy_pool() -> Result<()> {
    let (pool, _backend) = pool(1, 10);
    let mut leases = Vec::new();
    for _ in 0..4 {
        leases.push(pool.acquire(SECOND).await?);
    }

    let handle = maintenance::spawn(pool.clone(), fast_maintenance());
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop().await;

    let stats = pool.stats();
    assert!(stats.current_size > 4, "pool did not grow: {:?}", stats);
    assert!(stats.current_size <= 10);

    for lease in &leases {
        pool.release(lease).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_maintenance_exits_after_shutdown() -> Result<()> {
    let (pool, _backend) = pool(1, 2);
    let handle = maintenance::spawn(pool.clone(), fast_maintenance());

    pool.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(handle.is_finished());
    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_idle_and_leased() -> Result<()> {
    let (pool, backend) = pool(2, 5);
    pool.warm_up().await;
    let lease = pool.acquire(SECOND).await?;

    pool.shutdown().await;

    assert!(pool.is_closed());
    assert_eq!(backend.open_sessions(), 0);
    let stats = pool.stats();
    assert_eq!(stats.current_size, 0);
    assert_eq!(stats.idle + stats.leased, 0);

    // Late release and repeated shutdown are both harmless
    pool.release(&lease).await;
    pool.shutdown().await;

    let err = pool
        .acquire(SECOND)
        .await
        .err()
        .context("closed pool must refuse")?;
    assert!(matches!(err, TidepoolError::PoolClosed));
    assert_eq!(pool.warm_up().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_releases_blocked_acquirers() -> Result<()> {
    let (pool, _backend) = pool_with(PoolConfig::new(0, 1).with_poll_interval_ms(10_000));
    let _held = pool.acquire(SECOND).await?;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    pool.shutdown().await;

    let result = tokio::time::timeout(SECOND, waiter)
        .await
        .context("waiter should wake promptly")??;
    assert!(matches!(result, Err(TidepoolError::PoolClosed)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invariants_hold_under_concurrent_load() -> Result<()> {
    let (pool, backend) = pool(2, 8);
    pool.warm_up().await;
    let handle = maintenance::spawn(pool.clone(), fast_maintenance());

    let mut workers = Vec::new();
    for worker in 0..32u64 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            let mut served = 0u64;
            for round in 0..20u64 {
                let lease = pool.acquire(Duration::from_secs(10)).await?;
                tokio::time::sleep(Duration::from_millis((worker * 7 + round) % 4)).await;
                pool.release(&lease).await;
                served += 1;

                let stats = pool.stats();
                assert!(stats.current_size <= 8, "over max_size: {:?}", stats);
            }
            Ok::<_, TidepoolError>(served)
        }));
    }

    let mut served = 0;
    for worker in workers {
        served += worker.await??;
    }
    handle.stop().await;

    let stats = pool.stats();
    assert_eq!(served, 640);
    assert_eq!(stats.created + stats.reused, 640);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, stats.current_size);
    assert!(stats.current_size <= 8);
    assert_eq!(backend.open_sessions(), stats.current_size);
    Ok(())
}
