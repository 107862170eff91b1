//! Tests for connection pool functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tidepool_core::{Connection, QueryResult, Result, StatementResult, TidepoolError, Value};

use super::config::PoolConfig;
use super::pool::ConnectionPool;
use super::scaling::ScaleAction;
use super::stats::{PoolHealth, PoolStats};
use crate::factory::ConnectionFactory;

/// Mock connection whose failure modes are switched by the test
struct MockConnection {
    #[allow(dead_code)]
    id: usize,
    closed: AtomicBool,
    alive: AtomicBool,
    ping_latency_ms: AtomicU64,
    fail_queries: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    journal: Mutex<Vec<String>>,
}

impl MockConnection {
    fn new(id: usize) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            ping_latency_ms: AtomicU64::new(0),
            fail_queries: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the server dropping the session
    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<()> {
        let latency = self.ping_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TidepoolError::Query("server has gone away".into()))
        }
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.journal.lock().push(sql.to_string());
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(TidepoolError::Query("deadlock detected".into()));
        }
        Ok(StatementResult {
            affected_rows: 1,
            last_insert_id: None,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.journal.lock().push(sql.to_string());
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(TidepoolError::Query("syntax error".into()));
        }
        Ok(QueryResult::from_rows(
            vec!["one".into()],
            vec![vec![Value::Int64(1)]],
        ))
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.journal.lock().push("BEGIN".into());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.journal.lock().push("COMMIT".into());
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(TidepoolError::Transaction("serialization failure".into()));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.journal.lock().push("ROLLBACK".into());
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(TidepoolError::Transaction("connection lost".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock factory that counts connections created and keeps them reachable
struct MockConnectionFactory {
    counter: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    opened: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnectionFactory {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            opened: Mutex::new(Vec::new()),
        }
    }

    fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The n-th connection this factory opened
    fn connection(&self, n: usize) -> Arc<MockConnection> {
        self.opened.lock()[n].clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("access denied".into()));
        }
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MockConnection::new(id));
        self.opened.lock().push(conn.clone());
        Ok(conn)
    }
}

fn pool_with(config: PoolConfig) -> (ConnectionPool, Arc<MockConnectionFactory>) {
    let factory = Arc::new(MockConnectionFactory::new());
    (ConnectionPool::new(config, factory.clone()), factory)
}

fn assert_accounting(stats: &PoolStats, max_size: usize) {
    assert_eq!(stats.idle + stats.leased, stats.current_size);
    assert!(stats.current_size <= max_size);
}

const SHORT: Duration = Duration::from_millis(100);

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_creation() {
    let config = PoolConfig::new(2, 10);
    assert_eq!(config.min_size(), 2);
    assert_eq!(config.max_size(), 10);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(30_000));
    assert_eq!(config.poll_interval(), Duration::from_millis(10));
    assert_eq!(config.latency_budget(), Duration::from_millis(100));
    assert!(config.idle_timeout().is_none());
    assert!(config.max_lifetime().is_none());
}

#[test]
fn test_pool_config_builder() {
    let config = PoolConfig::new(1, 5)
        .with_acquire_timeout_ms(5000)
        .with_poll_interval_ms(0)
        .with_latency_budget_ms(250)
        .with_idle_timeout_ms(60000)
        .with_max_lifetime_ms(3600000);

    assert_eq!(config.acquire_timeout(), Duration::from_millis(5000));
    assert_eq!(config.poll_interval(), Duration::from_millis(1));
    assert_eq!(config.latency_budget(), Duration::from_millis(250));
    assert_eq!(config.idle_timeout(), Some(Duration::from_millis(60000)));
    assert_eq!(config.max_lifetime(), Some(Duration::from_millis(3600000)));
}

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();
    assert_eq!(config.min_size(), 1);
    assert_eq!(config.max_size(), 10);
}

#[test]
#[should_panic(expected = "max_size must be greater than 0")]
fn test_pool_config_invalid_max_size() {
    PoolConfig::new(0, 0);
}

#[test]
#[should_panic(expected = "min_size (10) cannot exceed max_size (5)")]
fn test_pool_config_min_exceeds_max() {
    PoolConfig::new(10, 5);
}

#[test]
fn test_pool_config_warm_target() {
    assert_eq!(PoolConfig::new(2, 5).warm_target(), 4);
    assert_eq!(PoolConfig::new(4, 5).warm_target(), 5);
    assert_eq!(PoolConfig::new(0, 5).warm_target(), 0);
}

#[test]
fn test_pool_config_from_toml() {
    let config = PoolConfig::from_toml_str(
        r#"
min_size = 2
max_size = 8
health_latency_budget_ms = 50

[scaling]
grow_step = 3

[connection]
driver = "mysql"
host = "db.internal"
port = 3306
session_init = ["SET NAMES utf8mb4"]
"#,
    )
    .expect("valid config");

    assert_eq!(config.min_size(), 2);
    assert_eq!(config.max_size(), 8);
    assert_eq!(config.latency_budget(), Duration::from_millis(50));
    assert_eq!(config.acquire_timeout(), Duration::from_millis(30_000));
    assert_eq!(config.scaling().grow_step, 3);
    assert_eq!(config.scaling().high_watermark, 0.8);
    assert_eq!(config.connection().address(), "db.internal:3306");
}

#[test]
fn test_pool_config_from_toml_rejects_bad_sizes() {
    let err = PoolConfig::from_toml_str("min_size = 6\nmax_size = 3\n").unwrap_err();
    assert!(matches!(err, TidepoolError::Configuration(msg) if msg.contains("cannot exceed")));

    let err = PoolConfig::from_toml_str("min_size = 0\nmax_size = 0\n").unwrap_err();
    assert!(matches!(err, TidepoolError::Configuration(_)));
}

#[test]
fn test_pool_config_load_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pool.toml");
    std::fs::write(&path, "min_size = 1\nmax_size = 4\n").expect("write");

    let config = PoolConfig::load(&path).expect("load");
    assert_eq!(config.max_size(), 4);

    assert!(PoolConfig::load(dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_pool_config_serialization() {
    let config = PoolConfig::new(2, 10)
        .with_acquire_timeout_ms(5000)
        .with_max_lifetime_ms(3600000);

    let json = serde_json::to_string(&config).expect("serialize");
    let deserialized: PoolConfig = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(deserialized.min_size(), 2);
    assert_eq!(deserialized.max_size(), 10);
    assert_eq!(deserialized.acquire_timeout(), Duration::from_millis(5000));
}

// =============================================================================
// Stats tests
// =============================================================================

#[tokio::test]
async fn test_fresh_pool_stats() {
    let (pool, _) = pool_with(PoolConfig::new(1, 5));
    let stats = pool.stats();
    assert_eq!(stats.current_size, 0);
    assert_eq!(stats.created + stats.reused + stats.errors + stats.timeouts, 0);
    assert_eq!(stats.health, PoolHealth::Healthy);

    let metrics = pool.performance_metrics();
    assert_eq!(metrics.utilization_rate, 0.0);
    assert_eq!(metrics.efficiency, 1.0);
    assert_eq!(metrics.recommended_size, 1);
}

#[tokio::test]
async fn test_metrics_after_mixed_traffic() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 4));

    let a = pool.acquire(SHORT).await.expect("a");
    pool.release(&a).await;
    let b = pool.acquire(SHORT).await.expect("b");
    factory.connection(0).fail_queries.store(true, Ordering::SeqCst);
    pool.release(&b).await;
    assert!(pool.execute("SELECT 1", &[], SHORT).await.is_err());

    // created=1 reused=2 errors=1
    let metrics = pool.performance_metrics();
    assert_eq!(metrics.total_operations, 4);
    assert!((metrics.reuse_rate - 0.5).abs() < 1e-9);
    assert!((metrics.error_rate - 0.25).abs() < 1e-9);
    assert!((metrics.efficiency - 0.95).abs() < 1e-9);
    assert_eq!(metrics.avg_leased, 1.0);
    assert_eq!(metrics.recommended_size, 2);

    // 25% errors is well past the unhealthy threshold
    assert_eq!(pool.stats().health, PoolHealth::Unhealthy);
}

#[test]
fn test_pool_health_display_and_serde() {
    assert_eq!(PoolHealth::Suboptimal.to_string(), "suboptimal");
    let json = serde_json::to_string(&PoolHealth::Degraded).unwrap();
    assert_eq!(json, "\"degraded\"");
}

#[tokio::test]
async fn test_pool_stats_serialization() {
    let (pool, _) = pool_with(PoolConfig::new(1, 5));
    let lease = pool.acquire(SHORT).await.expect("acquire");
    let stats = pool.stats();
    let json = serde_json::to_string(&stats).expect("serialize");
    let deserialized: PoolStats = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(stats, deserialized);
    assert!(stats.is_full());
    pool.release(&lease).await;
}

// =============================================================================
// Acquire / release tests
// =============================================================================

#[tokio::test]
async fn test_acquire_creates_then_reuses() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 5));

    let lease = pool.acquire(SHORT).await.expect("acquire");
    assert_eq!(lease.driver_name(), "mock");
    assert_eq!(pool.stats().leased, 1);
    let first_id = lease.connection_id();
    pool.release(&lease).await;

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);

    let again = pool.acquire(SHORT).await.expect("acquire");
    assert_eq!(again.connection_id(), first_id);
    assert_ne!(again.id(), lease.id());
    assert_eq!(factory.count(), 1);

    let stats = pool.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.reused, 1);
    pool.release(&again).await;
}

#[tokio::test]
async fn test_idle_set_is_fifo() {
    let (pool, _) = pool_with(PoolConfig::new(0, 5));
    let a = pool.acquire(SHORT).await.expect("a");
    let b = pool.acquire(SHORT).await.expect("b");
    pool.release(&a).await;
    pool.release(&b).await;

    let next = pool.acquire(SHORT).await.expect("next");
    assert_eq!(next.connection_id(), a.connection_id());
    pool.release(&next).await;
}

#[tokio::test]
async fn test_pool_max_size_limit() {
    let (pool, _) = pool_with(PoolConfig::new(1, 2));

    let conn1 = pool.acquire(SHORT).await.expect("get connection 1");
    let conn2 = pool.acquire(SHORT).await.expect("get connection 2");
    assert_eq!(pool.stats().leased, 2);

    let started = Instant::now();
    let err = pool.acquire(SHORT).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("Timed out"));
    assert!(started.elapsed() >= SHORT);
    assert_eq!(pool.stats().timeouts, 1);
    assert_eq!(pool.stats().current_size, 2);

    pool.release(&conn1).await;
    pool.release(&conn2).await;
}

#[tokio::test]
async fn test_waiter_is_woken_by_release() {
    let (pool, _) = pool_with(PoolConfig::new(0, 1).with_poll_interval_ms(10_000));
    let held = pool.acquire(SHORT).await.expect("held");

    let started = Instant::now();
    let (waited, ()) = tokio::join!(pool.acquire(Duration::from_secs(5)), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release(&held).await;
    });

    let lease = waited.expect("woken by release");
    assert_eq!(lease.connection_id(), held.connection_id());
    // Woken by the release, not by the 10s poll fallback
    assert!(started.elapsed() < Duration::from_secs(2));
    pool.release(&lease).await;
}

#[tokio::test]
async fn test_release_twice_is_noop() {
    let (pool, _) = pool_with(PoolConfig::new(1, 3));
    let lease = pool.acquire(SHORT).await.expect("acquire");

    pool.release(&lease).await;
    pool.release(&lease).await;

    let stats = pool.stats();
    assert_eq!(stats.current_size, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_stale_lease_cannot_release_new_borrower() {
    let (pool, _) = pool_with(PoolConfig::new(1, 3));
    let first = pool.acquire(SHORT).await.expect("first");
    pool.release(&first).await;

    let second = pool.acquire(SHORT).await.expect("second");
    assert_eq!(second.connection_id(), first.connection_id());

    // Same physical connection, but the old lease no longer owns it
    pool.release(&first).await;
    assert_eq!(pool.stats().leased, 1);

    pool.release(&second).await;
    assert_eq!(pool.stats().leased, 0);
}

#[tokio::test]
async fn test_dead_idle_connection_is_skipped() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 3));
    let lease = pool.acquire(SHORT).await.expect("acquire");
    pool.release(&lease).await;

    factory.connection(0).kill();

    let fresh = pool.acquire(SHORT).await.expect("acquire");
    assert_ne!(fresh.connection_id(), lease.connection_id());
    assert_eq!(factory.count(), 2);

    let stats = pool.stats();
    assert_eq!(stats.current_size, 1);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.reused, 0);
    assert!(factory.connection(0).is_closed());
    pool.release(&fresh).await;
}

#[tokio::test]
async fn test_out_of_band_close_is_caught_on_release() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 3));
    let lease = pool.acquire(SHORT).await.expect("acquire");
    let before = pool.stats().current_size;

    factory.connection(0).close().await.unwrap();
    pool.release(&lease).await;

    let stats = pool.stats();
    assert_eq!(stats.current_size, before - 1);
    assert_eq!(stats.idle, 0);

    let next = pool.acquire(SHORT).await.expect("acquire");
    assert_ne!(next.connection_id(), lease.connection_id());
    pool.release(&next).await;
}

#[tokio::test]
async fn test_slow_connection_retired_on_release() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 3).with_latency_budget_ms(20));
    let lease = pool.acquire(SHORT).await.expect("acquire");

    factory
        .connection(0)
        .ping_latency_ms
        .store(60, Ordering::SeqCst);
    pool.release(&lease).await;

    let stats = pool.stats();
    assert_eq!(stats.current_size, 0);
    assert!(factory.connection(0).is_closed());
}

#[tokio::test]
async fn test_factory_failure_does_not_grow_pool() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 3));
    factory.set_failing(true);

    let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
    assert!(err.is_timeout());

    let stats = pool.stats();
    assert_eq!(stats.current_size, 0);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.created, 0);

    factory.set_failing(false);
    let lease = pool.acquire(SHORT).await.expect("recovers");
    pool.release(&lease).await;
}

#[tokio::test]
async fn test_creation_outlives_timed_out_acquire() {
    let (pool, factory) = pool_with(PoolConfig::new(0, 1));
    factory.set_delay(Duration::from_millis(150));

    let err = pool.acquire(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_timeout());

    // The connection still arrives and is parked for the next caller
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = pool.stats();
    assert_eq!(stats.current_size, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(factory.count(), 1);

    let lease = pool.acquire(SHORT).await.expect("parked connection");
    assert_eq!(factory.count(), 1);
    assert_eq!(pool.stats().created, 1);
    pool.release(&lease).await;
}

#[tokio::test]
async fn test_failed_creation_frees_capacity() {
    let (pool, factory) = pool_with(PoolConfig::new(0, 1));
    factory.set_delay(Duration::from_millis(50));
    factory.set_failing(true);

    let err = pool.acquire(Duration::from_millis(20)).await.unwrap_err();
    assert!(err.is_timeout());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(pool.stats().current_size, 0);

    factory.set_failing(false);
    factory.set_delay(Duration::ZERO);
    let lease = pool.acquire(SHORT).await.expect("slot was returned");
    pool.release(&lease).await;
}

#[tokio::test]
async fn test_interrupted_check_returns_connection_to_idle() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 1));
    assert_eq!(pool.warm_up().await, 1);
    factory
        .connection(0)
        .ping_latency_ms
        .store(80, Ordering::SeqCst);

    let err = pool.acquire(Duration::from_millis(40)).await.unwrap_err();
    assert!(err.is_timeout());

    let stats = pool.stats();
    assert_eq!(stats.current_size, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.closed, 0);
    assert!(!factory.connection(0).is_closed());

    factory
        .connection(0)
        .ping_latency_ms
        .store(0, Ordering::SeqCst);
    let lease = pool.acquire(SHORT).await.expect("same connection again");
    assert_eq!(factory.count(), 1);
    pool.release(&lease).await;
}

#[test]
fn test_deserialized_zero_poll_interval_is_clamped() {
    let config: PoolConfig =
        serde_json::from_str(r#"{"min_size": 0, "max_size": 2, "acquire_poll_interval_ms": 0}"#)
            .expect("deserialize");
    assert!(config.validate().is_err());
    assert_eq!(config.poll_interval(), Duration::from_millis(1));
}

#[tokio::test]
async fn test_zero_poll_interval_pool_still_times_out() {
    let config: PoolConfig =
        serde_json::from_str(r#"{"min_size": 0, "max_size": 1, "acquire_poll_interval_ms": 0}"#)
            .expect("deserialize");
    let (pool, factory) = pool_with(config);
    factory.set_failing(true);

    let err = pool.acquire(Duration::from_millis(30)).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_expired_idle_connection_is_replaced() {
    let (pool, factory) = pool_with(PoolConfig::new(0, 2).with_max_lifetime_ms(20));
    let lease = pool.acquire(SHORT).await.expect("acquire");
    pool.release(&lease).await;

    tokio::time::sleep(Duration::from_millis(40)).await;

    let next = pool.acquire(SHORT).await.expect("acquire");
    assert_ne!(next.connection_id(), lease.connection_id());
    assert_eq!(factory.count(), 2);
    assert_eq!(pool.stats().current_size, 1);
    pool.release(&next).await;
}

// =============================================================================
// Scoped helpers
// =============================================================================

#[tokio::test]
async fn test_guard_drop_returns_connection() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 5));

    {
        let conn = pool.get().await.expect("get connection");
        assert_eq!(pool.stats().leased, 1);
        assert_eq!(conn.lease().connection_id().to_string(), "conn-1");
    }

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);

    let _conn2 = pool.get().await.expect("get connection");
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn test_guard_drop_discards_closed_connection() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 5));
    {
        let _conn = pool.get().await.expect("get connection");
        factory.connection(0).close().await.unwrap();
    }
    assert_eq!(pool.stats().current_size, 0);
}

#[tokio::test]
async fn test_execute_returns_rows_and_recycles() {
    let (pool, _) = pool_with(PoolConfig::new(1, 2));
    let result = pool
        .execute("SELECT 1 AS one", &[], SHORT)
        .await
        .expect("execute");
    assert_eq!(result.row_count(), 1);

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn test_execute_error_is_counted_and_connection_kept() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2));
    pool.warm_up().await;
    factory.connection(0).fail_queries.store(true, Ordering::SeqCst);

    let err = pool.execute("SELEC 1", &[], SHORT).await.unwrap_err();
    assert!(matches!(err, TidepoolError::Query(_)));

    let stats = pool.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.current_size, 2);
    assert!(!factory.connection(0).is_closed());
}

#[tokio::test]
async fn test_execute_statement() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2));
    let result = pool
        .execute_statement("DELETE FROM carts WHERE expired", &[], SHORT)
        .await
        .expect("statement");
    assert_eq!(result.affected_rows, 1);
    assert_eq!(
        factory.connection(0).journal(),
        ["DELETE FROM carts WHERE expired"]
    );
}

#[tokio::test]
async fn test_transaction_commits() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2));

    let result: Result<u64> = pool
        .transaction(SHORT, |conn| {
            Box::pin(async move {
                let res = conn
                    .execute("UPDATE stock SET qty = qty - 1", &[])
                    .await?;
                Ok::<_, TidepoolError>(res.affected_rows)
            })
        })
        .await;

    assert_eq!(result.expect("commit"), 1);
    assert_eq!(
        factory.connection(0).journal(),
        ["BEGIN", "UPDATE stock SET qty = qty - 1", "COMMIT"]
    );
    let stats = pool.stats();
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn test_transaction_rolls_back_on_callback_error() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2));

    let result: Result<()> = pool
        .transaction(SHORT, |conn| {
            Box::pin(async move {
                conn.execute("INSERT INTO ledger VALUES (1)", &[]).await?;
                Err::<(), _>(TidepoolError::Other("insufficient funds".into()))
            })
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "insufficient funds");
    assert_eq!(
        factory.connection(0).journal(),
        ["BEGIN", "INSERT INTO ledger VALUES (1)", "ROLLBACK"]
    );
    let stats = pool.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn test_transaction_rolls_back_on_commit_failure() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2));
    pool.warm_up().await;
    factory.connection(0).fail_commit.store(true, Ordering::SeqCst);
    factory.connection(1).fail_commit.store(true, Ordering::SeqCst);

    let result: Result<()> = pool
        .transaction(SHORT, |_conn| Box::pin(async move { Ok::<(), TidepoolError>(()) }))
        .await;

    assert!(matches!(result, Err(TidepoolError::Transaction(msg)) if msg.contains("serialization")));
    assert_eq!(
        factory.connection(0).journal(),
        ["BEGIN", "COMMIT", "ROLLBACK"]
    );
    assert_eq!(pool.stats().errors, 1);
}

#[tokio::test]
async fn test_failed_rollback_keeps_original_error() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2));
    pool.warm_up().await;
    factory.connection(0).fail_rollback.store(true, Ordering::SeqCst);

    let result: Result<()> = pool
        .transaction(SHORT, |_conn| {
            Box::pin(async move { Err::<(), _>(TidepoolError::Query("constraint violated".into())) })
        })
        .await;

    assert!(matches!(result, Err(TidepoolError::Query(msg)) if msg == "constraint violated"));
    assert_eq!(pool.stats().leased, 0);
}

#[tokio::test]
async fn test_cancelled_transaction_discards_connection() {
    let (pool, factory) = pool_with(PoolConfig::new(0, 2));

    let outcome = tokio::time::timeout(
        Duration::from_millis(30),
        pool.transaction(SHORT, |_conn| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TidepoolError>(())
            })
        }),
    )
    .await;
    assert!(outcome.is_err());

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.current_size, 0);
    assert_eq!(factory.count(), 1);
}

// =============================================================================
// Maintenance operations
// =============================================================================

#[tokio::test]
async fn test_warm_up_fills_to_twice_min() {
    let (pool, factory) = pool_with(PoolConfig::new(2, 5));
    assert_eq!(pool.warm_up().await, 4);

    let stats = pool.stats();
    assert_eq!(stats.current_size, 4);
    assert_eq!(stats.idle, 4);
    assert_eq!(factory.count(), 4);
    // warm-up connections are not acquisitions
    assert_eq!(stats.created, 0);
    assert_eq!(stats.opened, 4);
}

#[tokio::test]
async fn test_warm_up_stops_on_factory_failure() {
    let (pool, factory) = pool_with(PoolConfig::new(3, 10));
    factory.set_failing(true);
    assert_eq!(pool.warm_up().await, 0);
    assert_eq!(pool.stats().current_size, 0);
}

#[tokio::test]
async fn test_cleanup_retires_unhealthy_and_tops_up() {
    let (pool, factory) = pool_with(PoolConfig::new(2, 6));
    pool.warm_up().await;
    factory.connection(0).kill();
    factory.connection(1).kill();
    factory.connection(2).kill();

    let outcome = pool.cleanup().await;
    assert_eq!(outcome.checked, 4);
    assert_eq!(outcome.retired, 3);
    // one survivor plus one fresh connection gets back to min_size
    assert_eq!(outcome.opened, 1);

    let stats = pool.stats();
    assert_eq!(stats.current_size, 2);
    assert_eq!(stats.idle, 2);
    assert_accounting(&stats, 6);
}

#[tokio::test]
async fn test_cleanup_leaves_leased_connections_alone() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 3));
    let lease = pool.acquire(SHORT).await.expect("acquire");
    factory.connection(0).kill();

    let outcome = pool.cleanup().await;
    assert_eq!(outcome.checked, 0);
    assert_eq!(pool.stats().leased, 1);
    pool.release(&lease).await;
}

#[tokio::test]
async fn test_auto_scale_grows_under_load() {
    let (pool, _) = pool_with(PoolConfig::new(1, 20));
    let mut leases = Vec::new();
    for _ in 0..10 {
        leases.push(pool.acquire(SHORT).await.expect("acquire"));
    }
    pool.release(&leases.pop().expect("lease")).await;
    assert_eq!(pool.stats().leased, 9);

    assert_eq!(pool.auto_scale().await, ScaleAction::Grow(2));
    let stats = pool.stats();
    assert_eq!(stats.current_size, 12);
    assert_eq!(stats.idle, 3);

    for lease in &leases {
        pool.release(lease).await;
    }
}

#[tokio::test]
async fn test_auto_scale_never_exceeds_max() {
    let (pool, _) = pool_with(PoolConfig::new(1, 10));
    let mut leases = Vec::new();
    for _ in 0..9 {
        leases.push(pool.acquire(SHORT).await.expect("acquire"));
    }

    assert_eq!(pool.auto_scale().await, ScaleAction::Grow(1));
    assert_eq!(pool.stats().current_size, 10);
    assert_eq!(pool.auto_scale().await, ScaleAction::Hold);
    assert_eq!(pool.stats().current_size, 10);

    for lease in &leases {
        pool.release(lease).await;
    }
}

#[tokio::test]
async fn test_auto_scale_shrinks_idle_when_cold() {
    let (pool, _) = pool_with(PoolConfig::new(2, 10));
    pool.warm_up().await;
    let lease = pool.acquire(SHORT).await.expect("acquire");

    assert_eq!(pool.auto_scale().await, ScaleAction::Shrink(1));
    let stats = pool.stats();
    assert_eq!(stats.current_size, 3);
    assert_eq!(stats.leased, 1);

    pool.release(&lease).await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (pool, factory) = pool_with(PoolConfig::new(2, 5));
    pool.warm_up().await;
    let lease = pool.acquire(SHORT).await.expect("acquire");

    pool.shutdown().await;

    assert!(pool.is_closed());
    for n in 0..factory.count() {
        assert!(factory.connection(n).is_closed());
    }
    let stats = pool.stats();
    assert_eq!(stats.current_size, 0);
    assert_eq!(stats.idle + stats.leased, 0);

    // late release is a no-op
    pool.release(&lease).await;
    assert_eq!(pool.stats().current_size, 0);

    let err = pool.acquire(SHORT).await.unwrap_err();
    assert!(matches!(err, TidepoolError::PoolClosed));

    // idempotent
    pool.shutdown().await;
    assert_eq!(pool.auto_scale().await, ScaleAction::Hold);
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let (pool, _) = pool_with(PoolConfig::new(0, 1).with_poll_interval_ms(10_000));
    let _held = pool.acquire(SHORT).await.expect("held");

    let (waited, ()) = tokio::join!(pool.acquire(Duration::from_secs(5)), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.shutdown().await;
    });
    assert!(matches!(waited, Err(TidepoolError::PoolClosed)));
    assert_eq!(pool.stats().timeouts, 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_release_keeps_accounting() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = Arc::new(ConnectionPool::new(PoolConfig::new(2, 6), factory.clone()));
    pool.warm_up().await;

    let mut tasks = Vec::new();
    for worker in 0..24u64 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..10u64 {
                let lease = pool.acquire(Duration::from_secs(5)).await.expect("acquire");
                tokio::time::sleep(Duration::from_millis((worker + round) % 3)).await;
                pool.release(&lease).await;
            }
        }));
    }

    let scaler = {
        let pool = pool.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                pool.auto_scale().await;
                pool.cleanup().await;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    for task in tasks {
        task.await.expect("worker");
    }
    scaler.await.expect("scaler");

    let stats = pool.stats();
    assert_accounting(&stats, 6);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.created + stats.reused, 240);
    assert_eq!(stats.timeouts, 0);
    assert!(factory.count() <= 6 + stats.closed as usize);
}
