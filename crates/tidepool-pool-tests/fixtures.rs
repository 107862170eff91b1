//! Fake backend and pool fixtures shared by the test modules.
//!
//! [`FakeBackend`] is a [`ConnectionFactory`] that hands out
//! [`FakeConnection`]s and keeps every one it opened, so a test can reach
//! behind the pool and break a connection: kill the session, close the
//! handle out-of-band, or slow its pings past the latency budget.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidepool_pool_tests::fixtures::{pool, FakeBackend};
//!
//! #[rstest]
//! #[tokio::test]
//! async fn test_something() -> anyhow::Result<()> {
//!     let (pool, backend) = pool(2, 5);
//!     let lease = pool.acquire(Duration::from_secs(1)).await?;
//!     backend.find(&lease).unwrap().kill();
//!     pool.release(&lease).await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_connection::{ConnectionFactory, ConnectionPool, Lease, PoolConfig};
use tidepool_core::{Connection, QueryResult, Result, StatementResult, TidepoolError, Value};

/// One session on the fake backend
#[derive(Debug, Default)]
pub struct FakeConnection {
    closed: AtomicBool,
    dead: AtomicBool,
    ping_latency_ms: AtomicU64,
    fail_statements: AtomicBool,
    statements: Mutex<Vec<String>>,
}

impl FakeConnection {
    /// Simulate the server dropping the session; the handle stays open
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Close the handle behind the pool's back
    pub fn close_out_of_band(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Make every ping take `latency`
    pub fn set_ping_latency(&self, latency: Duration) {
        self.ping_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every statement and query fail
    pub fn fail_statements(&self, fail: bool) {
        self.fail_statements.store(fail, Ordering::SeqCst);
    }

    /// Statements seen so far, transaction control included
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn run(&self, sql: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("connection is closed".into()));
        }
        self.statements.lock().push(sql.to_string());
        if self.dead.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("server has gone away".into()));
        }
        if self.fail_statements.load(Ordering::SeqCst) {
            return Err(TidepoolError::Query(format!("cannot run `{}`", sql)));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn driver_name(&self) -> &str {
        "fake"
    }

    async fn ping(&self) -> Result<()> {
        let latency = self.ping_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.dead.load(Ordering::SeqCst) {
            Err(TidepoolError::Connection("server has gone away".into()))
        } else {
            Ok(())
        }
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.run(sql)?;
        Ok(StatementResult {
            affected_rows: 1,
            last_insert_id: None,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.run(sql)?;
        Ok(QueryResult::from_rows(
            vec!["n".into()],
            vec![vec![Value::Int64(1)]],
        ))
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.run("BEGIN")
    }

    async fn commit(&self) -> Result<()> {
        self.run("COMMIT")
    }

    async fn rollback(&self) -> Result<()> {
        self.run("ROLLBACK")
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connection factory over an in-memory fake backend
#[derive(Debug, Default)]
pub struct FakeBackend {
    opened: Mutex<Vec<Arc<FakeConnection>>>,
    refuse_connections: AtomicBool,
    connect_delay_ms: AtomicU64,
}

impl FakeBackend {
    /// A healthy backend that accepts every connection immediately
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `create` fail until switched back
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Delay every `create` by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of sessions opened so far
    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    /// Every session opened so far, oldest first
    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.opened.lock().clone()
    }

    /// Sessions not closed by anyone yet
    pub fn open_sessions(&self) -> usize {
        self.opened
            .lock()
            .iter()
            .filter(|conn| !conn.is_closed())
            .count()
    }

    /// The session behind a lease
    pub fn find(&self, lease: &Lease) -> Option<Arc<FakeConnection>> {
        let target = Arc::as_ptr(lease.inner()) as *const ();
        self.opened
            .lock()
            .iter()
            .find(|conn| Arc::as_ptr(conn) as *const () == target)
            .cloned()
    }
}

#[async_trait]
impl ConnectionFactory for FakeBackend {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("connection refused".into()));
        }
        let conn = Arc::new(FakeConnection::default());
        self.opened.lock().push(conn.clone());
        Ok(conn)
    }
}

/// A pool over a fresh fake backend with default settings
pub fn pool(min_size: usize, max_size: usize) -> (Arc<ConnectionPool>, Arc<FakeBackend>) {
    pool_with(PoolConfig::new(min_size, max_size))
}

/// A pool over a fresh fake backend with the given configuration
pub fn pool_with(config: PoolConfig) -> (Arc<ConnectionPool>, Arc<FakeBackend>) {
    initialize_logging();
    let backend = FakeBackend::new();
    let pool = Arc::new(ConnectionPool::new(config, backend.clone()));
    (pool, backend)
}

/// Initialize logging for tests if not already initialized
fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
