//! In-process simulated backend
//!
//! Stands in for a real database so the pool can be driven end to end
//! without a server. Latency, query failures and dropped sessions are drawn
//! at random from a [`SimProfile`] read out of `ConnectionParams::params`:
//!
//! | key                  | meaning                                   |
//! |----------------------|-------------------------------------------|
//! | `latency_ms`         | base round-trip time per statement        |
//! | `jitter_ms`          | uniform extra latency, 0..=jitter         |
//! | `connect_latency_ms` | time to open a session                    |
//! | `failure_rate`       | chance a statement fails                  |
//! | `drop_rate`          | chance a statement kills the session      |
//! | `connect_failure_rate` | chance opening a session fails          |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tidepool_core::{
    Connection, ConnectionParams, Driver, QueryResult, Result, StatementResult, TidepoolError,
    Value,
};

/// Randomised behaviour of the simulated backend
#[derive(Debug, Clone, PartialEq)]
pub struct SimProfile {
    pub latency: Duration,
    pub jitter: Duration,
    pub connect_latency: Duration,
    pub failure_rate: f64,
    pub drop_rate: f64,
    pub connect_failure_rate: f64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(2),
            jitter: Duration::from_millis(3),
            connect_latency: Duration::from_millis(15),
            failure_rate: 0.0,
            drop_rate: 0.0,
            connect_failure_rate: 0.0,
        }
    }
}

impl SimProfile {
    /// Read the profile from driver parameters, defaulting missing keys
    pub fn from_params(params: &ConnectionParams) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            latency: millis(params, "latency_ms")?.unwrap_or(defaults.latency),
            jitter: millis(params, "jitter_ms")?.unwrap_or(defaults.jitter),
            connect_latency: millis(params, "connect_latency_ms")?
                .unwrap_or(defaults.connect_latency),
            failure_rate: rate(params, "failure_rate")?.unwrap_or(defaults.failure_rate),
            drop_rate: rate(params, "drop_rate")?.unwrap_or(defaults.drop_rate),
            connect_failure_rate: rate(params, "connect_failure_rate")?
                .unwrap_or(defaults.connect_failure_rate),
        })
    }

    fn round_trip(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.latency + Duration::from_millis(extra)
    }
}

fn millis(params: &ConnectionParams, key: &str) -> Result<Option<Duration>> {
    params
        .params
        .get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                TidepoolError::Configuration(format!(
                    "{} must be a whole number of milliseconds, got {:?}",
                    key, raw
                ))
            })
        })
        .transpose()
}

fn rate(params: &ConnectionParams, key: &str) -> Result<Option<f64>> {
    params
        .params
        .get(key)
        .map(|raw| match raw.trim().parse::<f64>() {
            Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
            _ => Err(TidepoolError::Configuration(format!(
                "{} must be between 0.0 and 1.0, got {:?}",
                key, raw
            ))),
        })
        .transpose()
}

/// Roll a biased coin; never true for 0, always true for 1
fn chance(rate: f64) -> bool {
    rate > 0.0 && rand::thread_rng().gen_bool(rate.min(1.0))
}

/// Driver for the simulated backend
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    sessions: AtomicU64,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions opened so far
    pub fn sessions_opened(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn id(&self) -> &'static str {
        "sim"
    }

    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>> {
        let profile = SimProfile::from_params(params)?;
        tokio::time::sleep(profile.connect_latency).await;

        if chance(profile.connect_failure_rate) {
            return Err(TidepoolError::Connection(format!(
                "{}: too many connections",
                params.address()
            )));
        }

        let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(session, "simulated session opened");
        Ok(Arc::new(SimulatedConnection::new(session, profile)))
    }
}

/// One simulated backend session
#[derive(Debug)]
pub struct SimulatedConnection {
    session: u64,
    profile: SimProfile,
    closed: AtomicBool,
    /// Cleared when the simulated server drops the session
    alive: AtomicBool,
    in_transaction: AtomicBool,
}

impl SimulatedConnection {
    pub fn new(session: u64, profile: SimProfile) -> Self {
        Self {
            session,
            profile,
            closed: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// One round-trip: wait, then fail if the session is gone or the dice say so
    async fn round_trip(&self, sql: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("connection is closed".into()));
        }
        tokio::time::sleep(self.profile.round_trip()).await;

        if !self.alive.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("server has gone away".into()));
        }
        if chance(self.profile.drop_rate) {
            self.alive.store(false, Ordering::SeqCst);
            tracing::debug!(session = self.session, "simulated session dropped");
            return Err(TidepoolError::Connection("lost connection during query".into()));
        }
        if chance(self.profile.failure_rate) {
            return Err(TidepoolError::Query(format!(
                "simulated failure running `{}`",
                sql
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for SimulatedConnection {
    fn driver_name(&self) -> &str {
        "sim"
    }

    async fn ping(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("connection is closed".into()));
        }
        tokio::time::sleep(self.profile.round_trip()).await;
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TidepoolError::Connection("server has gone away".into()))
        }
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.round_trip(sql).await?;
        Ok(StatementResult {
            affected_rows: 1,
            last_insert_id: None,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.round_trip(sql).await?;
        Ok(QueryResult::from_rows(
            vec!["session".into()],
            vec![vec![Value::Int64(self.session as i64)]],
        ))
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(TidepoolError::Transaction(
                "a transaction is already open".into(),
            ));
        }
        let result = self.round_trip("BEGIN").await;
        if result.is_err() {
            self.in_transaction.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn commit(&self) -> Result<()> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(TidepoolError::Transaction("no open transaction".into()));
        }
        self.round_trip("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("server has gone away".into()));
        }
        tokio::time::sleep(self.profile.latency).await;
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
