//! Connection pool implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tidepool_core::{Connection, QueryResult, Result, StatementResult, TidepoolError, Value};
use tokio::sync::Notify;

use super::config::PoolConfig;
use super::lease::{ConnectionId, Lease, LeaseId, PooledConnection};
use super::scaling::{ScaleAction, ScalingInput};
use super::stats::{Occupancy, PerformanceMetrics, PoolCounters, PoolHealth, PoolStats};
use crate::factory::ConnectionFactory;
use crate::health::HealthChecker;

/// A connection owned by the pool, with lifecycle metadata
struct PoolEntry {
    id: ConnectionId,
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_used_at: Instant,
    /// Opened for an acquire and not yet leased
    fresh: bool,
}

impl PoolEntry {
    fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    /// Why this entry should be retired without pinging it, if at all
    fn expiry_reason(&self, config: &PoolConfig) -> Option<&'static str> {
        if let Some(max_lifetime) = config.max_lifetime() {
            if self.created_at.elapsed() > max_lifetime {
                return Some("max lifetime exceeded");
            }
        }
        if let Some(idle_timeout) = config.idle_timeout() {
            if self.last_used_at.elapsed() > idle_timeout {
                return Some("idle timeout exceeded");
            }
        }
        None
    }
}

/// Everything guarded by the pool mutex.
///
/// `current_size` counts idle, leased and `checking` entries. `creating`
/// counts factory calls in flight; those only join `current_size` once the
/// connection exists.
#[derive(Default)]
struct PoolState {
    idle: VecDeque<PoolEntry>,
    leased: HashMap<LeaseId, PoolEntry>,
    current_size: usize,
    creating: usize,
    checking: usize,
    closed: bool,
}

impl PoolState {
    fn occupancy(&self) -> Occupancy {
        Occupancy {
            current_size: self.current_size,
            idle: self.idle.len(),
            leased: self.leased.len(),
        }
    }

    fn debug_check(&self) {
        debug_assert!(
            self.closed
                || self.idle.len() + self.leased.len() + self.checking == self.current_size,
            "pool accounting drifted: idle={} leased={} checking={} size={}",
            self.idle.len(),
            self.leased.len(),
            self.checking,
            self.current_size
        );
    }
}

/// What one pass over the pool state decided
enum Step<'a> {
    Check(InFlight<'a>),
    Create(CreationSlot),
    Exhausted,
}

/// Result of one non-blocking acquire attempt
enum Attempt {
    Acquired(Lease),
    Exhausted,
    CreateFailed,
}

/// Summary of one `cleanup` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Idle connections re-validated
    pub checked: usize,
    /// Idle connections found unhealthy or expired and closed
    pub retired: usize,
    /// Fresh connections opened to get back to `min_size`
    pub opened: usize,
}

/// The part of the pool that creation tasks keep alive after the acquire
/// that started them has returned
struct Shared {
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    /// Signalled whenever a connection or a creation slot frees up
    available: Notify,
    counters: PoolCounters,
    next_connection_id: AtomicU64,
    close_timeout: Duration,
}

impl Shared {
    async fn open(&self) -> Result<PoolEntry> {
        let connection = self.factory.create().await?;
        self.counters.record_opened();
        let now = Instant::now();
        Ok(PoolEntry {
            id: ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed)),
            connection,
            created_at: now,
            last_used_at: now,
            fresh: false,
        })
    }

    async fn close_entry(&self, entry: PoolEntry) {
        self.counters.record_closed();
        match tokio::time::timeout(self.close_timeout, entry.connection.close()).await {
            Ok(Ok(())) => tracing::debug!(connection = %entry.id, "connection closed"),
            Ok(Err(e)) => tracing::debug!(connection = %entry.id, error = %e, "error while closing connection"),
            Err(_) => tracing::warn!(connection = %entry.id, "close timed out; dropping handle"),
        }
    }

    /// Close from synchronous code; the close runs on the current runtime
    /// when there is one.
    fn close_in_background(&self, entry: PoolEntry) {
        self.counters.record_closed();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let timeout = self.close_timeout;
            handle.spawn(async move {
                let _ = tokio::time::timeout(timeout, entry.connection.close()).await;
            });
        }
    }

    /// Open one connection on behalf of an acquire and park it in `idle`.
    ///
    /// Spawned as its own task: if the acquire gives up first, the
    /// connection still joins the pool for the next caller.
    async fn create_for_acquire(self: Arc<Self>, slot: CreationSlot) -> Result<()> {
        let mut entry = self.open().await?;
        entry.fresh = true;
        if let Err(entry) = slot.fill_idle(entry) {
            self.close_entry(entry).await;
            return Err(TidepoolError::PoolClosed);
        }
        Ok(())
    }
}

/// A bounded pool of backend connections
///
/// Callers borrow connections with `acquire`/`release`, or through the
/// scoped `get`, `execute` and `transaction` helpers. The pool owns no
/// timer; `cleanup` and `auto_scale` are meant to be driven from outside,
/// see [`crate::maintenance`].
pub struct ConnectionPool {
    config: PoolConfig,
    checker: HealthChecker,
    shared: Arc<Shared>,
    next_lease_id: AtomicU64,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    ///
    /// No connections are opened until the first `acquire` or `warm_up`.
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "pool built from an invalid configuration");
        }
        let checker = HealthChecker::new(config.latency_budget(), config.health_check_timeout());
        let shared = Arc::new(Shared {
            factory: Arc::new(factory),
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            counters: PoolCounters::default(),
            next_connection_id: AtomicU64::new(1),
            close_timeout: config.health_check_timeout(),
        });
        Self {
            config,
            checker,
            shared,
            next_lease_id: AtomicU64::new(1),
        }
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the health checker applied on acquire, release and cleanup
    pub fn health_checker(&self) -> &HealthChecker {
        &self.checker
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Check out a connection, waiting at most `timeout`.
    ///
    /// Idle connections are reused first, after a liveness check; dead ones
    /// are discarded and the search continues. With no idle connection and
    /// spare capacity, a new one is opened. Otherwise the caller waits for
    /// a release or freed capacity until the deadline.
    #[tracing::instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease> {
        let deadline = tokio::time::Instant::now() + timeout;

        match tokio::time::timeout_at(deadline, self.acquire_until_ready()).await {
            Ok(result) => result,
            Err(_) => {
                self.shared.counters.record_timeout();
                let occupancy = self.shared.state.lock().occupancy();
                tracing::warn!(
                    current_size = occupancy.current_size,
                    leased = occupancy.leased,
                    max_size = self.config.max_size(),
                    "timed out waiting for connection"
                );
                Err(TidepoolError::Timeout(format!(
                    "Timed out waiting for connection (timeout: {:?})",
                    timeout
                )))
            }
        }
    }

    async fn acquire_until_ready(&self) -> Result<Lease> {
        loop {
            // Register before looking at the state so a release that lands
            // between the check and the wait is not lost.
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire().await? {
                Attempt::Acquired(lease) => return Ok(lease),
                Attempt::Exhausted => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    }
                }
                Attempt::CreateFailed => tokio::time::sleep(self.config.poll_interval()).await,
            }
        }
    }

    async fn try_acquire(&self) -> Result<Attempt> {
        loop {
            let step = {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Err(TidepoolError::PoolClosed);
                }
                if let Some(entry) = state.idle.pop_front() {
                    state.checking += 1;
                    Step::Check(InFlight::new(self, entry))
                } else if state.current_size + state.creating < self.config.max_size() {
                    state.creating += 1;
                    Step::Create(CreationSlot::new(self.shared.clone()))
                } else {
                    Step::Exhausted
                }
            };

            match step {
                Step::Check(in_flight) => {
                    if !in_flight.entry().fresh {
                        if let Some(reason) = in_flight.entry().expiry_reason(&self.config) {
                            tracing::debug!(connection = %in_flight.entry().id, reason, "retiring idle connection");
                            self.close_entry(in_flight.discard()).await;
                            continue;
                        }

                        if !self.checker.is_alive(&*in_flight.entry().connection).await {
                            tracing::warn!(connection = %in_flight.entry().id, "discarding dead idle connection");
                            self.close_entry(in_flight.discard()).await;
                            continue;
                        }
                    }

                    return match in_flight.into_leased() {
                        Ok(lease) => {
                            tracing::debug!(connection = %lease.connection_id, lease = %lease.id, "reused idle connection");
                            Ok(Attempt::Acquired(lease))
                        }
                        Err(entry) => {
                            self.close_entry(entry).await;
                            Err(TidepoolError::PoolClosed)
                        }
                    };
                }
                Step::Create(slot) => {
                    // The new connection lands in `idle` and is picked up on
                    // the next pass, by this caller or whoever gets there first.
                    let creation = tokio::spawn(self.shared.clone().create_for_acquire(slot));
                    match creation.await {
                        Ok(Ok(())) => continue,
                        Ok(Err(TidepoolError::PoolClosed)) => return Err(TidepoolError::PoolClosed),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "failed to open connection");
                            return Ok(Attempt::CreateFailed);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "connection creation task failed");
                            return Ok(Attempt::CreateFailed);
                        }
                    }
                }
                Step::Exhausted => return Ok(Attempt::Exhausted),
            }
        }
    }

    /// Return a leased connection.
    ///
    /// The connection is recycled only if it still answers within the latency
    /// budget; otherwise it is closed and the pool shrinks by one. Never fails:
    /// an unknown or already-released lease is logged and ignored.
    #[tracing::instrument(skip(self, lease), fields(lease = %lease.id, connection = %lease.connection_id))]
    pub async fn release(&self, lease: &Lease) {
        let entry = {
            let mut state = self.shared.state.lock();
            let entry = state.leased.remove(&lease.id);
            if entry.is_some() {
                state.checking += 1;
            }
            entry
        };
        let Some(entry) = entry else {
            tracing::warn!("release of a lease the pool does not hold; ignoring");
            return;
        };
        let in_flight = InFlight::new(self, entry);

        if self.checker.is_healthy(&*in_flight.entry().connection).await {
            if let Err(entry) = in_flight.into_idle(true) {
                self.close_entry(entry).await;
            }
        } else {
            tracing::warn!("retiring unhealthy connection on release");
            self.close_entry(in_flight.discard()).await;
        }
    }

    /// Synchronous hand-back used by `PooledConnection::drop`
    pub(crate) fn return_unchecked(&self, lease_id: LeaseId, discard: bool) {
        let retired = {
            let mut state = self.shared.state.lock();
            let Some(mut entry) = state.leased.remove(&lease_id) else {
                return;
            };
            if discard || entry.connection.is_closed() {
                state.current_size -= 1;
                state.debug_check();
                Some(entry)
            } else {
                entry.touch();
                state.idle.push_back(entry);
                state.debug_check();
                None
            }
        };
        self.shared.available.notify_one();

        if let Some(entry) = retired {
            tracing::debug!(connection = %entry.id, "discarding connection dropped mid-use");
            self.shared.close_in_background(entry);
        }
    }

    /// Acquire with the configured default timeout, as a scoped guard
    pub async fn get(&self) -> Result<PooledConnection<'_>> {
        self.get_timeout(self.config.acquire_timeout()).await
    }

    /// Acquire with an explicit timeout, as a scoped guard
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<'_>> {
        let lease = self.acquire(timeout).await?;
        Ok(PooledConnection::new(lease, self))
    }

    /// Run a row-returning query on a pooled connection.
    ///
    /// The connection goes back to the pool whatever the outcome; a query
    /// error is counted and returned, but does not by itself condemn the
    /// connection.
    #[tracing::instrument(skip(self, params), fields(param_count = params.len()))]
    pub async fn execute(&self, sql: &str, params: &[Value], timeout: Duration) -> Result<QueryResult> {
        let conn = self.get_timeout(timeout).await?;
        let result = conn.query(sql, params).await;
        conn.release().await;
        result.inspect_err(|e| {
            self.shared.counters.record_error();
            tracing::warn!(error = %e, "query failed");
        })
    }

    /// Run a data-modifying statement on a pooled connection.
    #[tracing::instrument(skip(self, params), fields(param_count = params.len()))]
    pub async fn execute_statement(
        &self,
        sql: &str,
        params: &[Value],
        timeout: Duration,
    ) -> Result<StatementResult> {
        let conn = self.get_timeout(timeout).await?;
        let result = conn.execute(sql, params).await;
        conn.release().await;
        result.inspect_err(|e| {
            self.shared.counters.record_error();
            tracing::warn!(error = %e, "statement failed");
        })
    }

    /// Run `f` inside a transaction on one dedicated connection.
    ///
    /// Commits if `f` succeeds. If `f` or the commit fails, rolls back and
    /// returns the original error; a failed rollback is only logged. The
    /// connection is released exactly once on every path, and is discarded
    /// rather than recycled if the future is dropped mid-transaction.
    ///
    /// ```ignore
    /// pool.transaction(timeout, |conn| Box::pin(async move {
    ///     conn.execute("UPDATE stock SET qty = qty - 1 WHERE sku = ?", &[sku.into()]).await?;
    ///     Ok::<_, TidepoolError>(())
    /// })).await?;
    /// ```
    #[tracing::instrument(skip(self, f))]
    pub async fn transaction<T, E, F>(&self, timeout: Duration, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c dyn Connection) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<TidepoolError> + std::fmt::Display,
    {
        let mut conn = self.get_timeout(timeout).await?;

        if let Err(e) = conn.begin_transaction().await {
            self.shared.counters.record_error();
            tracing::warn!(error = %e, "failed to begin transaction");
            conn.release().await;
            return Err(e.into());
        }
        conn.set_discard_on_drop(true);

        let result = f(&*conn).await;
        let outcome = match result {
            Ok(value) => conn.commit().await.map(|()| value).map_err(E::from),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            self.shared.counters.record_error();
            if let Err(rollback_err) = conn.rollback().await {
                tracing::warn!(error = %e, rollback_error = %rollback_err, "rollback failed");
            } else {
                tracing::debug!(error = %e, "transaction rolled back");
            }
        }

        conn.set_discard_on_drop(false);
        conn.release().await;
        outcome
    }

    /// Open connections into the idle set up to `min(max_size, 2 * min_size)`.
    ///
    /// Stops at the first factory failure. Returns how many were opened.
    #[tracing::instrument(skip(self))]
    pub async fn warm_up(&self) -> usize {
        let target = self.config.warm_target();
        let mut opened = 0;

        while let Some(slot) = self.reserve_slot_below(target) {
            match self.open().await {
                Ok(entry) => {
                    if let Err(entry) = slot.fill_idle(entry) {
                        self.close_entry(entry).await;
                        break;
                    }
                    opened += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, opened, "warm-up stopped early");
                    break;
                }
            }
        }

        tracing::info!(opened, target, current_size = self.stats().current_size, "pool warmed up");
        opened
    }

    /// Re-validate every idle connection, retire the unhealthy or expired
    /// ones, then top the pool back up to `min_size`.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();
        let rounds = self.shared.state.lock().idle.len();

        for _ in 0..rounds {
            let in_flight = {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return outcome;
                }
                match state.idle.pop_front() {
                    Some(entry) => {
                        state.checking += 1;
                        InFlight::new(self, entry)
                    }
                    None => break,
                }
            };
            outcome.checked += 1;

            let keep = in_flight.entry().expiry_reason(&self.config).is_none()
                && self.checker.is_healthy(&*in_flight.entry().connection).await;

            if keep {
                if let Err(entry) = in_flight.into_idle(false) {
                    self.close_entry(entry).await;
                    return outcome;
                }
            } else {
                outcome.retired += 1;
                self.close_entry(in_flight.discard()).await;
            }
        }

        while let Some(slot) = self.reserve_slot_below(self.config.min_size()) {
            match self.open().await {
                Ok(entry) => {
                    if let Err(entry) = slot.fill_idle(entry) {
                        self.close_entry(entry).await;
                        break;
                    }
                    outcome.opened += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not top pool up to min_size");
                    break;
                }
            }
        }

        tracing::debug!(
            checked = outcome.checked,
            retired = outcome.retired,
            opened = outcome.opened,
            "cleanup pass finished"
        );
        outcome
    }

    /// Grow or shrink the idle set based on current utilization.
    ///
    /// Growth opens up to the policy's step into the idle set, capped at
    /// `max_size`. Shrinking only ever closes idle connections.
    #[tracing::instrument(skip(self))]
    pub async fn auto_scale(&self) -> ScaleAction {
        let input = {
            let state = self.shared.state.lock();
            if state.closed {
                return ScaleAction::Hold;
            }
            ScalingInput {
                leased: state.leased.len(),
                idle: state.idle.len(),
                current: state.current_size,
                capacity: self
                    .config
                    .max_size()
                    .saturating_sub(state.current_size + state.creating),
                min: self.config.min_size(),
                max: self.config.max_size(),
            }
        };

        let action = self.config.scaling().decide(&input);
        match action {
            ScaleAction::Grow(count) => {
                let mut opened = 0;
                for _ in 0..count {
                    let Some(slot) = self.reserve_slot_below(self.config.max_size()) else {
                        break;
                    };
                    match self.open().await {
                        Ok(entry) => {
                            if let Err(entry) = slot.fill_idle(entry) {
                                self.close_entry(entry).await;
                                break;
                            }
                            opened += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "scale-up stopped early");
                            break;
                        }
                    }
                }
                tracing::info!(
                    utilization = input.utilization(),
                    opened,
                    "scaled pool up"
                );
            }
            ScaleAction::Shrink(count) => {
                let mut removed = Vec::with_capacity(count);
                {
                    let mut state = self.shared.state.lock();
                    while removed.len() < count && state.current_size > self.config.min_size() {
                        let Some(entry) = state.idle.pop_front() else {
                            break;
                        };
                        state.current_size -= 1;
                        removed.push(entry);
                    }
                    state.debug_check();
                }
                let closed = removed.len();
                for entry in removed {
                    self.close_entry(entry).await;
                }
                tracing::info!(
                    utilization = input.utilization(),
                    closed,
                    "scaled pool down"
                );
            }
            ScaleAction::Hold => {}
        }
        action
    }

    /// Close every connection, idle and leased, and refuse further acquires.
    ///
    /// Idempotent. Leases still held by callers become inert: releasing
    /// them is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let entries: Vec<PoolEntry> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.current_size = 0;
            let leased: Vec<PoolEntry> = state.leased.drain().map(|(_, entry)| entry).collect();
            state.idle.drain(..).chain(leased).collect()
        };
        self.shared.available.notify_waiters();

        let count = entries.len();
        for entry in entries {
            self.close_entry(entry).await;
        }
        tracing::info!(closed = count, "pool shut down");
    }

    /// Raw counters plus current occupancy and a health label
    pub fn stats(&self) -> PoolStats {
        let occupancy = self.shared.state.lock().occupancy();
        let counters = self.shared.counters.snapshot();
        let metrics = PerformanceMetrics::compute(
            &counters,
            occupancy,
            self.config.min_size(),
            self.config.max_size(),
        );
        PoolStats::build(&counters, occupancy, PoolHealth::classify(&metrics))
    }

    /// Derived rates, efficiency and a recommended pool size
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let occupancy = self.shared.state.lock().occupancy();
        PerformanceMetrics::compute(
            &self.shared.counters.snapshot(),
            occupancy,
            self.config.min_size(),
            self.config.max_size(),
        )
    }

    fn reserve_slot_below(&self, target: usize) -> Option<CreationSlot> {
        let mut state = self.shared.state.lock();
        let limit = target.min(self.config.max_size());
        if state.closed || state.current_size + state.creating >= limit {
            return None;
        }
        state.creating += 1;
        Some(CreationSlot::new(self.shared.clone()))
    }

    async fn open(&self) -> Result<PoolEntry> {
        self.shared.open().await
    }

    async fn close_entry(&self, entry: PoolEntry) {
        self.shared.close_entry(entry).await
    }

    fn next_lease_id(&self) -> LeaseId {
        LeaseId(self.next_lease_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// A counted connection that is in neither the idle nor the leased set
/// while it is being health-checked.
///
/// Exactly one of `into_idle`, `into_leased` or `discard` settles it. If the
/// owning future is dropped first, the check never concluded, so `Drop`
/// puts the connection back at the tail of `idle`.
struct InFlight<'a> {
    pool: &'a ConnectionPool,
    entry: Option<PoolEntry>,
}

impl<'a> InFlight<'a> {
    fn new(pool: &'a ConnectionPool, entry: PoolEntry) -> Self {
        Self {
            pool,
            entry: Some(entry),
        }
    }

    fn entry(&self) -> &PoolEntry {
        self.entry.as_ref().expect("in-flight entry already settled")
    }

    fn take(&mut self) -> PoolEntry {
        self.entry.take().expect("in-flight entry already settled")
    }

    /// Back to the tail of the idle queue; hands the entry back if the pool
    /// shut down meanwhile. `used` restarts the idle clock.
    fn into_idle(mut self, used: bool) -> std::result::Result<(), PoolEntry> {
        let mut entry = self.take();
        if used {
            entry.touch();
        }
        self.pool.shared.requeue(entry)
    }

    fn into_leased(mut self) -> std::result::Result<Lease, PoolEntry> {
        let mut entry = self.take();
        let mut state = self.pool.shared.state.lock();
        state.checking -= 1;
        if state.closed {
            return Err(entry);
        }
        let fresh = std::mem::take(&mut entry.fresh);
        let lease = Lease {
            id: self.pool.next_lease_id(),
            connection_id: entry.id,
            connection: entry.connection.clone(),
        };
        state.leased.insert(lease.id, entry);
        if fresh {
            self.pool.shared.counters.record_created(state.leased.len());
        } else {
            self.pool.shared.counters.record_reused(state.leased.len());
        }
        state.debug_check();
        Ok(lease)
    }

    /// Remove from the pool's accounting; the caller closes the entry.
    fn discard(mut self) -> PoolEntry {
        let entry = self.take();
        {
            let mut state = self.pool.shared.state.lock();
            state.checking -= 1;
            if !state.closed {
                state.current_size -= 1;
            }
            state.debug_check();
        }
        self.pool.shared.available.notify_one();
        entry
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::debug!(connection = %entry.id, "check interrupted; returning connection to idle");
            if let Err(entry) = self.pool.shared.requeue(entry) {
                self.pool.shared.close_in_background(entry);
            }
        }
    }
}

impl Shared {
    /// Settle a checked entry back into `idle`, or hand it back if the pool
    /// is closed.
    fn requeue(&self, entry: PoolEntry) -> std::result::Result<(), PoolEntry> {
        {
            let mut state = self.state.lock();
            state.checking -= 1;
            if state.closed {
                return Err(entry);
            }
            state.idle.push_back(entry);
            state.debug_check();
        }
        self.available.notify_one();
        Ok(())
    }
}

/// A reserved right to add one connection without exceeding `max_size`.
///
/// Dropping an unfilled slot (factory failure, cancelled warm-up) frees the
/// capacity again.
struct CreationSlot {
    shared: Arc<Shared>,
    filled: bool,
}

impl CreationSlot {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            filled: false,
        }
    }

    fn fill_idle(mut self, entry: PoolEntry) -> std::result::Result<(), PoolEntry> {
        self.filled = true;
        {
            let mut state = self.shared.state.lock();
            state.creating -= 1;
            if state.closed {
                return Err(entry);
            }
            state.current_size += 1;
            state.idle.push_back(entry);
            state.debug_check();
        }
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for CreationSlot {
    fn drop(&mut self) {
        if !self.filled {
            self.shared.state.lock().creating -= 1;
            self.shared.available.notify_one();
        }
    }
}
