//! Tidepool Pool Testing Suite
//!
//! End-to-end tests of the public pool API against an in-memory fake
//! backend. Every test builds its own pool and backend, so the suite runs
//! in parallel with no external services.
//!
//! # Test Categories
//!
//! - Acquisition (reuse, deadlines, the `max_size + 1` boundary, dead handles)
//! - Sizing (warm-up, auto-scaling, cleanup)
//! - Statistics (counter round-trips, derived metrics)
//! - Scoped helpers (`execute`, `transaction`, guards)
//! - Lifecycle (background maintenance, shutdown)
//!
//! # Usage
//!
//! ```bash
//! cargo test -p tidepool-pool-tests
//!
//! # With pool logs
//! RUST_LOG=tidepool_connection=debug cargo test -p tidepool-pool-tests -- --nocapture
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fixtures;

#[cfg(test)]
pub mod acquire_tests;

#[cfg(test)]
pub mod sizing_tests;

#[cfg(test)]
pub mod stats_tests;

#[cfg(test)]
pub mod helper_tests;

#[cfg(test)]
pub mod lifecycle_tests;
