//! Tidepool Core - Backend abstractions shared by the pool and its callers
//!
//! This crate provides the fundamental traits and types the connection pool
//! is written against. It defines:
//!
//! - `Connection` - The capability interface of one pooled backend session
//! - `Driver` - Opens new connections from `ConnectionParams`
//! - Common types like `Value`, `Row`, `QueryResult`, etc.
//! - `TidepoolError` and the crate-wide `Result` alias

mod connection;
mod driver;
mod error;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use types::*;
