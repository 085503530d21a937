//! Backend Module
//!
//! Pooled connections to the remote Redis key-value service.

mod connection;
mod pool;

pub use connection::{ConnectionState, PooledConnection, RetryPolicy};
pub use pool::{ConnectionPool, Lease};
