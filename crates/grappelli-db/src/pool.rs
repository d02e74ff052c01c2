//! Bounded database connection pooling
//!
//! The pool owns every live connection in the process. `acquire` hands one
//! out, queueing callers once `max_connections` are issued; `drain` stops
//! issuance, waits for outstanding handles, and closes everything. Pools
//! are explicit instances owned by startup code and passed by reference;
//! there is no module-level singleton.

pub mod config;
pub mod errors;
// Allow module_inception: re-exporting the pool submodule from pool.rs
// keeps `grappelli_db::pool::ConnectionPool` as the import path.
#[allow(clippy::module_inception)]
pub mod pool;

pub use config::PoolConfig;
pub use errors::{PoolError, PoolResult};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
