//! Pool error types

use crate::error::DatabaseError;
use std::time::Duration;

/// Errors raised while acquiring a connection from the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
	/// The pool configuration failed validation.
	#[error("invalid pool configuration: {0}")]
	Config(String),

	/// Every connect attempt against the database failed.
	#[error("could not open a database connection: {0}")]
	Connect(#[source] DatabaseError),

	/// The pool stayed saturated past the configured acquire timeout.
	#[error("timed out after {waited:?} waiting for a pool connection")]
	AcquireTimeout { waited: Duration },

	/// The pool is draining or drained and no longer issues connections.
	#[error("connection pool is closed")]
	Closed,
}

pub type PoolResult<T> = Result<T, PoolError>;
