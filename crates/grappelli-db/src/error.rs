//! Database-layer error types

use crate::session::TransactionState;

/// Errors raised by connections, sessions, and repositories.
///
/// Pool acquisition failures have their own type, [`crate::pool::PoolError`];
/// everything that happens after a connection was obtained lands here.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
	/// The underlying driver rejected a connect attempt.
	#[error("connection failed: {0}")]
	Connect(#[source] sqlx::Error),

	/// A query failed after the session was obtained.
	#[error("query failed: {0}")]
	Query(#[source] sqlx::Error),

	/// A statement could not be assembled from an entity descriptor.
	#[error("query build failed: {0}")]
	QueryBuild(String),

	/// An entity descriptor is internally inconsistent.
	#[error("invalid entity descriptor: {0}")]
	InvalidDescriptor(String),

	/// A column value could not be decoded into a supported type.
	#[error("unsupported value in column {column}: {detail}")]
	UnsupportedValue { column: String, detail: String },

	/// A fetched row could not be decoded into the caller's entity type.
	#[error("row decode failed: {0}")]
	Decode(String),

	/// The session was used after `close()` released its connection.
	#[error("session is closed")]
	SessionClosed,

	/// A transaction operation was issued in a state that forbids it, e.g.
	/// a commit after the transaction was already finalized.
	#[error("invalid transaction state: {state:?}")]
	InvalidTransactionState { state: TransactionState },
}

impl DatabaseError {
	/// Whether this error occurred before any statement reached the database.
	pub fn is_build_error(&self) -> bool {
		matches!(
			self,
			DatabaseError::QueryBuild(_) | DatabaseError::InvalidDescriptor(_)
		)
	}
}

pub type DbResult<T> = Result<T, DatabaseError>;
