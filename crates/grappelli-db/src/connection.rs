//! Connection abstraction over the `sqlx` `Any` driver
//!
//! The pool and the session are written against the [`Connector`] and
//! [`DatabaseConnection`] traits rather than a concrete driver, so tests
//! can substitute scripted stubs and the production path can stay on one
//! `sqlx::any::AnyConnection` per session.

use crate::error::{DatabaseError, DbResult};
use crate::value::{ExecResult, SqlRow, SqlValue};
use async_trait::async_trait;
use sqlx::AnyConnection;
use sqlx::Connection;
use sqlx::any::AnyArguments;
use std::sync::Once;

static INSTALL_DRIVERS: Once = Once::new();

/// Database backend selected from the connection URL.
///
/// The backend decides which `sea-query` builder renders statements and
/// how generated primary keys are read back after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
	Postgres,
	Sqlite,
	MySql,
}

impl DatabaseBackend {
	/// Infer the backend from a database URL scheme.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::connection::DatabaseBackend;
	///
	/// assert_eq!(
	///     DatabaseBackend::from_url("postgres://localhost/app"),
	///     Some(DatabaseBackend::Postgres)
	/// );
	/// assert_eq!(
	///     DatabaseBackend::from_url("sqlite::memory:"),
	///     Some(DatabaseBackend::Sqlite)
	/// );
	/// assert_eq!(DatabaseBackend::from_url("redis://localhost"), None);
	/// ```
	pub fn from_url(url: &str) -> Option<Self> {
		let scheme = url.split(':').next().unwrap_or_default();
		match scheme {
			"postgres" | "postgresql" => Some(DatabaseBackend::Postgres),
			"sqlite" => Some(DatabaseBackend::Sqlite),
			"mysql" | "mariadb" => Some(DatabaseBackend::MySql),
			_ => None,
		}
	}

	/// Whether inserts must use `RETURNING` to observe a generated key.
	pub fn requires_returning(&self) -> bool {
		matches!(self, DatabaseBackend::Postgres)
	}
}

/// A single live database connection.
///
/// Exclusive `&mut` access is the concurrency model: one session owns one
/// connection, and statements on it are strictly ordered.
#[async_trait]
pub trait DatabaseConnection: Send {
	/// Execute a mutating statement.
	async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<ExecResult>;

	/// Fetch every row of a query.
	async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>>;

	/// Fetch at most one row of a query.
	async fn fetch_optional(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<SqlRow>>;

	/// Verify the connection is still usable.
	async fn ping(&mut self) -> DbResult<()>;

	/// Close the connection, flushing the driver's shutdown handshake.
	async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Opens new [`DatabaseConnection`]s for the pool.
#[async_trait]
pub trait Connector: Send + Sync {
	async fn connect(&self) -> DbResult<Box<dyn DatabaseConnection>>;

	/// Backend every connection from this connector speaks.
	fn backend(&self) -> DatabaseBackend;
}

/// [`Connector`] over `sqlx`'s `Any` driver.
#[derive(Debug, Clone)]
pub struct SqlxConnector {
	url: String,
	backend: DatabaseBackend,
}

impl SqlxConnector {
	/// Create a connector for the given database URL.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::connection::{DatabaseBackend, SqlxConnector};
	///
	/// let connector = SqlxConnector::new("sqlite::memory:").unwrap();
	/// assert_eq!(connector.url(), "sqlite::memory:");
	/// ```
	pub fn new(url: impl Into<String>) -> DbResult<Self> {
		let url = url.into();
		let backend = DatabaseBackend::from_url(&url).ok_or_else(|| {
			DatabaseError::QueryBuild(format!("unsupported database url scheme: {url}"))
		})?;
		INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
		Ok(Self { url, backend })
	}

	pub fn url(&self) -> &str {
		&self.url
	}
}

#[async_trait]
impl Connector for SqlxConnector {
	async fn connect(&self) -> DbResult<Box<dyn DatabaseConnection>> {
		let conn = AnyConnection::connect(&self.url)
			.await
			.map_err(DatabaseError::Connect)?;
		Ok(Box::new(AnyDatabaseConnection { conn }))
	}

	fn backend(&self) -> DatabaseBackend {
		self.backend
	}
}

/// [`DatabaseConnection`] backed by one `sqlx::any::AnyConnection`.
pub struct AnyDatabaseConnection {
	conn: AnyConnection,
}

impl AnyDatabaseConnection {
	fn query<'q>(
		sql: &'q str,
		params: &[SqlValue],
	) -> sqlx::query::Query<'q, sqlx::Any, AnyArguments<'q>> {
		let mut query = sqlx::query(sql);
		for param in params {
			query = bind_value(query, param);
		}
		query
	}
}

#[async_trait]
impl DatabaseConnection for AnyDatabaseConnection {
	async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<ExecResult> {
		tracing::debug!(sql, params = params.len(), "execute");
		let result = Self::query(sql, params)
			.execute(&mut self.conn)
			.await
			.map_err(DatabaseError::Query)?;
		Ok(ExecResult {
			rows_affected: result.rows_affected(),
			last_insert_id: result.last_insert_id(),
		})
	}

	async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
		tracing::debug!(sql, params = params.len(), "fetch_all");
		let rows = Self::query(sql, params)
			.fetch_all(&mut self.conn)
			.await
			.map_err(DatabaseError::Query)?;
		rows.iter().map(SqlRow::from_any_row).collect()
	}

	async fn fetch_optional(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<SqlRow>> {
		tracing::debug!(sql, params = params.len(), "fetch_optional");
		let row = Self::query(sql, params)
			.fetch_optional(&mut self.conn)
			.await
			.map_err(DatabaseError::Query)?;
		row.as_ref().map(SqlRow::from_any_row).transpose()
	}

	async fn ping(&mut self) -> DbResult<()> {
		self.conn.ping().await.map_err(DatabaseError::Query)
	}

	async fn close(self: Box<Self>) -> DbResult<()> {
		self.conn.close().await.map_err(DatabaseError::Query)
	}
}

/// Bind one value onto a query in the `Any` driver's portable type set.
fn bind_value<'q>(
	query: sqlx::query::Query<'q, sqlx::Any, AnyArguments<'q>>,
	value: &SqlValue,
) -> sqlx::query::Query<'q, sqlx::Any, AnyArguments<'q>> {
	match value {
		SqlValue::Null => query.bind(Option::<i64>::None),
		SqlValue::Bool(b) => query.bind(*b),
		SqlValue::Int(i) => query.bind(*i),
		SqlValue::Float(f) => query.bind(*f),
		SqlValue::Text(s) => query.bind(s.clone()),
		SqlValue::Bytes(b) => query.bind(b.clone()),
	}
}
