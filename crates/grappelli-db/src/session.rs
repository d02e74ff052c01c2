//! Unit-of-work sessions
//!
//! A [`Session`] binds one pooled connection to one logical unit of work.
//! Mutations queue on the session until [`flush`] writes them out, and the
//! transaction reaches exactly one terminal state (committed or rolled
//! back) no matter how many paths race to finalize it.
//!
//! [`flush`]: Session::flush

use crate::connection::{DatabaseBackend, DatabaseConnection};
use crate::descriptor::EntityDescriptor;
use crate::error::{DatabaseError, DbResult};
use crate::pool::{ConnectionPool, PoolResult, PooledConnection};
use crate::value::{ColumnValues, SqlRow, SqlValue};
use sea_query::{
	Alias, Expr, ExprTrait, MysqlQueryBuilder, PostgresQueryBuilder, Query,
	QueryStatementBuilder, SelectStatement, SqliteQueryBuilder,
};
use std::sync::Arc;
use uuid::Uuid;

/// Transaction lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
	NotStarted,
	Active,
	Committed,
	RolledBack,
}

impl TransactionState {
	/// Whether the transaction reached a terminal state.
	pub fn is_terminal(&self) -> bool {
		matches!(self, TransactionState::Committed | TransactionState::RolledBack)
	}
}

/// A mutation queued on the session until flush.
enum PendingMutation {
	Insert {
		descriptor: Arc<EntityDescriptor>,
		values: ColumnValues,
	},
	Update {
		descriptor: Arc<EntityDescriptor>,
		id: SqlValue,
		patch: ColumnValues,
	},
	Delete {
		descriptor: Arc<EntityDescriptor>,
		id: SqlValue,
	},
}

/// Outcome of one flushed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
	pub rows_affected: u64,
	/// Primary key of an inserted row: the database-generated key, or the
	/// caller-supplied one when the insert carried it.
	pub generated_key: Option<SqlValue>,
}

/// One logical unit of work bound to one pooled connection.
///
/// Created per request by the [`SessionFactory`]; the mutation queue is
/// owned exclusively by the creating request and statements on the
/// connection are strictly ordered through `&mut self`.
pub struct Session {
	id: Uuid,
	conn: Option<PooledConnection>,
	backend: DatabaseBackend,
	state: TransactionState,
	pending: Vec<PendingMutation>,
}

impl Session {
	fn new(conn: PooledConnection, backend: DatabaseBackend) -> Self {
		Self {
			id: Uuid::new_v4(),
			conn: Some(conn),
			backend,
			state: TransactionState::NotStarted,
			pending: Vec::new(),
		}
	}

	/// Session identifier, for log correlation.
	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn state(&self) -> TransactionState {
		self.state
	}

	pub fn backend(&self) -> DatabaseBackend {
		self.backend
	}

	/// Number of queued, not yet flushed mutations.
	pub fn pending_mutations(&self) -> usize {
		self.pending.len()
	}

	fn conn(&mut self) -> DbResult<&mut (dyn DatabaseConnection + 'static)> {
		self.conn
			.as_mut()
			.and_then(|pooled| pooled.connection())
			.ok_or(DatabaseError::SessionClosed)
	}

	/// Open a transaction on the session's connection.
	///
	/// The pooled connection is flagged dirty until the transaction reaches
	/// a terminal state, so an abandoned session can never return a
	/// mid-transaction connection to the idle set.
	pub async fn begin(&mut self) -> DbResult<()> {
		if self.state != TransactionState::NotStarted {
			return Err(DatabaseError::InvalidTransactionState { state: self.state });
		}
		let statement = match self.backend {
			DatabaseBackend::MySql => "START TRANSACTION",
			DatabaseBackend::Postgres | DatabaseBackend::Sqlite => "BEGIN",
		};
		self.conn()?.execute(statement, &[]).await?;
		if let Some(pooled) = self.conn.as_mut() {
			pooled.mark_dirty();
		}
		self.state = TransactionState::Active;
		tracing::debug!(session = %self.id, "transaction started");
		Ok(())
	}

	/// Queue an insert of `values` into the entity's table.
	pub fn persist(&mut self, descriptor: Arc<EntityDescriptor>, values: ColumnValues) {
		self.pending.push(PendingMutation::Insert { descriptor, values });
	}

	/// Queue a partial update of the row identified by `id`.
	pub fn queue_update(
		&mut self,
		descriptor: Arc<EntityDescriptor>,
		id: SqlValue,
		patch: ColumnValues,
	) {
		self.pending.push(PendingMutation::Update { descriptor, id, patch });
	}

	/// Queue a hard delete of the row identified by `id`.
	pub fn queue_delete(&mut self, descriptor: Arc<EntityDescriptor>, id: SqlValue) {
		self.pending.push(PendingMutation::Delete { descriptor, id });
	}

	/// Execute every queued mutation in queue order.
	///
	/// The first failure propagates immediately and leaves the remaining
	/// queue untouched; the transaction stays unfinalized for the caller
	/// (or the unit-of-work coordinator) to roll back.
	pub async fn flush(&mut self) -> DbResult<Vec<MutationResult>> {
		if self.state.is_terminal() {
			return Err(DatabaseError::InvalidTransactionState { state: self.state });
		}
		let pending = std::mem::take(&mut self.pending);
		let mut results = Vec::with_capacity(pending.len());
		for mutation in pending {
			let result = self.apply(mutation).await?;
			results.push(result);
		}
		Ok(results)
	}

	async fn apply(&mut self, mutation: PendingMutation) -> DbResult<MutationResult> {
		match mutation {
			PendingMutation::Insert { descriptor, values } => {
				self.apply_insert(&descriptor, values).await
			}
			PendingMutation::Update { descriptor, id, patch } => {
				let stmt = build_update(&descriptor, &id, &patch)?;
				let (sql, params) = render(self.backend, &stmt);
				let result = self.conn()?.execute(&sql, &params).await?;
				Ok(MutationResult {
					rows_affected: result.rows_affected,
					generated_key: None,
				})
			}
			PendingMutation::Delete { descriptor, id } => {
				let stmt = build_delete(&descriptor, &id)?;
				let (sql, params) = render(self.backend, &stmt);
				let result = self.conn()?.execute(&sql, &params).await?;
				Ok(MutationResult {
					rows_affected: result.rows_affected,
					generated_key: None,
				})
			}
		}
	}

	async fn apply_insert(
		&mut self,
		descriptor: &EntityDescriptor,
		values: ColumnValues,
	) -> DbResult<MutationResult> {
		let supplied_key = values.get(descriptor.primary_key()).cloned();
		let use_returning = self.backend.requires_returning() && supplied_key.is_none();
		let stmt = build_insert(descriptor, &values, use_returning)?;
		let (sql, params) = render(self.backend, &stmt);

		if use_returning {
			let row = self.conn()?.fetch_optional(&sql, &params).await?;
			let generated_key = row.and_then(|r| r.get(descriptor.primary_key()).cloned());
			Ok(MutationResult {
				rows_affected: 1,
				generated_key,
			})
		} else {
			let result = self.conn()?.execute(&sql, &params).await?;
			let generated_key = supplied_key.or(result.last_insert_id.map(SqlValue::Int));
			Ok(MutationResult {
				rows_affected: result.rows_affected,
				generated_key,
			})
		}
	}

	/// Flush pending mutations and commit the transaction.
	///
	/// Outside a transaction (`begin` was never called) this flushes in
	/// autocommit mode and issues no COMMIT.
	pub async fn commit(&mut self) -> DbResult<()> {
		match self.state {
			TransactionState::Active => {
				self.flush().await?;
				self.conn()?.execute("COMMIT", &[]).await?;
				self.state = TransactionState::Committed;
				if let Some(pooled) = self.conn.as_mut() {
					pooled.mark_clean();
				}
				tracing::debug!(session = %self.id, "transaction committed");
				Ok(())
			}
			TransactionState::NotStarted => {
				self.flush().await?;
				Ok(())
			}
			state => Err(DatabaseError::InvalidTransactionState { state }),
		}
	}

	/// Discard pending mutations and roll the transaction back.
	pub async fn rollback(&mut self) -> DbResult<()> {
		self.pending.clear();
		match self.state {
			TransactionState::Active => {
				self.conn()?.execute("ROLLBACK", &[]).await?;
				self.state = TransactionState::RolledBack;
				if let Some(pooled) = self.conn.as_mut() {
					pooled.mark_clean();
				}
				tracing::debug!(session = %self.id, "transaction rolled back");
				Ok(())
			}
			TransactionState::NotStarted => Ok(()),
			state => Err(DatabaseError::InvalidTransactionState { state }),
		}
	}

	/// Finalize the transaction from the request outcome, at most once.
	///
	/// Returns the terminal state reached, or `None` when there was
	/// nothing to finalize: no transaction was opened, or a service
	/// operation already finalized it. A failed commit is followed by one
	/// rollback attempt whose own failure is logged without masking the
	/// primary error.
	pub async fn finalize(&mut self, success: bool) -> DbResult<Option<TransactionState>> {
		if self.state != TransactionState::Active {
			return Ok(None);
		}
		if success {
			match self.commit().await {
				Ok(()) => Ok(Some(TransactionState::Committed)),
				Err(primary) => {
					if let Err(secondary) = self.rollback().await {
						tracing::error!(
							session = %self.id,
							error = %secondary,
							"rollback after failed commit also failed"
						);
					}
					Err(primary)
				}
			}
		} else {
			self.rollback().await?;
			Ok(Some(TransactionState::RolledBack))
		}
	}

	/// Run a select and fetch every row.
	pub async fn fetch_all(&mut self, stmt: &SelectStatement) -> DbResult<Vec<SqlRow>> {
		let (sql, params) = render(self.backend, stmt);
		self.conn()?.fetch_all(&sql, &params).await
	}

	/// Run a select and fetch at most one row.
	pub async fn fetch_optional(&mut self, stmt: &SelectStatement) -> DbResult<Option<SqlRow>> {
		let (sql, params) = render(self.backend, stmt);
		self.conn()?.fetch_optional(&sql, &params).await
	}

	/// Release the connection back to the pool, exactly once.
	///
	/// A still-active transaction is rolled back first; a rollback failure
	/// is logged and the connection is discarded by the pool through its
	/// dirty flag rather than re-pooled. Closing an already closed session
	/// is a no-op; any later use fails with
	/// [`DatabaseError::SessionClosed`].
	pub async fn close(&mut self) {
		if self.conn.is_none() {
			return;
		}
		if self.state == TransactionState::Active {
			if let Err(error) = self.rollback().await {
				tracing::error!(session = %self.id, %error, "rollback during session close failed");
			}
		}
		if let Some(pooled) = self.conn.take() {
			pooled.release();
		}
		tracing::debug!(session = %self.id, "session closed");
	}
}

/// Creates one [`Session`] per request from a shared pool.
pub struct SessionFactory {
	pool: Arc<ConnectionPool>,
}

impl SessionFactory {
	pub fn new(pool: Arc<ConnectionPool>) -> Self {
		Self { pool }
	}

	/// Acquire a connection and bind a fresh session to it.
	pub async fn create_session(&self) -> PoolResult<Session> {
		let conn = self.pool.acquire().await?;
		Ok(Session::new(conn, self.pool.backend()))
	}

	pub fn pool(&self) -> &Arc<ConnectionPool> {
		&self.pool
	}
}

fn render<S: QueryStatementBuilder>(backend: DatabaseBackend, stmt: &S) -> (String, Vec<SqlValue>) {
	let (sql, values) = match backend {
		DatabaseBackend::Postgres => stmt.build_any(&PostgresQueryBuilder),
		DatabaseBackend::Sqlite => stmt.build_any(&SqliteQueryBuilder),
		DatabaseBackend::MySql => stmt.build_any(&MysqlQueryBuilder),
	};
	let params = values.0.into_iter().map(SqlValue::from_query_value).collect();
	(sql, params)
}

fn ensure_known_columns(descriptor: &EntityDescriptor, values: &ColumnValues) -> DbResult<()> {
	for column in values.keys() {
		if !descriptor.has_column(column) {
			return Err(DatabaseError::QueryBuild(format!(
				"{}: unknown column {column}",
				descriptor.table()
			)));
		}
	}
	Ok(())
}

fn build_insert(
	descriptor: &EntityDescriptor,
	values: &ColumnValues,
	returning_key: bool,
) -> DbResult<sea_query::InsertStatement> {
	ensure_known_columns(descriptor, values)?;
	let mut stmt = Query::insert();
	stmt.into_table(Alias::new(descriptor.table()));
	stmt.columns(values.keys().map(|c| Alias::new(c.as_str())));
	stmt.values(values.values().map(|v| Expr::val(v.to_query_value())))
		.map_err(|e| DatabaseError::QueryBuild(e.to_string()))?;
	if returning_key {
		stmt.returning(Query::returning().column(Alias::new(descriptor.primary_key())));
	}
	Ok(stmt)
}

fn build_update(
	descriptor: &EntityDescriptor,
	id: &SqlValue,
	patch: &ColumnValues,
) -> DbResult<sea_query::UpdateStatement> {
	ensure_known_columns(descriptor, patch)?;
	if patch.is_empty() {
		return Err(DatabaseError::QueryBuild(format!(
			"{}: empty update patch",
			descriptor.table()
		)));
	}
	let mut stmt = Query::update();
	stmt.table(Alias::new(descriptor.table()));
	for (column, value) in patch {
		stmt.value(Alias::new(column.as_str()), Expr::val(value.to_query_value()));
	}
	stmt.and_where(Expr::col(Alias::new(descriptor.primary_key())).eq(id.to_query_value()));
	Ok(stmt)
}

fn build_delete(descriptor: &EntityDescriptor, id: &SqlValue) -> DbResult<sea_query::DeleteStatement> {
	let mut stmt = Query::delete();
	stmt.from_table(Alias::new(descriptor.table()));
	stmt.and_where(Expr::col(Alias::new(descriptor.primary_key())).eq(id.to_query_value()));
	Ok(stmt)
}
