//! Test support: scripted connectors
//!
//! [`RecordingConnector`] satisfies the [`Connector`] seam with in-memory
//! connections that log every statement and replay scripted results. Test
//! suites in this workspace use it to assert statement order, bound
//! parameters, and commit/rollback counts without a live database.

use crate::connection::{Connector, DatabaseBackend, DatabaseConnection};
use crate::error::{DatabaseError, DbResult};
use crate::value::{ExecResult, SqlRow, SqlValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct RecorderState {
	statements: Vec<(String, Vec<SqlValue>)>,
	scripted_rows: VecDeque<Vec<SqlRow>>,
	execute_failures: VecDeque<String>,
	next_insert_id: i64,
}

/// A [`Connector`] whose connections record statements and replay scripted
/// rows. All connections share one recorder, so statement order across a
/// whole scenario can be asserted in one place.
pub struct RecordingConnector {
	backend: DatabaseBackend,
	state: Arc<Mutex<RecorderState>>,
}

impl RecordingConnector {
	pub fn new(backend: DatabaseBackend) -> Self {
		Self {
			backend,
			state: Arc::new(Mutex::new(RecorderState::default())),
		}
	}

	pub fn sqlite() -> Self {
		Self::new(DatabaseBackend::Sqlite)
	}

	pub fn postgres() -> Self {
		Self::new(DatabaseBackend::Postgres)
	}

	/// SQL text of every statement executed so far, in order.
	pub fn statements(&self) -> Vec<String> {
		self.state
			.lock()
			.statements
			.iter()
			.map(|(sql, _)| sql.clone())
			.collect()
	}

	/// Every statement with its bound parameters, in order.
	pub fn recorded(&self) -> Vec<(String, Vec<SqlValue>)> {
		self.state.lock().statements.clone()
	}

	/// Number of executed statements containing `needle`.
	pub fn count_containing(&self, needle: &str) -> usize {
		self.state
			.lock()
			.statements
			.iter()
			.filter(|(sql, _)| sql.contains(needle))
			.count()
	}

	/// Script the result of the next fetch: `fetch_all` returns the whole
	/// set, `fetch_optional` its first row.
	pub fn push_rows(&self, rows: Vec<SqlRow>) {
		self.state.lock().scripted_rows.push_back(rows);
	}

	/// Make the next `execute` fail with a protocol error.
	pub fn fail_next_execute(&self, message: &str) {
		self.state.lock().execute_failures.push_back(message.to_string());
	}
}

#[async_trait]
impl Connector for RecordingConnector {
	async fn connect(&self) -> DbResult<Box<dyn DatabaseConnection>> {
		Ok(Box::new(RecordingConnection {
			state: self.state.clone(),
		}))
	}

	fn backend(&self) -> DatabaseBackend {
		self.backend
	}
}

struct RecordingConnection {
	state: Arc<Mutex<RecorderState>>,
}

#[async_trait]
impl DatabaseConnection for RecordingConnection {
	async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<ExecResult> {
		let mut state = self.state.lock();
		state.statements.push((sql.to_string(), params.to_vec()));
		if let Some(message) = state.execute_failures.pop_front() {
			return Err(DatabaseError::Query(sqlx::Error::Protocol(message)));
		}
		let last_insert_id = if sql.starts_with("INSERT") {
			state.next_insert_id += 1;
			Some(state.next_insert_id)
		} else {
			None
		};
		Ok(ExecResult {
			rows_affected: 1,
			last_insert_id,
		})
	}

	async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
		let mut state = self.state.lock();
		state.statements.push((sql.to_string(), params.to_vec()));
		Ok(state.scripted_rows.pop_front().unwrap_or_default())
	}

	async fn fetch_optional(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<SqlRow>> {
		let mut state = self.state.lock();
		state.statements.push((sql.to_string(), params.to_vec()));
		Ok(state
			.scripted_rows
			.pop_front()
			.and_then(|rows| rows.into_iter().next()))
	}

	async fn ping(&mut self) -> DbResult<()> {
		Ok(())
	}

	async fn close(self: Box<Self>) -> DbResult<()> {
		Ok(())
	}
}
