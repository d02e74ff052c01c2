//! Connection pool implementation

use super::config::PoolConfig;
use super::errors::{PoolError, PoolResult};
use crate::config::DatabaseSettings;
use crate::connection::{Connector, DatabaseBackend, DatabaseConnection, SqlxConnector};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// An idle connection together with the instant it was returned.
struct IdleConnection {
	conn: Box<dyn DatabaseConnection>,
	idle_since: Instant,
}

struct PoolShared {
	connector: Arc<dyn Connector>,
	config: PoolConfig,
	/// Capacity gate: one permit per issuable connection. Callers past
	/// `max_connections` queue here until a handle is released.
	semaphore: Arc<Semaphore>,
	idle: Mutex<Vec<IdleConnection>>,
	in_use: AtomicU32,
	draining: AtomicBool,
	released: Notify,
}

impl PoolShared {
	/// Return a connection after use. Dirty connections (an open
	/// transaction was never finalized) and connections returned during a
	/// drain are discarded rather than re-pooled.
	fn release(&self, conn: Box<dyn DatabaseConnection>, connection_id: Uuid, dirty: bool) {
		if dirty || self.draining.load(Ordering::SeqCst) {
			tracing::debug!(%connection_id, dirty, "discarding connection");
			drop(conn);
		} else {
			tracing::debug!(%connection_id, "connection returned to pool");
			self.idle.lock().push(IdleConnection {
				conn,
				idle_since: Instant::now(),
			});
		}
		self.in_use.fetch_sub(1, Ordering::SeqCst);
		self.released.notify_waiters();
	}
}

/// A bounded database connection pool.
///
/// The pool is an explicit instance owned by process startup code and
/// shared by reference (`Arc`). It opens nothing until [`init`] or the
/// first [`acquire`]; [`drain`] shuts it down.
///
/// [`init`]: ConnectionPool::init
/// [`acquire`]: ConnectionPool::acquire
/// [`drain`]: ConnectionPool::drain
pub struct ConnectionPool {
	shared: Arc<PoolShared>,
}

/// Point-in-time pool counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
	pub idle: usize,
	pub in_use: u32,
	pub max: u32,
}

impl ConnectionPool {
	/// Create a pool over an arbitrary [`Connector`].
	///
	/// Test suites use this seam to plug in scripted connectors; the
	/// production path goes through [`ConnectionPool::connect`].
	pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> PoolResult<Self> {
		config.validate().map_err(PoolError::Config)?;
		let max = config.max_connections as usize;
		Ok(Self {
			shared: Arc::new(PoolShared {
				connector,
				config,
				semaphore: Arc::new(Semaphore::new(max)),
				idle: Mutex::new(Vec::new()),
				in_use: AtomicU32::new(0),
				draining: AtomicBool::new(false),
				released: Notify::new(),
			}),
		})
	}

	/// Create a pool for the database described by `settings`.
	///
	/// No connection is opened yet; the URL scheme is validated and the
	/// driver set installed.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::config::DatabaseSettings;
	/// use grappelli_db::pool::ConnectionPool;
	///
	/// let settings = DatabaseSettings::new("sqlite::memory:");
	/// let pool = ConnectionPool::connect(&settings).unwrap();
	/// assert_eq!(pool.status().max, 10);
	/// ```
	pub fn connect(settings: &DatabaseSettings) -> PoolResult<Self> {
		let connector =
			SqlxConnector::new(settings.url.clone()).map_err(|e| PoolError::Config(e.to_string()))?;
		Self::new(Arc::new(connector), settings.pool.clone())
	}

	/// Backend spoken by every connection this pool issues.
	pub fn backend(&self) -> DatabaseBackend {
		self.shared.connector.backend()
	}

	/// Warm up `min_connections` idle connections.
	///
	/// Optional: the pool also opens connections lazily on demand. A
	/// connect failure propagates and leaves the already-opened warm
	/// connections in place.
	pub async fn init(&self) -> PoolResult<()> {
		let target = self.shared.config.min_connections as usize;
		loop {
			{
				let idle = self.shared.idle.lock();
				if idle.len() >= target {
					break;
				}
			}
			let conn = self.connect_with_retry().await?;
			self.shared.idle.lock().push(IdleConnection {
				conn,
				idle_since: Instant::now(),
			});
		}
		tracing::info!(min = target, "connection pool warmed");
		Ok(())
	}

	/// Acquire a connection, queueing when the pool is saturated.
	///
	/// The wait is bounded by `acquire_timeout`. A failed underlying
	/// connect is retried `connect_attempts` times with `retry_delay`
	/// between attempts and then surfaces as [`PoolError::Connect`],
	/// releasing the reserved capacity; a failed acquire never leaves a
	/// half-registered connection behind.
	pub async fn acquire(&self) -> PoolResult<PooledConnection> {
		let shared = &self.shared;
		if shared.draining.load(Ordering::SeqCst) {
			return Err(PoolError::Closed);
		}

		let permit = match tokio::time::timeout(
			shared.config.acquire_timeout,
			shared.semaphore.clone().acquire_owned(),
		)
		.await
		{
			Err(_) => {
				return Err(PoolError::AcquireTimeout {
					waited: shared.config.acquire_timeout,
				});
			}
			// The semaphore is closed by drain()
			Ok(Err(_)) => return Err(PoolError::Closed),
			Ok(Ok(permit)) => permit,
		};

		let conn = match self.take_idle() {
			Some(conn) => conn,
			// Dropping the permit on failure frees the reserved capacity.
			None => self.connect_with_retry().await?,
		};

		let connection_id = Uuid::new_v4();
		shared.in_use.fetch_add(1, Ordering::SeqCst);
		tracing::debug!(%connection_id, "connection acquired");

		Ok(PooledConnection {
			conn: Some(conn),
			permit: Some(permit),
			shared: shared.clone(),
			connection_id,
			dirty: false,
		})
	}

	/// Pop a reusable idle connection, discarding any past the idle timeout.
	fn take_idle(&self) -> Option<Box<dyn DatabaseConnection>> {
		let mut idle = self.shared.idle.lock();
		while let Some(candidate) = idle.pop() {
			if candidate.idle_since.elapsed() > self.shared.config.idle_timeout {
				tracing::debug!("discarding idle connection past idle_timeout");
				drop(candidate);
				continue;
			}
			return Some(candidate.conn);
		}
		None
	}

	async fn connect_with_retry(&self) -> PoolResult<Box<dyn DatabaseConnection>> {
		let config = &self.shared.config;
		let mut attempt = 0u32;
		loop {
			attempt += 1;
			match self.shared.connector.connect().await {
				Ok(conn) => return Ok(conn),
				Err(error) if attempt < config.connect_attempts => {
					tracing::warn!(attempt, %error, "connect attempt failed, retrying");
					tokio::time::sleep(config.retry_delay).await;
				}
				Err(error) => {
					tracing::warn!(attempt, %error, "connect failed, giving up");
					return Err(PoolError::Connect(error));
				}
			}
		}
	}

	/// Shut the pool down.
	///
	/// Stops issuing connections (queued waiters fail with
	/// [`PoolError::Closed`]), waits for every outstanding handle to come
	/// back, then closes all idle connections. Idempotent, and safe to
	/// call on a pool that never issued anything.
	pub async fn drain(&self) {
		let shared = &self.shared;
		shared.draining.store(true, Ordering::SeqCst);
		shared.semaphore.close();

		loop {
			let released = shared.released.notified();
			tokio::pin!(released);
			// Register before the check so a release between the check and
			// the await cannot be missed.
			released.as_mut().enable();
			if shared.in_use.load(Ordering::SeqCst) == 0 {
				break;
			}
			released.await;
		}

		let idle: Vec<IdleConnection> = shared.idle.lock().drain(..).collect();
		let closed = idle.len();
		for entry in idle {
			if let Err(error) = entry.conn.close().await {
				tracing::warn!(%error, "error closing idle connection during drain");
			}
		}
		tracing::info!(closed, "connection pool drained");
	}

	/// Current pool counters.
	pub fn status(&self) -> PoolStatus {
		PoolStatus {
			idle: self.shared.idle.lock().len(),
			in_use: self.shared.in_use.load(Ordering::SeqCst),
			max: self.shared.config.max_connections,
		}
	}

	/// Pool configuration.
	pub fn config(&self) -> &PoolConfig {
		&self.shared.config
	}
}

/// A connection checked out of the pool.
///
/// Releasing consumes the handle, so capacity can not be returned twice.
/// Dropping the handle releases it as well; that is the guaranteed path
/// when a request unwinds.
pub struct PooledConnection {
	conn: Option<Box<dyn DatabaseConnection>>,
	permit: Option<OwnedSemaphorePermit>,
	shared: Arc<PoolShared>,
	connection_id: Uuid,
	dirty: bool,
}

impl PooledConnection {
	/// Exclusive access to the underlying connection.
	///
	/// `None` only between `release` and drop, which safe callers can not
	/// observe.
	pub fn connection(&mut self) -> Option<&mut (dyn DatabaseConnection + 'static)> {
		self.conn.as_deref_mut()
	}

	/// Unique identifier of this checkout, for log correlation.
	pub fn connection_id(&self) -> Uuid {
		self.connection_id
	}

	/// Flag the connection as holding unfinalized transaction state.
	///
	/// A dirty connection is discarded on release instead of re-pooled, so
	/// an abandoned transaction can never leak into another session.
	pub fn mark_dirty(&mut self) {
		self.dirty = true;
	}

	/// Clear the dirty flag after the transaction reached a terminal state.
	pub fn mark_clean(&mut self) {
		self.dirty = false;
	}

	/// Return the connection to the pool.
	pub fn release(mut self) {
		self.release_inner();
	}

	fn release_inner(&mut self) {
		if let Some(conn) = self.conn.take() {
			self.shared.release(conn, self.connection_id, self.dirty);
		}
		// Dropping the permit frees one unit of pool capacity; it must
		// happen after the connection is back in the idle set so the next
		// waiter finds it there.
		self.permit.take();
	}
}

impl Drop for PooledConnection {
	fn drop(&mut self) {
		self.release_inner();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::{DatabaseError, DbResult};
	use crate::value::{ExecResult, SqlRow, SqlValue};
	use async_trait::async_trait;
	use rstest::rstest;
	use std::sync::atomic::{AtomicI32, AtomicU32};
	use std::time::Duration;

	/// Connector whose connections do nothing but count themselves.
	struct CountingConnector {
		live: Arc<AtomicI32>,
		peak: Arc<AtomicI32>,
		opened: Arc<AtomicU32>,
		fail_first: AtomicU32,
	}

	impl CountingConnector {
		fn new() -> Self {
			Self {
				live: Arc::new(AtomicI32::new(0)),
				peak: Arc::new(AtomicI32::new(0)),
				opened: Arc::new(AtomicU32::new(0)),
				fail_first: AtomicU32::new(0),
			}
		}

		fn failing(times: u32) -> Self {
			let connector = Self::new();
			connector.fail_first.store(times, Ordering::SeqCst);
			connector
		}
	}

	struct CountingConnection {
		live: Arc<AtomicI32>,
	}

	impl Drop for CountingConnection {
		fn drop(&mut self) {
			self.live.fetch_sub(1, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl DatabaseConnection for CountingConnection {
		async fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> DbResult<ExecResult> {
			Ok(ExecResult::default())
		}

		async fn fetch_all(&mut self, _sql: &str, _params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
			Ok(Vec::new())
		}

		async fn fetch_optional(
			&mut self,
			_sql: &str,
			_params: &[SqlValue],
		) -> DbResult<Option<SqlRow>> {
			Ok(None)
		}

		async fn ping(&mut self) -> DbResult<()> {
			Ok(())
		}

		async fn close(self: Box<Self>) -> DbResult<()> {
			Ok(())
		}
	}

	#[async_trait]
	impl Connector for CountingConnector {
		async fn connect(&self) -> DbResult<Box<dyn DatabaseConnection>> {
			if self.fail_first.load(Ordering::SeqCst) > 0 {
				self.fail_first.fetch_sub(1, Ordering::SeqCst);
				return Err(DatabaseError::Connect(sqlx::Error::PoolClosed));
			}
			self.opened.fetch_add(1, Ordering::SeqCst);
			let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(live, Ordering::SeqCst);
			Ok(Box::new(CountingConnection {
				live: self.live.clone(),
			}))
		}

		fn backend(&self) -> DatabaseBackend {
			DatabaseBackend::Sqlite
		}
	}

	fn pool_with(connector: Arc<CountingConnector>, config: PoolConfig) -> ConnectionPool {
		ConnectionPool::new(connector, config).unwrap()
	}

	#[rstest]
	#[tokio::test]
	async fn test_acquire_reuses_idle_connection() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let pool = pool_with(connector.clone(), PoolConfig::default());

		// Act
		let first = pool.acquire().await.unwrap();
		first.release();
		let _second = pool.acquire().await.unwrap();

		// Assert
		assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_issued_connections_never_exceed_max() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let config = PoolConfig::new()
			.with_min_connections(0)
			.with_max_connections(3);
		let pool = Arc::new(pool_with(connector.clone(), config));

		// Act: 12 concurrent acquires, each holding briefly
		let mut tasks = Vec::new();
		for _ in 0..12 {
			let pool = pool.clone();
			tasks.push(tokio::spawn(async move {
				let handle = pool.acquire().await.unwrap();
				tokio::time::sleep(Duration::from_millis(10)).await;
				handle.release();
			}));
		}
		for task in tasks {
			task.await.unwrap();
		}

		// Assert
		assert!(connector.peak.load(Ordering::SeqCst) <= 3);
		assert_eq!(pool.status().in_use, 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_acquire_queues_until_release() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let config = PoolConfig::new()
			.with_min_connections(0)
			.with_max_connections(1);
		let pool = Arc::new(pool_with(connector, config));
		let held = pool.acquire().await.unwrap();

		// Act: a second acquire must still be pending after a short wait
		let waiter = {
			let pool = pool.clone();
			tokio::spawn(async move { pool.acquire().await.map(|c| c.release()) })
		};
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!waiter.is_finished());
		held.release();

		// Assert: the queued acquire completes once capacity frees up
		waiter.await.unwrap().unwrap();
	}

	#[rstest]
	#[tokio::test]
	async fn test_acquire_times_out_when_saturated() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let config = PoolConfig::new()
			.with_min_connections(0)
			.with_max_connections(1)
			.with_acquire_timeout(Duration::from_millis(20));
		let pool = pool_with(connector, config);
		let _held = pool.acquire().await.unwrap();

		// Act
		let result = pool.acquire().await;

		// Assert
		assert!(matches!(result, Err(PoolError::AcquireTimeout { .. })));
	}

	#[rstest]
	#[tokio::test]
	async fn test_connect_failure_propagates_and_frees_capacity() {
		// Arrange: every attempt fails (3 configured attempts)
		let connector = Arc::new(CountingConnector::failing(3));
		let config = PoolConfig::new()
			.with_min_connections(0)
			.with_max_connections(1)
			.with_retry_delay(Duration::from_millis(1));
		let pool = pool_with(connector.clone(), config);

		// Act
		let failed = pool.acquire().await;
		let recovered = pool.acquire().await;

		// Assert: the failure surfaced and did not eat pool capacity
		assert!(matches!(failed, Err(PoolError::Connect(_))));
		assert!(recovered.is_ok());
		assert_eq!(pool.status().in_use, 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_connect_retries_transient_failure() {
		// Arrange: first two attempts fail, third succeeds
		let connector = Arc::new(CountingConnector::failing(2));
		let config = PoolConfig::new()
			.with_min_connections(0)
			.with_retry_delay(Duration::from_millis(1));
		let pool = pool_with(connector.clone(), config);

		// Act
		let handle = pool.acquire().await;

		// Assert
		assert!(handle.is_ok());
		assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_drain_waits_for_outstanding_and_closes_idle() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let config = PoolConfig::new().with_min_connections(2);
		let pool = Arc::new(pool_with(connector.clone(), config));
		pool.init().await.unwrap();
		let held = pool.acquire().await.unwrap();

		// Act: drain from another task while a connection is outstanding
		let draining = {
			let pool = pool.clone();
			tokio::spawn(async move { pool.drain().await })
		};
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(!draining.is_finished());
		held.release();
		draining.await.unwrap();

		// Assert: everything is closed and new acquires are refused
		assert_eq!(connector.live.load(Ordering::SeqCst), 0);
		assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
	}

	#[rstest]
	#[tokio::test]
	async fn test_drain_never_initialized_pool() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let pool = pool_with(connector, PoolConfig::default());

		// Act & Assert: completes without opening anything
		pool.drain().await;
		assert_eq!(pool.status().idle, 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_idle_timeout_discards_stale_connection() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let config = PoolConfig::new()
			.with_min_connections(0)
			.with_idle_timeout(Duration::from_millis(5));
		let pool = pool_with(connector.clone(), config);
		pool.acquire().await.unwrap().release();

		// Act
		tokio::time::sleep(Duration::from_millis(20)).await;
		let _fresh = pool.acquire().await.unwrap();

		// Assert: the stale idle connection was replaced, not reused
		assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_dirty_connection_not_repooled() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let pool = pool_with(connector.clone(), PoolConfig::default());

		// Act
		let mut handle = pool.acquire().await.unwrap();
		handle.mark_dirty();
		handle.release();

		// Assert
		assert_eq!(pool.status().idle, 0);
		assert_eq!(connector.live.load(Ordering::SeqCst), 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_init_warms_min_connections() {
		// Arrange
		let connector = Arc::new(CountingConnector::new());
		let config = PoolConfig::new().with_min_connections(3).with_max_connections(5);
		let pool = pool_with(connector.clone(), config);

		// Act
		pool.init().await.unwrap();

		// Assert
		assert_eq!(pool.status().idle, 3);
		assert_eq!(connector.opened.load(Ordering::SeqCst), 3);
	}
}
