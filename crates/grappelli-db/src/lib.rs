//! # Grappelli DB
//!
//! The database layer of the Grappelli stack: a bounded connection pool,
//! request-scoped unit-of-work sessions, static entity descriptors, and a
//! descriptor-driven generic repository.
//!
//! ## Lifecycle
//!
//! One [`pool::ConnectionPool`] is created by startup code and shared by
//! reference. Per request, a [`session::SessionFactory`] acquires a
//! connection and binds a [`session::Session`] to it; repositories and
//! services run reads and queue mutations against that session; the
//! transaction is finalized exactly once from the request outcome; and the
//! session's `close` releases the connection back to the pool on every
//! path.
//!
//! ```rust,no_run
//! use grappelli_db::config::DatabaseSettings;
//! use grappelli_db::pool::ConnectionPool;
//! use grappelli_db::session::SessionFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::from_env()?;
//! let pool = Arc::new(ConnectionPool::connect(&settings)?);
//! pool.init().await?;
//!
//! let factory = SessionFactory::new(pool.clone());
//! let mut session = factory.create_session().await?;
//! session.begin().await?;
//! // ... work ...
//! session.commit().await?;
//! session.close().await;
//!
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod pool;
pub mod repository;
pub mod session;
pub mod testing;
pub mod value;

pub use config::DatabaseSettings;
pub use connection::{Connector, DatabaseBackend, DatabaseConnection, SqlxConnector};
pub use descriptor::{EntityDescriptor, Relation, RelationKind};
pub use error::{DatabaseError, DbResult};
pub use pool::{ConnectionPool, PoolConfig, PoolError, PoolResult, PooledConnection};
pub use repository::{
	EntityRepository, FilterOp, FilterSpec, ListOptions, PageRequest, PagedRows, SortOrder,
};
pub use session::{MutationResult, Session, SessionFactory, TransactionState};
pub use value::{ColumnValues, ExecResult, FilterValues, SqlRow, SqlValue};
