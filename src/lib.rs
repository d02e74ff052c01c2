//! # Grappelli
//!
//! Request-scoped database sessions, unit-of-work transactions, and generic
//! CRUD services for REST APIs.
//!
//! Grappelli is the data plane of a CRUD API: it decides how a database
//! connection is acquired per request, how reads and writes are scoped to a
//! session, how a transaction is committed or rolled back based on the
//! eventual request outcome, and how generic list/find/create/update
//! operations are parameterized over arbitrary entity shapes. The HTTP
//! server itself is an external collaborator: it feeds Grappelli a
//! controller invocation and receives a typed payload or a typed error.
//!
//! ## Crates
//!
//! - [`db`]: connection pool, connector abstraction, unit-of-work
//!   sessions, entity descriptors, and the generic entity repository.
//! - [`rest`]: error taxonomy and envelope, boundary request/response
//!   types, middleware chain, explicit route table, pagination envelope,
//!   generic entity service, and the transaction-finalizing middleware.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use grappelli::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::new("sqlite::memory:");
//! let pool = Arc::new(ConnectionPool::connect(&settings)?);
//! pool.init().await?;
//!
//! let factory = SessionFactory::new(pool.clone());
//! let mut session = factory.create_session().await?;
//!
//! // ... repository/service calls against the session ...
//!
//! session.close().await;
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

pub use grappelli_db as db;
pub use grappelli_rest as rest;

/// Commonly used types, re-exported in one place.
pub mod prelude {
	pub use grappelli_db::config::DatabaseSettings;
	pub use grappelli_db::descriptor::{EntityDescriptor, Relation, RelationKind};
	pub use grappelli_db::pool::{ConnectionPool, PoolConfig, PoolError, PooledConnection};
	pub use grappelli_db::repository::{
		EntityRepository, FilterOp, FilterSpec, ListOptions, PageRequest, SortOrder,
	};
	pub use grappelli_db::session::{Session, SessionFactory, TransactionState};
	pub use grappelli_db::value::{ColumnValues, ExecResult, FilterValues, SqlRow, SqlValue};
	pub use grappelli_rest::error::{ApiError, ApiResult, ErrorEnvelope};
	pub use grappelli_rest::http::{ApiRequest, ApiResponse, Handler, Middleware, MiddlewareChain};
	pub use grappelli_rest::pagination::{Paged, PageQuery, PaginationConfig, PaginationMeta};
	pub use grappelli_rest::router::{Route, RouteMatch, RouteTable, RouterHandler};
	pub use grappelli_rest::service::{DeletePolicy, EntityMapper, EntityService};
	pub use grappelli_rest::transaction::TransactionMiddleware;
}
