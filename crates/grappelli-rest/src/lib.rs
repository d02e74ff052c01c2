//! # Grappelli REST
//!
//! The request-facing half of the Grappelli stack: typed errors with a
//! stable envelope, boundary request/response types, an explicit
//! middleware chain and route table, pagination envelopes, the generic
//! entity service, and the unit-of-work transaction middleware.
//!
//! ## Assembly
//!
//! A server adapter wires the pieces together once at startup:
//!
//! ```rust,no_run
//! use grappelli_db::config::DatabaseSettings;
//! use grappelli_db::pool::ConnectionPool;
//! use grappelli_db::session::SessionFactory;
//! use grappelli_rest::http::MiddlewareChain;
//! use grappelli_rest::router::{Route, RouteTable, RouterHandler};
//! use grappelli_rest::transaction::TransactionMiddleware;
//! use hyper::Method;
//! use std::sync::Arc;
//!
//! # use grappelli_rest::error::ApiResult;
//! # use grappelli_rest::http::{ApiRequest, ApiResponse, Handler};
//! # struct ListClients;
//! # #[async_trait::async_trait]
//! # impl Handler for ListClients {
//! #     async fn handle(&self, _request: ApiRequest) -> ApiResult<ApiResponse> {
//! #         Ok(ApiResponse::ok())
//! #     }
//! # }
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::from_env()?;
//! let pool = Arc::new(ConnectionPool::connect(&settings)?);
//! let factory = Arc::new(SessionFactory::new(pool));
//!
//! let table = RouteTable::new()
//!     .with_route(Route::new(Method::GET, "/clients", Arc::new(ListClients))?);
//!
//! let chain = MiddlewareChain::new(Arc::new(RouterHandler::new(table)))
//!     .with_middleware(Arc::new(TransactionMiddleware::new(factory)));
//! // chain.respond(request).await drives one request end to end
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod http;
pub mod pagination;
pub mod router;
pub mod service;
pub mod transaction;

pub use error::{ApiError, ApiResult, ErrorEnvelope};
pub use http::{ApiRequest, ApiResponse, Handler, Middleware, MiddlewareChain, SessionHandle};
pub use pagination::{Paged, PageQuery, PaginationConfig, PaginationMeta};
pub use router::{PathPattern, Route, RouteMatch, RouteTable, RouterHandler};
pub use service::{DeletePolicy, EntityMapper, EntityService};
pub use transaction::TransactionMiddleware;
