//! Unit-of-work transaction middleware
//!
//! Before the handler runs, a session is created and attached to the
//! request, with a transaction opened for mutating operation classes.
//! After the handler, the transaction is finalized exactly once from the
//! final outcome, and the session is closed (releasing its connection)
//! on every path.

use crate::error::{ApiError, ApiResult};
use crate::http::{ApiRequest, ApiResponse, Handler, Middleware, SessionHandle};
use grappelli_db::session::SessionFactory;
use std::sync::Arc;

/// Middleware owning the request-scoped session lifecycle.
pub struct TransactionMiddleware {
	factory: Arc<SessionFactory>,
}

impl TransactionMiddleware {
	pub fn new(factory: Arc<SessionFactory>) -> Self {
		Self { factory }
	}
}

#[async_trait::async_trait]
impl Middleware for TransactionMiddleware {
	async fn process(
		&self,
		mut request: ApiRequest,
		next: Arc<dyn Handler>,
	) -> ApiResult<ApiResponse> {
		let session = self.factory.create_session().await.map_err(ApiError::from)?;
		let session_id = session.id();
		let mutating = request.is_mutating();
		let handle: SessionHandle = Arc::new(tokio::sync::Mutex::new(session));

		// Read-only requests get a session but no transaction; they skip
		// finalization entirely.
		if mutating {
			let begun = handle.lock().await.begin().await;
			if let Err(error) = begun {
				handle.lock().await.close().await;
				return Err(error.into());
			}
		}

		request.session = Some(handle.clone());
		let outcome = next.handle(request).await;

		if mutating {
			let success = match &outcome {
				Ok(response) => response.is_success(),
				Err(_) => false,
			};
			let mut session = handle.lock().await;
			match session.finalize(success).await {
				Ok(Some(state)) => {
					tracing::debug!(session = %session_id, ?state, "transaction finalized")
				}
				Ok(None) => {}
				// The response is already determined; a finalization
				// failure is surfaced to observability, not to the client.
				Err(error) => {
					tracing::error!(session = %session_id, %error, "transaction finalization failed")
				}
			}
		}

		handle.lock().await.close().await;
		outcome
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::MiddlewareChain;
	use grappelli_db::pool::{ConnectionPool, PoolConfig};
	use grappelli_db::testing::RecordingConnector;
	use hyper::{Method, StatusCode};
	use rstest::rstest;

	/// Handler scripted per test: status to answer, or a typed error.
	struct ScriptedHandler {
		status: StatusCode,
		fail: bool,
	}

	#[async_trait::async_trait]
	impl Handler for ScriptedHandler {
		async fn handle(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
			// Touch the session the way a real controller would
			let handle = request.session()?;
			let mut session = handle.lock().await;
			assert!(session.pending_mutations() == 0);
			drop(session);
			if self.fail {
				return Err(ApiError::validation("scripted failure"));
			}
			Ok(ApiResponse::with_status(self.status))
		}
	}

	fn chain(connector: Arc<RecordingConnector>, handler: ScriptedHandler) -> MiddlewareChain {
		let pool = Arc::new(
			ConnectionPool::new(connector, PoolConfig::new().with_min_connections(0)).unwrap(),
		);
		let factory = Arc::new(SessionFactory::new(pool));
		MiddlewareChain::new(Arc::new(handler))
			.with_middleware(Arc::new(TransactionMiddleware::new(factory)))
	}

	#[rstest]
	#[tokio::test]
	async fn test_successful_mutation_commits_exactly_once() {
		// Arrange
		let connector = Arc::new(RecordingConnector::sqlite());
		let chain = chain(connector.clone(), ScriptedHandler {
			status: StatusCode::CREATED,
			fail: false,
		});

		// Act
		let response = chain.respond(ApiRequest::new(Method::POST, "/clients")).await;

		// Assert: one commit, no rollback
		assert_eq!(response.status, StatusCode::CREATED);
		assert_eq!(connector.count_containing("COMMIT"), 1);
		assert_eq!(connector.count_containing("ROLLBACK"), 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_error_status_rolls_back_even_without_handler_error() {
		// Arrange: the handler completes normally but answers 422
		let connector = Arc::new(RecordingConnector::sqlite());
		let chain = chain(connector.clone(), ScriptedHandler {
			status: StatusCode::UNPROCESSABLE_ENTITY,
			fail: false,
		});

		// Act
		let response = chain.respond(ApiRequest::new(Method::POST, "/clients")).await;

		// Assert
		assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
		assert_eq!(connector.count_containing("ROLLBACK"), 1);
		assert_eq!(connector.count_containing("COMMIT"), 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_handler_error_rolls_back() {
		// Arrange
		let connector = Arc::new(RecordingConnector::sqlite());
		let chain = chain(connector.clone(), ScriptedHandler {
			status: StatusCode::OK,
			fail: true,
		});

		// Act
		let response = chain.respond(ApiRequest::new(Method::PATCH, "/clients/1")).await;

		// Assert: the typed error surfaced and the transaction rolled back
		assert_eq!(response.status, StatusCode::BAD_REQUEST);
		assert_eq!(connector.count_containing("ROLLBACK"), 1);
		assert_eq!(connector.count_containing("COMMIT"), 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_read_request_skips_transaction_entirely() {
		// Arrange
		let connector = Arc::new(RecordingConnector::sqlite());
		let chain = chain(connector.clone(), ScriptedHandler {
			status: StatusCode::OK,
			fail: false,
		});

		// Act
		let response = chain.respond(ApiRequest::new(Method::GET, "/clients")).await;

		// Assert: no BEGIN, no COMMIT, no ROLLBACK
		assert_eq!(response.status, StatusCode::OK);
		assert!(connector.statements().is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_exactly_one_finalize_per_request() {
		// Arrange: several mutating requests through the same chain
		let connector = Arc::new(RecordingConnector::sqlite());
		let chain = chain(connector.clone(), ScriptedHandler {
			status: StatusCode::OK,
			fail: false,
		});

		// Act
		for _ in 0..3 {
			chain.respond(ApiRequest::new(Method::PUT, "/clients/1")).await;
		}

		// Assert: one finalize per request, never both kinds
		assert_eq!(connector.count_containing("BEGIN"), 3);
		assert_eq!(connector.count_containing("COMMIT"), 3);
		assert_eq!(connector.count_containing("ROLLBACK"), 0);
	}
}
