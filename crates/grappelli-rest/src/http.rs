//! Boundary types and the middleware chain
//!
//! The HTTP server itself is an external collaborator. It hands the core
//! an [`ApiRequest`] (the parsed controller invocation) and receives an
//! [`ApiResponse`] or a typed [`ApiError`] back. Cross-cutting concerns,
//! the unit-of-work transaction above all, compose as an explicit
//! [`Middleware`] chain around the routed handler.

use crate::error::{ApiError, ApiResult};
use grappelli_db::error::DatabaseError;
use grappelli_db::session::Session;
use hyper::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to the request's session.
///
/// The mutex serializes statements from one request's handler and the
/// transaction middleware; it is never shared across requests.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

/// A parsed controller invocation.
#[derive(Default)]
pub struct ApiRequest {
	pub method: Method,
	pub path: String,
	/// Captures from the matched route pattern (`/clients/{id}`).
	pub path_params: HashMap<String, String>,
	pub query: HashMap<String, String>,
	pub body: Option<serde_json::Value>,
	/// Attached by the transaction middleware before the handler runs.
	pub session: Option<SessionHandle>,
}

impl ApiRequest {
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			..Default::default()
		}
	}

	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.insert(key.into(), value.into());
		self
	}

	pub fn with_body(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);
		self
	}

	/// Whether this request runs a mutating operation class and therefore
	/// participates in transaction finalization.
	pub fn is_mutating(&self) -> bool {
		matches!(
			self.method,
			Method::POST | Method::PUT | Method::PATCH | Method::DELETE
		)
	}

	/// The session attached to this request.
	pub fn session(&self) -> ApiResult<SessionHandle> {
		self.session
			.clone()
			.ok_or(ApiError::Persistence(DatabaseError::SessionClosed))
	}

	/// A required path parameter, e.g. the `{id}` capture.
	pub fn path_param(&self, name: &str) -> ApiResult<&str> {
		self.path_params
			.get(name)
			.map(String::as_str)
			.ok_or_else(|| ApiError::validation(format!("missing path parameter {name}")))
	}
}

/// The response value handed back to the boundary layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
	pub status: StatusCode,
	pub body: Option<serde_json::Value>,
}

impl ApiResponse {
	pub fn ok() -> Self {
		Self {
			status: StatusCode::OK,
			body: None,
		}
	}

	pub fn created() -> Self {
		Self {
			status: StatusCode::CREATED,
			body: None,
		}
	}

	pub fn no_content() -> Self {
		Self {
			status: StatusCode::NO_CONTENT,
			body: None,
		}
	}

	pub fn with_status(status: StatusCode) -> Self {
		Self { status, body: None }
	}

	pub fn with_json(mut self, body: &impl serde::Serialize) -> ApiResult<Self> {
		let value = serde_json::to_value(body)
			.map_err(|e| ApiError::Persistence(DatabaseError::Decode(e.to_string())))?;
		self.body = Some(value);
		Ok(self)
	}

	/// Whether the status is a success class (2xx).
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Render a typed error as its envelope response.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_rest::error::ApiError;
	/// use grappelli_rest::http::ApiResponse;
	/// use hyper::StatusCode;
	///
	/// let response = ApiResponse::from_error(&ApiError::not_found("client 9 not found"));
	/// assert_eq!(response.status, StatusCode::NOT_FOUND);
	/// ```
	pub fn from_error(error: &ApiError) -> Self {
		let envelope = error.envelope();
		Self {
			status: error.status_code(),
			// Envelope serialization cannot fail: it is two plain fields
			body: serde_json::to_value(&envelope).ok(),
		}
	}
}

/// Handler trait for processing requests.
///
/// All routed endpoints implement this; middleware composes around it.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
	async fn handle(&self, request: ApiRequest) -> ApiResult<ApiResponse>;
}

#[async_trait::async_trait]
impl<T: Handler + ?Sized> Handler for Arc<T> {
	async fn handle(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
		(**self).handle(request).await
	}
}

/// Middleware wraps handlers to add cross-cutting concerns.
///
/// A middleware may act before calling `next`, after it returns, or on
/// both sides; the transaction middleware uses the after side to observe
/// the final outcome.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
	async fn process(&self, request: ApiRequest, next: Arc<dyn Handler>) -> ApiResult<ApiResponse>;
}

/// Composes middleware around a terminal handler, in registration order.
pub struct MiddlewareChain {
	middlewares: Vec<Arc<dyn Middleware>>,
	handler: Arc<dyn Handler>,
}

impl MiddlewareChain {
	pub fn new(handler: Arc<dyn Handler>) -> Self {
		Self {
			middlewares: Vec::new(),
			handler,
		}
	}

	pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
		self.middlewares.push(middleware);
		self
	}

	/// Handle a request and render any error as its envelope response.
	///
	/// This is what a server adapter calls: the typed error is decided
	/// inside the chain (so the transaction middleware sees it), the wire
	/// shape outside.
	pub async fn respond(&self, request: ApiRequest) -> ApiResponse {
		match self.handle_inner(request).await {
			Ok(response) => response,
			Err(error) => {
				tracing::debug!(%error, "request failed");
				ApiResponse::from_error(&error)
			}
		}
	}

	async fn handle_inner(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
		let mut current: Arc<dyn Handler> = self.handler.clone();
		for middleware in self.middlewares.iter().rev() {
			current = Arc::new(ComposedHandler {
				middleware: middleware.clone(),
				next: current,
			});
		}
		current.handle(request).await
	}
}

#[async_trait::async_trait]
impl Handler for MiddlewareChain {
	async fn handle(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
		self.handle_inner(request).await
	}
}

struct ComposedHandler {
	middleware: Arc<dyn Middleware>,
	next: Arc<dyn Handler>,
}

#[async_trait::async_trait]
impl Handler for ComposedHandler {
	async fn handle(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
		self.middleware.process(request, self.next.clone()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	struct EchoHandler {
		body: &'static str,
	}

	#[async_trait::async_trait]
	impl Handler for EchoHandler {
		async fn handle(&self, _request: ApiRequest) -> ApiResult<ApiResponse> {
			ApiResponse::ok().with_json(&serde_json::json!({ "from": self.body }))
		}
	}

	struct TagMiddleware {
		tag: &'static str,
	}

	#[async_trait::async_trait]
	impl Middleware for TagMiddleware {
		async fn process(
			&self,
			request: ApiRequest,
			next: Arc<dyn Handler>,
		) -> ApiResult<ApiResponse> {
			let mut response = next.handle(request).await?;
			if let Some(serde_json::Value::Object(map)) = response.body.as_mut() {
				let tags = map
					.entry("tags")
					.or_insert_with(|| serde_json::Value::Array(Vec::new()));
				if let Some(list) = tags.as_array_mut() {
					list.push(serde_json::Value::String(self.tag.to_string()));
				}
			}
			Ok(response)
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_chain_runs_middleware_in_registration_order() {
		// Arrange
		let chain = MiddlewareChain::new(Arc::new(EchoHandler { body: "handler" }))
			.with_middleware(Arc::new(TagMiddleware { tag: "outer" }))
			.with_middleware(Arc::new(TagMiddleware { tag: "inner" }));

		// Act
		let response = chain
			.handle(ApiRequest::new(Method::GET, "/"))
			.await
			.unwrap();

		// Assert: inner middleware tags first on the way out
		let tags = response.body.unwrap()["tags"].clone();
		assert_eq!(tags, serde_json::json!(["inner", "outer"]));
	}

	#[rstest]
	#[tokio::test]
	async fn test_respond_renders_error_envelope() {
		// Arrange
		struct FailingHandler;

		#[async_trait::async_trait]
		impl Handler for FailingHandler {
			async fn handle(&self, _request: ApiRequest) -> ApiResult<ApiResponse> {
				Err(ApiError::not_found("client 7 not found"))
			}
		}

		let chain = MiddlewareChain::new(Arc::new(FailingHandler));

		// Act
		let response = chain.respond(ApiRequest::new(Method::GET, "/clients/7")).await;

		// Assert
		assert_eq!(response.status, StatusCode::NOT_FOUND);
		assert_eq!(
			response.body.unwrap()["message"],
			serde_json::json!("client 7 not found")
		);
	}

	#[rstest]
	#[case(Method::POST, true)]
	#[case(Method::PUT, true)]
	#[case(Method::PATCH, true)]
	#[case(Method::DELETE, true)]
	#[case(Method::GET, false)]
	#[case(Method::HEAD, false)]
	fn test_mutating_method_classification(#[case] method: Method, #[case] expected: bool) {
		// Act
		let request = ApiRequest::new(method, "/clients");

		// Assert
		assert_eq!(request.is_mutating(), expected);
	}

	#[rstest]
	fn test_missing_session_is_an_error() {
		// Arrange
		let request = ApiRequest::new(Method::GET, "/clients");

		// Act & Assert
		assert!(request.session().is_err());
	}
}
