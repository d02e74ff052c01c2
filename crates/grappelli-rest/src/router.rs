//! Explicit route table
//!
//! Routes are plain data built at startup: a method, a path pattern, and a
//! handler reference. Dispatch is a table lookup, with no reflection and
//! no registration side effects.

use crate::error::{ApiError, ApiResult};
use crate::http::{ApiRequest, ApiResponse, Handler};
use hyper::Method;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Param(String),
}

/// A parsed path pattern with `{param}` captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
	segments: Vec<Segment>,
}

impl PathPattern {
	/// Parse a pattern like `/clients/{id}/orders`.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_rest::router::PathPattern;
	///
	/// let pattern = PathPattern::parse("/clients/{id}").unwrap();
	/// let params = pattern.matches("/clients/42").unwrap();
	/// assert_eq!(params["id"], "42");
	/// assert!(pattern.matches("/clients").is_none());
	/// ```
	pub fn parse(pattern: &str) -> Result<Self, String> {
		if !pattern.starts_with('/') {
			return Err(format!("pattern {pattern:?} must start with '/'"));
		}
		let mut segments = Vec::new();
		for raw in pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
			if let Some(name) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
				if name.is_empty() {
					return Err(format!("pattern {pattern:?} has an empty parameter name"));
				}
				segments.push(Segment::Param(name.to_string()));
			} else if raw.contains(['{', '}']) {
				return Err(format!("pattern {pattern:?} has a malformed segment {raw:?}"));
			} else {
				segments.push(Segment::Literal(raw.to_string()));
			}
		}
		Ok(Self { segments })
	}

	/// Match a concrete path, returning the captured parameters.
	pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
		let parts: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
		if parts.len() != self.segments.len() {
			return None;
		}
		let mut params = HashMap::new();
		for (segment, part) in self.segments.iter().zip(parts) {
			match segment {
				Segment::Literal(expected) if expected == part => {}
				Segment::Literal(_) => return None,
				Segment::Param(name) => {
					params.insert(name.clone(), part.to_string());
				}
			}
		}
		Some(params)
	}
}

/// One route: method + pattern + handler.
pub struct Route {
	method: Method,
	pattern: PathPattern,
	handler: Arc<dyn Handler>,
}

impl Route {
	pub fn new(method: Method, pattern: &str, handler: Arc<dyn Handler>) -> Result<Self, String> {
		Ok(Self {
			method,
			pattern: PathPattern::parse(pattern)?,
			handler,
		})
	}
}

/// Outcome of resolving a request against the table.
pub enum RouteMatch {
	Found {
		handler: Arc<dyn Handler>,
		params: HashMap<String, String>,
	},
	/// The path exists but not for this method.
	MethodNotAllowed { allowed: Vec<Method> },
	NotFound,
}

/// The route table, built once at startup.
#[derive(Default)]
pub struct RouteTable {
	routes: Vec<Route>,
}

impl RouteTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_route(&mut self, route: Route) {
		self.routes.push(route);
	}

	pub fn with_route(mut self, route: Route) -> Self {
		self.routes.push(route);
		self
	}

	/// Resolve a method and path to a handler.
	pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch {
		let mut allowed = Vec::new();
		for route in &self.routes {
			if let Some(params) = route.pattern.matches(path) {
				if route.method == *method {
					return RouteMatch::Found {
						handler: route.handler.clone(),
						params,
					};
				}
				if !allowed.contains(&route.method) {
					allowed.push(route.method.clone());
				}
			}
		}
		if allowed.is_empty() {
			RouteMatch::NotFound
		} else {
			RouteMatch::MethodNotAllowed { allowed }
		}
	}
}

/// Terminal handler dispatching through a route table.
///
/// Composes with [`crate::http::MiddlewareChain`] as the innermost
/// handler, so middleware (the unit-of-work above all) wraps every routed
/// endpoint.
pub struct RouterHandler {
	table: RouteTable,
}

impl RouterHandler {
	pub fn new(table: RouteTable) -> Self {
		Self { table }
	}
}

#[async_trait::async_trait]
impl Handler for RouterHandler {
	async fn handle(&self, mut request: ApiRequest) -> ApiResult<ApiResponse> {
		match self.table.resolve(&request.method, &request.path) {
			RouteMatch::Found { handler, params } => {
				request.path_params = params;
				handler.handle(request).await
			}
			RouteMatch::MethodNotAllowed { allowed } => {
				let allowed: Vec<String> = allowed.iter().map(|m| m.to_string()).collect();
				Ok(ApiResponse {
					status: hyper::StatusCode::METHOD_NOT_ALLOWED,
					body: Some(serde_json::json!({
						"message": "method not allowed",
						"details": { "allowed": allowed },
					})),
				})
			}
			RouteMatch::NotFound => Err(ApiError::not_found(format!(
				"no route for {}",
				request.path
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	struct NamedHandler(&'static str);

	#[async_trait::async_trait]
	impl Handler for NamedHandler {
		async fn handle(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
			ApiResponse::ok().with_json(&serde_json::json!({
				"handler": self.0,
				"params": request.path_params,
			}))
		}
	}

	fn table() -> RouteTable {
		RouteTable::new()
			.with_route(Route::new(Method::GET, "/clients", Arc::new(NamedHandler("list"))).unwrap())
			.with_route(
				Route::new(Method::GET, "/clients/{id}", Arc::new(NamedHandler("get"))).unwrap(),
			)
			.with_route(
				Route::new(Method::POST, "/clients", Arc::new(NamedHandler("create"))).unwrap(),
			)
	}

	#[rstest]
	#[case("/clients/{id}", "/clients/42", true)]
	#[case("/clients/{id}", "/clients/42/orders", false)]
	#[case("/clients/{id}/orders", "/clients/42/orders", true)]
	#[case("/clients", "/clients/", true)]
	fn test_pattern_matching(#[case] pattern: &str, #[case] path: &str, #[case] matches: bool) {
		// Act
		let pattern = PathPattern::parse(pattern).unwrap();

		// Assert
		assert_eq!(pattern.matches(path).is_some(), matches);
	}

	#[rstest]
	#[case("clients")]
	#[case("/clients/{}")]
	#[case("/clients/{id")]
	fn test_malformed_patterns_rejected(#[case] pattern: &str) {
		// Act & Assert
		assert!(PathPattern::parse(pattern).is_err());
	}

	#[rstest]
	#[tokio::test]
	async fn test_dispatch_injects_path_params() {
		// Arrange
		let handler = RouterHandler::new(table());

		// Act
		let response = handler
			.handle(ApiRequest::new(Method::GET, "/clients/42"))
			.await
			.unwrap();

		// Assert
		let body = response.body.unwrap();
		assert_eq!(body["handler"], serde_json::json!("get"));
		assert_eq!(body["params"]["id"], serde_json::json!("42"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_unknown_path_is_not_found() {
		// Arrange
		let handler = RouterHandler::new(table());

		// Act
		let result = handler
			.handle(ApiRequest::new(Method::GET, "/unknown"))
			.await;

		// Assert
		assert!(matches!(result, Err(ApiError::NotFound { .. })));
	}

	#[rstest]
	#[tokio::test]
	async fn test_wrong_method_reports_allowed_set() {
		// Arrange
		let handler = RouterHandler::new(table());

		// Act
		let response = handler
			.handle(ApiRequest::new(Method::DELETE, "/clients"))
			.await
			.unwrap();

		// Assert
		assert_eq!(response.status, hyper::StatusCode::METHOD_NOT_ALLOWED);
		let allowed = response.body.unwrap()["details"]["allowed"].clone();
		assert_eq!(allowed, serde_json::json!(["GET", "POST"]));
	}
}
