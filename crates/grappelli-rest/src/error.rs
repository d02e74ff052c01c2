//! Typed error taxonomy and the stable error envelope
//!
//! Four error classes cover everything the boundary layer needs to map a
//! failure to a status code: bad input, missing entity, no connection, or
//! a failed query. Internal detail (SQL text, connection addresses) stays
//! in the error source chain for logs and never reaches the envelope.

use grappelli_db::error::DatabaseError;
use grappelli_db::pool::PoolError;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};

/// Errors exposed to the boundary layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	/// Malformed or out-of-range caller input. Never retried.
	#[error("{message}")]
	Validation {
		message: String,
		details: Option<serde_json::Value>,
	},

	/// The referenced entity does not exist.
	#[error("{message}")]
	NotFound { message: String },

	/// A connection could not be acquired for this request.
	#[error(transparent)]
	Pool(#[from] PoolError),

	/// A query, commit, or rollback failed after a session was obtained.
	#[error(transparent)]
	Persistence(#[from] DatabaseError),
}

impl ApiError {
	pub fn validation(message: impl Into<String>) -> Self {
		ApiError::Validation {
			message: message.into(),
			details: None,
		}
	}

	pub fn validation_with_details(
		message: impl Into<String>,
		details: serde_json::Value,
	) -> Self {
		ApiError::Validation {
			message: message.into(),
			details: Some(details),
		}
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		ApiError::NotFound {
			message: message.into(),
		}
	}

	/// Status code the boundary layer maps this error to.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_rest::error::ApiError;
	/// use hyper::StatusCode;
	///
	/// assert_eq!(ApiError::validation("bad page").status_code(), StatusCode::BAD_REQUEST);
	/// assert_eq!(ApiError::not_found("no such client").status_code(), StatusCode::NOT_FOUND);
	/// ```
	pub fn status_code(&self) -> StatusCode {
		match self {
			ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
			ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
			ApiError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
			ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The user-visible envelope for this error.
	///
	/// Validation and not-found messages are caller-facing and pass
	/// through; pool and persistence failures collapse to a generic
	/// message so no connection or SQL detail leaks.
	pub fn envelope(&self) -> ErrorEnvelope {
		match self {
			ApiError::Validation { message, details } => ErrorEnvelope {
				message: message.clone(),
				details: details.clone(),
			},
			ApiError::NotFound { message } => ErrorEnvelope {
				message: message.clone(),
				details: None,
			},
			ApiError::Pool(_) => ErrorEnvelope {
				message: "database temporarily unavailable".to_string(),
				details: None,
			},
			ApiError::Persistence(_) => ErrorEnvelope {
				message: "internal server error".to_string(),
				details: None,
			},
		}
	}
}

/// Stable wire shape of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_pool_error_maps_to_service_unavailable() {
		// Arrange
		let error = ApiError::from(PoolError::Closed);

		// Assert
		assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
	}

	#[rstest]
	fn test_persistence_error_maps_to_internal_error() {
		// Arrange
		let error = ApiError::from(DatabaseError::SessionClosed);

		// Assert
		assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
	}

	#[rstest]
	fn test_persistence_envelope_hides_internal_detail() {
		// Arrange
		let error = ApiError::from(DatabaseError::QueryBuild(
			"clients: unknown column secret_sql".to_string(),
		));

		// Act
		let envelope = error.envelope();

		// Assert
		assert_eq!(envelope.message, "internal server error");
		assert!(envelope.details.is_none());
	}

	#[rstest]
	fn test_validation_envelope_carries_details() {
		// Arrange
		let error = ApiError::validation_with_details(
			"page must be a positive integer",
			serde_json::json!({"page": "zero"}),
		);

		// Act
		let envelope = error.envelope();
		let wire = serde_json::to_value(&envelope).unwrap();

		// Assert
		assert_eq!(wire["message"], serde_json::json!("page must be a positive integer"));
		assert_eq!(wire["details"]["page"], serde_json::json!("zero"));
	}

	#[rstest]
	fn test_envelope_omits_absent_details() {
		// Arrange
		let envelope = ApiError::not_found("client 9 not found").envelope();

		// Act
		let wire = serde_json::to_value(&envelope).unwrap();

		// Assert
		assert!(wire.as_object().unwrap().get("details").is_none());
	}
}
