//! Request handlers of the booking API.

pub mod identity;
pub mod orders;
pub mod walkers;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query};
use booking_core::BookingError;
use booking_types::{APIError, ErrorKind};
use serde::de::DeserializeOwned;

/// Maps a core failure onto the HTTP taxonomy. Dependency detail is logged
/// and replaced by a generic message.
pub(crate) fn api_error(operation: &'static str, err: BookingError) -> APIError {
	match err.kind() {
		ErrorKind::DependencyFailure => {
			tracing::error!(operation, error = %err, "Request failed on a dependency");
		},
		kind => {
			tracing::warn!(operation, kind = kind.code(), error = %err, "Request rejected");
		},
	}
	APIError::from_kind(err.kind(), err.public_message())
}

fn bad_request(message: String) -> APIError {
	APIError::from_kind(ErrorKind::Validation, message)
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, APIError> {
	payload
		.map(|Json(body)| body)
		.map_err(|rejection| bad_request(rejection.body_text()))
}

/// Parses an optional JSON body; an empty body yields the default value.
pub(crate) fn optional_json_body<T>(body: Bytes) -> Result<T, APIError>
where
	T: DeserializeOwned + Default,
{
	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(T::default());
	}
	serde_json::from_slice(&body).map_err(|e| bad_request(format!("Invalid JSON body: {}", e)))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, APIError> {
	query
		.map(|Query(params)| params)
		.map_err(|rejection| bad_request(rejection.body_text()))
}
