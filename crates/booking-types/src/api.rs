//! API types for the booking HTTP surface.
//!
//! Request payloads validate their own shape with `validator`; business rules
//! (duration bounds per order type, booking horizon) are checked by the core.

use crate::{
	hourly_rate_in_bounds, ErrorKind, MatchCandidate, OrderType, PriceBreakdown, WalkerStatus,
	MAX_HOURLY_RATE,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use validator::Validate;

/// Request to create an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
	#[validate(length(min = 1, max = 64))]
	pub pet_id: String,
	#[serde(default)]
	pub order_type: OrderType,
	pub scheduled_at: DateTime<Utc>,
	#[validate(range(min = 1))]
	pub duration_minutes: u32,
	#[validate(range(min = -90.0, max = 90.0))]
	pub latitude: f64,
	#[validate(range(min = -180.0, max = 180.0))]
	pub longitude: f64,
	#[validate(length(max = 500))]
	pub address: Option<String>,
	#[validate(length(max = 1000))]
	pub special_instructions: Option<String>,
	#[validate(length(min = 1, max = 64))]
	pub preferred_walker_id: Option<String>,
}

/// Client-editable order details. Never price, schedule or duration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
	#[validate(length(max = 500))]
	pub address: Option<String>,
	#[validate(length(max = 1000))]
	pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
	#[validate(length(max = 500))]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackPointRequest {
	#[validate(range(min = -90.0, max = 90.0))]
	pub latitude: f64,
	#[validate(range(min = -180.0, max = 180.0))]
	pub longitude: f64,
	pub recorded_at: Option<DateTime<Utc>>,
	#[validate(range(min = 0.0))]
	pub accuracy_meters: Option<f64>,
	#[validate(range(min = 0.0))]
	pub speed_mps: Option<f64>,
	#[validate(range(min = 0.0, max = 360.0))]
	pub heading_degrees: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
	#[validate(range(min = 1, max = 5))]
	pub rating: u8,
	#[validate(length(max = 2000))]
	pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WalkerNotesRequest {
	#[validate(length(min = 1, max = 2000))]
	pub notes: String,
}

/// Periodic position report from the location-tracking collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PositionReport {
	#[validate(range(min = -90.0, max = 90.0))]
	pub latitude: f64,
	#[validate(range(min = -180.0, max = 180.0))]
	pub longitude: f64,
	/// Defaults to the time of receipt.
	pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerStatusRequest {
	pub status: WalkerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WalkerProfileRequest {
	#[validate(range(min = 0.0, max = 5.0))]
	pub rating: f64,
	#[serde(default)]
	pub rating_count: u32,
	#[validate(custom(function = "validate_hourly_rate"))]
	pub hourly_rate: Option<Decimal>,
}

fn validate_hourly_rate(rate: &Decimal) -> Result<(), validator::ValidationError> {
	if hourly_rate_in_bounds(*rate) {
		return Ok(());
	}
	let mut err = validator::ValidationError::new("hourly_rate");
	err.message = Some(format!("must be in (0, {}]", MAX_HOURLY_RATE).into());
	Err(err)
}

/// Query string of `GET /orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
	/// Comma-separated statuses.
	pub status: Option<String>,
	pub order_type: Option<OrderType>,
	pub from: Option<DateTime<Utc>>,
	pub to: Option<DateTime<Utc>>,
	pub page: Option<u32>,
	pub limit: Option<u32>,
}

/// Query string of `GET /orders/estimate`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EstimateQuery {
	#[validate(range(min = -90.0, max = 90.0))]
	pub latitude: f64,
	#[validate(range(min = -180.0, max = 180.0))]
	pub longitude: f64,
	#[validate(range(min = 1))]
	pub duration_minutes: u32,
	#[serde(default)]
	pub order_type: OrderType,
	pub scheduled_at: Option<DateTime<Utc>>,
}

/// Price estimate for a prospective order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateResponse {
	pub price: PriceBreakdown,
	/// Nearby available walkers, nearest first.
	pub walkers: Vec<MatchCandidate>,
	pub search_radius_meters: f64,
}

/// Order counters for one party.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatistics {
	pub total_orders: usize,
	pub status_counts: BTreeMap<String, usize>,
	/// Mean client rating received as a walker, 0 when none.
	pub average_rating: f64,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Validation failure (400)
	BadRequest {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Actor not permitted (403)
	Forbidden { error_type: String, message: String },
	/// Unknown resource (404)
	NotFound { error_type: String, message: String },
	/// Stale state or lock contention (409)
	Conflict {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Business outcome the caller cannot fix by retrying (422)
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Collaborator unavailable (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Builds the error for a taxonomy kind.
	pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
		let error_type = kind.code().to_string();
		let message = message.into();
		match kind {
			ErrorKind::Validation => APIError::BadRequest {
				error_type,
				message,
				details: None,
			},
			ErrorKind::Unauthorized => APIError::Forbidden {
				error_type,
				message,
			},
			ErrorKind::NotFound => APIError::NotFound {
				error_type,
				message,
			},
			ErrorKind::Conflict => APIError::Conflict {
				error_type,
				message,
				retry_after: Some(1),
			},
			ErrorKind::NoCandidates => APIError::UnprocessableEntity {
				error_type,
				message,
				details: None,
			},
			ErrorKind::DependencyFailure => APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after: Some(5),
			},
		}
	}

	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Forbidden { .. } => 403,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message, details, retry_after) = match self {
			APIError::BadRequest {
				error_type,
				message,
				details,
			}
			| APIError::UnprocessableEntity {
				error_type,
				message,
				details,
			} => (error_type, message, details.clone(), None),
			APIError::Forbidden {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message, None, None),
			APIError::Conflict {
				error_type,
				message,
				retry_after,
			}
			| APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => (error_type, message, None, *retry_after),
		};
		ErrorResponse {
			error: error.clone(),
			message: message.clone(),
			details,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{}: {}", response.error, response.message)
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_kind_to_status_mapping() {
		let cases = [
			(ErrorKind::Validation, 400),
			(ErrorKind::Unauthorized, 403),
			(ErrorKind::NotFound, 404),
			(ErrorKind::Conflict, 409),
			(ErrorKind::NoCandidates, 422),
			(ErrorKind::DependencyFailure, 503),
		];
		for (kind, status) in cases {
			let err = APIError::from_kind(kind, "x");
			assert_eq!(err.status_code(), status);
			assert_eq!(err.to_error_response().error, kind.code());
		}
	}

	#[test]
	fn test_conflict_suggests_retry() {
		let response = APIError::from_kind(ErrorKind::Conflict, "Locked, retry").to_error_response();
		assert_eq!(response.retry_after, Some(1));
		assert_eq!(response.message, "Locked, retry");
	}

	#[test]
	fn test_profile_rate_bounds() {
		let profile = |rate: Option<Decimal>| WalkerProfileRequest {
			rating: 4.0,
			rating_count: 3,
			hourly_rate: rate,
		};
		assert!(profile(None).validate().is_ok());
		assert!(profile(Some(Decimal::from(800))).validate().is_ok());
		assert!(profile(Some(MAX_HOURLY_RATE)).validate().is_ok());
		for rate in [Decimal::ZERO, Decimal::from(-5), Decimal::MAX] {
			let errors = profile(Some(rate)).validate().unwrap_err();
			assert!(errors.field_errors().contains_key("hourly_rate"), "rate {}", rate);
		}
	}

	#[test]
	fn test_create_request_validation() {
		let request = CreateOrderRequest {
			pet_id: String::new(),
			order_type: OrderType::SingleWalk,
			scheduled_at: Utc::now(),
			duration_minutes: 30,
			latitude: 120.0,
			longitude: 37.6,
			address: None,
			special_instructions: None,
			preferred_walker_id: None,
		};
		let errors = request.validate().unwrap_err();
		let fields = errors.field_errors();
		assert!(fields.contains_key("pet_id"));
		assert!(fields.contains_key("latitude"));
	}
}
