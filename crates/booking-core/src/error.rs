//! Errors surfaced by the engine's operations.
//!
//! Every variant maps onto exactly one [`ErrorKind`]. Collaborator errors
//! are converted at the crate boundary so that callers only ever see the
//! taxonomy kind and a reason.

use booking_geo::GeoError;
use booking_payment::PaymentError;
use booking_pricing::PricingError;
use booking_storage::{LockError, OrderStoreError, StorageError};
use booking_types::ErrorKind;
use thiserror::Error;

/// Reason returned to callers that lose the per-order lock.
pub const LOCKED_RETRY: &str = "Locked, retry";

#[derive(Debug, Error)]
pub enum BookingError {
	#[error("{0}")]
	Validation(String),
	#[error("{0}")]
	NotFound(String),
	/// Stale status, concurrent modification or an expired lock.
	#[error("{0}")]
	Conflict(String),
	/// The per-order lock is held by another request.
	#[error("Locked, retry")]
	Locked,
	#[error("{0}")]
	NoCandidates(String),
	#[error("{0}")]
	Unauthorized(String),
	/// A collaborator is unavailable. The detail is for logs only.
	#[error("Dependency failure: {0}")]
	Dependency(String),
}

impl BookingError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			BookingError::Validation(_) => ErrorKind::Validation,
			BookingError::NotFound(_) => ErrorKind::NotFound,
			BookingError::Conflict(_) | BookingError::Locked => ErrorKind::Conflict,
			BookingError::NoCandidates(_) => ErrorKind::NoCandidates,
			BookingError::Unauthorized(_) => ErrorKind::Unauthorized,
			BookingError::Dependency(_) => ErrorKind::DependencyFailure,
		}
	}

	/// Reason safe to show across the interface boundary.
	pub fn public_message(&self) -> String {
		match self {
			BookingError::Dependency(_) => "A required service is temporarily unavailable".into(),
			other => other.to_string(),
		}
	}
}

impl From<OrderStoreError> for BookingError {
	fn from(err: OrderStoreError) -> Self {
		let message = err.to_string();
		match err.kind() {
			ErrorKind::Validation => BookingError::Validation(message),
			ErrorKind::NotFound => BookingError::NotFound(message),
			ErrorKind::Conflict => BookingError::Conflict(message),
			ErrorKind::NoCandidates => BookingError::NoCandidates(message),
			ErrorKind::Unauthorized => BookingError::Unauthorized(message),
			ErrorKind::DependencyFailure => BookingError::Dependency(message),
		}
	}
}

impl From<LockError> for BookingError {
	fn from(err: LockError) -> Self {
		match err {
			LockError::Contended(_) => BookingError::Locked,
			LockError::Expired(_) => BookingError::Conflict(err.to_string()),
			LockError::Storage(e) => BookingError::Dependency(e.to_string()),
		}
	}
}

impl From<StorageError> for BookingError {
	fn from(err: StorageError) -> Self {
		BookingError::Dependency(err.to_string())
	}
}

impl From<GeoError> for BookingError {
	fn from(err: GeoError) -> Self {
		match err {
			GeoError::NotFound(id) => BookingError::NotFound(format!("Walker not found: {}", id)),
			GeoError::InvalidPosition(_)
			| GeoError::InvalidProfile(_)
			| GeoError::FutureTimestamp(_) => {
				BookingError::Validation(err.to_string())
			},
			GeoError::QueryTimeout(_) | GeoError::Backend(_) | GeoError::Configuration(_) => {
				BookingError::Dependency(err.to_string())
			},
		}
	}
}

impl From<PricingError> for BookingError {
	fn from(err: PricingError) -> Self {
		BookingError::Validation(err.to_string())
	}
}

impl From<PaymentError> for BookingError {
	fn from(err: PaymentError) -> Self {
		BookingError::Dependency(err.to_string())
	}
}

impl From<validator::ValidationErrors> for BookingError {
	fn from(err: validator::ValidationErrors) -> Self {
		BookingError::Validation(err.to_string())
	}
}
