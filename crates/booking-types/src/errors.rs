//! Error taxonomy exposed across the interface boundary.
//!
//! Every failure reported to a caller carries exactly one [`ErrorKind`] and a
//! human-readable reason. Crate-internal error enums map onto these kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
	/// Malformed or missing fields; rejected before any state change.
	Validation,
	/// Unknown order or walker.
	NotFound,
	/// Failed compare-and-swap or lock contention. Re-fetch and retry.
	Conflict,
	/// Matching exhausted its retry budget.
	NoCandidates,
	/// Payment, geo index or cache unavailable.
	DependencyFailure,
	/// Actor not permitted for the requested operation.
	Unauthorized,
}

impl ErrorKind {
	/// Machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			ErrorKind::Validation => "VALIDATION_ERROR",
			ErrorKind::NotFound => "NOT_FOUND",
			ErrorKind::Conflict => "CONFLICT",
			ErrorKind::NoCandidates => "NO_CANDIDATES",
			ErrorKind::DependencyFailure => "DEPENDENCY_FAILURE",
			ErrorKind::Unauthorized => "UNAUTHORIZED",
		}
	}

	/// Whether the caller may retry the same request after re-fetching.
	pub fn is_retryable(&self) -> bool {
		matches!(self, ErrorKind::Conflict | ErrorKind::DependencyFailure)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.code())
	}
}
