//! Walker availability types.
//!
//! [`WalkerAvailability`] is an ephemeral projection owned by the geo index;
//! it is refreshed by position reports and is never authoritative for order
//! state. [`MatchCandidate`] is produced per matching round and discarded.

use crate::GeoPoint;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upper bound of a published hourly rate.
pub const MAX_HOURLY_RATE: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

/// Whether a published hourly rate lies in `(0, MAX_HOURLY_RATE]`.
pub fn hourly_rate_in_bounds(rate: Decimal) -> bool {
	rate > Decimal::ZERO && rate <= MAX_HOURLY_RATE
}

/// Self-reported walker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WalkerStatus {
	#[default]
	Available,
	Busy,
	Break,
}

impl FromStr for WalkerStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"available" => Ok(Self::Available),
			"busy" => Ok(Self::Busy),
			"break" => Ok(Self::Break),
			other => Err(format!("unknown walker status '{}'", other)),
		}
	}
}

/// Profile attributes a walker publishes alongside position reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WalkerProfile {
	pub rating: f64,
	#[serde(default)]
	pub rating_count: u32,
	#[serde(default)]
	pub hourly_rate: Option<Decimal>,
}

/// Last-known position and availability of a walker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkerAvailability {
	pub walker_id: String,
	pub position: GeoPoint,
	pub last_seen: DateTime<Utc>,
	/// Count of active (CONFIRMED or IN_PROGRESS) orders.
	pub load: u32,
	pub status: WalkerStatus,
	pub rating: f64,
	pub rating_count: u32,
	pub hourly_rate: Option<Decimal>,
}

impl WalkerAvailability {
	/// Whether the last report is older than `stale_after`.
	pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
		now - self.last_seen > stale_after
	}
}

/// Nearby available walkers and the radius the search stopped at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyWalkers {
	/// Nearest first.
	pub walkers: Vec<MatchCandidate>,
	pub radius_meters: f64,
}

/// A ranked candidate produced by one matching round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
	pub walker_id: String,
	pub distance_meters: f64,
	pub eta_minutes: u32,
	pub rating: f64,
	pub hourly_rate: Option<Decimal>,
	pub load: u32,
	pub score: f64,
}
