//! Order types for the booking engine.
//!
//! An order is the central entity: a single bookable service instance between
//! a client and a walker. Its status history is stored separately from the
//! order record (see [`StatusTransition`]) and keyed by order id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an order.
///
/// Exactly one value is current at any time. `Completed`, `Cancelled` and
/// `NoWalker` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
	/// Created and waiting for a matching round.
	Pending,
	/// Offered to one or more ranked walkers.
	Offered,
	/// Accepted by a walker.
	Confirmed,
	/// Service is being rendered.
	InProgress,
	/// Service rendered.
	Completed,
	/// Cancelled by a party.
	Cancelled,
	/// Matching exhausted its retry budget.
	NoWalker,
}

impl OrderStatus {
	/// Returns the wire representation of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "PENDING",
			OrderStatus::Offered => "OFFERED",
			OrderStatus::Confirmed => "CONFIRMED",
			OrderStatus::InProgress => "IN_PROGRESS",
			OrderStatus::Completed => "COMPLETED",
			OrderStatus::Cancelled => "CANCELLED",
			OrderStatus::NoWalker => "NO_WALKER",
		}
	}

	/// Returns an iterator over all statuses.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Pending,
			Self::Offered,
			Self::Confirmed,
			Self::InProgress,
			Self::Completed,
			Self::Cancelled,
			Self::NoWalker,
		]
		.into_iter()
	}

	/// Whether no further transitions are permitted from this status.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::NoWalker
		)
	}

	/// Whether an order in this status must have an assigned walker.
	pub fn requires_walker(&self) -> bool {
		matches!(
			self,
			OrderStatus::Confirmed | OrderStatus::InProgress | OrderStatus::Completed
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized = s.trim().to_ascii_uppercase();
		OrderStatus::all()
			.find(|status| status.as_str() == normalized)
			.ok_or_else(|| format!("unknown order status '{}'", s))
	}
}

/// Closed set of bookable services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
	/// One-off walk.
	#[default]
	SingleWalk,
	/// Walk booked as part of a recurring arrangement.
	RegularWalk,
	/// In-home pet sitting.
	PetSitting,
	/// Overnight boarding at the walker's place.
	PetBoarding,
}

impl OrderType {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderType::SingleWalk => "single_walk",
			OrderType::RegularWalk => "regular_walk",
			OrderType::PetSitting => "pet_sitting",
			OrderType::PetBoarding => "pet_boarding",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::SingleWalk,
			Self::RegularWalk,
			Self::PetSitting,
			Self::PetBoarding,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized = s.trim().to_ascii_lowercase();
		OrderType::all()
			.find(|kind| kind.as_str() == normalized)
			.ok_or_else(|| format!("unknown order type '{}'", s))
	}
}

/// Role of the party performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Client,
	Walker,
	/// Timers and background workers.
	System,
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"client" => Ok(Role::Client),
			"walker" => Ok(Role::Walker),
			"system" => Ok(Role::System),
			other => Err(format!("unknown role '{}'", other)),
		}
	}
}

/// An already-authenticated party performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
	pub party_id: String,
	pub role: Role,
}

impl Actor {
	/// Identifier recorded for transitions driven by the engine itself.
	pub const SYSTEM_ID: &'static str = "system";

	pub fn new(party_id: impl Into<String>, role: Role) -> Self {
		Self {
			party_id: party_id.into(),
			role,
		}
	}

	pub fn client(party_id: impl Into<String>) -> Self {
		Self::new(party_id, Role::Client)
	}

	pub fn walker(party_id: impl Into<String>) -> Self {
		Self::new(party_id, Role::Walker)
	}

	pub fn system() -> Self {
		Self::new(Self::SYSTEM_ID, Role::System)
	}
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
	pub latitude: f64,
	pub longitude: f64,
}

impl GeoPoint {
	pub fn new(latitude: f64, longitude: f64) -> Self {
		Self {
			latitude,
			longitude,
		}
	}

	/// Whether both coordinates are finite and within their ranges.
	pub fn is_valid(&self) -> bool {
		self.latitude.is_finite()
			&& self.longitude.is_finite()
			&& (-90.0..=90.0).contains(&self.latitude)
			&& (-180.0..=180.0).contains(&self.longitude)
	}
}

/// Output of the pricing calculator, stored on the order at OFFERED.
///
/// Inputs are recorded next to the amounts so that the breakdown can be
/// audited and recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
	pub order_type: OrderType,
	pub duration_minutes: u32,
	pub hourly_rate: Decimal,
	/// Per-type multiplier from the order-type rules table.
	pub rate_multiplier: Decimal,
	pub demand_multiplier: Decimal,
	pub base_amount: Decimal,
	pub commission: Decimal,
	pub walker_earnings: Decimal,
	pub total: Decimal,
	pub currency: String,
}

/// One entry of the append-only status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
	/// `None` for the creation entry.
	pub from: Option<OrderStatus>,
	pub to: OrderStatus,
	pub actor: Actor,
	pub at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// A timestamped point of the live track recorded during IN_PROGRESS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
	pub latitude: f64,
	pub longitude: f64,
	pub recorded_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub accuracy_meters: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub speed_mps: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub heading_degrees: Option<f64>,
}

/// The current offer round of an OFFERED order.
///
/// Only walker ids are persisted; the ranked candidates that produced them
/// are discarded once the offer is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
	pub walker_ids: Vec<String>,
	pub round: u32,
	pub radius_meters: f64,
	pub offered_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

impl Offer {
	pub fn includes(&self, walker_id: &str) -> bool {
		self.walker_ids.iter().any(|id| id == walker_id)
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}
}

/// A rating left by one party about the other after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
	pub rating: u8,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub comment: Option<String>,
	pub created_at: DateTime<Utc>,
}

/// A booking between a client and a walker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	pub id: String,
	pub client_id: String,
	/// Set iff status is CONFIRMED, IN_PROGRESS or COMPLETED.
	pub walker_id: Option<String>,
	pub pet_id: String,
	pub order_type: OrderType,
	pub status: OrderStatus,
	pub scheduled_at: DateTime<Utc>,
	pub duration_minutes: u32,
	pub location: GeoPoint,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub address: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special_instructions: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub walker_notes: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub preferred_walker_id: Option<String>,
	/// Computed once at OFFERED and immutable afterwards.
	#[serde(default)]
	pub price: Option<PriceBreakdown>,
	#[serde(default)]
	pub offer: Option<Offer>,
	/// Number of matching rounds consumed so far.
	#[serde(default)]
	pub matching_round: u32,
	#[serde(default)]
	pub track: Vec<TrackPoint>,
	#[serde(default)]
	pub payment_ref: Option<String>,
	#[serde(default)]
	pub payment_pending: bool,
	#[serde(default)]
	pub refund_pending: bool,
	#[serde(default)]
	pub refunded: bool,
	#[serde(default)]
	pub cancelled_by: Option<String>,
	#[serde(default)]
	pub cancellation_reason: Option<String>,
	#[serde(default)]
	pub client_review: Option<Review>,
	#[serde(default)]
	pub walker_review: Option<Review>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	#[serde(default)]
	pub confirmed_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub started_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
	/// Whether the party is the client or the assigned walker.
	pub fn is_party(&self, party_id: &str) -> bool {
		self.client_id == party_id || self.walker_id.as_deref() == Some(party_id)
	}

	/// The client and, if assigned, the walker.
	pub fn party_ids(&self) -> Vec<String> {
		let mut parties = vec![self.client_id.clone()];
		if let Some(walker_id) = &self.walker_id {
			parties.push(walker_id.clone());
		}
		parties
	}

	/// Scheduled end of the service.
	pub fn scheduled_end(&self) -> DateTime<Utc> {
		self.scheduled_at + chrono::Duration::minutes(i64::from(self.duration_minutes))
	}

	/// Whether `[scheduled_at, scheduled_end)` intersects the other order's window.
	pub fn overlaps(&self, other: &Order) -> bool {
		self.scheduled_at < other.scheduled_end() && other.scheduled_at < self.scheduled_end()
	}

	/// Amount the client owes, if priced.
	pub fn total(&self) -> Option<Decimal> {
		self.price.as_ref().map(|p| p.total)
	}

	/// Checks the structural invariants that must hold for every stored snapshot.
	pub fn check_invariants(&self) -> Result<(), String> {
		if self.status.requires_walker() != self.walker_id.is_some() {
			return Err(format!(
				"walker_id must be set iff status is CONFIRMED, IN_PROGRESS or COMPLETED (status {}, walker {:?})",
				self.status, self.walker_id
			));
		}

		let mut previous = self.created_at;
		for (name, ts) in [
			("confirmed_at", self.confirmed_at),
			("started_at", self.started_at),
			("completed_at", self.completed_at),
		] {
			if let Some(ts) = ts {
				if ts < previous {
					return Err(format!("{} precedes an earlier lifecycle timestamp", name));
				}
				previous = ts;
			}
		}

		if let Some(cancelled_at) = self.cancelled_at {
			if cancelled_at < self.created_at {
				return Err("cancelled_at precedes created_at".into());
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_order() -> Order {
		let now = Utc::now();
		Order {
			id: "order-1".into(),
			client_id: "client-1".into(),
			walker_id: None,
			pet_id: "pet-1".into(),
			order_type: OrderType::SingleWalk,
			status: OrderStatus::Pending,
			scheduled_at: now + chrono::Duration::hours(1),
			duration_minutes: 60,
			location: GeoPoint::new(55.75, 37.61),
			address: None,
			special_instructions: None,
			walker_notes: None,
			preferred_walker_id: None,
			price: None,
			offer: None,
			matching_round: 0,
			track: Vec::new(),
			payment_ref: None,
			payment_pending: false,
			refund_pending: false,
			refunded: false,
			cancelled_by: None,
			cancellation_reason: None,
			client_review: None,
			walker_review: None,
			created_at: now,
			updated_at: now,
			confirmed_at: None,
			started_at: None,
			completed_at: None,
			cancelled_at: None,
		}
	}

	#[test]
	fn test_status_parsing_is_case_insensitive() {
		assert_eq!("in_progress".parse::<OrderStatus>(), Ok(OrderStatus::InProgress));
		assert_eq!("NO_WALKER".parse::<OrderStatus>(), Ok(OrderStatus::NoWalker));
		assert!("walking".parse::<OrderStatus>().is_err());
	}

	#[test]
	fn test_status_serializes_in_screaming_case() {
		let json = serde_json::to_string(&OrderStatus::InProgress).unwrap();
		assert_eq!(json, "\"IN_PROGRESS\"");
	}

	#[test]
	fn test_terminal_statuses() {
		let terminal: Vec<_> = OrderStatus::all().filter(|s| s.is_terminal()).collect();
		assert_eq!(
			terminal,
			vec![
				OrderStatus::Completed,
				OrderStatus::Cancelled,
				OrderStatus::NoWalker
			]
		);
	}

	#[test]
	fn test_walker_invariant() {
		let mut order = sample_order();
		assert!(order.check_invariants().is_ok());

		order.status = OrderStatus::Confirmed;
		assert!(order.check_invariants().is_err());

		order.walker_id = Some("walker-1".into());
		order.confirmed_at = Some(order.created_at);
		assert!(order.check_invariants().is_ok());
	}

	#[test]
	fn test_timestamp_ordering_invariant() {
		let mut order = sample_order();
		order.status = OrderStatus::InProgress;
		order.walker_id = Some("walker-1".into());
		order.confirmed_at = Some(order.created_at + chrono::Duration::minutes(5));
		order.started_at = Some(order.created_at + chrono::Duration::minutes(1));
		assert!(order.check_invariants().is_err());
	}

	#[test]
	fn test_overlap() {
		let first = sample_order();
		let mut second = sample_order();
		second.scheduled_at = first.scheduled_end();
		assert!(!first.overlaps(&second));

		second.scheduled_at = first.scheduled_end() - chrono::Duration::minutes(1);
		assert!(first.overlaps(&second));
	}
}
