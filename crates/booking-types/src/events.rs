//! Event types for inter-service communication.
//!
//! Events flow through the engine's event bus. The notification forwarder
//! relays order events to the notification collaborator; delivery is
//! asynchronous and never blocks or rolls back a transition.

use crate::OrderStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main event type encompassing all booking events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BookingEvent {
	/// Order lifecycle events.
	Order(OrderEvent),
	/// Payment collaborator outcomes.
	Payment(PaymentEvent),
}

/// Events emitted after a successful status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
	Offered {
		order_id: String,
		client_id: String,
		walker_ids: Vec<String>,
	},
	Confirmed {
		order_id: String,
		client_id: String,
		walker_id: String,
	},
	Started {
		order_id: String,
		client_id: String,
		walker_id: String,
	},
	Completed {
		order_id: String,
		client_id: String,
		walker_id: String,
	},
	Cancelled {
		order_id: String,
		client_id: String,
		walker_id: Option<String>,
		cancelled_by: String,
		reason: Option<String>,
	},
	NoWalker {
		order_id: String,
		client_id: String,
	},
}

impl OrderEvent {
	pub fn order_id(&self) -> &str {
		match self {
			OrderEvent::Offered { order_id, .. }
			| OrderEvent::Confirmed { order_id, .. }
			| OrderEvent::Started { order_id, .. }
			| OrderEvent::Completed { order_id, .. }
			| OrderEvent::Cancelled { order_id, .. }
			| OrderEvent::NoWalker { order_id, .. } => order_id,
		}
	}

	/// The status the order reached.
	pub fn status(&self) -> OrderStatus {
		match self {
			OrderEvent::Offered { .. } => OrderStatus::Offered,
			OrderEvent::Confirmed { .. } => OrderStatus::Confirmed,
			OrderEvent::Started { .. } => OrderStatus::InProgress,
			OrderEvent::Completed { .. } => OrderStatus::Completed,
			OrderEvent::Cancelled { .. } => OrderStatus::Cancelled,
			OrderEvent::NoWalker { .. } => OrderStatus::NoWalker,
		}
	}

	/// Parties that should be notified.
	pub fn party_ids(&self) -> Vec<String> {
		match self {
			OrderEvent::Offered {
				client_id,
				walker_ids,
				..
			} => std::iter::once(client_id.clone())
				.chain(walker_ids.iter().cloned())
				.collect(),
			OrderEvent::Confirmed {
				client_id,
				walker_id,
				..
			}
			| OrderEvent::Started {
				client_id,
				walker_id,
				..
			}
			| OrderEvent::Completed {
				client_id,
				walker_id,
				..
			} => vec![client_id.clone(), walker_id.clone()],
			OrderEvent::Cancelled {
				client_id,
				walker_id,
				..
			} => std::iter::once(client_id.clone())
				.chain(walker_id.iter().cloned())
				.collect(),
			OrderEvent::NoWalker { client_id, .. } => vec![client_id.clone()],
		}
	}
}

/// Outcomes of calls to the payment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaymentEvent {
	Charged {
		order_id: String,
		payment_ref: String,
		amount: Decimal,
	},
	ChargeFailed {
		order_id: String,
		error: String,
	},
	Refunded {
		order_id: String,
		payment_ref: String,
		amount: Decimal,
	},
	RefundFailed {
		order_id: String,
		error: String,
	},
}

/// Flattened notification payload handed to notification implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
	pub order_id: String,
	pub party_ids: Vec<String>,
	pub status: OrderStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl From<&OrderEvent> for Notice {
	fn from(event: &OrderEvent) -> Self {
		let reason = match event {
			OrderEvent::Cancelled { reason, .. } => reason.clone(),
			_ => None,
		};
		Self {
			order_id: event.order_id().to_string(),
			party_ids: event.party_ids(),
			status: event.status(),
			reason,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_offered_notifies_client_and_candidates() {
		let event = OrderEvent::Offered {
			order_id: "o1".into(),
			client_id: "c1".into(),
			walker_ids: vec!["w1".into(), "w2".into()],
		};
		let notice = Notice::from(&event);
		assert_eq!(notice.party_ids, vec!["c1", "w1", "w2"]);
		assert_eq!(notice.status, OrderStatus::Offered);
	}

	#[test]
	fn test_cancelled_without_walker() {
		let event = OrderEvent::Cancelled {
			order_id: "o1".into(),
			client_id: "c1".into(),
			walker_id: None,
			cancelled_by: "c1".into(),
			reason: Some("changed plans".into()),
		};
		let notice = Notice::from(&event);
		assert_eq!(notice.party_ids, vec!["c1"]);
		assert_eq!(notice.reason.as_deref(), Some("changed plans"));
	}
}
