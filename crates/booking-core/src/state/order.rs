//! Order state machine.
//!
//! Validates every status change against the lifecycle graph before handing
//! it to the order store's compare-and-swap:
//!
//! ```text
//! PENDING -> OFFERED -> CONFIRMED -> IN_PROGRESS -> COMPLETED
//!    |  ^------'  |         |
//!    |            |         '--> CANCELLED
//!    '------------+------------> CANCELLED | NO_WALKER
//! ```

use crate::error::BookingError;
use booking_storage::{OrderStore, OrderStoreError};
use booking_types::{Actor, Order, OrderStatus};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;

	let mut m = HashMap::new();
	m.insert(Pending, HashSet::from([Offered, NoWalker, Cancelled]));
	m.insert(Offered, HashSet::from([Confirmed, Pending, NoWalker, Cancelled]));
	m.insert(Confirmed, HashSet::from([InProgress, Cancelled]));
	m.insert(InProgress, HashSet::from([Completed]));
	m.insert(Completed, HashSet::new()); // terminal
	m.insert(Cancelled, HashSet::new()); // terminal
	m.insert(NoWalker, HashSet::new()); // terminal
	m
});

/// Applies lifecycle transitions through the order store.
pub struct OrderStateMachine {
	store: Arc<OrderStore>,
}

impl OrderStateMachine {
	pub fn new(store: Arc<OrderStore>) -> Self {
		Self { store }
	}

	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		TRANSITIONS.get(&from).is_some_and(|next| next.contains(&to))
	}

	/// Moves the order from `expected` to `to`, applying `update` to the
	/// same snapshot. A status other than `expected` at commit time is a
	/// conflict.
	pub async fn transition<F>(
		&self,
		order_id: &str,
		expected: OrderStatus,
		to: OrderStatus,
		actor: &Actor,
		reason: Option<String>,
		update: F,
	) -> Result<Order, BookingError>
	where
		F: FnMut(&mut Order) -> Result<(), OrderStoreError>,
	{
		if !Self::is_valid_transition(expected, to) {
			return Err(BookingError::Conflict(format!(
				"Order {} cannot move from {} to {}",
				order_id, expected, to
			)));
		}
		Ok(self
			.store
			.transition_with(order_id, expected, to, actor, reason, update)
			.await?)
	}
}
