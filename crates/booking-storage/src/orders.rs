//! Durable order records and their append-only status history.
//!
//! Every mutation is a compare-and-swap on the stored order bytes. A status
//! transition writes the order, its history, the status index and the
//! payment flag in one guarded batch, so either all of them change or none.
//!
//! Index namespaces hold one key per entry (`party_orders:{party}:{order}`,
//! `orders_by_status:{status}:{order}`) and are resolved back through the
//! order record, which stays authoritative.

use crate::{decode, encode, BatchOp, Guard, StorageError, StorageService};
use booking_types::{
	truncate_id, Actor, ErrorKind, Order, OrderFilter, OrderPage, OrderStatus, Pagination,
	StatusTransition, StorageKey, TrackPoint,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Order already exists: {0}")]
	AlreadyExists(String),
	/// The stored status no longer matches the caller's expectation.
	#[error("Order {order_id} is {actual}, expected {expected}")]
	StaleTransition {
		order_id: String,
		expected: OrderStatus,
		actual: OrderStatus,
	},
	/// Writers kept racing on fields other than status.
	#[error("Order {0} is being modified concurrently")]
	Contention(String),
	/// An updater refused the current snapshot.
	#[error("{1}")]
	Rejected(ErrorKind, String),
	#[error("Invariant violated: {0}")]
	Invariant(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl OrderStoreError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			OrderStoreError::NotFound(_) => ErrorKind::NotFound,
			OrderStoreError::AlreadyExists(_)
			| OrderStoreError::StaleTransition { .. }
			| OrderStoreError::Contention(_) => ErrorKind::Conflict,
			OrderStoreError::Rejected(kind, _) => *kind,
			OrderStoreError::Invariant(_) => ErrorKind::Validation,
			OrderStoreError::Storage(_) => ErrorKind::DependencyFailure,
		}
	}
}

/// Value of a secondary index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
	order_id: String,
}

/// Records which reconciliation an order is waiting for.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentFlag {
	order_id: String,
	payment_pending: bool,
	refund_pending: bool,
}

/// Order store over a [`StorageService`].
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	/// Re-read budget when the stored bytes change under a writer but the
	/// status does not.
	const MAX_ATTEMPTS: usize = 8;

	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	fn order_key(order_id: &str) -> String {
		StorageKey::Orders.key(order_id)
	}

	fn party_key(party_id: &str, order_id: &str) -> String {
		StorageKey::PartyOrders.key(&format!("{}:{}", party_id, order_id))
	}

	fn status_key(status: OrderStatus, order_id: &str) -> String {
		StorageKey::OrdersByStatus.key(&format!("{}:{}", status.as_str(), order_id))
	}

	fn index_value(order_id: &str) -> Result<Vec<u8>, StorageError> {
		encode(&IndexEntry {
			order_id: order_id.to_string(),
		})
	}

	/// Writes a new order in PENDING with its creation history entry.
	pub async fn create(&self, order: Order, actor: &Actor) -> Result<Order, OrderStoreError> {
		order.check_invariants().map_err(OrderStoreError::Invariant)?;
		if order.status != OrderStatus::Pending {
			return Err(OrderStoreError::Invariant(format!(
				"new orders start in PENDING, got {}",
				order.status
			)));
		}

		let history = vec![StatusTransition {
			from: None,
			to: order.status,
			actor: actor.clone(),
			at: order.created_at,
			reason: None,
		}];
		let key = Self::order_key(&order.id);
		let ops = vec![
			BatchOp::put(&key, encode(&order)?),
			BatchOp::put(StorageKey::OrderHistory.key(&order.id), encode(&history)?),
			BatchOp::put(
				Self::party_key(&order.client_id, &order.id),
				Self::index_value(&order.id)?,
			),
			BatchOp::put(
				Self::status_key(order.status, &order.id),
				Self::index_value(&order.id)?,
			),
		];

		if !self.storage.apply_if(Guard::absent(&key), ops).await? {
			return Err(OrderStoreError::AlreadyExists(order.id));
		}
		tracing::debug!(order_id = %truncate_id(&order.id), "Order created");
		Ok(order)
	}

	/// Reads the current order and the exact bytes it was stored as.
	async fn read(&self, order_id: &str) -> Result<(Order, Vec<u8>), OrderStoreError> {
		match self.storage.get_raw(&Self::order_key(order_id)).await {
			Ok(bytes) => Ok((decode(&bytes)?, bytes)),
			Err(StorageError::NotFound) => Err(OrderStoreError::NotFound(order_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	pub async fn get_by_id(&self, order_id: &str) -> Result<Order, OrderStoreError> {
		self.read(order_id).await.map(|(order, _)| order)
	}

	/// Status history, oldest first.
	pub async fn history(&self, order_id: &str) -> Result<Vec<StatusTransition>, OrderStoreError> {
		match self
			.storage
			.retrieve_optional(StorageKey::OrderHistory.as_str(), order_id)
			.await?
		{
			Some(history) => Ok(history),
			None => Err(OrderStoreError::NotFound(order_id.to_string())),
		}
	}

	/// Moves an order from `expected` to `new_status`, recording the
	/// transition. Fails with `StaleTransition` if the order is not in
	/// `expected` at commit time.
	pub async fn append_status_transition(
		&self,
		order_id: &str,
		expected: OrderStatus,
		new_status: OrderStatus,
		actor: &Actor,
		reason: Option<String>,
	) -> Result<Order, OrderStoreError> {
		self.transition_with(order_id, expected, new_status, actor, reason, |_| Ok(()))
			.await
	}

	/// Like [`Self::append_status_transition`], letting `update` adjust
	/// other fields of the same snapshot before it is written.
	///
	/// `update` may run more than once if unrelated fields change
	/// concurrently; it always sees the latest snapshot with the new status
	/// already applied.
	pub async fn transition_with<F>(
		&self,
		order_id: &str,
		expected: OrderStatus,
		new_status: OrderStatus,
		actor: &Actor,
		reason: Option<String>,
		mut update: F,
	) -> Result<Order, OrderStoreError>
	where
		F: FnMut(&mut Order) -> Result<(), OrderStoreError>,
	{
		for _ in 0..Self::MAX_ATTEMPTS {
			let (current, raw) = self.read(order_id).await?;
			if current.status != expected {
				return Err(OrderStoreError::StaleTransition {
					order_id: order_id.to_string(),
					expected,
					actual: current.status,
				});
			}

			let now = Utc::now();
			let mut next = current.clone();
			next.status = new_status;
			next.updated_at = now.max(current.updated_at);
			update(&mut next)?;
			next.check_invariants().map_err(OrderStoreError::Invariant)?;

			let mut history = self.history(order_id).await?;
			history.push(StatusTransition {
				from: Some(expected),
				to: new_status,
				actor: actor.clone(),
				at: next.updated_at,
				reason: reason.clone(),
			});

			let mut ops = vec![
				BatchOp::put(StorageKey::OrderHistory.key(order_id), encode(&history)?),
				BatchOp::delete(Self::status_key(expected, order_id)),
				BatchOp::put(
					Self::status_key(new_status, order_id),
					Self::index_value(order_id)?,
				),
			];
			ops.extend(Self::side_index_ops(&current, &next)?);
			ops.push(BatchOp::put(Self::order_key(order_id), encode(&next)?));

			if self
				.storage
				.apply_if(Guard::equals(Self::order_key(order_id), raw), ops)
				.await?
			{
				tracing::debug!(
					order_id = %truncate_id(order_id),
					from = %expected,
					to = %new_status,
					"Status transition committed"
				);
				return Ok(next);
			}
			tokio::task::yield_now().await;
		}
		Err(OrderStoreError::Contention(order_id.to_string()))
	}

	/// Applies a non-status mutation to the current snapshot.
	///
	/// `update` sees the latest snapshot and may refuse it. Writes that lose
	/// a race are retried against the fresh snapshot.
	pub async fn update_fields<F>(
		&self,
		order_id: &str,
		mut update: F,
	) -> Result<Order, OrderStoreError>
	where
		F: FnMut(&mut Order) -> Result<(), OrderStoreError>,
	{
		for _ in 0..Self::MAX_ATTEMPTS {
			let (current, raw) = self.read(order_id).await?;
			let mut next = current.clone();
			update(&mut next)?;
			if next.status != current.status {
				return Err(OrderStoreError::Invariant(
					"status changes must go through a transition".into(),
				));
			}
			if next == current {
				return Ok(current);
			}
			next.updated_at = Utc::now().max(current.updated_at);
			next.check_invariants().map_err(OrderStoreError::Invariant)?;

			let mut ops = Self::side_index_ops(&current, &next)?;
			ops.push(BatchOp::put(Self::order_key(order_id), encode(&next)?));
			if self
				.storage
				.apply_if(Guard::equals(Self::order_key(order_id), raw), ops)
				.await?
			{
				return Ok(next);
			}
			tokio::task::yield_now().await;
		}
		Err(OrderStoreError::Contention(order_id.to_string()))
	}

	/// Index maintenance that depends on fields other than status.
	fn side_index_ops(current: &Order, next: &Order) -> Result<Vec<BatchOp>, StorageError> {
		let mut ops = Vec::new();
		if let Some(walker_id) = next.walker_id.as_deref() {
			if current.walker_id.as_deref() != Some(walker_id) {
				ops.push(BatchOp::put(
					Self::party_key(walker_id, &next.id),
					Self::index_value(&next.id)?,
				));
			}
		}

		let flag_key = StorageKey::PaymentFlags.key(&next.id);
		if next.payment_pending || next.refund_pending {
			ops.push(BatchOp::put(
				flag_key,
				encode(&PaymentFlag {
					order_id: next.id.clone(),
					payment_pending: next.payment_pending,
					refund_pending: next.refund_pending,
				})?,
			));
		} else if current.payment_pending || current.refund_pending {
			ops.push(BatchOp::delete(flag_key));
		}
		Ok(ops)
	}

	/// Appends a track point to an IN_PROGRESS order. Points recorded
	/// before the last stored one are rejected.
	pub async fn append_track_point(
		&self,
		order_id: &str,
		point: TrackPoint,
	) -> Result<Order, OrderStoreError> {
		self.update_fields(order_id, |order| {
			if order.status != OrderStatus::InProgress {
				return Err(OrderStoreError::Rejected(
					ErrorKind::Validation,
					format!("Track points are accepted only while IN_PROGRESS, order is {}", order.status),
				));
			}
			if order.track.last().is_some_and(|last| point.recorded_at < last.recorded_at) {
				return Err(OrderStoreError::Rejected(
					ErrorKind::Validation,
					"Track points must be appended in recording order".into(),
				));
			}
			order.track.push(point.clone());
			Ok(())
		})
		.await
	}

	/// Resolves index entries back to orders, skipping dangling entries.
	async fn resolve(&self, entries: Vec<(String, IndexEntry)>) -> Result<Vec<Order>, OrderStoreError> {
		let mut orders = Vec::with_capacity(entries.len());
		for (_, entry) in entries {
			match self.get_by_id(&entry.order_id).await {
				Ok(order) => orders.push(order),
				Err(OrderStoreError::NotFound(id)) => {
					tracing::warn!(order_id = %truncate_id(&id), "Index entry points to a missing order");
				},
				Err(e) => return Err(e),
			}
		}
		Ok(orders)
	}

	/// Every order the party is client or assigned walker of, newest first.
	pub async fn all_for_party(&self, party_id: &str) -> Result<Vec<Order>, OrderStoreError> {
		let entries = self
			.storage
			.scan(StorageKey::PartyOrders.as_str(), &format!("{}:", party_id))
			.await?;
		let mut orders: Vec<Order> = self
			.resolve(entries)
			.await?
			.into_iter()
			.filter(|order| order.is_party(party_id))
			.collect();
		orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
		Ok(orders)
	}

	/// A filtered page of the party's orders, newest first.
	pub async fn list_by_party(
		&self,
		party_id: &str,
		filter: &OrderFilter,
		pagination: Pagination,
	) -> Result<OrderPage, OrderStoreError> {
		let orders = self
			.all_for_party(party_id)
			.await?
			.into_iter()
			.filter(|order| filter.matches(order))
			.collect();
		Ok(OrderPage::from_sorted(orders, pagination))
	}

	/// Orders currently in `status`, oldest first.
	pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderStoreError> {
		let entries = self
			.storage
			.scan(
				StorageKey::OrdersByStatus.as_str(),
				&format!("{}:", status.as_str()),
			)
			.await?;
		let mut orders: Vec<Order> = self
			.resolve(entries)
			.await?
			.into_iter()
			.filter(|order| order.status == status)
			.collect();
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(orders)
	}

	/// Orders with an outstanding charge or refund.
	pub async fn payment_flagged(&self) -> Result<Vec<Order>, OrderStoreError> {
		let flags: Vec<(String, PaymentFlag)> = self
			.storage
			.scan(StorageKey::PaymentFlags.as_str(), "")
			.await?;
		let entries = flags
			.into_iter()
			.map(|(key, flag)| (key, IndexEntry { order_id: flag.order_id }))
			.collect();
		Ok(self
			.resolve(entries)
			.await?
			.into_iter()
			.filter(|order| order.payment_pending || order.refund_pending)
			.collect())
	}
}
