//! Filters and pagination for order listings.

use crate::{Order, OrderStatus, OrderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size for listings.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
/// Upper bound on the page size.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Filter applied to a party's orders.
///
/// Date bounds apply to `scheduled_at`; `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
	/// Empty means all statuses.
	pub statuses: Vec<OrderStatus>,
	pub order_type: Option<OrderType>,
	pub from: Option<DateTime<Utc>>,
	pub to: Option<DateTime<Utc>>,
}

impl OrderFilter {
	pub fn matches(&self, order: &Order) -> bool {
		if !self.statuses.is_empty() && !self.statuses.contains(&order.status) {
			return false;
		}
		if self.order_type.is_some_and(|t| t != order.order_type) {
			return false;
		}
		if self.from.is_some_and(|from| order.scheduled_at < from) {
			return false;
		}
		if self.to.is_some_and(|to| order.scheduled_at >= to) {
			return false;
		}
		true
	}

	/// Canonical textual form, independent of the order statuses were given in.
	pub fn fingerprint(&self) -> String {
		let mut statuses: Vec<&str> = self.statuses.iter().map(|s| s.as_str()).collect();
		statuses.sort_unstable();
		statuses.dedup();
		format!(
			"s={}|t={}|f={}|u={}",
			statuses.join(","),
			self.order_type.map(|t| t.as_str()).unwrap_or(""),
			self.from.map(|d| d.timestamp_millis().to_string()).unwrap_or_default(),
			self.to.map(|d| d.timestamp_millis().to_string()).unwrap_or_default(),
		)
	}
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	pub page: u32,
	pub limit: u32,
}

impl Default for Pagination {
	fn default() -> Self {
		Self {
			page: 1,
			limit: DEFAULT_PAGE_LIMIT,
		}
	}
}

impl Pagination {
	/// Builds a pagination clamped to valid bounds.
	pub fn new(page: u32, limit: u32) -> Self {
		Self {
			page: page.max(1),
			limit: limit.clamp(1, MAX_PAGE_LIMIT),
		}
	}

	pub fn offset(&self) -> usize {
		(self.page.saturating_sub(1) as usize) * self.limit as usize
	}
}

/// A page of orders, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
	pub orders: Vec<Order>,
	pub total: usize,
	pub page: u32,
	pub limit: u32,
	pub pages: u32,
}

impl OrderPage {
	/// Slices an already filtered and sorted result set.
	pub fn from_sorted(orders: Vec<Order>, pagination: Pagination) -> Self {
		let total = orders.len();
		let pages = total.div_ceil(pagination.limit as usize) as u32;
		let orders = orders
			.into_iter()
			.skip(pagination.offset())
			.take(pagination.limit as usize)
			.collect();
		Self {
			orders,
			total,
			page: pagination.page,
			limit: pagination.limit,
			pages,
		}
	}
}
