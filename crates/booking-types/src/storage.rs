//! Storage namespaces for the booking engine.

use std::str::FromStr;

/// Storage namespaces.
///
/// Keys are formed as `{namespace}:{id}`. Index namespaces hold one entry per
/// indexed order so that concurrent writers never rewrite a shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records
	Orders,
	/// Append-only status history, one value per order
	OrderHistory,
	/// `{party_id}:{order_id}` entries for listing by party
	PartyOrders,
	/// `{status}:{order_id}` entries for sweeping by status
	OrdersByStatus,
	/// Orders awaiting charge or refund reconciliation
	PaymentFlags,
	/// Cached pages of order listings
	OrderLists,
	/// Per-party cache generation counters
	CacheGenerations,
	/// Cached nearby-walker lookups
	NearbyWalkers,
	/// Per-order mutation locks
	OrderLocks,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderHistory => "order_history",
			StorageKey::PartyOrders => "party_orders",
			StorageKey::OrdersByStatus => "orders_by_status",
			StorageKey::PaymentFlags => "payment_flags",
			StorageKey::OrderLists => "order_lists",
			StorageKey::CacheGenerations => "cache_generations",
			StorageKey::NearbyWalkers => "nearby_walkers",
			StorageKey::OrderLocks => "order_locks",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::OrderHistory,
			Self::PartyOrders,
			Self::OrdersByStatus,
			Self::PaymentFlags,
			Self::OrderLists,
			Self::CacheGenerations,
			Self::NearbyWalkers,
			Self::OrderLocks,
		]
		.into_iter()
	}

	/// Builds the full key for an id in this namespace.
	pub fn key(&self, id: &str) -> String {
		format!("{}:{}", self.as_str(), id)
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		StorageKey::all().find(|k| k.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
