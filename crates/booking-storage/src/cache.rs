//! Read-through caches for order listings and nearby-walker lookups.
//!
//! Listing entries are addressed by party, the party's cache generation and a
//! hash of the query. Invalidation bumps the generation, which orphans every
//! entry of the previous generation at once; orphans age out via their TTL.
//! A reader must fetch the generation before reading the store so that a
//! write committed after the read always moves it past the cached one.
//!
//! Neither cache is authoritative. Callers treat errors as misses.

use crate::{StorageError, StorageService};
use booking_types::{NearbyWalkers, OrderFilter, OrderPage, Pagination, StorageKey};
use sha3::{Digest, Sha3_256};
use std::sync::Arc;
use std::time::Duration;

/// Cache of `list_by_party` pages.
pub struct OrderListCache {
	storage: Arc<StorageService>,
	ttl: Duration,
}

impl OrderListCache {
	pub fn new(storage: Arc<StorageService>, ttl: Duration) -> Self {
		Self { storage, ttl }
	}

	/// Current generation of the party's listings.
	pub async fn generation(&self, party_id: &str) -> Result<u64, StorageError> {
		Ok(self
			.storage
			.retrieve_optional(StorageKey::CacheGenerations.as_str(), party_id)
			.await?
			.unwrap_or(0))
	}

	fn entry_id(
		party_id: &str,
		generation: u64,
		filter: &OrderFilter,
		pagination: Pagination,
	) -> String {
		let mut hasher = Sha3_256::new();
		hasher.update(filter.fingerprint().as_bytes());
		hasher.update(format!("|p={}|l={}", pagination.page, pagination.limit).as_bytes());
		format!(
			"{}:{}:{}",
			party_id,
			generation,
			hex::encode(hasher.finalize())
		)
	}

	pub async fn get(
		&self,
		party_id: &str,
		generation: u64,
		filter: &OrderFilter,
		pagination: Pagination,
	) -> Result<Option<OrderPage>, StorageError> {
		let id = Self::entry_id(party_id, generation, filter, pagination);
		self.storage
			.retrieve_optional(StorageKey::OrderLists.as_str(), &id)
			.await
	}

	pub async fn put(
		&self,
		party_id: &str,
		generation: u64,
		filter: &OrderFilter,
		pagination: Pagination,
		page: &OrderPage,
	) -> Result<(), StorageError> {
		let id = Self::entry_id(party_id, generation, filter, pagination);
		self.storage
			.store_with_ttl(StorageKey::OrderLists.as_str(), &id, page, Some(self.ttl))
			.await
	}

	/// Orphans every cached listing of each party.
	pub async fn invalidate(&self, party_ids: &[String]) -> Result<(), StorageError> {
		for party_id in party_ids {
			let generation = self
				.storage
				.increment(StorageKey::CacheGenerations.as_str(), party_id)
				.await?;
			tracing::trace!(party_id = %party_id, generation, "Listing cache invalidated");
		}
		Ok(())
	}
}

/// Short-lived cache of nearby available walkers, used for estimates only.
///
/// Coordinates are rounded to two decimal places (roughly a kilometre) so
/// neighbouring requests share entries.
pub struct NearbyWalkerCache {
	storage: Arc<StorageService>,
	ttl: Duration,
}

impl NearbyWalkerCache {
	pub fn new(storage: Arc<StorageService>, ttl: Duration) -> Self {
		Self { storage, ttl }
	}

	fn entry_id(latitude: f64, longitude: f64, radius_meters: f64, limit: usize) -> String {
		format!(
			"{:.2}:{:.2}:{}:{}",
			latitude,
			longitude,
			radius_meters.round() as i64,
			limit
		)
	}

	pub async fn get(
		&self,
		latitude: f64,
		longitude: f64,
		radius_meters: f64,
		limit: usize,
	) -> Result<Option<NearbyWalkers>, StorageError> {
		let id = Self::entry_id(latitude, longitude, radius_meters, limit);
		self.storage
			.retrieve_optional(StorageKey::NearbyWalkers.as_str(), &id)
			.await
	}

	pub async fn put(
		&self,
		latitude: f64,
		longitude: f64,
		radius_meters: f64,
		limit: usize,
		walkers: &NearbyWalkers,
	) -> Result<(), StorageError> {
		let id = Self::entry_id(latitude, longitude, radius_meters, limit);
		self.storage
			.store_with_ttl(
				StorageKey::NearbyWalkers.as_str(),
				&id,
				walkers,
				Some(self.ttl),
			)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use booking_types::{MatchCandidate, OrderStatus};

	fn storage() -> Arc<StorageService> {
		Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
	}

	fn page(total: usize) -> OrderPage {
		OrderPage {
			orders: Vec::new(),
			total,
			page: 1,
			limit: 20,
			pages: 0,
		}
	}

	#[tokio::test]
	async fn test_invalidation_orphans_entries() {
		let cache = OrderListCache::new(storage(), Duration::from_secs(60));
		let filter = OrderFilter::default();
		let pagination = Pagination::default();

		let generation = cache.generation("c1").await.unwrap();
		assert_eq!(generation, 0);
		cache.put("c1", generation, &filter, pagination, &page(3)).await.unwrap();
		assert_eq!(
			cache.get("c1", generation, &filter, pagination).await.unwrap(),
			Some(page(3))
		);

		cache.invalidate(&["c1".to_string()]).await.unwrap();
		let next = cache.generation("c1").await.unwrap();
		assert_eq!(next, 1);
		assert!(cache.get("c1", next, &filter, pagination).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_distinct_queries_do_not_collide() {
		let cache = OrderListCache::new(storage(), Duration::from_secs(60));
		let all = OrderFilter::default();
		let pending = OrderFilter {
			statuses: vec![OrderStatus::Pending],
			..Default::default()
		};
		cache.put("c1", 0, &all, Pagination::default(), &page(5)).await.unwrap();

		assert!(cache.get("c1", 0, &pending, Pagination::default()).await.unwrap().is_none());
		assert!(cache.get("c1", 0, &all, Pagination::new(2, 20)).await.unwrap().is_none());
		assert!(cache.get("c2", 0, &all, Pagination::default()).await.unwrap().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_nearby_entries_expire() {
		let cache = NearbyWalkerCache::new(storage(), Duration::from_secs(600));
		let walkers = NearbyWalkers {
			walkers: vec![MatchCandidate {
				walker_id: "w1".into(),
				distance_meters: 120.0,
				eta_minutes: 2,
				rating: 4.8,
				hourly_rate: None,
				load: 0,
				score: 0.9,
			}],
			radius_meters: 3000.0,
		};
		cache.put(55.7512, 37.6184, 3000.0, 5, &walkers).await.unwrap();
		assert_eq!(
			cache.get(55.7498, 37.6201, 3000.0, 5).await.unwrap(),
			Some(walkers)
		);

		tokio::time::advance(Duration::from_secs(601)).await;
		assert!(cache.get(55.7512, 37.6184, 3000.0, 5).await.unwrap().is_none());
	}
}
