//! Shared services handed to every handler.
//!
//! The context is cheap to clone: every member is reference counted. It owns
//! the two storage services (durable orders, and the cache/lock backend) and
//! the components built over them.

use super::event_bus::EventBus;
use crate::matching::MatchingEngine;
use crate::state::OrderStateMachine;
use booking_config::Config;
use booking_geo::GeoService;
use booking_payment::PaymentService;
use booking_pricing::PricingCalculator;
use booking_storage::{LockManager, NearbyWalkerCache, OrderListCache, OrderStore, StorageService};
use booking_types::{BookingEvent, Order, OrderEvent};
use std::sync::Arc;

#[derive(Clone)]
pub struct BookingContext {
	pub config: Arc<Config>,
	pub order_storage: Arc<StorageService>,
	pub cache_storage: Arc<StorageService>,
	pub store: Arc<OrderStore>,
	pub state_machine: Arc<OrderStateMachine>,
	pub list_cache: Arc<OrderListCache>,
	pub nearby_cache: Arc<NearbyWalkerCache>,
	pub locks: Arc<LockManager>,
	pub geo: Arc<GeoService>,
	pub pricing: Arc<PricingCalculator>,
	pub payment: Arc<PaymentService>,
	pub matcher: Arc<MatchingEngine>,
	pub event_bus: EventBus,
}

impl BookingContext {
	pub fn new(
		config: Config,
		order_storage: Arc<StorageService>,
		cache_storage: Arc<StorageService>,
		geo: Arc<GeoService>,
		pricing: PricingCalculator,
		payment: Arc<PaymentService>,
		event_bus: EventBus,
	) -> Self {
		let store = Arc::new(OrderStore::new(order_storage.clone()));
		let state_machine = Arc::new(OrderStateMachine::new(store.clone()));
		let list_cache = Arc::new(OrderListCache::new(
			cache_storage.clone(),
			config.cache.list_ttl(),
		));
		let nearby_cache = Arc::new(NearbyWalkerCache::new(
			cache_storage.clone(),
			config.cache.availability_ttl(),
		));
		let locks = Arc::new(LockManager::new(
			cache_storage.clone(),
			config.cache.lock_ttl(),
		));
		let matcher = Arc::new(MatchingEngine::new(
			geo.clone(),
			config.matching.clone(),
			config.geo.walking_speed_kmh,
		));

		Self {
			config: Arc::new(config),
			order_storage,
			cache_storage,
			store,
			state_machine,
			list_cache,
			nearby_cache,
			locks,
			geo,
			pricing: Arc::new(pricing),
			payment,
			matcher,
			event_bus,
		}
	}

	/// Orphans the cached listings of the given parties. Failures are logged;
	/// the listing TTL bounds the staleness they leave behind.
	pub(crate) async fn invalidate_parties(&self, party_ids: &[String]) {
		if let Err(e) = self.list_cache.invalidate(party_ids).await {
			tracing::warn!(parties = ?party_ids, error = %e, "Failed to invalidate listing cache");
		}
	}

	pub(crate) async fn invalidate_order(&self, order: &Order) {
		self.invalidate_parties(&order.party_ids()).await;
	}

	pub(crate) fn publish_order(&self, event: OrderEvent) {
		self.event_bus.publish(BookingEvent::Order(event));
	}
}
