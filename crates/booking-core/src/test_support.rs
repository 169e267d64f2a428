//! Fixtures shared by the unit tests of this crate.

use crate::builder::pricing_calculator;
use crate::engine::{context::BookingContext, event_bus::EventBus};
use booking_config::Config;
use booking_geo::implementations::memory::MemoryGeoIndex;
use booking_geo::{GeoService, EARTH_RADIUS_METERS};
use booking_payment::implementations::memory::MemoryPayment;
use booking_payment::{PaymentInterface, PaymentService};
use booking_storage::implementations::memory::MemoryStorage;
use booking_storage::StorageService;
use booking_types::{GeoPoint, Order, OrderStatus, OrderType};
use chrono::Utc;
use std::sync::Arc;

pub const ORIGIN: GeoPoint = GeoPoint {
	latitude: 55.7558,
	longitude: 37.6173,
};

/// A point roughly `meters` north of `origin`.
pub fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
	let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
	GeoPoint::new(origin.latitude + d_lat, origin.longitude)
}

/// A fresh PENDING single walk one hour from now.
pub fn pending_order(id: &str, location: GeoPoint) -> Order {
	let now = Utc::now();
	Order {
		id: id.into(),
		client_id: "c1".into(),
		walker_id: None,
		pet_id: "p1".into(),
		order_type: OrderType::SingleWalk,
		status: OrderStatus::Pending,
		scheduled_at: now + chrono::Duration::hours(1),
		duration_minutes: 30,
		location,
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

fn memory_storage() -> Arc<StorageService> {
	Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
}

/// A context over in-memory backends and the given payment provider.
pub fn context_with_payment(config: Config, payment: Box<dyn PaymentInterface>) -> BookingContext {
	let geo = Arc::new(GeoService::new(
		Box::new(MemoryGeoIndex::new()),
		config.geo.stale_after(),
		config.geo.query_timeout(),
		config.geo.max_radius_meters,
	));
	let pricing = pricing_calculator(&config).unwrap();
	let event_bus = EventBus::new(config.service.event_bus_capacity);
	BookingContext::new(
		config,
		memory_storage(),
		memory_storage(),
		geo,
		pricing,
		Arc::new(PaymentService::new(payment)),
		event_bus,
	)
}

pub fn context(config: Config) -> BookingContext {
	context_with_payment(config, Box::new(MemoryPayment::new()))
}
