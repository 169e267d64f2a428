//! End-to-end order scenarios over in-memory backends.

use async_trait::async_trait;
use booking_config::builders::ConfigBuilder;
use booking_config::{ChargePolicy, Config};
use booking_core::{BookingBuilder, BookingEngine, BookingFactories};
use booking_payment::{PaymentError, PaymentInterface};
use booking_types::{
	Actor, CancelOrderRequest, ConfigSchema, CreateOrderRequest, ErrorKind, GeoPoint, OrderStatus,
	OrderType, ReviewRequest, TrackPointRequest, WalkerProfile,
};
use chrono::{Duration, Utc};
use mockall::mock;
use rust_decimal::Decimal;

mock! {
	pub Payments {}

	#[async_trait]
	impl PaymentInterface for Payments {
		fn config_schema(&self) -> Box<dyn ConfigSchema>;
		async fn charge(&self, order_id: &str, amount: Decimal, currency: &str) -> Result<String, PaymentError>;
		async fn refund(&self, payment_ref: &str, amount: Decimal) -> Result<(), PaymentError>;
	}
}

const CENTER: GeoPoint = GeoPoint {
	latitude: 55.7558,
	longitude: 37.6173,
};

fn north(meters: f64) -> GeoPoint {
	let d_lat = (meters / booking_geo::EARTH_RADIUS_METERS).to_degrees();
	GeoPoint::new(CENTER.latitude + d_lat, CENTER.longitude)
}

fn engine(config: Config, payments: MockPayments) -> BookingEngine {
	BookingBuilder::new(config)
		.with_payment(Box::new(payments))
		.build(BookingFactories::from_registries())
		.unwrap()
}

async fn place_walker(engine: &BookingEngine, id: &str, meters: f64, rating: f64) {
	let geo = &engine.context().geo;
	geo.register_walker(
		id,
		WalkerProfile {
			rating,
			rating_count: 12,
			hourly_rate: Some(Decimal::from(800)),
		},
	)
	.await
	.unwrap();
	geo.upsert_position(id, north(meters), Utc::now())
		.await
		.unwrap();
}

fn walk_in(minutes: i64) -> CreateOrderRequest {
	CreateOrderRequest {
		pet_id: "P1".into(),
		order_type: OrderType::SingleWalk,
		scheduled_at: Utc::now() + Duration::minutes(minutes),
		duration_minutes: 30,
		latitude: CENTER.latitude,
		longitude: CENTER.longitude,
		address: Some("Red Square 1".into()),
		special_instructions: None,
		preferred_walker_id: None,
	}
}

#[tokio::test]
async fn happy_path_charges_once_on_completion() {
	let mut payments = MockPayments::new();
	payments
		.expect_charge()
		.withf(|_, amount, currency| *amount == Decimal::from(400) && currency.to_string() == "RUB")
		.times(1)
		.returning(|order_id, _, _| Ok(format!("pay-{}", order_id)));
	payments.expect_refund().never();
	let engine = engine(ConfigBuilder::new().build(), payments);
	place_walker(&engine, "W1", 1500.0, 4.9).await;

	let lifecycle = engine.lifecycle();
	let client = Actor::client("C1");
	let walker = Actor::walker("W1");

	let order = lifecycle.create(&client, walk_in(10)).await.unwrap();
	assert_eq!(order.status, OrderStatus::Offered);
	let price = order.price.clone().unwrap();
	assert_eq!(price.base_amount, Decimal::from(400));
	assert_eq!(price.commission, Decimal::from(80));
	assert_eq!(price.walker_earnings, Decimal::from(320));
	assert_eq!(price.total, Decimal::from(400));

	let order = lifecycle.accept(&order.id, &walker).await.unwrap();
	assert_eq!(order.status, OrderStatus::Confirmed);
	let order = lifecycle.start(&order.id, &walker).await.unwrap();
	assert_eq!(order.status, OrderStatus::InProgress);

	lifecycle
		.append_track_point(
			&order.id,
			&walker,
			TrackPointRequest {
				latitude: north(1200.0).latitude,
				longitude: CENTER.longitude,
				recorded_at: None,
				accuracy_meters: Some(5.0),
				speed_mps: Some(1.2),
				heading_degrees: None,
			},
		)
		.await
		.unwrap();

	let order = lifecycle.complete(&order.id, &walker).await.unwrap();
	assert_eq!(order.status, OrderStatus::Completed);
	assert!(!order.payment_pending);
	assert_eq!(order.payment_ref, Some(format!("pay-{}", order.id)));
	assert_eq!(order.track.len(), 1);
	assert_eq!(order.price, Some(price));

	let history = engine.context().store.history(&order.id).await.unwrap();
	let statuses: Vec<OrderStatus> = history.iter().map(|t| t.to).collect();
	assert_eq!(
		statuses,
		vec![
			OrderStatus::Pending,
			OrderStatus::Offered,
			OrderStatus::Confirmed,
			OrderStatus::InProgress,
			OrderStatus::Completed,
		]
	);
	assert_eq!(engine.context().geo.get("W1").await.unwrap().unwrap().load, 0);

	lifecycle
		.review(
			&order.id,
			&client,
			ReviewRequest {
				rating: 5,
				comment: Some("Great walk".into()),
			},
		)
		.await
		.unwrap();
	let rated = engine.context().geo.get("W1").await.unwrap().unwrap();
	assert_eq!(rated.rating_count, 13);
}

#[tokio::test]
async fn exhausted_matching_ends_in_no_walker() {
	let mut payments = MockPayments::new();
	payments.expect_charge().never();
	let engine = engine(ConfigBuilder::new().build(), payments);
	// Beyond the radius ceiling
	place_walker(&engine, "W-far", 25_000.0, 5.0).await;

	let order = engine
		.lifecycle()
		.create(&Actor::client("C1"), walk_in(120))
		.await
		.unwrap();
	assert_eq!(order.status, OrderStatus::NoWalker);
	assert_eq!(order.matching_round, 3);
	assert!(order.price.is_none());
	assert!(order.offer.is_none());
}

#[tokio::test]
async fn cancellation_after_capture_refunds_and_blocks_confirm() {
	let mut payments = MockPayments::new();
	payments
		.expect_charge()
		.times(1)
		.returning(|_, _, _| Ok("pay-1".into()));
	payments
		.expect_refund()
		.withf(|payment_ref, amount| payment_ref.to_string() == "pay-1" && *amount == Decimal::from(400))
		.times(1)
		.returning(|_, _| Ok(()));
	let config = ConfigBuilder::new()
		.charge_policy(ChargePolicy::OnConfirmation)
		.build();
	let engine = engine(config, payments);
	place_walker(&engine, "W1", 800.0, 4.7).await;
	place_walker(&engine, "W2", 900.0, 4.6).await;

	let lifecycle = engine.lifecycle();
	let client = Actor::client("C1");
	let order = lifecycle.create(&client, walk_in(180)).await.unwrap();
	let order = lifecycle.accept(&order.id, &Actor::walker("W1")).await.unwrap();
	assert_eq!(order.payment_ref.as_deref(), Some("pay-1"));

	let order = lifecycle
		.cancel(
			&order.id,
			&client,
			CancelOrderRequest {
				reason: Some("Plans changed".into()),
			},
		)
		.await
		.unwrap();
	assert_eq!(order.status, OrderStatus::Cancelled);
	assert!(order.refunded);
	assert!(!order.refund_pending);
	assert_eq!(order.walker_id, None);
	assert_eq!(order.cancelled_by.as_deref(), Some("C1"));

	let err = lifecycle
		.accept(&order.id, &Actor::walker("W2"))
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Conflict);
	assert_eq!(engine.context().geo.get("W1").await.unwrap().unwrap().load, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_have_one_winner() {
	let engine = engine(ConfigBuilder::new().build(), MockPayments::new());
	place_walker(&engine, "W1", 500.0, 4.8).await;
	place_walker(&engine, "W2", 600.0, 4.8).await;

	let order = engine
		.lifecycle()
		.create(&Actor::client("C1"), walk_in(120))
		.await
		.unwrap();
	assert_eq!(order.offer.as_ref().unwrap().walker_ids.len(), 2);

	let (a, b) = {
		let (first, second) = (engine.clone(), engine.clone());
		let (id_a, id_b) = (order.id.clone(), order.id.clone());
		tokio::join!(
			tokio::spawn(async move { first.lifecycle().accept(&id_a, &Actor::walker("W1")).await }),
			tokio::spawn(async move { second.lifecycle().accept(&id_b, &Actor::walker("W2")).await }),
		)
	};
	let results = [a.unwrap(), b.unwrap()];
	let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
	assert_eq!(winners.len(), 1);
	let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
	assert_eq!(loser.kind(), ErrorKind::Conflict);

	let stored = engine.context().store.get_by_id(&order.id).await.unwrap();
	assert_eq!(stored.status, OrderStatus::Confirmed);
	assert_eq!(stored.walker_id, winners[0].walker_id);
	let history = engine.context().store.history(&order.id).await.unwrap();
	assert_eq!(
		history.iter().filter(|t| t.to == OrderStatus::Confirmed).count(),
		1
	);
}

#[tokio::test]
async fn repeated_cancel_is_idempotent() {
	let engine = engine(ConfigBuilder::new().build(), MockPayments::new());
	let lifecycle = engine.lifecycle();
	let client = Actor::client("C1");

	// Nothing nearby: the order ends inside create and cannot be cancelled
	let stranded = lifecycle.create(&client, walk_in(120)).await.unwrap();
	assert_eq!(stranded.status, OrderStatus::NoWalker);
	let err = lifecycle
		.cancel(&stranded.id, &client, CancelOrderRequest::default())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Conflict);

	place_walker(&engine, "W1", 400.0, 4.5).await;
	let order = lifecycle.create(&client, walk_in(200)).await.unwrap();
	assert_eq!(order.status, OrderStatus::Offered);

	let first = lifecycle
		.cancel(&order.id, &client, CancelOrderRequest::default())
		.await
		.unwrap();
	let second = lifecycle
		.cancel(&order.id, &client, CancelOrderRequest::default())
		.await
		.unwrap();
	assert_eq!(first, second);
	let history = engine.context().store.history(&order.id).await.unwrap();
	assert_eq!(
		history.iter().filter(|t| t.to == OrderStatus::Cancelled).count(),
		1
	);
}

#[tokio::test]
async fn sparse_area_widens_radius_then_relaxes_rating() {
	let engine = engine(ConfigBuilder::new().build(), MockPayments::new());
	place_walker(&engine, "W-distant", 5_000.0, 4.9).await;

	let order = engine
		.lifecycle()
		.create(&Actor::client("C1"), walk_in(120))
		.await
		.unwrap();
	let offer = order.offer.as_ref().unwrap();
	assert_eq!(offer.round, 0);
	assert_eq!(offer.radius_meters, 6_000.0);
	assert_eq!(offer.walker_ids, vec!["W-distant".to_string()]);

	let engine = self::engine(ConfigBuilder::new().build(), MockPayments::new());
	place_walker(&engine, "W-new", 700.0, 3.5).await;
	let order = engine
		.lifecycle()
		.create(&Actor::client("C2"), walk_in(120))
		.await
		.unwrap();
	let offer = order.offer.as_ref().unwrap();
	assert_eq!(offer.round, 1);
	assert_eq!(order.matching_round, 2);
}
