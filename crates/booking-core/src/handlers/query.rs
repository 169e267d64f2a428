//! Read-only operations over orders.
//!
//! Listings go through the read-through list cache; everything else reads
//! the order store directly.

use crate::engine::context::BookingContext;
use crate::error::BookingError;
use booking_pricing::validate_duration;
use booking_types::{
	truncate_id, Actor, EstimateQuery, EstimateResponse, GeoPoint, ListOrdersQuery, Order,
	OrderFilter, OrderPage, OrderStatistics, OrderStatus, Pagination, Role, StatusTransition,
	DEFAULT_PAGE_LIMIT,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use validator::Validate;

pub struct OrderQueries {
	ctx: BookingContext,
}

/// Parses the comma-separated `status` parameter of a listing.
pub fn parse_statuses(raw: Option<&str>) -> Result<Vec<OrderStatus>, BookingError> {
	let Some(raw) = raw else {
		return Ok(Vec::new());
	};
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|s| s.parse::<OrderStatus>().map_err(BookingError::Validation))
		.collect()
}

impl OrderQueries {
	pub fn new(ctx: BookingContext) -> Self {
		Self { ctx }
	}

	/// Parties of the order, the system, and walkers holding a live offer.
	fn can_view(order: &Order, actor: &Actor) -> bool {
		match actor.role {
			Role::System => true,
			Role::Client => order.client_id == actor.party_id,
			Role::Walker => {
				order.walker_id.as_deref() == Some(actor.party_id.as_str())
					|| order.offer.as_ref().is_some_and(|o| o.includes(&actor.party_id))
			},
		}
	}

	pub async fn get(&self, order_id: &str, actor: &Actor) -> Result<Order, BookingError> {
		let order = self.ctx.store.get_by_id(order_id).await?;
		if !Self::can_view(&order, actor) {
			return Err(BookingError::Unauthorized(format!(
				"Order {} is not visible to this party",
				order_id
			)));
		}
		Ok(order)
	}

	pub async fn history(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Vec<StatusTransition>, BookingError> {
		self.get(order_id, actor).await?;
		Ok(self.ctx.store.history(order_id).await?)
	}

	/// A page of the caller's orders, newest first.
	pub async fn list(
		&self,
		actor: &Actor,
		query: &ListOrdersQuery,
	) -> Result<OrderPage, BookingError> {
		let filter = OrderFilter {
			statuses: parse_statuses(query.status.as_deref())?,
			order_type: query.order_type,
			from: query.from,
			to: query.to,
		};
		if let (Some(from), Some(to)) = (filter.from, filter.to) {
			if from >= to {
				return Err(BookingError::Validation(
					"'from' must be earlier than 'to'".into(),
				));
			}
		}
		let pagination = Pagination::new(
			query.page.unwrap_or(1),
			query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
		);
		let party_id = actor.party_id.as_str();

		// Generation first, then the store
		let generation = match self.ctx.list_cache.generation(party_id).await {
			Ok(generation) => Some(generation),
			Err(e) => {
				tracing::warn!(party_id = %truncate_id(party_id), error = %e, "Listing cache unavailable");
				None
			},
		};

		if let Some(generation) = generation {
			match self
				.ctx
				.list_cache
				.get(party_id, generation, &filter, pagination)
				.await
			{
				Ok(Some(page)) => return Ok(page),
				Ok(None) => {},
				Err(e) => {
					tracing::warn!(party_id = %truncate_id(party_id), error = %e, "Listing cache read failed");
				},
			}
		}

		let page = self
			.ctx
			.store
			.list_by_party(party_id, &filter, pagination)
			.await?;
		if let Some(generation) = generation {
			if let Err(e) = self
				.ctx
				.list_cache
				.put(party_id, generation, &filter, pagination, &page)
				.await
			{
				tracing::warn!(party_id = %truncate_id(party_id), error = %e, "Listing cache write failed");
			}
		}
		Ok(page)
	}

	/// Live offers made to the calling walker, soonest first.
	pub async fn pending_offers(&self, actor: &Actor) -> Result<Vec<Order>, BookingError> {
		if actor.role != Role::Walker {
			return Err(BookingError::Unauthorized(
				"Only walkers receive offers".into(),
			));
		}
		let now = Utc::now();
		let mut offers: Vec<Order> = self
			.ctx
			.store
			.list_by_status(OrderStatus::Offered)
			.await?
			.into_iter()
			.filter(|order| {
				order
					.offer
					.as_ref()
					.is_some_and(|o| o.includes(&actor.party_id) && !o.is_expired(now))
			})
			.collect();
		offers.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
		Ok(offers)
	}

	pub async fn statistics(&self, actor: &Actor) -> Result<OrderStatistics, BookingError> {
		let orders = self.ctx.store.all_for_party(&actor.party_id).await?;

		let mut status_counts: BTreeMap<String, usize> = OrderStatus::all()
			.map(|status| (status.as_str().to_string(), 0))
			.collect();
		for order in &orders {
			*status_counts
				.entry(order.status.as_str().to_string())
				.or_default() += 1;
		}

		let ratings: Vec<u8> = orders
			.iter()
			.filter(|o| o.walker_id.as_deref() == Some(actor.party_id.as_str()))
			.filter_map(|o| o.client_review.as_ref().map(|r| r.rating))
			.collect();
		let average_rating = if ratings.is_empty() {
			0.0
		} else {
			ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / ratings.len() as f64
		};

		Ok(OrderStatistics {
			total_orders: orders.len(),
			status_counts,
			average_rating,
		})
	}

	/// Prices a prospective order against the walkers currently nearby.
	pub async fn estimate(&self, query: &EstimateQuery) -> Result<EstimateResponse, BookingError> {
		query.validate()?;
		validate_duration(query.order_type, query.duration_minutes)?;

		let matching = &self.ctx.config.matching;
		let center = GeoPoint::new(query.latitude, query.longitude);
		let cached = match self
			.ctx
			.nearby_cache
			.get(
				query.latitude,
				query.longitude,
				matching.initial_radius_meters,
				matching.max_candidates,
			)
			.await
		{
			Ok(cached) => cached,
			Err(e) => {
				tracing::warn!(error = %e, "Availability cache read failed");
				None
			},
		};

		let nearby = match cached {
			Some(nearby) => nearby,
			None => {
				let nearby = self.ctx.matcher.nearby(center).await?;
				if !nearby.walkers.is_empty() {
					if let Err(e) = self
						.ctx
						.nearby_cache
						.put(
							query.latitude,
							query.longitude,
							matching.initial_radius_meters,
							matching.max_candidates,
							&nearby,
						)
						.await
					{
						tracing::warn!(error = %e, "Availability cache write failed");
					}
				}
				nearby
			},
		};

		if nearby.walkers.is_empty() {
			return Err(BookingError::NoCandidates(
				"No walkers available near this location".into(),
			));
		}

		let pricing = &self.ctx.pricing;
		let rates: Vec<(f64, Option<Decimal>)> = nearby
			.walkers
			.iter()
			.map(|w| (w.rating, w.hourly_rate))
			.collect();
		let price = pricing.compute_price(
			query.order_type,
			query.duration_minutes,
			pricing.blended_hourly_rate(&rates)?,
			pricing.demand_multiplier(query.scheduled_at.unwrap_or_else(Utc::now)),
		)?;

		Ok(EstimateResponse {
			price,
			search_radius_meters: nearby.radius_meters,
			walkers: nearby.walkers,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{context, north_of, pending_order, ORIGIN};
	use booking_config::builders::ConfigBuilder;
	use booking_types::{ErrorKind, Offer, OrderType, Review, WalkerProfile};

	async fn seeded() -> (BookingContext, OrderQueries) {
		let ctx = context(ConfigBuilder::new().surge_enabled(false).build());
		for id in ["o1", "o2", "o3"] {
			ctx.store
				.create(pending_order(id, ORIGIN), &Actor::client("c1"))
				.await
				.unwrap();
		}
		(ctx.clone(), OrderQueries::new(ctx))
	}

	#[test]
	fn test_parse_statuses() {
		assert_eq!(
			parse_statuses(Some("pending, OFFERED")).unwrap(),
			vec![OrderStatus::Pending, OrderStatus::Offered]
		);
		assert!(parse_statuses(None).unwrap().is_empty());
		assert!(parse_statuses(Some("LOST")).is_err());
	}

	#[tokio::test]
	async fn test_get_hides_foreign_orders() {
		let (_, queries) = seeded().await;
		assert!(queries.get("o1", &Actor::client("c1")).await.is_ok());

		let err = queries.get("o1", &Actor::client("c2")).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Unauthorized);
		let err = queries.get("missing", &Actor::client("c1")).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}

	#[tokio::test]
	async fn test_list_served_from_cache_until_invalidated() {
		let (ctx, queries) = seeded().await;
		let client = Actor::client("c1");
		let query = ListOrdersQuery {
			limit: Some(2),
			..Default::default()
		};

		let first = queries.list(&client, &query).await.unwrap();
		assert_eq!(first.total, 3);
		assert_eq!(first.orders.len(), 2);
		assert_eq!(first.pages, 2);

		// Written behind the cache's back
		ctx.store
			.create(pending_order("o4", ORIGIN), &client)
			.await
			.unwrap();
		assert_eq!(queries.list(&client, &query).await.unwrap().total, 3);

		ctx.invalidate_parties(&["c1".to_string()]).await;
		assert_eq!(queries.list(&client, &query).await.unwrap().total, 4);
	}

	#[tokio::test]
	async fn test_list_filters_by_status() {
		let (ctx, queries) = seeded().await;
		ctx.store
			.append_status_transition(
				"o2",
				OrderStatus::Pending,
				OrderStatus::Cancelled,
				&Actor::client("c1"),
				None,
			)
			.await
			.unwrap();

		let page = queries
			.list(
				&Actor::client("c1"),
				&ListOrdersQuery {
					status: Some("CANCELLED".into()),
					..Default::default()
				},
			)
			.await
			.unwrap();
		assert_eq!(page.total, 1);
		assert_eq!(page.orders[0].id, "o2");
	}

	#[tokio::test]
	async fn test_pending_offers_for_walker() {
		let (ctx, queries) = seeded().await;
		let now = Utc::now();
		ctx.store
			.transition_with(
				"o1",
				OrderStatus::Pending,
				OrderStatus::Offered,
				&Actor::system(),
				None,
				|o| {
					o.offer = Some(Offer {
						walker_ids: vec!["w1".into(), "w2".into()],
						round: 0,
						radius_meters: 3000.0,
						offered_at: now,
						expires_at: now + chrono::Duration::minutes(5),
					});
					Ok(())
				},
			)
			.await
			.unwrap();

		let offers = queries.pending_offers(&Actor::walker("w2")).await.unwrap();
		assert_eq!(offers.len(), 1);
		assert!(queries.get("o1", &Actor::walker("w2")).await.is_ok());
		assert!(queries.pending_offers(&Actor::walker("w3")).await.unwrap().is_empty());
		assert!(queries.pending_offers(&Actor::client("c1")).await.is_err());
	}

	#[tokio::test]
	async fn test_statistics_counts_every_status() {
		let (ctx, queries) = seeded().await;
		ctx.store
			.create(pending_order("o9", ORIGIN), &Actor::client("c1"))
			.await
			.unwrap();
		ctx.store
			.transition_with(
				"o9",
				OrderStatus::Pending,
				OrderStatus::Completed,
				&Actor::system(),
				None,
				|o| {
					o.walker_id = Some("w1".into());
					o.completed_at = Some(o.updated_at);
					o.client_review = Some(Review {
						rating: 4,
						comment: None,
						created_at: o.updated_at,
					});
					Ok(())
				},
			)
			.await
			.unwrap();

		let stats = queries.statistics(&Actor::client("c1")).await.unwrap();
		assert_eq!(stats.total_orders, 4);
		assert_eq!(stats.status_counts["PENDING"], 3);
		assert_eq!(stats.status_counts["COMPLETED"], 1);
		assert_eq!(stats.status_counts["NO_WALKER"], 0);

		let walker_stats = queries.statistics(&Actor::walker("w1")).await.unwrap();
		assert_eq!(walker_stats.total_orders, 1);
		assert_eq!(walker_stats.average_rating, 4.0);
	}

	#[tokio::test]
	async fn test_estimate_needs_nearby_walkers() {
		let (ctx, queries) = seeded().await;
		let query = EstimateQuery {
			latitude: ORIGIN.latitude,
			longitude: ORIGIN.longitude,
			duration_minutes: 60,
			order_type: OrderType::SingleWalk,
			scheduled_at: None,
		};
		let err = queries.estimate(&query).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NoCandidates);

		ctx.geo
			.register_walker(
				"w1",
				WalkerProfile {
					rating: 5.0,
					rating_count: 3,
					hourly_rate: Some(Decimal::from(600)),
				},
			)
			.await
			.unwrap();
		ctx.geo
			.upsert_position("w1", north_of(ORIGIN, 400.0), Utc::now())
			.await
			.unwrap();

		let estimate = queries.estimate(&query).await.unwrap();
		assert_eq!(estimate.walkers.len(), 1);
		assert_eq!(estimate.price.total, Decimal::from(600));
	}
}
