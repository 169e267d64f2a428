//! Matching engine.
//!
//! A matching run is a bounded sequence of rounds. Round `i` starts its
//! search at `initial_radius × 2^i` and relaxes the minimum rating by
//! `i × rating_relax_step`; the geo index widens each search further up to
//! its ceiling. The first round that yields candidates produces the offer.
//!
//! When the geo index fails or times out, a round falls back to an
//! unordered scan of every fresh, available walker.

use crate::error::BookingError;
use booking_config::MatchingConfig;
use booking_geo::{haversine_meters, CandidateFilter, GeoError, GeoService};
use booking_types::{
	truncate_id, GeoPoint, MatchCandidate, NearbyWalkers, Order, WalkerAvailability,
};
use std::sync::Arc;
use tracing::instrument;

const RATING_WEIGHT: f64 = 0.7;
const PROXIMITY_WEIGHT: f64 = 0.3;
const LOAD_PENALTY: f64 = 0.05;
/// Candidates fetched per round before ranking, as a multiple of the offer size.
const POOL_FACTOR: usize = 3;

/// Search parameters of one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundPlan {
	pub round: u32,
	pub radius_meters: f64,
	pub min_rating: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
	/// A round produced candidates, best first.
	Offer {
		candidates: Vec<MatchCandidate>,
		round: u32,
		radius_meters: f64,
	},
	/// Every remaining round came back empty.
	Exhausted { rounds: u32 },
}

/// Suitability of a walker: rating dominates, proximity breaks near-ties and
/// every active order costs a fixed penalty.
pub fn suitability_score(rating: f64, distance_meters: f64, max_radius_meters: f64, load: u32) -> f64 {
	let rating_part = (rating / 5.0).clamp(0.0, 1.0);
	let proximity_part = if max_radius_meters > 0.0 {
		(1.0 - distance_meters / max_radius_meters).clamp(0.0, 1.0)
	} else {
		0.0
	};
	RATING_WEIGHT * rating_part + PROXIMITY_WEIGHT * proximity_part - LOAD_PENALTY * f64::from(load)
}

/// Walking time in whole minutes, rounded up.
pub fn eta_minutes(distance_meters: f64, walking_speed_kmh: f64) -> u32 {
	let meters_per_minute = walking_speed_kmh * 1000.0 / 60.0;
	if meters_per_minute <= 0.0 {
		return u32::MAX;
	}
	(distance_meters / meters_per_minute).ceil().max(0.0) as u32
}

pub struct MatchingEngine {
	geo: Arc<GeoService>,
	config: MatchingConfig,
	walking_speed_kmh: f64,
}

impl MatchingEngine {
	pub fn new(geo: Arc<GeoService>, config: MatchingConfig, walking_speed_kmh: f64) -> Self {
		Self {
			geo,
			config,
			walking_speed_kmh,
		}
	}

	pub fn max_rounds(&self) -> u32 {
		self.config.max_rounds
	}

	pub fn plan(&self, round: u32) -> RoundPlan {
		let factor = 2f64.powi(round.min(30) as i32);
		RoundPlan {
			round,
			radius_meters: (self.config.initial_radius_meters * factor)
				.min(self.geo.max_radius_meters()),
			min_rating: (self.config.initial_min_rating
				- f64::from(round) * self.config.rating_relax_step)
				.max(0.0),
		}
	}

	fn candidate(&self, walker: &WalkerAvailability, distance_meters: f64) -> MatchCandidate {
		MatchCandidate {
			walker_id: walker.walker_id.clone(),
			distance_meters,
			eta_minutes: eta_minutes(distance_meters, self.walking_speed_kmh),
			rating: walker.rating,
			hourly_rate: walker.hourly_rate,
			load: walker.load,
			score: suitability_score(
				walker.rating,
				distance_meters,
				self.geo.max_radius_meters(),
				walker.load,
			),
		}
	}

	/// Best first: the preferred walker, then score, distance and walker id.
	fn rank(candidates: &mut [MatchCandidate], preferred: Option<&str>) {
		candidates.sort_by(|a, b| {
			let a_pref = preferred == Some(a.walker_id.as_str());
			let b_pref = preferred == Some(b.walker_id.as_str());
			b_pref
				.cmp(&a_pref)
				.then_with(|| b.score.total_cmp(&a.score))
				.then_with(|| a.distance_meters.total_cmp(&b.distance_meters))
				.then_with(|| a.walker_id.cmp(&b.walker_id))
		});
	}

	/// Runs the rounds the order has not consumed yet.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id)))]
	pub async fn find_match(&self, order: &Order) -> Result<MatchOutcome, BookingError> {
		for round in order.matching_round..self.config.max_rounds {
			let plan = self.plan(round);
			let (candidates, radius_meters) = self.run_round(order, plan).await?;
			if !candidates.is_empty() {
				tracing::info!(
					round,
					radius_meters,
					candidates = candidates.len(),
					"Matching round produced candidates"
				);
				return Ok(MatchOutcome::Offer {
					candidates,
					round,
					radius_meters,
				});
			}
			tracing::debug!(round, min_rating = plan.min_rating, "Matching round empty");
		}
		Ok(MatchOutcome::Exhausted {
			rounds: self.config.max_rounds,
		})
	}

	async fn run_round(
		&self,
		order: &Order,
		plan: RoundPlan,
	) -> Result<(Vec<MatchCandidate>, f64), BookingError> {
		let filter = CandidateFilter {
			min_rating: plan.min_rating,
			max_load: Some(self.config.max_active_orders),
		};
		let pool = self.config.max_candidates.saturating_mul(POOL_FACTOR);

		match self
			.geo
			.find_candidates_where(order.location, plan.radius_meters, pool, filter)
			.await
		{
			Ok(result) => {
				let mut candidates: Vec<MatchCandidate> = result
					.walkers
					.iter()
					.map(|w| self.candidate(&w.availability, w.distance_meters))
					.collect();
				Self::rank(&mut candidates, order.preferred_walker_id.as_deref());
				candidates.truncate(self.config.max_candidates);
				Ok((candidates, result.radius_meters))
			},
			Err(e @ (GeoError::QueryTimeout(_) | GeoError::Backend(_))) => {
				tracing::warn!(error = %e, round = plan.round, "Geo query failed, scanning all available walkers");
				let candidates = self.fallback_scan(order.location).await?;
				Ok((candidates, self.geo.max_radius_meters()))
			},
			Err(e) => Err(e.into()),
		}
	}

	/// Unfiltered, unordered scan. Walkers at their load cap are still
	/// skipped since they could not accept.
	async fn fallback_scan(&self, center: GeoPoint) -> Result<Vec<MatchCandidate>, BookingError> {
		let walkers = self.geo.scan_available(usize::MAX).await?;
		Ok(walkers
			.iter()
			.filter(|w| w.load < self.config.max_active_orders)
			.take(self.config.max_candidates)
			.map(|w| self.candidate(w, haversine_meters(center, w.position)))
			.collect())
	}

	/// Nearby available walkers for an estimate, nearest first.
	pub async fn nearby(&self, center: GeoPoint) -> Result<NearbyWalkers, BookingError> {
		let result = self
			.geo
			.find_candidates_where(
				center,
				self.config.initial_radius_meters,
				self.config.max_candidates,
				CandidateFilter::default(),
			)
			.await?;
		let walkers: Vec<MatchCandidate> = result
			.walkers
			.iter()
			.map(|w| self.candidate(&w.availability, w.distance_meters))
			.collect();
		Ok(NearbyWalkers {
			walkers,
			radius_meters: result.radius_meters,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{north_of, pending_order, ORIGIN};
	use async_trait::async_trait;
	use booking_geo::implementations::memory::MemoryGeoIndex;
	use booking_geo::{GeoIndexInterface, NearbyWalker};
	use booking_types::{ConfigSchema, WalkerProfile, WalkerStatus};
	use chrono::{DateTime, Utc};
	use std::time::Duration;

	/// Memory index whose radius queries fail, or stall for `delay` first.
	struct FaultyRadiusIndex {
		inner: MemoryGeoIndex,
		delay: Option<Duration>,
	}

	impl FaultyRadiusIndex {
		fn offline() -> Self {
			Self {
				inner: MemoryGeoIndex::new(),
				delay: None,
			}
		}

		fn slow(delay: Duration) -> Self {
			Self {
				inner: MemoryGeoIndex::new(),
				delay: Some(delay),
			}
		}
	}

	#[async_trait]
	impl GeoIndexInterface for FaultyRadiusIndex {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			self.inner.config_schema()
		}

		async fn register_walker(
			&self,
			walker_id: &str,
			profile: WalkerProfile,
		) -> Result<WalkerAvailability, GeoError> {
			self.inner.register_walker(walker_id, profile).await
		}

		async fn upsert_position(
			&self,
			walker_id: &str,
			position: GeoPoint,
			timestamp: DateTime<Utc>,
		) -> Result<WalkerAvailability, GeoError> {
			self.inner.upsert_position(walker_id, position, timestamp).await
		}

		async fn set_status(
			&self,
			walker_id: &str,
			status: WalkerStatus,
		) -> Result<WalkerAvailability, GeoError> {
			self.inner.set_status(walker_id, status).await
		}

		async fn adjust_load(&self, walker_id: &str, delta: i32) -> Result<u32, GeoError> {
			self.inner.adjust_load(walker_id, delta).await
		}

		async fn record_rating(
			&self,
			walker_id: &str,
			rating: u8,
		) -> Result<WalkerAvailability, GeoError> {
			self.inner.record_rating(walker_id, rating).await
		}

		async fn get(&self, walker_id: &str) -> Result<Option<WalkerAvailability>, GeoError> {
			self.inner.get(walker_id).await
		}

		async fn within_radius(
			&self,
			center: GeoPoint,
			radius_meters: f64,
		) -> Result<Vec<NearbyWalker>, GeoError> {
			match self.delay {
				Some(delay) => {
					tokio::time::sleep(delay).await;
					self.inner.within_radius(center, radius_meters).await
				},
				None => Err(GeoError::Backend("index offline".into())),
			}
		}

		async fn all(&self) -> Result<Vec<WalkerAvailability>, GeoError> {
			self.inner.all().await
		}
	}

	fn geo(backend: Box<dyn GeoIndexInterface>) -> Arc<GeoService> {
		Arc::new(GeoService::new(
			backend,
			Duration::from_secs(300),
			Duration::from_millis(500),
			10_000.0,
		))
	}

	fn engine(geo: Arc<GeoService>) -> MatchingEngine {
		MatchingEngine::new(geo, MatchingConfig::default(), 5.0)
	}

	async fn place(geo: &GeoService, id: &str, meters: f64, rating: f64) {
		geo.register_walker(
			id,
			WalkerProfile {
				rating,
				rating_count: 10,
				hourly_rate: None,
			},
		)
		.await
		.unwrap();
		geo.upsert_position(id, north_of(ORIGIN, meters), Utc::now())
			.await
			.unwrap();
	}

	#[test]
	fn test_round_plan_widens_and_relaxes() {
		let engine = engine(geo(Box::new(MemoryGeoIndex::new())));
		assert_eq!(
			engine.plan(0),
			RoundPlan {
				round: 0,
				radius_meters: 3000.0,
				min_rating: 4.0
			}
		);
		assert_eq!(engine.plan(1).radius_meters, 6000.0);
		assert_eq!(engine.plan(1).min_rating, 3.0);
		assert_eq!(engine.plan(2).radius_meters, 10_000.0);
		assert_eq!(engine.plan(9).min_rating, 0.0);
	}

	#[test]
	fn test_eta_rounds_up() {
		// 5 km/h is 83.3 m/min
		assert_eq!(eta_minutes(0.0, 5.0), 0);
		assert_eq!(eta_minutes(84.0, 5.0), 2);
		assert_eq!(eta_minutes(2000.0, 5.0), 24);
	}

	#[test]
	fn test_score_prefers_rating_then_proximity() {
		let near_average = suitability_score(4.0, 100.0, 10_000.0, 0);
		let far_excellent = suitability_score(5.0, 3000.0, 10_000.0, 0);
		assert!(far_excellent > near_average);

		let busy = suitability_score(5.0, 3000.0, 10_000.0, 1);
		assert!((far_excellent - busy - LOAD_PENALTY).abs() < 1e-9);
	}

	#[tokio::test]
	async fn test_ranks_candidates_by_score() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w-near", 200.0, 4.2).await;
		place(&geo, "w-best", 1500.0, 5.0).await;
		place(&geo, "w-low", 100.0, 2.0).await;

		let outcome = engine(geo).find_match(&pending_order("o1", ORIGIN)).await.unwrap();
		match outcome {
			MatchOutcome::Offer {
				candidates, round, ..
			} => {
				assert_eq!(round, 0);
				let ids: Vec<&str> = candidates.iter().map(|c| c.walker_id.as_str()).collect();
				assert_eq!(ids, vec!["w-best", "w-near"]);
			},
			other => panic!("expected offer, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_preferred_walker_ranked_first() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w-best", 100.0, 5.0).await;
		place(&geo, "w-fav", 2500.0, 4.1).await;

		let mut order = pending_order("o1", ORIGIN);
		order.preferred_walker_id = Some("w-fav".into());
		let MatchOutcome::Offer { candidates, .. } = engine(geo).find_match(&order).await.unwrap()
		else {
			panic!("expected offer");
		};
		assert_eq!(candidates[0].walker_id, "w-fav");
	}

	#[tokio::test]
	async fn test_later_round_relaxes_rating() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w-ok", 500.0, 3.5).await;

		let MatchOutcome::Offer {
			candidates, round, ..
		} = engine(geo).find_match(&pending_order("o1", ORIGIN)).await.unwrap()
		else {
			panic!("expected offer");
		};
		assert_eq!(round, 1);
		assert_eq!(candidates[0].walker_id, "w-ok");
	}

	#[tokio::test]
	async fn test_walker_beyond_initial_radius_is_found() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w-far", 8000.0, 4.8).await;

		let MatchOutcome::Offer { candidates, .. } =
			engine(geo).find_match(&pending_order("o1", ORIGIN)).await.unwrap()
		else {
			panic!("expected offer");
		};
		assert_eq!(candidates[0].walker_id, "w-far");
		assert!(candidates[0].distance_meters > 3000.0);
	}

	#[tokio::test]
	async fn test_exhausted_when_nobody_in_range() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w-remote", 50_000.0, 5.0).await;

		let outcome = engine(geo).find_match(&pending_order("o1", ORIGIN)).await.unwrap();
		assert_eq!(outcome, MatchOutcome::Exhausted { rounds: 3 });
	}

	#[tokio::test]
	async fn test_resumes_from_consumed_rounds() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w1", 500.0, 5.0).await;

		let mut order = pending_order("o1", ORIGIN);
		order.matching_round = 2;
		let MatchOutcome::Offer { round, .. } = engine(geo).find_match(&order).await.unwrap() else {
			panic!("expected offer");
		};
		assert_eq!(round, 2);
	}

	#[tokio::test]
	async fn test_falls_back_to_scan_on_geo_failure() {
		let geo = geo(Box::new(FaultyRadiusIndex::offline()));
		place(&geo, "w-far", 50_000.0, 1.0).await;
		place(&geo, "w-break", 100.0, 5.0).await;
		geo.set_status("w-break", WalkerStatus::Break).await.unwrap();

		let MatchOutcome::Offer {
			candidates,
			radius_meters,
			..
		} = engine(geo).find_match(&pending_order("o1", ORIGIN)).await.unwrap()
		else {
			panic!("expected offer");
		};
		let ids: Vec<&str> = candidates.iter().map(|c| c.walker_id.as_str()).collect();
		assert_eq!(ids, vec!["w-far"]);
		assert_eq!(radius_meters, 10_000.0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_geo_query_times_out_into_scan() {
		let geo = geo(Box::new(FaultyRadiusIndex::slow(Duration::from_secs(5))));
		place(&geo, "w1", 800.0, 4.8).await;

		let err = geo
			.find_candidates(ORIGIN.latitude, ORIGIN.longitude, 3000.0, 5)
			.await
			.unwrap_err();
		assert!(matches!(err, GeoError::QueryTimeout(500)));

		let MatchOutcome::Offer {
			candidates,
			round,
			radius_meters,
		} = engine(geo).find_match(&pending_order("o1", ORIGIN)).await.unwrap()
		else {
			panic!("expected offer");
		};
		assert_eq!(round, 0);
		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].walker_id, "w1");
		assert_eq!(radius_meters, 10_000.0);
	}

	#[tokio::test]
	async fn test_nearby_is_nearest_first() {
		let geo = geo(Box::new(MemoryGeoIndex::new()));
		place(&geo, "w-b", 900.0, 5.0).await;
		place(&geo, "w-a", 300.0, 3.0).await;

		let nearby = engine(geo).nearby(ORIGIN).await.unwrap();
		let ids: Vec<&str> = nearby.walkers.iter().map(|c| c.walker_id.as_str()).collect();
		assert_eq!(ids, vec!["w-a", "w-b"]);
		assert_eq!(nearby.radius_meters, 3000.0);
	}
}
