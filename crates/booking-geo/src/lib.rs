//! Geo index module for the booking engine.
//!
//! The geo index owns walker availability: last-known positions, self-reported
//! status, current load and the profile attributes used for ranking. Backends
//! implement single-key writes and a radius lookup; [`GeoService`] layers
//! freshness filtering, progressive radius widening and the query timeout on
//! top of them.

use async_trait::async_trait;
use booking_types::{
	hourly_rate_in_bounds, ConfigSchema, GeoPoint, ImplementationRegistry, WalkerAvailability,
	WalkerProfile, WalkerStatus, MAX_HOURLY_RATE,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// How far past the current time a position report may be stamped.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

/// Errors that can occur during geo index operations.
#[derive(Debug, Error)]
pub enum GeoError {
	#[error("Walker not found: {0}")]
	NotFound(String),
	#[error("Invalid position: {0}")]
	InvalidPosition(String),
	#[error("Invalid profile: {0}")]
	InvalidProfile(String),
	#[error("Report timestamp {0} is in the future")]
	FutureTimestamp(DateTime<Utc>),
	/// A proximity query exceeded its time budget.
	#[error("Geo query timed out after {0} ms")]
	QueryTimeout(u64),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Great-circle distance between two points in meters.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
	let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
	let d_lat = (b.latitude - a.latitude).to_radians();
	let d_lon = (b.longitude - a.longitude).to_radians();

	let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
	2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// A walker found by a proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyWalker {
	pub availability: WalkerAvailability,
	pub distance_meters: f64,
}

/// Trait defining the interface for geo index backends.
///
/// Every write touches exactly one walker entry.
#[async_trait]
pub trait GeoIndexInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Creates or updates a walker's profile. New walkers have no position
	/// yet and stay stale until their first report.
	async fn register_walker(
		&self,
		walker_id: &str,
		profile: WalkerProfile,
	) -> Result<WalkerAvailability, GeoError>;

	/// Records a position report. Reports older than the stored one are
	/// ignored. Unknown walkers are registered with a default profile.
	async fn upsert_position(
		&self,
		walker_id: &str,
		position: GeoPoint,
		timestamp: DateTime<Utc>,
	) -> Result<WalkerAvailability, GeoError>;

	async fn set_status(
		&self,
		walker_id: &str,
		status: WalkerStatus,
	) -> Result<WalkerAvailability, GeoError>;

	/// Adds `delta` to the walker's active order count, saturating at zero.
	async fn adjust_load(&self, walker_id: &str, delta: i32) -> Result<u32, GeoError>;

	/// Folds a 1-5 rating into the walker's running mean.
	async fn record_rating(&self, walker_id: &str, rating: u8)
		-> Result<WalkerAvailability, GeoError>;

	async fn get(&self, walker_id: &str) -> Result<Option<WalkerAvailability>, GeoError>;

	/// Every walker within `radius_meters` of `center`, in any order.
	async fn within_radius(
		&self,
		center: GeoPoint,
		radius_meters: f64,
	) -> Result<Vec<NearbyWalker>, GeoError>;

	/// Every known walker, in any order.
	async fn all(&self) -> Result<Vec<WalkerAvailability>, GeoError>;
}

/// Type alias for geo index factory functions.
pub type GeoFactory = fn(&toml::Value) -> Result<Box<dyn GeoIndexInterface>, GeoError>;

/// Registry trait for geo index implementations.
pub trait GeoRegistry: ImplementationRegistry<Factory = GeoFactory> {}

/// Get all registered geo index implementations.
pub fn get_all_implementations() -> Vec<(&'static str, GeoFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}

/// Extra constraints applied while searching.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateFilter {
	pub min_rating: f64,
	/// Walkers at or above this load are skipped.
	pub max_load: Option<u32>,
}

impl CandidateFilter {
	fn accepts(&self, walker: &WalkerAvailability) -> bool {
		walker.rating >= self.min_rating && self.max_load.is_none_or(|max| walker.load < max)
	}
}

/// Result of a widening proximity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityResult {
	/// Nearest first.
	pub walkers: Vec<NearbyWalker>,
	/// Radius at which the search stopped.
	pub radius_meters: f64,
}

/// Service wrapping a geo index backend with freshness and search policy.
pub struct GeoService {
	backend: Box<dyn GeoIndexInterface>,
	stale_after: chrono::Duration,
	query_timeout: Duration,
	max_radius_meters: f64,
}

impl GeoService {
	pub fn new(
		backend: Box<dyn GeoIndexInterface>,
		stale_after: Duration,
		query_timeout: Duration,
		max_radius_meters: f64,
	) -> Self {
		Self {
			backend,
			stale_after: chrono::Duration::from_std(stale_after)
				.unwrap_or_else(|_| chrono::Duration::weeks(52)),
			query_timeout,
			max_radius_meters,
		}
	}

	pub fn max_radius_meters(&self) -> f64 {
		self.max_radius_meters
	}

	/// Whether the walker reports as available and is not stale.
	pub fn is_matchable(&self, walker: &WalkerAvailability, now: DateTime<Utc>) -> bool {
		walker.status == WalkerStatus::Available && !walker.is_stale(now, self.stale_after)
	}

	pub async fn register_walker(
		&self,
		walker_id: &str,
		profile: WalkerProfile,
	) -> Result<WalkerAvailability, GeoError> {
		if !(0.0..=5.0).contains(&profile.rating) {
			return Err(GeoError::InvalidProfile(format!(
				"rating {} outside [0, 5]",
				profile.rating
			)));
		}
		if let Some(rate) = profile.hourly_rate.filter(|r| !hourly_rate_in_bounds(*r)) {
			return Err(GeoError::InvalidProfile(format!(
				"hourly rate {} outside (0, {}]",
				rate, MAX_HOURLY_RATE
			)));
		}
		self.backend.register_walker(walker_id, profile).await
	}

	pub async fn upsert_position(
		&self,
		walker_id: &str,
		position: GeoPoint,
		timestamp: DateTime<Utc>,
	) -> Result<WalkerAvailability, GeoError> {
		if !position.is_valid() {
			return Err(GeoError::InvalidPosition(format!(
				"({}, {})",
				position.latitude, position.longitude
			)));
		}
		if timestamp > Utc::now() + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECONDS) {
			return Err(GeoError::FutureTimestamp(timestamp));
		}
		self.backend
			.upsert_position(walker_id, position, timestamp)
			.await
	}

	pub async fn set_status(
		&self,
		walker_id: &str,
		status: WalkerStatus,
	) -> Result<WalkerAvailability, GeoError> {
		self.backend.set_status(walker_id, status).await
	}

	pub async fn adjust_load(&self, walker_id: &str, delta: i32) -> Result<u32, GeoError> {
		self.backend.adjust_load(walker_id, delta).await
	}

	pub async fn record_rating(
		&self,
		walker_id: &str,
		rating: u8,
	) -> Result<WalkerAvailability, GeoError> {
		self.backend.record_rating(walker_id, rating).await
	}

	pub async fn get(&self, walker_id: &str) -> Result<Option<WalkerAvailability>, GeoError> {
		self.backend.get(walker_id).await
	}

	/// Walkers within `radius_meters`, nearest first, excluding stale or
	/// unavailable entries.
	///
	/// An empty area widens the radius by doubling up to the configured
	/// ceiling. Returns an empty result when nothing is found at the ceiling.
	pub async fn find_candidates(
		&self,
		latitude: f64,
		longitude: f64,
		radius_meters: f64,
		max_results: usize,
	) -> Result<ProximityResult, GeoError> {
		self.find_candidates_where(
			GeoPoint::new(latitude, longitude),
			radius_meters,
			max_results,
			CandidateFilter::default(),
		)
		.await
	}

	/// [`Self::find_candidates`] with additional rating and load constraints
	/// applied before truncation.
	pub async fn find_candidates_where(
		&self,
		center: GeoPoint,
		radius_meters: f64,
		max_results: usize,
		filter: CandidateFilter,
	) -> Result<ProximityResult, GeoError> {
		if !center.is_valid() {
			return Err(GeoError::InvalidPosition(format!(
				"({}, {})",
				center.latitude, center.longitude
			)));
		}

		let search = self.widening_search(center, radius_meters, max_results, filter);
		match tokio::time::timeout(self.query_timeout, search).await {
			Ok(result) => result,
			Err(_) => Err(GeoError::QueryTimeout(self.query_timeout.as_millis() as u64)),
		}
	}

	async fn widening_search(
		&self,
		center: GeoPoint,
		radius_meters: f64,
		max_results: usize,
		filter: CandidateFilter,
	) -> Result<ProximityResult, GeoError> {
		let mut radius = radius_meters.clamp(1.0, self.max_radius_meters.max(1.0));
		loop {
			let now = Utc::now();
			let mut walkers: Vec<NearbyWalker> = self
				.backend
				.within_radius(center, radius)
				.await?
				.into_iter()
				.filter(|w| self.is_matchable(&w.availability, now) && filter.accepts(&w.availability))
				.collect();

			if !walkers.is_empty() || radius >= self.max_radius_meters {
				walkers.sort_by(|a, b| {
					a.distance_meters
						.total_cmp(&b.distance_meters)
						.then_with(|| a.availability.walker_id.cmp(&b.availability.walker_id))
				});
				walkers.truncate(max_results);
				return Ok(ProximityResult {
					walkers,
					radius_meters: radius,
				});
			}

			radius = (radius * 2.0).min(self.max_radius_meters);
			tracing::debug!(radius_meters = radius, "No walkers found, widening search");
		}
	}

	/// Non-stale available walkers with no radius or rating filter, in
	/// index order, truncated to `max_results`.
	pub async fn scan_available(
		&self,
		max_results: usize,
	) -> Result<Vec<WalkerAvailability>, GeoError> {
		let now = Utc::now();
		let mut walkers: Vec<WalkerAvailability> = self
			.backend
			.all()
			.await?
			.into_iter()
			.filter(|w| self.is_matchable(w, now))
			.collect();
		walkers.truncate(max_results);
		Ok(walkers)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryGeoIndex;
	use rust_decimal::Decimal;

	fn service() -> GeoService {
		GeoService::new(
			Box::new(MemoryGeoIndex::new()),
			Duration::from_secs(300),
			Duration::from_millis(500),
			10_000.0,
		)
	}

	/// A point roughly `meters` north of `origin`.
	fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
		let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
		GeoPoint::new(origin.latitude + d_lat, origin.longitude)
	}

	const ORIGIN: GeoPoint = GeoPoint {
		latitude: 55.7558,
		longitude: 37.6173,
	};

	#[test]
	fn test_haversine_known_distance() {
		let moscow = GeoPoint::new(55.7558, 37.6173);
		let petersburg = GeoPoint::new(59.9343, 30.3351);
		let km = haversine_meters(moscow, petersburg) / 1000.0;
		assert!((km - 634.0).abs() < 5.0, "got {}", km);
		assert_eq!(haversine_meters(moscow, moscow), 0.0);
	}

	#[tokio::test]
	async fn test_nearest_first_and_stale_excluded() {
		let geo = service();
		let now = Utc::now();
		geo.upsert_position("far", north_of(ORIGIN, 1500.0), now).await.unwrap();
		geo.upsert_position("near", north_of(ORIGIN, 200.0), now).await.unwrap();
		geo.upsert_position("stale", north_of(ORIGIN, 100.0), now - chrono::Duration::minutes(10))
			.await
			.unwrap();

		let result = geo
			.find_candidates(ORIGIN.latitude, ORIGIN.longitude, 2000.0, 10)
			.await
			.unwrap();
		let ids: Vec<_> = result
			.walkers
			.iter()
			.map(|w| w.availability.walker_id.as_str())
			.collect();
		assert_eq!(ids, vec!["near", "far"]);
	}

	#[tokio::test]
	async fn test_unavailable_excluded() {
		let geo = service();
		geo.upsert_position("w1", north_of(ORIGIN, 200.0), Utc::now()).await.unwrap();
		geo.set_status("w1", WalkerStatus::Break).await.unwrap();

		let result = geo
			.find_candidates(ORIGIN.latitude, ORIGIN.longitude, 1000.0, 10)
			.await
			.unwrap();
		assert!(result.walkers.is_empty());
		assert_eq!(result.radius_meters, 10_000.0);
	}

	#[tokio::test]
	async fn test_radius_widens_to_sparse_walker() {
		let geo = service();
		geo.upsert_position("w1", north_of(ORIGIN, 7000.0), Utc::now()).await.unwrap();

		let result = geo
			.find_candidates(ORIGIN.latitude, ORIGIN.longitude, 1000.0, 5)
			.await
			.unwrap();
		assert_eq!(result.walkers.len(), 1);
		assert_eq!(result.radius_meters, 8000.0);

		geo.upsert_position("w2", north_of(ORIGIN, 12_000.0), Utc::now()).await.unwrap();
		let result = geo
			.find_candidates_where(
				ORIGIN,
				1000.0,
				5,
				CandidateFilter {
					min_rating: 0.0,
					max_load: Some(0),
				},
			)
			.await
			.unwrap();
		assert!(result.walkers.is_empty());
	}

	#[tokio::test]
	async fn test_filter_applies_before_truncation() {
		let geo = service();
		let now = Utc::now();
		geo.upsert_position("low", north_of(ORIGIN, 100.0), now).await.unwrap();
		geo.upsert_position("high", north_of(ORIGIN, 900.0), now).await.unwrap();
		geo.register_walker(
			"high",
			WalkerProfile {
				rating: 4.9,
				rating_count: 12,
				hourly_rate: None,
			},
		)
		.await
		.unwrap();

		let result = geo
			.find_candidates_where(
				ORIGIN,
				1000.0,
				1,
				CandidateFilter {
					min_rating: 4.0,
					max_load: None,
				},
			)
			.await
			.unwrap();
		assert_eq!(result.walkers.len(), 1);
		assert_eq!(result.walkers[0].availability.walker_id, "high");
	}

	#[tokio::test]
	async fn test_invalid_position_rejected() {
		let geo = service();
		let err = geo
			.upsert_position("w1", GeoPoint::new(91.0, 0.0), Utc::now())
			.await
			.unwrap_err();
		assert!(matches!(err, GeoError::InvalidPosition(_)));
	}

	/// Memory index whose radius queries stall before answering.
	struct StallingIndex(MemoryGeoIndex, Duration);

	#[async_trait]
	impl GeoIndexInterface for StallingIndex {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			self.0.config_schema()
		}

		async fn register_walker(
			&self,
			walker_id: &str,
			profile: WalkerProfile,
		) -> Result<WalkerAvailability, GeoError> {
			self.0.register_walker(walker_id, profile).await
		}

		async fn upsert_position(
			&self,
			walker_id: &str,
			position: GeoPoint,
			timestamp: DateTime<Utc>,
		) -> Result<WalkerAvailability, GeoError> {
			self.0.upsert_position(walker_id, position, timestamp).await
		}

		async fn set_status(
			&self,
			walker_id: &str,
			status: WalkerStatus,
		) -> Result<WalkerAvailability, GeoError> {
			self.0.set_status(walker_id, status).await
		}

		async fn adjust_load(&self, walker_id: &str, delta: i32) -> Result<u32, GeoError> {
			self.0.adjust_load(walker_id, delta).await
		}

		async fn record_rating(
			&self,
			walker_id: &str,
			rating: u8,
		) -> Result<WalkerAvailability, GeoError> {
			self.0.record_rating(walker_id, rating).await
		}

		async fn get(&self, walker_id: &str) -> Result<Option<WalkerAvailability>, GeoError> {
			self.0.get(walker_id).await
		}

		async fn within_radius(
			&self,
			center: GeoPoint,
			radius_meters: f64,
		) -> Result<Vec<NearbyWalker>, GeoError> {
			tokio::time::sleep(self.1).await;
			self.0.within_radius(center, radius_meters).await
		}

		async fn all(&self) -> Result<Vec<WalkerAvailability>, GeoError> {
			self.0.all().await
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_backend_reports_query_timeout() {
		let geo = GeoService::new(
			Box::new(StallingIndex(MemoryGeoIndex::new(), Duration::from_secs(2))),
			Duration::from_secs(300),
			Duration::from_millis(500),
			10_000.0,
		);
		geo.upsert_position("w1", north_of(ORIGIN, 200.0), Utc::now()).await.unwrap();

		let err = geo
			.find_candidates(ORIGIN.latitude, ORIGIN.longitude, 1000.0, 5)
			.await
			.unwrap_err();
		assert!(matches!(err, GeoError::QueryTimeout(500)));

		// Within budget the same backend answers normally
		let geo = GeoService::new(
			Box::new(StallingIndex(MemoryGeoIndex::new(), Duration::from_millis(100))),
			Duration::from_secs(300),
			Duration::from_millis(500),
			10_000.0,
		);
		geo.upsert_position("w1", north_of(ORIGIN, 200.0), Utc::now()).await.unwrap();
		let result = geo
			.find_candidates(ORIGIN.latitude, ORIGIN.longitude, 1000.0, 5)
			.await
			.unwrap();
		assert_eq!(result.walkers.len(), 1);
	}

	#[tokio::test]
	async fn test_future_report_rejected() {
		let geo = service();
		let now = Utc::now();
		let err = geo
			.upsert_position("w1", GeoPoint::new(10.0, 10.0), now + chrono::Duration::days(3650))
			.await
			.unwrap_err();
		assert!(matches!(err, GeoError::FutureTimestamp(_)));

		// Small skew is tolerated
		geo.upsert_position("w1", ORIGIN, now + chrono::Duration::seconds(5))
			.await
			.unwrap();
		let stored = geo.get("w1").await.unwrap().unwrap();
		assert_eq!(stored.position, ORIGIN);
	}

	#[tokio::test]
	async fn test_profile_rate_bounds() {
		let geo = service();
		for rate in [Decimal::ZERO, Decimal::MAX, MAX_HOURLY_RATE + Decimal::ONE] {
			let err = geo
				.register_walker(
					"w1",
					WalkerProfile {
						rating: 4.0,
						rating_count: 1,
						hourly_rate: Some(rate),
					},
				)
				.await
				.unwrap_err();
			assert!(matches!(err, GeoError::InvalidProfile(_)), "rate {}", rate);
		}
		let walker = geo
			.register_walker(
				"w1",
				WalkerProfile {
					rating: 4.0,
					rating_count: 1,
					hourly_rate: Some(MAX_HOURLY_RATE),
				},
			)
			.await
			.unwrap();
		assert_eq!(walker.hourly_rate, Some(MAX_HOURLY_RATE));
	}

	#[tokio::test]
	async fn test_scan_available_ignores_radius() {
		let geo = service();
		let now = Utc::now();
		geo.upsert_position("w1", GeoPoint::new(0.0, 0.0), now).await.unwrap();
		geo.upsert_position("w2", north_of(ORIGIN, 50_000.0), now).await.unwrap();
		geo.set_status("w2", WalkerStatus::Busy).await.unwrap();

		let walkers = geo.scan_available(10).await.unwrap();
		assert_eq!(walkers.len(), 1);
		assert_eq!(walkers[0].walker_id, "w1");
	}
}
