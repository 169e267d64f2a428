//! In-memory geo index.
//!
//! Walkers live in a sharded concurrent map, so every write locks a single
//! entry and radius queries work on a cloned snapshot without holding any
//! shard lock while they compute distances.

use crate::{haversine_meters, GeoError, GeoIndexInterface, NearbyWalker};
use async_trait::async_trait;
use booking_types::{
	ConfigSchema, GeoPoint, ImplementationRegistry, Schema, ValidationError, WalkerAvailability,
	WalkerProfile, WalkerStatus,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Distance computations between cooperative yields.
const YIELD_EVERY: usize = 256;

pub struct MemoryGeoIndex {
	walkers: DashMap<String, WalkerAvailability>,
}

impl MemoryGeoIndex {
	pub fn new() -> Self {
		Self {
			walkers: DashMap::new(),
		}
	}

	/// A walker with no position report yet. `last_seen` at the epoch keeps
	/// it stale until the first report arrives.
	fn unplaced(walker_id: &str, profile: WalkerProfile) -> WalkerAvailability {
		WalkerAvailability {
			walker_id: walker_id.to_string(),
			position: GeoPoint::new(0.0, 0.0),
			last_seen: DateTime::<Utc>::default(),
			load: 0,
			status: WalkerStatus::Available,
			rating: profile.rating,
			rating_count: profile.rating_count,
			hourly_rate: profile.hourly_rate,
		}
	}

	fn update<F>(&self, walker_id: &str, f: F) -> Result<WalkerAvailability, GeoError>
	where
		F: FnOnce(&mut WalkerAvailability),
	{
		let mut entry = self
			.walkers
			.get_mut(walker_id)
			.ok_or_else(|| GeoError::NotFound(walker_id.to_string()))?;
		f(entry.value_mut());
		Ok(entry.value().clone())
	}

	fn snapshot(&self) -> Vec<WalkerAvailability> {
		self.walkers.iter().map(|entry| entry.value().clone()).collect()
	}
}

impl Default for MemoryGeoIndex {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl GeoIndexInterface for MemoryGeoIndex {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryGeoSchema)
	}

	async fn register_walker(
		&self,
		walker_id: &str,
		profile: WalkerProfile,
	) -> Result<WalkerAvailability, GeoError> {
		let mut entry = self
			.walkers
			.entry(walker_id.to_string())
			.or_insert_with(|| Self::unplaced(walker_id, WalkerProfile::default()));
		let walker = entry.value_mut();
		walker.rating = profile.rating;
		walker.rating_count = profile.rating_count;
		walker.hourly_rate = profile.hourly_rate;
		Ok(walker.clone())
	}

	async fn upsert_position(
		&self,
		walker_id: &str,
		position: GeoPoint,
		timestamp: DateTime<Utc>,
	) -> Result<WalkerAvailability, GeoError> {
		let mut entry = self
			.walkers
			.entry(walker_id.to_string())
			.or_insert_with(|| Self::unplaced(walker_id, WalkerProfile::default()));
		let walker = entry.value_mut();
		if timestamp >= walker.last_seen {
			walker.position = position;
			walker.last_seen = timestamp;
		} else {
			tracing::trace!(walker_id = %walker_id, "Ignoring out-of-order position report");
		}
		Ok(walker.clone())
	}

	async fn set_status(
		&self,
		walker_id: &str,
		status: WalkerStatus,
	) -> Result<WalkerAvailability, GeoError> {
		self.update(walker_id, |walker| walker.status = status)
	}

	async fn adjust_load(&self, walker_id: &str, delta: i32) -> Result<u32, GeoError> {
		self.update(walker_id, |walker| {
			walker.load = walker.load.saturating_add_signed(delta);
		})
		.map(|walker| walker.load)
	}

	async fn record_rating(
		&self,
		walker_id: &str,
		rating: u8,
	) -> Result<WalkerAvailability, GeoError> {
		if !(1..=5).contains(&rating) {
			return Err(GeoError::InvalidProfile(format!("rating {} outside 1-5", rating)));
		}
		self.update(walker_id, |walker| {
			let count = f64::from(walker.rating_count);
			walker.rating = (walker.rating * count + f64::from(rating)) / (count + 1.0);
			walker.rating_count += 1;
		})
	}

	async fn get(&self, walker_id: &str) -> Result<Option<WalkerAvailability>, GeoError> {
		Ok(self.walkers.get(walker_id).map(|entry| entry.value().clone()))
	}

	async fn within_radius(
		&self,
		center: GeoPoint,
		radius_meters: f64,
	) -> Result<Vec<NearbyWalker>, GeoError> {
		let mut nearby = Vec::new();
		for (i, availability) in self.snapshot().into_iter().enumerate() {
			if i > 0 && i % YIELD_EVERY == 0 {
				tokio::task::yield_now().await;
			}
			let distance_meters = haversine_meters(center, availability.position);
			if distance_meters <= radius_meters {
				nearby.push(NearbyWalker {
					availability,
					distance_meters,
				});
			}
		}
		Ok(nearby)
	}

	async fn all(&self) -> Result<Vec<WalkerAvailability>, GeoError> {
		Ok(self.snapshot())
	}
}

pub struct MemoryGeoSchema;

impl ConfigSchema for MemoryGeoSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory geo index from configuration.
pub fn create_geo_index(config: &toml::Value) -> Result<Box<dyn GeoIndexInterface>, GeoError> {
	MemoryGeoSchema
		.validate(config)
		.map_err(|e| GeoError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryGeoIndex::new()))
}

/// Registry for the memory geo index implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::GeoFactory;

	fn factory() -> Self::Factory {
		create_geo_index
	}
}

impl crate::GeoRegistry for Registry {}
