//! Fluent construction of [`Config`] values for tests.
//!
//! Built configurations use memory backends everywhere and disable surge
//! pricing so amounts in assertions stay independent of the wall clock.

use crate::{
	ApiConfig, CacheConfig, ChargePolicy, Config, GeoConfig, LifecycleConfig, MatchingConfig,
	NotificationConfig, PaymentConfig, PricingConfig, ServiceConfig, StorageConfig,
};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	cache: CacheConfig,
	geo: GeoConfig,
	pricing: PricingConfig,
	matching: MatchingConfig,
	lifecycle: LifecycleConfig,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			service_id: "test-booking".to_string(),
			storage_primary: "memory".to_string(),
			storage_implementations: HashMap::from([(
				"memory".to_string(),
				toml::Value::Table(toml::Table::new()),
			)]),
			cache: CacheConfig::default(),
			geo: GeoConfig::default(),
			pricing: PricingConfig {
				surge_enabled: false,
				..PricingConfig::default()
			},
			matching: MatchingConfig::default(),
			lifecycle: LifecycleConfig::default(),
			api: None,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	/// Uses the file backend rooted at `path` for durable storage.
	pub fn file_storage(mut self, path: impl Into<String>) -> Self {
		let mut table = toml::Table::new();
		table.insert("storage_path".to_string(), toml::Value::String(path.into()));
		self.storage_primary = "file".to_string();
		self.storage_implementations =
			HashMap::from([("file".to_string(), toml::Value::Table(table))]);
		self
	}

	pub fn initial_radius_meters(mut self, radius: f64) -> Self {
		self.matching.initial_radius_meters = radius;
		self
	}

	pub fn max_radius_meters(mut self, radius: f64) -> Self {
		self.geo.max_radius_meters = radius;
		self
	}

	pub fn start_grace_minutes(mut self, minutes: i64) -> Self {
		self.lifecycle.start_grace_minutes = minutes;
		self
	}

	pub fn max_rounds(mut self, rounds: u32) -> Self {
		self.matching.max_rounds = rounds;
		self
	}

	pub fn max_active_orders(mut self, load: u32) -> Self {
		self.matching.max_active_orders = load;
		self
	}

	pub fn offer_timeout_seconds(mut self, seconds: u64) -> Self {
		self.matching.offer_timeout_seconds = seconds;
		self
	}

	pub fn initial_min_rating(mut self, rating: f64) -> Self {
		self.matching.initial_min_rating = rating;
		self
	}

	pub fn surge_enabled(mut self, enabled: bool) -> Self {
		self.pricing.surge_enabled = enabled;
		self
	}

	pub fn charge_policy(mut self, policy: ChargePolicy) -> Self {
		self.lifecycle.charge_policy = policy;
		self
	}

	pub fn max_orders_per_day(mut self, max: usize) -> Self {
		self.lifecycle.max_orders_per_day = max;
		self
	}

	pub fn lock_ttl_ms(mut self, ttl: u64) -> Self {
		self.cache.lock_ttl_ms = ttl;
		self
	}

	pub fn geo_query_timeout_ms(mut self, timeout: u64) -> Self {
		self.geo.query_timeout_ms = timeout;
		self
	}

	pub fn stale_after_seconds(mut self, seconds: u64) -> Self {
		self.geo.stale_after_seconds = seconds;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
				event_bus_capacity: 256,
				max_concurrent_handlers: 16,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: 60,
			},
			cache: self.cache,
			geo: self.geo,
			pricing: self.pricing,
			matching: self.matching,
			lifecycle: self.lifecycle,
			payment: PaymentConfig::default(),
			notification: NotificationConfig::default(),
			api: self.api,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_built_config_round_trips_through_toml() {
		let config = ConfigBuilder::new().max_rounds(2).build();
		let text = toml::to_string(&config).unwrap();
		let parsed: Config = text.parse().unwrap();
		assert_eq!(parsed.matching.max_rounds, 2);
		assert!(!parsed.pricing.surge_enabled);
	}
}
