//! Configuration module for the booking engine.
//!
//! Configuration is loaded from TOML, with `${VAR}` and `${VAR:-default}`
//! environment substitution applied before parsing. Every tunable has a
//! default; only `[service]` and `[storage]` must be present.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(any(test, feature = "testing"))]
pub mod builders;
mod loader;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the booking engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity and runtime limits of this instance.
	pub service: ServiceConfig,
	/// Durable backend holding orders and their history.
	pub storage: StorageConfig,
	/// Backend for listing caches and per-order locks.
	#[serde(default)]
	pub cache: CacheConfig,
	/// Geo index implementation and search limits.
	#[serde(default)]
	pub geo: GeoConfig,
	/// Pricing parameters.
	#[serde(default)]
	pub pricing: PricingConfig,
	/// Matching rounds and offers.
	#[serde(default)]
	pub matching: MatchingConfig,
	/// Lifecycle guards and payment policy.
	#[serde(default)]
	pub lifecycle: LifecycleConfig,
	/// Payment collaborator.
	#[serde(default)]
	pub payment: PaymentConfig,
	/// Notification collaborators.
	#[serde(default)]
	pub notification: NotificationConfig,
	/// HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this instance.
	pub id: String,
	/// Capacity of the event bus channel.
	#[serde(default = "default_event_bus_capacity")]
	pub event_bus_capacity: usize,
	/// Upper bound on concurrently running background handlers.
	#[serde(default = "default_max_concurrent_handlers")]
	pub max_concurrent_handlers: usize,
}

fn default_event_bus_capacity() -> usize {
	1000
}

fn default_max_concurrent_handlers() -> usize {
	100
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired storage entries.
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
}

fn default_cleanup_interval_seconds() -> u64 {
	300
}

/// Returns a single `memory` implementation with an empty table.
fn default_memory_implementations() -> HashMap<String, toml::Value> {
	HashMap::from([(
		"memory".to_string(),
		toml::Value::Table(toml::Table::new()),
	)])
}

fn default_memory() -> String {
	"memory".to_string()
}

/// Configuration for the cache layer.
///
/// The cache uses its own storage backend instance, picked from the same
/// set of storage implementations as `[storage]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
	#[serde(default = "default_memory")]
	pub primary: String,
	#[serde(default = "default_memory_implementations")]
	pub implementations: HashMap<String, toml::Value>,
	/// Safety-net TTL of cached order listings.
	#[serde(default = "default_list_ttl_seconds")]
	pub list_ttl_seconds: u64,
	/// TTL of cached nearby-walker lookups.
	#[serde(default = "default_availability_ttl_seconds")]
	pub availability_ttl_seconds: u64,
	/// Maximum hold time of a per-order lock.
	#[serde(default = "default_lock_ttl_ms")]
	pub lock_ttl_ms: u64,
}

fn default_list_ttl_seconds() -> u64 {
	1800
}

fn default_availability_ttl_seconds() -> u64 {
	600
}

fn default_lock_ttl_ms() -> u64 {
	3000
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			primary: default_memory(),
			implementations: default_memory_implementations(),
			list_ttl_seconds: default_list_ttl_seconds(),
			availability_ttl_seconds: default_availability_ttl_seconds(),
			lock_ttl_ms: default_lock_ttl_ms(),
		}
	}
}

impl CacheConfig {
	pub fn list_ttl(&self) -> Duration {
		Duration::from_secs(self.list_ttl_seconds)
	}

	pub fn availability_ttl(&self) -> Duration {
		Duration::from_secs(self.availability_ttl_seconds)
	}

	pub fn lock_ttl(&self) -> Duration {
		Duration::from_millis(self.lock_ttl_ms)
	}
}

/// Configuration for the geo index.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeoConfig {
	#[serde(default = "default_memory")]
	pub primary: String,
	#[serde(default = "default_memory_implementations")]
	pub implementations: HashMap<String, toml::Value>,
	/// Position reports older than this are excluded from matching.
	#[serde(default = "default_stale_after_seconds")]
	pub stale_after_seconds: u64,
	/// Bound on a single proximity query.
	#[serde(default = "default_query_timeout_ms")]
	pub query_timeout_ms: u64,
	/// Hard ceiling of the widening radius search.
	#[serde(default = "default_max_radius_meters")]
	pub max_radius_meters: f64,
	/// Used to estimate time-to-arrival.
	#[serde(default = "default_walking_speed_kmh")]
	pub walking_speed_kmh: f64,
}

fn default_stale_after_seconds() -> u64 {
	300
}

fn default_query_timeout_ms() -> u64 {
	500
}

fn default_max_radius_meters() -> f64 {
	10_000.0
}

fn default_walking_speed_kmh() -> f64 {
	5.0
}

impl Default for GeoConfig {
	fn default() -> Self {
		Self {
			primary: default_memory(),
			implementations: default_memory_implementations(),
			stale_after_seconds: default_stale_after_seconds(),
			query_timeout_ms: default_query_timeout_ms(),
			max_radius_meters: default_max_radius_meters(),
			walking_speed_kmh: default_walking_speed_kmh(),
		}
	}
}

impl GeoConfig {
	pub fn stale_after(&self) -> Duration {
		Duration::from_secs(self.stale_after_seconds)
	}

	pub fn query_timeout(&self) -> Duration {
		Duration::from_millis(self.query_timeout_ms)
	}
}

/// Configuration for pricing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
	#[serde(default = "default_currency")]
	pub currency: String,
	/// Platform share of the total, in `[0, 1)`.
	#[serde(default = "default_commission_rate")]
	pub commission_rate: Decimal,
	/// Rate used for walkers that publish none.
	#[serde(default = "default_base_hourly_rate")]
	pub base_hourly_rate: Decimal,
	#[serde(default = "default_min_hourly_rate")]
	pub min_hourly_rate: Decimal,
	#[serde(default = "default_max_hourly_rate")]
	pub max_hourly_rate: Decimal,
	/// Apply time-of-day and day-of-week demand multipliers.
	#[serde(default = "default_true")]
	pub surge_enabled: bool,
	/// Local time of the deployment, in minutes east of UTC. Demand windows
	/// are evaluated in this time.
	#[serde(default)]
	pub utc_offset_minutes: i32,
}

fn default_currency() -> String {
	"RUB".to_string()
}

fn default_commission_rate() -> Decimal {
	Decimal::new(20, 2)
}

fn default_base_hourly_rate() -> Decimal {
	Decimal::from(500)
}

fn default_min_hourly_rate() -> Decimal {
	Decimal::from(200)
}

fn default_max_hourly_rate() -> Decimal {
	Decimal::from(800)
}

fn default_true() -> bool {
	true
}

impl Default for PricingConfig {
	fn default() -> Self {
		Self {
			currency: default_currency(),
			commission_rate: default_commission_rate(),
			base_hourly_rate: default_base_hourly_rate(),
			min_hourly_rate: default_min_hourly_rate(),
			max_hourly_rate: default_max_hourly_rate(),
			surge_enabled: true,
			utc_offset_minutes: 0,
		}
	}
}

/// Configuration for matching rounds and offers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
	/// Starting search radius of the first round.
	#[serde(default = "default_initial_radius_meters")]
	pub initial_radius_meters: f64,
	/// Total number of matching rounds before NO_WALKER.
	#[serde(default = "default_max_rounds")]
	pub max_rounds: u32,
	/// Walkers offered per round.
	#[serde(default = "default_max_candidates")]
	pub max_candidates: usize,
	#[serde(default = "default_initial_min_rating")]
	pub initial_min_rating: f64,
	/// Rating threshold relaxation per round.
	#[serde(default = "default_rating_relax_step")]
	pub rating_relax_step: f64,
	/// Walkers at this load are neither offered nor allowed to accept.
	#[serde(default = "default_max_active_orders")]
	pub max_active_orders: u32,
	#[serde(default = "default_offer_timeout_seconds")]
	pub offer_timeout_seconds: u64,
	#[serde(default = "default_expiry_check_interval_seconds")]
	pub expiry_check_interval_seconds: u64,
}

fn default_initial_radius_meters() -> f64 {
	3000.0
}

fn default_max_rounds() -> u32 {
	3
}

fn default_max_candidates() -> usize {
	5
}

fn default_initial_min_rating() -> f64 {
	4.0
}

fn default_rating_relax_step() -> f64 {
	1.0
}

fn default_max_active_orders() -> u32 {
	1
}

fn default_offer_timeout_seconds() -> u64 {
	300
}

fn default_expiry_check_interval_seconds() -> u64 {
	15
}

impl Default for MatchingConfig {
	fn default() -> Self {
		Self {
			initial_radius_meters: default_initial_radius_meters(),
			max_rounds: default_max_rounds(),
			max_candidates: default_max_candidates(),
			initial_min_rating: default_initial_min_rating(),
			rating_relax_step: default_rating_relax_step(),
			max_active_orders: default_max_active_orders(),
			offer_timeout_seconds: default_offer_timeout_seconds(),
			expiry_check_interval_seconds: default_expiry_check_interval_seconds(),
		}
	}
}

impl MatchingConfig {
	pub fn offer_timeout(&self) -> Duration {
		Duration::from_secs(self.offer_timeout_seconds)
	}
}

/// When the client is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChargePolicy {
	/// Charge after the order reaches COMPLETED.
	#[default]
	OnCompletion,
	/// Charge after the walker confirms; COMPLETED skips the charge.
	OnConfirmation,
}

/// Configuration for lifecycle guards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
	/// A walker may start this many minutes before `scheduled_at`.
	#[serde(default = "default_start_grace_minutes")]
	pub start_grace_minutes: i64,
	#[serde(default = "default_max_advance_booking_days")]
	pub max_advance_booking_days: i64,
	/// Orders a client may create per UTC day.
	#[serde(default = "default_max_orders_per_day")]
	pub max_orders_per_day: usize,
	/// While CONFIRMED, the client may cancel only earlier than this before start.
	#[serde(default = "default_client_cancel_cutoff_minutes")]
	pub client_cancel_cutoff_minutes: i64,
	/// While CONFIRMED, the walker may cancel only earlier than this before start.
	#[serde(default = "default_walker_cancel_cutoff_minutes")]
	pub walker_cancel_cutoff_minutes: i64,
	#[serde(default)]
	pub charge_policy: ChargePolicy,
	/// Interval of the payment reconciliation sweep.
	#[serde(default = "default_reconcile_interval_seconds")]
	pub reconcile_interval_seconds: u64,
}

fn default_start_grace_minutes() -> i64 {
	30
}

fn default_max_advance_booking_days() -> i64 {
	30
}

fn default_max_orders_per_day() -> usize {
	20
}

fn default_client_cancel_cutoff_minutes() -> i64 {
	60
}

fn default_walker_cancel_cutoff_minutes() -> i64 {
	30
}

fn default_reconcile_interval_seconds() -> u64 {
	60
}

impl Default for LifecycleConfig {
	fn default() -> Self {
		Self {
			start_grace_minutes: default_start_grace_minutes(),
			max_advance_booking_days: default_max_advance_booking_days(),
			max_orders_per_day: default_max_orders_per_day(),
			client_cancel_cutoff_minutes: default_client_cancel_cutoff_minutes(),
			walker_cancel_cutoff_minutes: default_walker_cancel_cutoff_minutes(),
			charge_policy: ChargePolicy::default(),
			reconcile_interval_seconds: default_reconcile_interval_seconds(),
		}
	}
}

/// Configuration for the payment collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentConfig {
	#[serde(default = "default_memory")]
	pub primary: String,
	#[serde(default = "default_memory_implementations")]
	pub implementations: HashMap<String, toml::Value>,
}

impl Default for PaymentConfig {
	fn default() -> Self {
		Self {
			primary: default_memory(),
			implementations: default_memory_implementations(),
		}
	}
}

/// Configuration for notification collaborators.
///
/// Every configured implementation receives every event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
	#[serde(default = "default_notification_implementations")]
	pub implementations: HashMap<String, toml::Value>,
}

fn default_notification_implementations() -> HashMap<String, toml::Value> {
	HashMap::from([("log".to_string(), toml::Value::Table(toml::Table::new()))])
}

impl Default for NotificationConfig {
	fn default() -> Self {
		Self {
			implementations: default_notification_implementations(),
		}
	}
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	/// CORS configuration. Permissive when absent.
	pub cors: Option<CorsConfig>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	pub allowed_origins: Vec<String>,
	pub allowed_headers: Vec<String>,
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024 // 1MB
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

/// Checks that `primary` names one of `implementations`.
fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates cross-field rules that serde defaults cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}
		if self.service.event_bus_capacity == 0 || self.service.max_concurrent_handlers == 0 {
			return Err(ConfigError::Validation(
				"event_bus_capacity and max_concurrent_handlers must be greater than 0".into(),
			));
		}

		validate_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		if self.storage.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be greater than 0".into(),
			));
		}
		if self.storage.cleanup_interval_seconds > 86400 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}

		validate_primary("cache", &self.cache.primary, &self.cache.implementations)?;
		if self.cache.list_ttl_seconds == 0 || self.cache.availability_ttl_seconds == 0 {
			return Err(ConfigError::Validation(
				"Cache TTLs must be greater than 0".into(),
			));
		}
		if self.cache.lock_ttl_ms == 0 {
			return Err(ConfigError::Validation(
				"cache.lock_ttl_ms must be greater than 0".into(),
			));
		}

		validate_primary("geo", &self.geo.primary, &self.geo.implementations)?;
		if self.geo.query_timeout_ms == 0 || self.geo.stale_after_seconds == 0 {
			return Err(ConfigError::Validation(
				"geo.query_timeout_ms and geo.stale_after_seconds must be greater than 0".into(),
			));
		}
		if !(self.geo.walking_speed_kmh > 0.0) {
			return Err(ConfigError::Validation(
				"geo.walking_speed_kmh must be positive".into(),
			));
		}

		if !(self.matching.initial_radius_meters > 0.0) {
			return Err(ConfigError::Validation(
				"matching.initial_radius_meters must be positive".into(),
			));
		}
		if self.geo.max_radius_meters < self.matching.initial_radius_meters {
			return Err(ConfigError::Validation(format!(
				"geo.max_radius_meters ({}) must not be smaller than matching.initial_radius_meters ({})",
				self.geo.max_radius_meters, self.matching.initial_radius_meters
			)));
		}
		if self.matching.max_rounds == 0 || self.matching.max_rounds > 10 {
			return Err(ConfigError::Validation(
				"matching.max_rounds must be between 1 and 10".into(),
			));
		}
		if self.matching.max_candidates == 0 {
			return Err(ConfigError::Validation(
				"matching.max_candidates must be at least 1".into(),
			));
		}
		if !(0.0..=5.0).contains(&self.matching.initial_min_rating)
			|| self.matching.rating_relax_step < 0.0
		{
			return Err(ConfigError::Validation(
				"matching.initial_min_rating must be within [0, 5] and rating_relax_step non-negative"
					.into(),
			));
		}
		if self.matching.max_active_orders == 0 {
			return Err(ConfigError::Validation(
				"matching.max_active_orders must be at least 1".into(),
			));
		}
		if self.matching.offer_timeout_seconds == 0
			|| self.matching.expiry_check_interval_seconds == 0
		{
			return Err(ConfigError::Validation(
				"matching offer timeout and expiry interval must be greater than 0".into(),
			));
		}

		if self.pricing.currency.trim().is_empty() {
			return Err(ConfigError::Validation("pricing.currency cannot be empty".into()));
		}
		if self.pricing.commission_rate < Decimal::ZERO || self.pricing.commission_rate >= Decimal::ONE
		{
			return Err(ConfigError::Validation(
				"pricing.commission_rate must be within [0, 1)".into(),
			));
		}
		if self.pricing.min_hourly_rate <= Decimal::ZERO
			|| self.pricing.min_hourly_rate > self.pricing.max_hourly_rate
		{
			return Err(ConfigError::Validation(
				"pricing.min_hourly_rate must be positive and not exceed max_hourly_rate".into(),
			));
		}
		if !(-720..=840).contains(&self.pricing.utc_offset_minutes) {
			return Err(ConfigError::Validation(
				"pricing.utc_offset_minutes must be within [-720, 840]".into(),
			));
		}
		if self.pricing.base_hourly_rate < self.pricing.min_hourly_rate
			|| self.pricing.base_hourly_rate > self.pricing.max_hourly_rate
		{
			return Err(ConfigError::Validation(
				"pricing.base_hourly_rate must lie within [min_hourly_rate, max_hourly_rate]".into(),
			));
		}

		if self.lifecycle.start_grace_minutes < 0
			|| self.lifecycle.client_cancel_cutoff_minutes < 0
			|| self.lifecycle.walker_cancel_cutoff_minutes < 0
		{
			return Err(ConfigError::Validation(
				"lifecycle windows cannot be negative".into(),
			));
		}
		if self.lifecycle.max_advance_booking_days <= 0 || self.lifecycle.max_orders_per_day == 0 {
			return Err(ConfigError::Validation(
				"lifecycle.max_advance_booking_days and max_orders_per_day must be positive".into(),
			));
		}
		if self.lifecycle.reconcile_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"lifecycle.reconcile_interval_seconds must be greater than 0".into(),
			));
		}

		validate_primary("payment", &self.payment.primary, &self.payment.implementations)?;

		if let Some(api) = self.api.as_ref().filter(|api| api.enabled) {
			if api.timeout_seconds == 0 {
				return Err(ConfigError::Validation(
					"api.timeout_seconds must be greater than 0".into(),
				));
			}
			if self.cache.lock_ttl_ms >= api.timeout_seconds * 1000 {
				return Err(ConfigError::Validation(
					"cache.lock_ttl_ms must be shorter than api.timeout_seconds".into(),
				));
			}
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[service]
id = "booking-test"

[storage]
primary = "memory"
[storage.implementations.memory]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("BOOKING_TEST_HOST", "localhost");
		std::env::set_var("BOOKING_TEST_PORT", "5432");

		let input = "host = \"${BOOKING_TEST_HOST}:${BOOKING_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("BOOKING_TEST_HOST");
		std::env::remove_var("BOOKING_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${BOOKING_MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${BOOKING_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("BOOKING_MISSING_VAR"));
	}

	#[test]
	fn test_minimal_config_gets_defaults() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.service.id, "booking-test");
		assert_eq!(config.matching.max_rounds, 3);
		assert_eq!(config.pricing.commission_rate, Decimal::new(20, 2));
		assert_eq!(config.lifecycle.charge_policy, ChargePolicy::OnCompletion);
		assert_eq!(config.cache.primary, "memory");
		assert!(config.notification.implementations.contains_key("log"));
		assert!(config.api.is_none());
	}

	#[test]
	fn test_config_with_env_vars() {
		std::env::set_var("BOOKING_TEST_SERVICE_ID", "kolomna-1");
		let config_str = MINIMAL.replace("booking-test", "${BOOKING_TEST_SERVICE_ID}");
		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.service.id, "kolomna-1");
		std::env::remove_var("BOOKING_TEST_SERVICE_ID");
	}

	#[test]
	fn test_unknown_primary_rejected() {
		let config_str = MINIMAL.replace("primary = \"memory\"", "primary = \"redis\"");
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("Primary storage 'redis'"));
	}

	#[test]
	fn test_radius_ceiling_below_initial_rejected() {
		let config_str = format!(
			"{}\n[geo]\nmax_radius_meters = 1000.0\n[matching]\ninitial_radius_meters = 2000.0\n",
			MINIMAL
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("max_radius_meters"));
	}

	#[test]
	fn test_commission_rate_bounds() {
		let config_str = format!("{}\n[pricing]\ncommission_rate = \"1.5\"\n", MINIMAL);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("commission_rate"));
	}

	#[test]
	fn test_charge_policy_parsing() {
		let config_str = format!("{}\n[lifecycle]\ncharge_policy = \"on_confirmation\"\n", MINIMAL);
		let config = Config::from_str(&config_str).unwrap();
		assert_eq!(config.lifecycle.charge_policy, ChargePolicy::OnConfirmation);
	}

	#[test]
	fn test_lock_ttl_must_fit_api_timeout() {
		let config_str = format!(
			"{}\n[cache]\nlock_ttl_ms = 5000\n[api]\nenabled = true\ntimeout_seconds = 2\n",
			MINIMAL
		);
		assert!(Config::from_str(&config_str).is_err());
	}
}
