//! Builder pattern for constructing booking engines.
//!
//! Composes a [`BookingEngine`] from named implementations selected in the
//! configuration. Every backend is created through a factory that validates
//! its own configuration table.

use crate::engine::{context::BookingContext, event_bus::EventBus, BookingEngine};
use booking_config::Config;
use booking_geo::{GeoError, GeoFactory, GeoIndexInterface, GeoService};
use booking_notify::{
	NotificationError, NotificationFactory, NotificationInterface, NotificationService,
};
use booking_payment::{PaymentError, PaymentFactory, PaymentInterface, PaymentService};
use booking_pricing::PricingCalculator;
use booking_storage::{StorageError, StorageFactory, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation
/// name.
pub struct BookingFactories<SF, GF, PF, NF> {
	pub storage_factories: HashMap<String, SF>,
	pub geo_factories: HashMap<String, GF>,
	pub payment_factories: HashMap<String, PF>,
	pub notification_factories: HashMap<String, NF>,
}

impl BookingFactories<StorageFactory, GeoFactory, PaymentFactory, NotificationFactory> {
	/// Every implementation compiled into the workspace.
	pub fn from_registries() -> Self {
		fn collect<F>(entries: Vec<(&'static str, F)>) -> HashMap<String, F> {
			entries
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect()
		}

		Self {
			storage_factories: collect(booking_storage::get_all_implementations()),
			geo_factories: collect(booking_geo::get_all_implementations()),
			payment_factories: collect(booking_payment::get_all_implementations()),
			notification_factories: collect(booking_notify::get_all_implementations()),
		}
	}
}

/// Builds the pricing calculator described by `[pricing]`.
pub fn pricing_calculator(config: &Config) -> Result<PricingCalculator, BuilderError> {
	let pricing = &config.pricing;
	PricingCalculator::new(
		pricing.commission_rate,
		pricing.currency.clone(),
		pricing.base_hourly_rate,
		pricing.min_hourly_rate,
		pricing.max_hourly_rate,
	)
	.and_then(|calculator| {
		calculator
			.with_surge(pricing.surge_enabled)
			.with_utc_offset_minutes(pricing.utc_offset_minutes)
	})
	.map_err(|e| BuilderError::Config(format!("Invalid pricing configuration: {}", e)))
}

/// Creates the primary implementation of one component.
fn load_primary<T, E, F>(
	component: &'static str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	T: ?Sized,
	E: Display,
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let config = implementations.get(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' has no configuration table",
			component, primary
		))
	})?;
	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!("{} implementation '{}'", component, primary))
	})?;

	match factory(config) {
		Ok(implementation) => {
			tracing::info!(component, implementation = %primary, enabled = true, "Loaded");
			Ok(implementation)
		},
		Err(e) => {
			tracing::error!(
				component,
				implementation = %primary,
				error = %e,
				"Failed to create implementation"
			);
			Err(BuilderError::Config(format!(
				"Failed to create {} implementation '{}': {}",
				component, primary, e
			)))
		},
	}
}

/// Builder for constructing a BookingEngine with pluggable implementations.
pub struct BookingBuilder {
	config: Config,
	payment: Option<Box<dyn PaymentInterface>>,
	notifiers: Vec<(String, Box<dyn NotificationInterface>)>,
}

impl BookingBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			payment: None,
			notifiers: Vec::new(),
		}
	}

	/// Uses `provider` instead of the configured payment implementation.
	pub fn with_payment(mut self, provider: Box<dyn PaymentInterface>) -> Self {
		self.payment = Some(provider);
		self
	}

	/// Adds a notifier on top of the configured ones.
	pub fn with_notifier(
		mut self,
		name: impl Into<String>,
		notifier: Box<dyn NotificationInterface>,
	) -> Self {
		self.notifiers.push((name.into(), notifier));
		self
	}

	pub fn build<SF, GF, PF, NF>(
		self,
		factories: BookingFactories<SF, GF, PF, NF>,
	) -> Result<BookingEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		GF: Fn(&toml::Value) -> Result<Box<dyn GeoIndexInterface>, GeoError>,
		PF: Fn(&toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError>,
		NF: Fn(&toml::Value) -> Result<Box<dyn NotificationInterface>, NotificationError>,
	{
		let config = self.config;
		config
			.validate()
			.map_err(|e| BuilderError::Config(e.to_string()))?;

		let order_storage = Arc::new(StorageService::new(load_primary(
			"storage",
			&config.storage.primary,
			&config.storage.implementations,
			&factories.storage_factories,
		)?));
		let cache_storage = Arc::new(StorageService::new(load_primary(
			"cache",
			&config.cache.primary,
			&config.cache.implementations,
			&factories.storage_factories,
		)?));

		let geo = Arc::new(GeoService::new(
			load_primary(
				"geo",
				&config.geo.primary,
				&config.geo.implementations,
				&factories.geo_factories,
			)?,
			config.geo.stale_after(),
			config.geo.query_timeout(),
			config.geo.max_radius_meters,
		));

		let provider = match self.payment {
			Some(provider) => {
				tracing::info!(component = "payment", implementation = "override", "Loaded");
				provider
			},
			None => load_primary(
				"payment",
				&config.payment.primary,
				&config.payment.implementations,
				&factories.payment_factories,
			)?,
		};
		let payment = Arc::new(PaymentService::new(provider));

		// Every configured notifier receives every event
		let mut notifiers = Vec::new();
		for (name, table) in &config.notification.implementations {
			let Some(factory) = factories.notification_factories.get(name) else {
				tracing::warn!(component = "notification", implementation = %name, "Unknown implementation, skipped");
				continue;
			};
			match factory(table) {
				Ok(notifier) => {
					tracing::info!(component = "notification", implementation = %name, enabled = true, "Loaded");
					notifiers.push((name.clone(), notifier));
				},
				Err(e) => {
					tracing::error!(
						component = "notification",
						implementation = %name,
						error = %e,
						"Failed to create notification implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create notification implementation '{}': {}",
						name, e
					)));
				},
			}
		}
		notifiers.extend(self.notifiers);
		if notifiers.is_empty() {
			tracing::warn!("No notification implementations available - events will not be delivered");
		}

		let pricing = pricing_calculator(&config)?;
		let event_bus = EventBus::new(config.service.event_bus_capacity);
		let ctx = BookingContext::new(
			config,
			order_storage,
			cache_storage,
			geo,
			pricing,
			payment,
			event_bus,
		);
		Ok(BookingEngine::new(
			ctx,
			Arc::new(NotificationService::new(notifiers)),
		))
	}
}
