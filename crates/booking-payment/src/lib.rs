//! Payment collaborator module for the booking engine.
//!
//! The engine charges an order once its service is rendered (or confirmed,
//! depending on policy) and refunds it when a charged order is cancelled.
//! Both calls are at-least-once: implementations must be idempotent per order
//! id, returning the existing payment reference for a repeated charge.

use async_trait::async_trait;
use booking_types::{truncate_id, ConfigSchema, ImplementationRegistry};
use rust_decimal::Decimal;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Errors that can occur during payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
	/// The provider refused the operation.
	#[error("Payment declined: {0}")]
	Declined(String),
	/// The provider could not be reached.
	#[error("Payment provider unavailable: {0}")]
	Unavailable(String),
	#[error("Payment not found: {0}")]
	NotFound(String),
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for payment providers.
#[async_trait]
pub trait PaymentInterface: Send + Sync {
	/// Returns the configuration schema for this payment implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Captures `amount` for an order and returns the payment reference.
	///
	/// Repeating a charge for the same order returns the original reference.
	async fn charge(
		&self,
		order_id: &str,
		amount: Decimal,
		currency: &str,
	) -> Result<String, PaymentError>;

	/// Refunds `amount` of a previous charge. Repeating a completed refund
	/// succeeds without moving money again.
	async fn refund(&self, payment_ref: &str, amount: Decimal) -> Result<(), PaymentError>;
}

/// Type alias for payment factory functions.
pub type PaymentFactory = fn(&toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError>;

/// Registry trait for payment implementations.
pub trait PaymentRegistry: ImplementationRegistry<Factory = PaymentFactory> {}

/// Get all registered payment implementations.
pub fn get_all_implementations() -> Vec<(&'static str, PaymentFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}

/// Service wrapping the configured payment provider.
pub struct PaymentService {
	provider: Box<dyn PaymentInterface>,
}

impl PaymentService {
	pub fn new(provider: Box<dyn PaymentInterface>) -> Self {
		Self { provider }
	}

	pub async fn charge(
		&self,
		order_id: &str,
		amount: Decimal,
		currency: &str,
	) -> Result<String, PaymentError> {
		if amount <= Decimal::ZERO {
			return Err(PaymentError::InvalidAmount(amount.to_string()));
		}
		let payment_ref = self.provider.charge(order_id, amount, currency).await?;
		tracing::info!(
			order_id = %truncate_id(order_id),
			payment_ref = %payment_ref,
			amount = %amount,
			currency = %currency,
			"Charged order"
		);
		Ok(payment_ref)
	}

	pub async fn refund(&self, payment_ref: &str, amount: Decimal) -> Result<(), PaymentError> {
		if amount <= Decimal::ZERO {
			return Err(PaymentError::InvalidAmount(amount.to_string()));
		}
		self.provider.refund(payment_ref, amount).await?;
		tracing::info!(payment_ref = %payment_ref, amount = %amount, "Refunded payment");
		Ok(())
	}
}
