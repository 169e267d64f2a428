//! In-memory payment ledger.
//!
//! Records one charge per order id. Useful for development and tests; the
//! ledger is lost on restart.

use crate::{PaymentError, PaymentInterface};
use async_trait::async_trait;
use booking_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
	pub order_id: String,
	pub payment_ref: String,
	pub amount: Decimal,
	pub currency: String,
	pub refunded: Decimal,
}

#[derive(Default)]
struct Ledger {
	by_order: HashMap<String, LedgerEntry>,
	/// payment_ref → order id
	refs: HashMap<String, String>,
}

pub struct MemoryPayment {
	ledger: Mutex<Ledger>,
	/// Refuse charges above this amount.
	charge_limit: Option<Decimal>,
}

impl MemoryPayment {
	pub fn new() -> Self {
		Self {
			ledger: Mutex::new(Ledger::default()),
			charge_limit: None,
		}
	}

	pub fn with_charge_limit(mut self, limit: Decimal) -> Self {
		self.charge_limit = Some(limit);
		self
	}

	pub async fn entry(&self, order_id: &str) -> Option<LedgerEntry> {
		self.ledger.lock().await.by_order.get(order_id).cloned()
	}
}

impl Default for MemoryPayment {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl PaymentInterface for MemoryPayment {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryPaymentSchema)
	}

	async fn charge(
		&self,
		order_id: &str,
		amount: Decimal,
		currency: &str,
	) -> Result<String, PaymentError> {
		let mut ledger = self.ledger.lock().await;
		if let Some(existing) = ledger.by_order.get(order_id) {
			if existing.amount != amount || existing.currency != currency {
				return Err(PaymentError::Declined(format!(
					"order {} already charged {} {}",
					order_id, existing.amount, existing.currency
				)));
			}
			return Ok(existing.payment_ref.clone());
		}
		if self.charge_limit.is_some_and(|limit| amount > limit) {
			return Err(PaymentError::Declined(format!("amount {} over limit", amount)));
		}

		let payment_ref = format!("pay_{}", uuid::Uuid::new_v4().simple());
		ledger.refs.insert(payment_ref.clone(), order_id.to_string());
		ledger.by_order.insert(
			order_id.to_string(),
			LedgerEntry {
				order_id: order_id.to_string(),
				payment_ref: payment_ref.clone(),
				amount,
				currency: currency.to_string(),
				refunded: Decimal::ZERO,
			},
		);
		Ok(payment_ref)
	}

	async fn refund(&self, payment_ref: &str, amount: Decimal) -> Result<(), PaymentError> {
		let mut ledger = self.ledger.lock().await;
		let order_id = ledger
			.refs
			.get(payment_ref)
			.cloned()
			.ok_or_else(|| PaymentError::NotFound(payment_ref.to_string()))?;
		let entry = ledger
			.by_order
			.get_mut(&order_id)
			.ok_or_else(|| PaymentError::NotFound(payment_ref.to_string()))?;

		if entry.refunded == amount {
			return Ok(());
		}
		if !entry.refunded.is_zero() {
			return Err(PaymentError::Declined(format!(
				"payment {} already refunded {}",
				payment_ref, entry.refunded
			)));
		}
		if amount > entry.amount {
			return Err(PaymentError::InvalidAmount(format!(
				"refund {} exceeds charge {}",
				amount, entry.amount
			)));
		}
		entry.refunded = amount;
		Ok(())
	}
}

/// Configuration schema for the memory payment ledger.
pub struct MemoryPaymentSchema;

impl ConfigSchema for MemoryPaymentSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"charge_limit",
				FieldType::Float {
					min: Some(0.0),
					max: None,
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create a memory payment ledger from configuration.
///
/// Configuration parameters:
/// - `charge_limit`: optional amount above which charges are declined
pub fn create_payment(config: &toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError> {
	MemoryPaymentSchema
		.validate(config)
		.map_err(|e| PaymentError::Configuration(e.to_string()))?;

	let mut payment = MemoryPayment::new();
	let limit = config
		.get("charge_limit")
		.and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)));
	if let Some(limit) = limit {
		let limit = Decimal::try_from(limit)
			.map_err(|e| PaymentError::Configuration(format!("charge_limit: {}", e)))?;
		payment = payment.with_charge_limit(limit);
	}
	Ok(Box::new(payment))
}

/// Registry for the memory payment implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::PaymentFactory;

	fn factory() -> Self::Factory {
		create_payment
	}
}

impl crate::PaymentRegistry for Registry {}
