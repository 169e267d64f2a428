//! Payment settlement and reconciliation.
//!
//! Charges and refunds run after the transition that requires them has
//! committed, outside the order lock. The transition raises
//! `payment_pending` or `refund_pending` in the same write, so a crash or a
//! collaborator failure between the two leaves a durable flag behind. The
//! reconciliation sweep retries every flagged order; the payment
//! collaborator is idempotent per order id, which makes the retries safe.

use crate::engine::context::BookingContext;
use crate::error::BookingError;
use booking_storage::OrderStoreError;
use booking_types::{truncate_id, BookingEvent, ErrorKind, Order, OrderStatus, PaymentEvent};
use tracing::instrument;

/// Outcome of one reconciliation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
	/// Orders that carried a payment flag.
	pub examined: usize,
	pub charged: usize,
	pub refunded: usize,
	/// Flags left in place for the next sweep.
	pub failed: usize,
}

pub struct PaymentReconciler {
	ctx: BookingContext,
}

impl PaymentReconciler {
	pub fn new(ctx: BookingContext) -> Self {
		Self { ctx }
	}

	/// Captures the order's total and clears `payment_pending`.
	///
	/// An order cancelled while the charge was in flight is flagged for a
	/// refund of the captured amount instead.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id)))]
	pub async fn charge(&self, order: &Order) -> Result<Order, BookingError> {
		let price = order.price.as_ref().ok_or_else(|| {
			BookingError::Validation(format!("Order {} has no price to charge", order.id))
		})?;

		let payment_ref = match self
			.ctx
			.payment
			.charge(&order.id, price.total, &price.currency)
			.await
		{
			Ok(payment_ref) => payment_ref,
			Err(e) => {
				tracing::warn!(error = %e, "Charge failed, order stays flagged");
				self.ctx
					.event_bus
					.publish(BookingEvent::Payment(PaymentEvent::ChargeFailed {
						order_id: order.id.clone(),
						error: e.to_string(),
					}));
				return Err(e.into());
			},
		};

		let updated = self
			.ctx
			.store
			.update_fields(&order.id, |o| {
				o.payment_ref = Some(payment_ref.clone());
				o.payment_pending = false;
				if o.status == OrderStatus::Cancelled && !o.refunded {
					o.refund_pending = true;
				}
				Ok(())
			})
			.await?;
		self.ctx
			.event_bus
			.publish(BookingEvent::Payment(PaymentEvent::Charged {
				order_id: order.id.clone(),
				payment_ref,
				amount: price.total,
			}));
		self.ctx.invalidate_order(&updated).await;

		if updated.refund_pending {
			return self.refund(&updated).await;
		}
		Ok(updated)
	}

	/// Refunds the captured total and clears `refund_pending`.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id)))]
	pub async fn refund(&self, order: &Order) -> Result<Order, BookingError> {
		let (Some(payment_ref), Some(amount)) = (order.payment_ref.clone(), order.total()) else {
			return Err(BookingError::Validation(format!(
				"Order {} has no captured payment to refund",
				order.id
			)));
		};

		if let Err(e) = self.ctx.payment.refund(&payment_ref, amount).await {
			tracing::warn!(error = %e, "Refund failed, order stays flagged");
			self.ctx
				.event_bus
				.publish(BookingEvent::Payment(PaymentEvent::RefundFailed {
					order_id: order.id.clone(),
					error: e.to_string(),
				}));
			return Err(e.into());
		}

		let updated = self
			.ctx
			.store
			.update_fields(&order.id, |o| {
				o.refunded = true;
				o.refund_pending = false;
				Ok(())
			})
			.await?;
		self.ctx
			.event_bus
			.publish(BookingEvent::Payment(PaymentEvent::Refunded {
				order_id: order.id.clone(),
				payment_ref,
				amount,
			}));
		self.ctx.invalidate_order(&updated).await;
		Ok(updated)
	}

	/// Drops a charge request that no longer applies.
	async fn clear_charge(&self, order: &Order) -> Result<Order, BookingError> {
		Ok(self
			.ctx
			.store
			.update_fields(&order.id, |o| {
				if o.payment_ref.is_some() {
					return Err(OrderStoreError::Rejected(
						ErrorKind::Conflict,
						"charge already captured".into(),
					));
				}
				o.payment_pending = false;
				Ok(())
			})
			.await?)
	}

	/// Retries every outstanding charge and refund once.
	#[instrument(skip_all)]
	pub async fn reconcile(&self) -> Result<ReconcileReport, BookingError> {
		let flagged = self.ctx.store.payment_flagged().await?;
		let mut report = ReconcileReport {
			examined: flagged.len(),
			..Default::default()
		};

		for order in flagged {
			let outcome = if order.payment_pending && order.status == OrderStatus::Cancelled {
				self.clear_charge(&order).await.map(|_| ())
			} else if order.payment_pending {
				self.charge(&order).await.map(|o| {
					report.charged += 1;
					if o.refunded {
						report.refunded += 1;
					}
				})
			} else {
				self.refund(&order).await.map(|_| report.refunded += 1)
			};

			if let Err(e) = outcome {
				report.failed += 1;
				tracing::debug!(order_id = %truncate_id(&order.id), error = %e, "Reconciliation deferred");
			}
		}

		if report.examined > 0 {
			tracing::info!(
				examined = report.examined,
				charged = report.charged,
				refunded = report.refunded,
				failed = report.failed,
				"Payment reconciliation finished"
			);
		}
		Ok(report)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{context_with_payment, pending_order, ORIGIN};
	use async_trait::async_trait;
	use booking_config::builders::ConfigBuilder;
	use booking_payment::{PaymentError, PaymentInterface};
	use booking_types::{Actor, ConfigSchema, OrderType};
	use mockall::mock;
	use rust_decimal::Decimal;

	mock! {
		pub Provider {}

		#[async_trait]
		impl PaymentInterface for Provider {
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
			async fn charge(&self, order_id: &str, amount: Decimal, currency: &str) -> Result<String, PaymentError>;
			async fn refund(&self, payment_ref: &str, amount: Decimal) -> Result<(), PaymentError>;
		}
	}

	/// Stores a COMPLETED, priced order flagged for a charge.
	async fn completed_flagged(ctx: &BookingContext, id: &str) -> Order {
		let order = pending_order(id, ORIGIN);
		ctx.store.create(order, &Actor::client("c1")).await.unwrap();
		let price = ctx
			.pricing
			.compute_price(OrderType::SingleWalk, 30, Decimal::from(800), Decimal::ONE)
			.unwrap();
		let system = Actor::system();
		ctx.store
			.transition_with(id, OrderStatus::Pending, OrderStatus::Offered, &system, None, |o| {
				o.price = Some(price.clone());
				Ok(())
			})
			.await
			.unwrap();
		ctx.store
			.transition_with(id, OrderStatus::Offered, OrderStatus::Confirmed, &system, None, |o| {
				o.walker_id = Some("w1".into());
				o.confirmed_at = Some(o.updated_at);
				Ok(())
			})
			.await
			.unwrap();
		ctx.store
			.transition_with(id, OrderStatus::Confirmed, OrderStatus::InProgress, &system, None, |o| {
				o.started_at = Some(o.updated_at);
				Ok(())
			})
			.await
			.unwrap();
		ctx.store
			.transition_with(id, OrderStatus::InProgress, OrderStatus::Completed, &system, None, |o| {
				o.completed_at = Some(o.updated_at);
				o.payment_pending = true;
				Ok(())
			})
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_failed_charge_is_retried_by_reconcile() {
		let mut provider = MockProvider::new();
		let mut seq = mockall::Sequence::new();
		provider
			.expect_charge()
			.times(1)
			.in_sequence(&mut seq)
			.returning(|_, _, _| Err(PaymentError::Unavailable("timeout".into())));
		provider
			.expect_charge()
			.withf(|order_id, amount, currency| {
				order_id.to_string() == "o1"
					&& *amount == Decimal::from(400)
					&& currency.to_string() == "RUB"
			})
			.times(1)
			.in_sequence(&mut seq)
			.returning(|_, _, _| Ok("pay-1".into()));

		let ctx = context_with_payment(ConfigBuilder::new().build(), Box::new(provider));
		let reconciler = PaymentReconciler::new(ctx.clone());
		let order = completed_flagged(&ctx, "o1").await;

		let err = reconciler.charge(&order).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::DependencyFailure);
		assert!(ctx.store.get_by_id("o1").await.unwrap().payment_pending);

		let report = reconciler.reconcile().await.unwrap();
		assert_eq!(
			report,
			ReconcileReport {
				examined: 1,
				charged: 1,
				refunded: 0,
				failed: 0
			}
		);
		let stored = ctx.store.get_by_id("o1").await.unwrap();
		assert!(!stored.payment_pending);
		assert_eq!(stored.payment_ref.as_deref(), Some("pay-1"));
		assert!(ctx.store.payment_flagged().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_refund_marks_order_refunded() {
		let mut provider = MockProvider::new();
		provider
			.expect_charge()
			.returning(|_, _, _| Ok("pay-1".into()));
		provider
			.expect_refund()
			.withf(|payment_ref, amount| payment_ref.to_string() == "pay-1" && *amount == Decimal::from(400))
			.times(1)
			.returning(|_, _| Ok(()));

		let ctx = context_with_payment(ConfigBuilder::new().build(), Box::new(provider));
		let reconciler = PaymentReconciler::new(ctx.clone());
		let order = completed_flagged(&ctx, "o1").await;
		let charged = reconciler.charge(&order).await.unwrap();

		let refunded = reconciler.refund(&charged).await.unwrap();
		assert!(refunded.refunded);
		assert!(!refunded.refund_pending);
	}

	#[tokio::test]
	async fn test_reconcile_with_nothing_flagged() {
		let provider = MockProvider::new();
		let ctx = context_with_payment(ConfigBuilder::new().build(), Box::new(provider));
		let report = PaymentReconciler::new(ctx).reconcile().await.unwrap();
		assert_eq!(report, ReconcileReport::default());
	}
}
