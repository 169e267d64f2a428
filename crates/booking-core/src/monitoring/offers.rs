//! Offer expiry monitoring.
//!
//! Each sweep withdraws OFFERED orders whose offer has run out and re-runs
//! matching for PENDING orders that have sat untouched for longer than one
//! check interval. Orders that another request is holding are skipped and
//! picked up by the next sweep.

use crate::engine::context::BookingContext;
use crate::error::BookingError;
use crate::handlers::LifecycleController;
use booking_types::{truncate_id, ErrorKind, OrderStatus};
use chrono::Utc;
use std::sync::Arc;

/// Outcome of one monitor sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
	pub expired: usize,
	pub rematched: usize,
	pub skipped: usize,
	pub failed: usize,
}

pub struct OfferMonitor {
	ctx: BookingContext,
	lifecycle: Arc<LifecycleController>,
}

impl OfferMonitor {
	pub fn new(ctx: BookingContext, lifecycle: Arc<LifecycleController>) -> Self {
		Self { ctx, lifecycle }
	}

	fn record(report: &mut SweepReport, order_id: &str, err: BookingError) {
		if err.kind() == ErrorKind::Conflict {
			report.skipped += 1;
			tracing::debug!(order_id = %truncate_id(order_id), error = %err, "Order busy, deferred");
		} else {
			report.failed += 1;
			tracing::warn!(order_id = %truncate_id(order_id), error = %err, "Offer sweep failed for order");
		}
	}

	pub async fn sweep(&self) -> Result<SweepReport, BookingError> {
		let now = Utc::now();
		let mut report = SweepReport::default();

		for order in self.ctx.store.list_by_status(OrderStatus::Offered).await? {
			if !order.offer.as_ref().is_some_and(|o| o.is_expired(now)) {
				continue;
			}
			match self.lifecycle.expire_offer(&order.id).await {
				Ok(_) => report.expired += 1,
				Err(e) => Self::record(&mut report, &order.id, e),
			}
		}

		let idle = chrono::Duration::seconds(
			self.ctx.config.matching.expiry_check_interval_seconds as i64,
		);
		for order in self.ctx.store.list_by_status(OrderStatus::Pending).await? {
			if now - order.updated_at < idle {
				continue;
			}
			match self.lifecycle.run_matching(&order.id).await {
				Ok(_) => report.rematched += 1,
				Err(e) => Self::record(&mut report, &order.id, e),
			}
		}

		if report != SweepReport::default() {
			tracing::info!(
				expired = report.expired,
				rematched = report.rematched,
				skipped = report.skipped,
				failed = report.failed,
				"Offer sweep finished"
			);
		}
		Ok(report)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::recovery::PaymentReconciler;
	use crate::test_support::{context, north_of, pending_order, ORIGIN};
	use booking_config::builders::ConfigBuilder;
	use booking_types::{Actor, Offer, WalkerProfile};

	#[tokio::test]
	async fn test_sweep_withdraws_expired_offer() {
		let ctx = context(ConfigBuilder::new().max_rounds(1).build());
		let lifecycle = Arc::new(LifecycleController::new(
			ctx.clone(),
			Arc::new(PaymentReconciler::new(ctx.clone())),
		));
		let monitor = OfferMonitor::new(ctx.clone(), lifecycle);

		ctx.store
			.create(pending_order("o1", ORIGIN), &Actor::client("c1"))
			.await
			.unwrap();
		let past = Utc::now() - chrono::Duration::minutes(10);
		ctx.store
			.transition_with(
				"o1",
				OrderStatus::Pending,
				OrderStatus::Offered,
				&Actor::system(),
				None,
				|o| {
					o.matching_round = 1;
					o.offer = Some(Offer {
						walker_ids: vec!["w1".into()],
						round: 0,
						radius_meters: 3000.0,
						offered_at: past,
						expires_at: past + chrono::Duration::minutes(5),
					});
					Ok(())
				},
			)
			.await
			.unwrap();

		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.expired, 1);
		let order = ctx.store.get_by_id("o1").await.unwrap();
		assert_eq!(order.status, OrderStatus::NoWalker);
		assert!(order.offer.is_none());
	}

	#[tokio::test]
	async fn test_sweep_retries_idle_pending_orders() {
		let ctx = context(ConfigBuilder::new().build());
		let lifecycle = Arc::new(LifecycleController::new(
			ctx.clone(),
			Arc::new(PaymentReconciler::new(ctx.clone())),
		));
		let monitor = OfferMonitor::new(ctx.clone(), lifecycle);

		let mut stranded = pending_order("o1", ORIGIN);
		stranded.created_at = Utc::now() - chrono::Duration::minutes(5);
		stranded.updated_at = stranded.created_at;
		ctx.store.create(stranded, &Actor::client("c1")).await.unwrap();
		ctx.store
			.create(pending_order("o2", ORIGIN), &Actor::client("c1"))
			.await
			.unwrap();

		ctx.geo
			.register_walker(
				"w1",
				WalkerProfile {
					rating: 4.9,
					rating_count: 40,
					hourly_rate: None,
				},
			)
			.await
			.unwrap();
		ctx.geo
			.upsert_position("w1", north_of(ORIGIN, 300.0), Utc::now())
			.await
			.unwrap();

		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.rematched, 1);
		assert_eq!(
			ctx.store.get_by_id("o1").await.unwrap().status,
			OrderStatus::Offered
		);
		assert_eq!(
			ctx.store.get_by_id("o2").await.unwrap().status,
			OrderStatus::Pending
		);
	}
}
