//! Booking engine that owns the handlers and the background tasks.
//!
//! Request handling is driven from outside (the HTTP surface calls the
//! handlers directly). The run loop forwards order events to the
//! notification collaborators and drives the periodic sweeps: storage TTL
//! cleanup, offer expiry and payment reconciliation.

pub mod context;
pub mod event_bus;

use crate::handlers::{LifecycleController, OrderQueries, WalkerHandler};
use crate::monitoring::OfferMonitor;
use crate::recovery::PaymentReconciler;
use booking_config::Config;
use booking_notify::NotificationService;
use booking_storage::StorageService;
use booking_types::{truncate_id, BookingEvent, Notice, OrderEvent};
use context::BookingContext;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Handler error: {0}")]
	Handler(String),
}

#[derive(Clone)]
pub struct BookingEngine {
	pub(crate) ctx: BookingContext,
	pub(crate) lifecycle: Arc<LifecycleController>,
	pub(crate) queries: Arc<OrderQueries>,
	pub(crate) walkers: Arc<WalkerHandler>,
	pub(crate) offer_monitor: Arc<OfferMonitor>,
	pub(crate) reconciler: Arc<PaymentReconciler>,
	pub(crate) notifications: Arc<NotificationService>,
}

fn spawn_cleanup(storage: Arc<StorageService>, name: &'static str, period: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(period);
		loop {
			interval.tick().await;
			match storage.cleanup_expired().await {
				Ok(count) if count > 0 => {
					tracing::debug!(storage = name, removed = count, "Storage cleanup");
				},
				Err(e) => {
					tracing::warn!(storage = name, error = %e, "Storage cleanup failed");
				},
				_ => {},
			}
		}
	})
}

impl BookingEngine {
	pub fn new(ctx: BookingContext, notifications: Arc<NotificationService>) -> Self {
		let reconciler = Arc::new(PaymentReconciler::new(ctx.clone()));
		let lifecycle = Arc::new(LifecycleController::new(ctx.clone(), reconciler.clone()));
		let queries = Arc::new(OrderQueries::new(ctx.clone()));
		let walkers = Arc::new(WalkerHandler::new(ctx.clone()));
		let offer_monitor = Arc::new(OfferMonitor::new(ctx.clone(), lifecycle.clone()));

		Self {
			ctx,
			lifecycle,
			queries,
			walkers,
			offer_monitor,
			reconciler,
			notifications,
		}
	}

	/// Runs until Ctrl-C.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "Failed to listen for shutdown signal");
			}
		})
		.await
	}

	/// Runs the event loop and the periodic sweeps until `shutdown` resolves.
	pub async fn run_until<S>(&self, shutdown: S) -> Result<(), EngineError>
	where
		S: Future<Output = ()>,
	{
		let config = &self.ctx.config;
		if config.service.max_concurrent_handlers == 0 {
			return Err(EngineError::Config(
				"service.max_concurrent_handlers must be positive".into(),
			));
		}
		let mut event_receiver = self.ctx.event_bus.subscribe();

		let cleanup_period = Duration::from_secs(config.storage.cleanup_interval_seconds);
		let mut tasks = vec![
			spawn_cleanup(self.ctx.order_storage.clone(), "orders", cleanup_period),
			spawn_cleanup(self.ctx.cache_storage.clone(), "cache", cleanup_period),
		];

		let monitor = self.offer_monitor.clone();
		let expiry_period = Duration::from_secs(config.matching.expiry_check_interval_seconds);
		tasks.push(tokio::spawn(async move {
			let mut interval = tokio::time::interval(expiry_period);
			loop {
				interval.tick().await;
				if let Err(e) = monitor.sweep().await {
					tracing::warn!(error = %e, "Offer sweep failed");
				}
			}
		}));

		let reconciler = self.reconciler.clone();
		let reconcile_period = Duration::from_secs(config.lifecycle.reconcile_interval_seconds);
		tasks.push(tokio::spawn(async move {
			let mut interval = tokio::time::interval(reconcile_period);
			loop {
				interval.tick().await;
				if let Err(e) = reconciler.reconcile().await {
					tracing::warn!(error = %e, "Payment reconciliation failed");
				}
			}
		}));

		let semaphore = Arc::new(Semaphore::new(config.service.max_concurrent_handlers));
		tracing::info!(service_id = %config.service.id, "Booking engine started");

		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				event = event_receiver.recv() => {
					match event {
						Ok(BookingEvent::Order(event)) => {
							self.spawn_handler(&semaphore, move |engine| async move {
								engine.forward(&event).await
							})
							.await;
						}
						Ok(BookingEvent::Payment(event)) => {
							tracing::debug!(event = ?event, "Payment event");
						}
						Err(broadcast::error::RecvError::Lagged(skipped)) => {
							tracing::warn!(skipped, "Event forwarder lagged, notifications dropped");
						}
						Err(broadcast::error::RecvError::Closed) => break,
					}
				}

				_ = &mut shutdown => {
					tracing::info!("Shutdown requested");
					break;
				}
			}
		}

		for task in tasks {
			task.abort();
		}
		Ok(())
	}

	/// Delivers one order event to every notifier.
	pub(crate) async fn forward(&self, event: &OrderEvent) -> Result<(), EngineError> {
		let notice = Notice::from(event);
		self.notifications.notify(&notice).await.map_err(|e| {
			EngineError::Handler(format!(
				"Notification for order {} failed: {}",
				truncate_id(&notice.order_id),
				e
			))
		})
	}

	pub fn context(&self) -> &BookingContext {
		&self.ctx
	}

	pub fn config(&self) -> &Config {
		&self.ctx.config
	}

	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.ctx.event_bus
	}

	pub fn lifecycle(&self) -> &Arc<LifecycleController> {
		&self.lifecycle
	}

	pub fn queries(&self) -> &Arc<OrderQueries> {
		&self.queries
	}

	pub fn walkers(&self) -> &Arc<WalkerHandler> {
		&self.walkers
	}

	pub fn offer_monitor(&self) -> &Arc<OfferMonitor> {
		&self.offer_monitor
	}

	pub fn reconciler(&self) -> &Arc<PaymentReconciler> {
		&self.reconciler
	}

	/// Spawns a handler task once a semaphore permit is available.
	async fn spawn_handler<F, Fut>(&self, semaphore: &Arc<Semaphore>, handler: F)
	where
		F: FnOnce(BookingEngine) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), EngineError>> + Send,
	{
		let engine = self.clone();
		match semaphore.clone().acquire_owned().await {
			Ok(permit) => {
				tokio::spawn(async move {
					let _permit = permit;
					if let Err(e) = handler(engine).await {
						tracing::error!(error = %e, "Handler error");
					}
				});
			},
			Err(e) => {
				tracing::error!(error = %e, "Failed to acquire semaphore permit");
			},
		}
	}
}
