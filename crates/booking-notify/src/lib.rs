//! Notification collaborator module for the booking engine.
//!
//! Order events are relayed to every configured notifier after the
//! transition that produced them has committed. Failures are reported to the
//! caller for logging only: a notification can never roll back an order.

use async_trait::async_trait;
use booking_types::{truncate_id, ConfigSchema, ImplementationRegistry, Notice};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod log;
	pub mod webhook;
}

/// Errors that can occur while delivering notifications.
#[derive(Debug, Error)]
pub enum NotificationError {
	/// Transport failure, possibly transient.
	#[error("Delivery failed: {0}")]
	Delivery(String),
	/// The receiver refused the notification.
	#[error("Notification rejected: {0}")]
	Rejected(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for notification channels.
#[async_trait]
pub trait NotificationInterface: Send + Sync {
	/// Returns the configuration schema for this notifier.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Delivers one notice.
	async fn notify(&self, notice: &Notice) -> Result<(), NotificationError>;
}

/// Type alias for notifier factory functions.
pub type NotificationFactory =
	fn(&toml::Value) -> Result<Box<dyn NotificationInterface>, NotificationError>;

/// Registry trait for notification implementations.
pub trait NotificationRegistry: ImplementationRegistry<Factory = NotificationFactory> {}

/// Get all registered notification implementations.
pub fn get_all_implementations() -> Vec<(&'static str, NotificationFactory)> {
	use implementations::{log, webhook};

	vec![
		(log::Registry::NAME, log::Registry::factory()),
		(webhook::Registry::NAME, webhook::Registry::factory()),
	]
}

/// Fans a notice out to every configured notifier.
pub struct NotificationService {
	notifiers: Vec<(String, Box<dyn NotificationInterface>)>,
}

impl NotificationService {
	pub fn new(notifiers: Vec<(String, Box<dyn NotificationInterface>)>) -> Self {
		Self { notifiers }
	}

	pub fn is_empty(&self) -> bool {
		self.notifiers.is_empty()
	}

	/// Attempts every notifier, even after a failure, and returns the first
	/// error encountered.
	pub async fn notify(&self, notice: &Notice) -> Result<(), NotificationError> {
		let mut first_error = None;
		for (name, notifier) in &self.notifiers {
			match notifier.notify(notice).await {
				Ok(()) => tracing::debug!(
					notifier = %name,
					order_id = %truncate_id(&notice.order_id),
					status = notice.status.as_str(),
					"Notification delivered"
				),
				Err(e) => {
					tracing::warn!(
						notifier = %name,
						order_id = %truncate_id(&notice.order_id),
						error = %e,
						"Notification failed"
					);
					first_error.get_or_insert(e);
				},
			}
		}
		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use booking_types::{OrderStatus, Schema, ValidationError};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	struct Counting {
		calls: Arc<AtomicUsize>,
		fail: bool,
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	#[async_trait]
	impl NotificationInterface for Counting {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn notify(&self, _notice: &Notice) -> Result<(), NotificationError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.fail {
				Err(NotificationError::Delivery("down".into()))
			} else {
				Ok(())
			}
		}
	}

	#[tokio::test]
	async fn test_failure_does_not_stop_fan_out() {
		let calls = Arc::new(AtomicUsize::new(0));
		let service = NotificationService::new(vec![
			(
				"broken".into(),
				Box::new(Counting {
					calls: calls.clone(),
					fail: true,
				}),
			),
			(
				"healthy".into(),
				Box::new(Counting {
					calls: calls.clone(),
					fail: false,
				}),
			),
		]);
		let notice = Notice {
			order_id: "o1".into(),
			party_ids: vec!["c1".into()],
			status: OrderStatus::NoWalker,
			reason: None,
		};

		assert!(matches!(
			service.notify(&notice).await,
			Err(NotificationError::Delivery(_))
		));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
