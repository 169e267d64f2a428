//! Notifier that writes notices to the tracing log.

use crate::{NotificationError, NotificationInterface};
use async_trait::async_trait;
use booking_types::{
	truncate_id, ConfigSchema, ImplementationRegistry, Notice, Schema, ValidationError,
};

pub struct LogNotifier;

#[async_trait]
impl NotificationInterface for LogNotifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LogNotifierSchema)
	}

	async fn notify(&self, notice: &Notice) -> Result<(), NotificationError> {
		tracing::info!(
			order_id = %truncate_id(&notice.order_id),
			status = notice.status.as_str(),
			parties = ?notice.party_ids,
			reason = notice.reason.as_deref().unwrap_or(""),
			"Order notification"
		);
		Ok(())
	}
}

pub struct LogNotifierSchema;

impl ConfigSchema for LogNotifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_notifier(
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	LogNotifierSchema
		.validate(config)
		.map_err(|e| NotificationError::Configuration(e.to_string()))?;
	Ok(Box::new(LogNotifier))
}

/// Registry for the log notifier.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "log";
	type Factory = crate::NotificationFactory;

	fn factory() -> Self::Factory {
		create_notifier
	}
}

impl crate::NotificationRegistry for Registry {}
