//! Webhook notifier.
//!
//! POSTs each notice as JSON to a configured URL. Transport errors and 5xx
//! responses are retried with exponential backoff up to `max_retries` times;
//! 4xx responses are final.

use crate::{NotificationError, NotificationInterface};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use booking_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, Notice, Schema,
	ValidationError,
};
use std::time::Duration;

pub struct WebhookNotifier {
	client: reqwest::Client,
	url: String,
	max_retries: u32,
	backoff: ExponentialBackoff,
}

enum Attempt {
	Retry(NotificationError),
	Fail(NotificationError),
}

impl WebhookNotifier {
	pub fn new(
		url: impl Into<String>,
		timeout: Duration,
		max_retries: u32,
		initial_backoff: Duration,
	) -> Result<Self, NotificationError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| NotificationError::Configuration(e.to_string()))?;
		let backoff = ExponentialBackoffBuilder::new()
			.with_initial_interval(initial_backoff)
			.with_max_elapsed_time(Some(Duration::from_secs(30)))
			.build();
		Ok(Self {
			client,
			url: url.into(),
			max_retries,
			backoff,
		})
	}

	async fn attempt(&self, body: &[u8]) -> Result<(), Attempt> {
		let response = self
			.client
			.post(&self.url)
			.header(reqwest::header::CONTENT_TYPE, "application/json")
			.body(body.to_vec())
			.send()
			.await
			.map_err(|e| Attempt::Retry(NotificationError::Delivery(e.to_string())))?;

		let status = response.status();
		if status.is_success() {
			Ok(())
		} else if status.is_server_error() {
			Err(Attempt::Retry(NotificationError::Delivery(format!(
				"receiver returned {}",
				status
			))))
		} else {
			Err(Attempt::Fail(NotificationError::Rejected(format!(
				"receiver returned {}",
				status
			))))
		}
	}
}

#[async_trait]
impl NotificationInterface for WebhookNotifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(WebhookSchema)
	}

	async fn notify(&self, notice: &Notice) -> Result<(), NotificationError> {
		let body =
			serde_json::to_vec(notice).map_err(|e| NotificationError::Serialization(e.to_string()))?;
		let mut backoff = self.backoff.clone();
		backoff.reset();
		let mut attempts = 0;

		loop {
			match self.attempt(&body).await {
				Ok(()) => return Ok(()),
				Err(Attempt::Fail(e)) => return Err(e),
				Err(Attempt::Retry(e)) => {
					attempts += 1;
					if attempts > self.max_retries {
						return Err(e);
					}
					let Some(delay) = backoff.next_backoff() else {
						return Err(e);
					};
					tracing::debug!(
						order_id = %truncate_id(&notice.order_id),
						attempt = attempts,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"Retrying webhook"
					);
					tokio::time::sleep(delay).await;
				},
			}
		}
	}
}

/// Configuration schema for the webhook notifier.
pub struct WebhookSchema;

impl ConfigSchema for WebhookSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
					_ => Err("url must start with http:// or https://".to_string()),
				}
			})],
			vec![
				Field::new(
					"timeout_ms",
					FieldType::Integer {
						min: Some(1),
						max: Some(60_000),
					},
				),
				Field::new(
					"max_retries",
					FieldType::Integer {
						min: Some(0),
						max: Some(10),
					},
				),
				Field::new(
					"initial_backoff_ms",
					FieldType::Integer {
						min: Some(1),
						max: Some(10_000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a webhook notifier from configuration.
///
/// Configuration parameters:
/// - `url`: receiver endpoint (required)
/// - `timeout_ms`: per-request timeout (default: 5000)
/// - `max_retries`: retries after the first attempt (default: 3)
/// - `initial_backoff_ms`: first retry delay (default: 200)
pub fn create_notifier(
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	WebhookSchema
		.validate(config)
		.map_err(|e| NotificationError::Configuration(e.to_string()))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| NotificationError::Configuration("url is required".into()))?;
	let int = |key: &str, default: i64| config.get(key).and_then(|v| v.as_integer()).unwrap_or(default);

	Ok(Box::new(WebhookNotifier::new(
		url,
		Duration::from_millis(int("timeout_ms", 5_000) as u64),
		int("max_retries", 3) as u32,
		Duration::from_millis(int("initial_backoff_ms", 200) as u64),
	)?))
}

/// Registry for the webhook notifier.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "webhook";
	type Factory = crate::NotificationFactory;

	fn factory() -> Self::Factory {
		create_notifier
	}
}

impl crate::NotificationRegistry for Registry {}
