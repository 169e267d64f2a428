//! Storage module for the booking engine.
//!
//! This module provides the key-value abstraction every durable or cached
//! piece of state goes through, the order store built on top of it, and the
//! cache layer (listing cache, nearby-walker cache and per-order locks).
//!
//! Backends expose one conditional primitive, [`StorageInterface::apply_if`],
//! which applies a batch of writes only while a guard key still holds an
//! expected value. Order transitions, lock acquisition and generation
//! counters are all expressed through it.

use async_trait::async_trait;
use booking_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod cache;
pub mod lock;
pub mod orders;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use cache::{NearbyWalkerCache, OrderListCache};
pub use lock::{LockError, LockManager, OrderLock};
pub use orders::{OrderStore, OrderStoreError};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A single write inside a conditional batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
	Put {
		key: String,
		value: Vec<u8>,
		ttl: Option<Duration>,
	},
	Delete {
		key: String,
	},
}

impl BatchOp {
	pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
		BatchOp::Put {
			key: key.into(),
			value,
			ttl: None,
		}
	}

	pub fn put_with_ttl(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
		BatchOp::Put {
			key: key.into(),
			value,
			ttl: Some(ttl),
		}
	}

	pub fn delete(key: impl Into<String>) -> Self {
		BatchOp::Delete { key: key.into() }
	}

	pub fn key(&self) -> &str {
		match self {
			BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
		}
	}
}

/// Precondition of a conditional batch.
///
/// `expected == None` requires the key to be absent (or expired).
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
	pub key: String,
	pub expected: Option<Vec<u8>>,
}

impl Guard {
	pub fn absent(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			expected: None,
		}
	}

	pub fn equals(key: impl Into<String>, expected: Vec<u8>) -> Self {
		Self {
			key: key.into(),
			expected: Some(expected),
		}
	}
}

/// Trait defining the low-level interface for storage backends.
///
/// Expired entries must be invisible to every read, including guards and
/// scans, whether or not `cleanup_expired` has run.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Applies `ops` atomically if the guard holds, returning whether it did.
	///
	/// No other writer may observe or interleave with a partially applied
	/// batch.
	async fn apply_if(&self, guard: Guard, ops: Vec<BatchOp>) -> Result<bool, StorageError>;

	/// Returns every live `(key, value)` whose key starts with `prefix`.
	async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage.
	/// Returns the number of entries removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Serializes a value to the JSON bytes stored by backends.
pub(crate) fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// High-level storage service that provides typed operations.
///
/// Keys are `{namespace}:{id}`. Values are JSON.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Attempts budget of read-modify-write loops such as [`Self::increment`].
	const MAX_CAS_ATTEMPTS: usize = 16;

	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.set_bytes(&key, encode(data)?, ttl).await
	}

	/// Stores a serializable value without time-to-live.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let key = format!("{}:{}", namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		decode(&bytes)
	}

	/// Like [`Self::retrieve`], mapping a missing key to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Reads the raw stored bytes of a key.
	pub async fn get_raw(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.backend.get_bytes(key).await
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.delete(&key).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.exists(&key).await
	}

	/// Applies a conditional batch. See [`StorageInterface::apply_if`].
	pub async fn apply_if(&self, guard: Guard, ops: Vec<BatchOp>) -> Result<bool, StorageError> {
		self.backend.apply_if(guard, ops).await
	}

	/// Writes `value` under `key` only if no live value exists.
	pub async fn insert_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		let op = BatchOp::Put {
			key: key.to_string(),
			value,
			ttl,
		};
		self.backend.apply_if(Guard::absent(key), vec![op]).await
	}

	/// Deletes `key` only if it still holds `expected`.
	pub async fn remove_if(&self, key: &str, expected: Vec<u8>) -> Result<bool, StorageError> {
		self.backend
			.apply_if(Guard::equals(key, expected), vec![BatchOp::delete(key)])
			.await
	}

	/// Returns the deserialized values under `{namespace}:{prefix}`, keyed by
	/// the remainder of their key after the namespace.
	pub async fn scan<T: DeserializeOwned>(
		&self,
		namespace: &str,
		prefix: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let namespace_prefix = format!("{}:", namespace);
		let full_prefix = format!("{}{}", namespace_prefix, prefix);
		let entries = self.backend.scan_prefix(&full_prefix).await?;
		entries
			.into_iter()
			.map(|(key, bytes)| {
				let id = key
					.strip_prefix(&namespace_prefix)
					.unwrap_or(&key)
					.to_string();
				decode(&bytes).map(|value| (id, value))
			})
			.collect()
	}

	/// Atomically increments the counter at `{namespace}:{id}` and returns
	/// the new value. A missing counter counts as zero.
	pub async fn increment(&self, namespace: &str, id: &str) -> Result<u64, StorageError> {
		let key = format!("{}:{}", namespace, id);
		for _ in 0..Self::MAX_CAS_ATTEMPTS {
			let (current, guard) = match self.backend.get_bytes(&key).await {
				Ok(bytes) => (decode::<u64>(&bytes)?, Guard::equals(&key, bytes)),
				Err(StorageError::NotFound) => (0, Guard::absent(&key)),
				Err(e) => return Err(e),
			};
			let next = current.saturating_add(1);
			if self
				.backend
				.apply_if(guard, vec![BatchOp::put(&key, encode(&next)?)])
				.await?
			{
				return Ok(next);
			}
			tokio::task::yield_now().await;
		}
		Err(StorageError::Backend(format!(
			"Counter {} is too contended",
			key
		)))
	}

	/// Removes expired entries from storage.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
