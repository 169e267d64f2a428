//! Per-order mutation locks.
//!
//! A lock is a key in the cache backend holding a random token, written only
//! if absent and expiring after the lock TTL so a crashed holder cannot wedge
//! an order. Release deletes the key only while it still holds the holder's
//! token.
//!
//! Locks serialize mutations of one order across instances. They never
//! replace the order store's compare-and-swap, which stays the source of
//! truth if a lock expires under a slow holder.

use crate::{StorageError, StorageService};
use booking_types::{truncate_id, StorageKey};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
	/// Another holder owns the lock.
	#[error("Order {0} is locked, retry")]
	Contended(String),
	/// The critical section outlived the lock TTL.
	#[error("Lock on order {0} expired before the operation finished")]
	Expired(String),
	#[error("Lock storage error: {0}")]
	Storage(#[from] StorageError),
}

/// A held lock. Pass it back to [`LockManager::release`].
#[derive(Debug)]
pub struct OrderLock {
	order_id: String,
	token: String,
}

impl OrderLock {
	pub fn order_id(&self) -> &str {
		&self.order_id
	}
}

pub struct LockManager {
	storage: Arc<StorageService>,
	ttl: Duration,
}

impl LockManager {
	pub fn new(storage: Arc<StorageService>, ttl: Duration) -> Self {
		Self { storage, ttl }
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	fn lock_key(order_id: &str) -> String {
		StorageKey::OrderLocks.key(order_id)
	}

	/// Takes the lock without waiting.
	pub async fn acquire(&self, order_id: &str) -> Result<OrderLock, LockError> {
		let token = uuid::Uuid::new_v4().to_string();
		let acquired = self
			.storage
			.insert_if_absent(
				&Self::lock_key(order_id),
				token.as_bytes().to_vec(),
				Some(self.ttl),
			)
			.await?;
		if !acquired {
			return Err(LockError::Contended(order_id.to_string()));
		}
		Ok(OrderLock {
			order_id: order_id.to_string(),
			token,
		})
	}

	/// Releases the lock. Returns `false` if it had already expired.
	pub async fn release(&self, lock: OrderLock) -> Result<bool, LockError> {
		let released = self
			.storage
			.remove_if(&Self::lock_key(&lock.order_id), lock.token.into_bytes())
			.await?;
		if !released {
			tracing::warn!(
				order_id = %truncate_id(&lock.order_id),
				"Lock expired before release"
			);
		}
		Ok(released)
	}

	/// Runs `operation` while holding the order's lock.
	///
	/// The operation is abandoned once the lock TTL elapses. The lock is
	/// released on every path.
	pub async fn with_lock<T, E, F, Fut>(&self, order_id: &str, operation: F) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<LockError>,
	{
		let lock = self.acquire(order_id).await?;
		let outcome = tokio::time::timeout(self.ttl, operation()).await;
		if let Err(e) = self.release(lock).await {
			tracing::warn!(order_id = %truncate_id(order_id), error = %e, "Failed to release lock");
		}
		match outcome {
			Ok(result) => result,
			Err(_) => Err(LockError::Expired(order_id.to_string()).into()),
		}
	}
}
