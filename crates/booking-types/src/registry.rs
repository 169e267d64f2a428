//! Registry trait for self-registering implementations.
//!
//! Every pluggable backend (storage, geo index, payment, notification)
//! exposes a `Registry` unit struct implementing this trait so the service
//! binary can wire implementations by their configuration name.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	///
	/// For example `"memory"` for `[storage.implementations.memory]` or
	/// `"webhook"` for `[notification.implementations.webhook]`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory function that builds this implementation from
	/// its TOML configuration table.
	fn factory() -> Self::Factory;
}
