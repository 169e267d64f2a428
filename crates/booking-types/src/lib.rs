//! Common types module for the booking engine.
//!
//! This module defines the data model shared by every component of the
//! order matching and lifecycle engine: orders and their status history,
//! walker availability, events, API payloads and the error taxonomy.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Error taxonomy shared across the interface boundary.
pub mod errors;
/// Event types emitted for the notification subsystem.
pub mod events;
/// Order types including status, history entries and price breakdowns.
pub mod order;
/// Filters and pagination for order listings.
pub mod query;
/// Base trait for self-registering implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;
/// Utility functions.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;
/// Walker availability and match candidates.
pub mod walker;

// Re-export all types for convenient access
pub use api::*;
pub use errors::*;
pub use events::*;
pub use order::*;
pub use query::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::truncate_id;
pub use validation::*;
pub use walker::*;
