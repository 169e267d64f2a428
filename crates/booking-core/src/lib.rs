//! Core booking engine.
//!
//! Coordinates the matching engine and the order lifecycle over the
//! pluggable storage, geo, payment and notification services. The
//! [`BookingBuilder`] assembles a [`BookingEngine`] from configuration; the
//! engine exposes the lifecycle controller, the order queries and the walker
//! handler to the query surface and runs the background sweeps.

pub mod builder;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod matching;
pub mod monitoring;
pub mod recovery;
pub mod state;

#[cfg(test)]
mod test_support;

pub use builder::{pricing_calculator, BookingBuilder, BookingFactories, BuilderError};
pub use engine::{context::BookingContext, event_bus::EventBus, BookingEngine, EngineError};
pub use error::{BookingError, LOCKED_RETRY};
pub use handlers::{LifecycleController, OrderQueries, WalkerHandler};
pub use matching::{MatchOutcome, MatchingEngine};
pub use recovery::{PaymentReconciler, ReconcileReport};
