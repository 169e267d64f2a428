//! Request handlers of the booking engine.
//!
//! The lifecycle controller owns every status change; queries and walker
//! availability updates never touch order status.

pub mod lifecycle;
pub mod query;
pub mod walker;

pub use lifecycle::LifecycleController;
pub use query::OrderQueries;
pub use walker::WalkerHandler;
