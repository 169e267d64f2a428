//! Periodic sweeps over in-flight orders.
//!
//! The offer monitor withdraws expired offers and retries matching for
//! orders left PENDING by a failed round.

pub mod offers;

pub use offers::{OfferMonitor, SweepReport};
