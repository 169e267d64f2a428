//! Broadcast event bus between the lifecycle controller and background
//! consumers such as the notification forwarder.

use booking_types::BookingEvent;
use tokio::sync::broadcast;

/// Event bus for broadcasting booking events to multiple subscribers.
///
/// Subscribers that fall behind by more than the channel capacity lose the
/// oldest events.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<BookingEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	/// Each subscriber receives every event published after it subscribed.
	pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Having no subscribers is not an error.
	pub fn publish(&self, event: BookingEvent) {
		if self.sender.send(event).is_err() {
			tracing::trace!("Event published with no subscribers");
		}
	}
}
