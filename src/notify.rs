use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Booking, BookingEvent, Client};

#[allow(dead_code)]
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed-booking events, one channel per salon.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a salon. Creates the channel if needed.
    pub fn subscribe(&self, salon_id: Ulid) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .channels
            .entry(salon_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, salon_id: Ulid, event: &BookingEvent) {
        if let Some(sender) = self.channels.get(&salon_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a salon is deleted).
    pub fn remove(&self, salon_id: &Ulid) {
        self.channels.remove(salon_id);
    }
}

/// Outbound client notification failure. Carried back into the engine so the
/// hold flow can run its compensating cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// External delivery collaborator (email/SMS). Fire-and-forget from the
/// engine's point of view: a failed confirmation never rolls back a
/// confirmed booking, a failed verification request releases the hold.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmation(&self, client: &Client, booking: &Booking)
        -> Result<(), NotifyError>;

    async fn verification_request(&self, client: &Client, booking: &Booking)
        -> Result<(), NotifyError>;
}

/// Default no-delivery implementation for embedders that handle messaging
/// elsewhere, and for tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn booking_confirmation(&self, _: &Client, _: &Booking) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn verification_request(&self, _: &Client, _: &Booking) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let salon_id = Ulid::new();
        let mut rx = hub.subscribe(salon_id);

        let event = BookingEvent::Canceled { booking_id: Ulid::new() };
        hub.send(salon_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber, should not panic
        hub.send(Ulid::new(), &BookingEvent::Canceled { booking_id: Ulid::new() });
    }
}
