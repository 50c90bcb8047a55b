//! Session events and the in-process bus that fans them out to listeners.

use tokio::sync::broadcast;

use motobridge_domain::error::DecodeError;
use motobridge_domain::frame::RegisterClass;
use motobridge_domain::notification::Token;
use motobridge_domain::register::RegisterId;
use motobridge_domain::value::SensorValue;

use crate::error::SessionError;

/// Lifecycle state of the link to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    DiscoveringServices,
    /// The peripheral sent its first counter token; polling is allowed.
    Authorized,
    Disconnecting,
}

/// Why a register produced no value in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    Timeout,
    Malformed(DecodeError),
}

/// Something listeners (UI, logging) may want to know about.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// A device-state token, forwarded verbatim.
    Attribute { token: Token, value: String },
    /// A register answered and was decoded.
    Sample(SensorValue),
    /// A register was skipped in the current cycle.
    Missed {
        class: RegisterClass,
        id: RegisterId,
        reason: MissReason,
    },
    /// A poll cycle finished and its values were published.
    CycleComplete(RegisterClass),
    /// A failure worth surfacing to the rider.
    Error(SessionError),
}

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the event is simply dropped).
#[derive(Debug, Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events on this bus.
    ///
    /// Returns a receiver that will get all events published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: SessionEvent) {
        // broadcast::send fails only when there are zero receivers.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_deliver_event_to_multiple_subscribers() {
        let bus = SessionEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(SessionEvent::StateChanged(ConnectionState::Authorized));

        for rx in [&mut rx1, &mut rx2] {
            let received = rx.recv().await.unwrap();
            assert!(matches!(
                received,
                SessionEvent::StateChanged(ConnectionState::Authorized)
            ));
        }
    }

    #[test]
    fn should_succeed_when_no_subscribers() {
        let bus = SessionEventBus::new(16);
        bus.publish(SessionEvent::CycleComplete(RegisterClass::Telemetry));
    }

    #[tokio::test]
    async fn should_not_deliver_events_published_before_subscription() {
        let bus = SessionEventBus::new(16);
        bus.publish(SessionEvent::CycleComplete(RegisterClass::Telemetry));

        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::CycleComplete(RegisterClass::Identification));

        let received = rx.recv().await.unwrap();
        assert!(matches!(
            received,
            SessionEvent::CycleComplete(RegisterClass::Identification)
        ));
    }
}
