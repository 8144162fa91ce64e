//! Domain events and the in-process event bus
//!
//! GapCore emits an event after each committed transition; the notifier
//! task consumes them and fans out to email, socket rooms, and the audit
//! log. Delivery is best-effort: a full channel drops the oldest events
//! for lagging subscribers and a missed socket event is recoverable by
//! polling.

use tokio::sync::broadcast;

/// TAT sweep classification carried by `TatAlert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TatAlertKind {
    Approaching,
    Breached,
}

/// Events emitted by GapCore and the background workers after commit
#[derive(Debug, Clone)]
pub enum DomainEvent {
    GapCreated {
        gap_id: i64,
        actor_id: i64,
    },
    /// Gap content or AI fields changed; drives the `gap:updated` socket push
    GapUpdated {
        gap_id: i64,
        actor_id: Option<i64>,
    },
    GapAssigned {
        gap_id: i64,
        assignee_id: i64,
        actor_id: i64,
    },
    GapResolved {
        gap_id: i64,
        actor_id: i64,
    },
    GapReopened {
        gap_id: i64,
        actor_id: i64,
    },
    GapClosedDuplicate {
        gap_id: i64,
        original_id: i64,
        actor_id: i64,
    },
    ExtensionRequested {
        extension_id: i64,
        gap_id: i64,
        requester_id: i64,
    },
    TatAlert {
        gap_id: i64,
        kind: TatAlertKind,
    },
    CommentCreated {
        gap_id: i64,
        comment_id: i64,
        author_id: i64,
    },
}

impl DomainEvent {
    /// Gap the event concerns, when there is one
    pub fn gap_id(&self) -> i64 {
        match self {
            Self::GapCreated { gap_id, .. }
            | Self::GapUpdated { gap_id, .. }
            | Self::GapAssigned { gap_id, .. }
            | Self::GapResolved { gap_id, .. }
            | Self::GapReopened { gap_id, .. }
            | Self::GapClosedDuplicate { gap_id, .. }
            | Self::ExtensionRequested { gap_id, .. }
            | Self::TatAlert { gap_id, .. }
            | Self::CommentCreated { gap_id, .. } => *gap_id,
        }
    }
}

/// Process-wide broadcast bus; cheap to clone into components
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. A send with no live subscribers is not an error;
    /// the notifier may not have started yet during boot.
    pub fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.sender.send(event) {
            tracing::debug!(error = %err, "event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::GapCreated {
            gap_id: 7,
            actor_id: 1,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.gap_id(), 7);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(DomainEvent::GapUpdated {
            gap_id: 1,
            actor_id: None,
        });
    }

    #[tokio::test]
    async fn test_every_event_carries_its_gap() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::TatAlert {
            gap_id: 42,
            kind: TatAlertKind::Breached,
        });
        bus.publish(DomainEvent::GapClosedDuplicate {
            gap_id: 43,
            original_id: 42,
            actor_id: 1,
        });

        assert_eq!(rx.recv().await.unwrap().gap_id(), 42);
        assert_eq!(rx.recv().await.unwrap().gap_id(), 43);
    }
}
