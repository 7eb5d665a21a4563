use std::sync::mpsc::{self, Receiver, Sender};

use procs::RenderProcessId;

/// A visibility transition observed by the window layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityEvent {
    pub id: RenderProcessId,
    pub is_visible: bool,
}

/// Sending half handed to the window layer.
///
/// Events for one process must be sent in the order the transitions happened;
/// the channel preserves that order through to the drain.
#[derive(Debug, Clone)]
pub struct VisibilitySender {
    sender: Sender<VisibilityEvent>,
}

impl VisibilitySender {
    pub fn send(&self, id: RenderProcessId, is_visible: bool) {
        // The coordinator owning the receiving half may already be gone
        // during shutdown; there is nobody left to care.
        let _ = self.sender.send(VisibilityEvent { id, is_visible });
    }
}

/// Receiving half drained on the coordinator's sequence.
#[derive(Debug)]
pub struct VisibilityEvents {
    receiver: Receiver<VisibilityEvent>,
}

impl VisibilityEvents {
    /// Drains pending events in arrival order.
    pub fn drain(&self) -> impl Iterator<Item = VisibilityEvent> + '_ {
        std::iter::from_fn(|| self.receiver.try_recv().ok())
    }
}

/// Creates the queue connecting the window layer to the coordinator.
pub fn visibility_channel() -> (VisibilitySender, VisibilityEvents) {
    let (sender, receiver) = mpsc::channel();
    (VisibilitySender { sender }, VisibilityEvents { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_drain_in_arrival_order() {
        let (sender, events) = visibility_channel();
        let id = RenderProcessId::new(3);
        sender.send(id, false);
        sender.send(id, true);
        sender.send(RenderProcessId::new(4), false);

        let drained: Vec<_> = events.drain().collect();
        assert_eq!(
            drained,
            vec![
                VisibilityEvent {
                    id,
                    is_visible: false
                },
                VisibilityEvent {
                    id,
                    is_visible: true
                },
                VisibilityEvent {
                    id: RenderProcessId::new(4),
                    is_visible: false
                },
            ]
        );
        assert_eq!(events.drain().count(), 0);
    }

    #[test]
    fn sends_after_the_receiver_is_dropped_are_ignored() {
        let (sender, events) = visibility_channel();
        drop(events);
        sender.send(RenderProcessId::new(1), true);
    }
}
