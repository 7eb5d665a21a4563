use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use procs::MemoryState;

/// Message sent from the browser to a child over its memory channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    /// New target memory state for the receiving process.
    StateChange { state: MemoryState },
}

/// Errors surfaced by the message codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed memory channel message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encodes a message for the channel.
pub fn encode(message: &ChildMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a message received from the channel.
pub fn decode(raw: &str) -> Result<ChildMessage, CodecError> {
    Ok(serde_json::from_str(raw)?)
}

/// Fire-and-forget sink for state-change messages to one child process.
pub trait StateSink {
    /// Delivers a state-change message. Never blocks; delivery failures
    /// surface later as a connection error on the owning channel.
    fn send_state_change(&self, state: MemoryState);
}

/// Browser-side endpoint for a single child's memory channel.
///
/// The endpoint exists from the moment the browser learns about the process.
/// The child-side sink is bound later, once the child acks the handshake;
/// until then sends are refused.
pub struct ChildHandle {
    sink: RefCell<Option<Rc<dyn StateSink>>>,
}

impl ChildHandle {
    pub fn new() -> Self {
        Self {
            sink: RefCell::new(None),
        }
    }

    /// Binds the child-side sink, completing the handshake.
    pub fn bind(&self, sink: Rc<dyn StateSink>) {
        *self.sink.borrow_mut() = Some(sink);
    }

    /// Whether the child side has acked the handshake.
    pub fn is_bound(&self) -> bool {
        self.sink.borrow().is_some()
    }

    /// Sends a state change if the child side is bound. Returns whether a
    /// message was actually dispatched.
    pub fn send_state_change(&self, state: MemoryState) -> bool {
        let sink = self.sink.borrow().clone();
        match sink {
            Some(sink) => {
                sink.send_state_change(state);
                true
            }
            None => false,
        }
    }
}

impl Default for ChildHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// In-process JSON transport standing in where a real IPC pipe would be.
///
/// The sending half encodes each message and drops it on the floor if the
/// receiver is gone; disconnects surface through the embedder's
/// connection-error path, not here.
#[derive(Debug, Clone)]
pub struct JsonChannelSink {
    sender: Sender<String>,
}

impl StateSink for JsonChannelSink {
    fn send_state_change(&self, state: MemoryState) {
        let message = ChildMessage::StateChange { state };
        let Ok(raw) = encode(&message) else {
            return;
        };
        if self.sender.send(raw).is_err() {
            debug!("memory channel receiver is gone, dropping message");
        }
    }
}

/// Creates a connected in-process channel pair.
pub fn json_channel() -> (JsonChannelSink, Receiver<String>) {
    let (sender, receiver) = mpsc::channel();
    (JsonChannelSink { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        sent: RefCell<Vec<MemoryState>>,
    }

    impl StateSink for RecordingSink {
        fn send_state_change(&self, state: MemoryState) {
            self.sent.borrow_mut().push(state);
        }
    }

    #[test]
    fn state_changes_encode_as_tagged_json() {
        let raw = encode(&ChildMessage::StateChange {
            state: MemoryState::Throttled,
        })
        .unwrap();
        assert_eq!(raw, r#"{"type":"state_change","state":"throttled"}"#);
        assert_eq!(
            decode(&raw).unwrap(),
            ChildMessage::StateChange {
                state: MemoryState::Throttled
            }
        );
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(decode("{\"type\":\"unheard_of\"}").is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn unbound_handles_refuse_sends() {
        let handle = ChildHandle::new();
        assert!(!handle.is_bound());
        assert!(!handle.send_state_change(MemoryState::Throttled));
    }

    #[test]
    fn bound_handles_dispatch_to_the_sink() {
        let handle = ChildHandle::new();
        let sink = Rc::new(RecordingSink {
            sent: RefCell::new(Vec::new()),
        });
        handle.bind(Rc::clone(&sink) as Rc<dyn StateSink>);

        assert!(handle.is_bound());
        assert!(handle.send_state_change(MemoryState::Suspended));
        assert_eq!(*sink.sent.borrow(), vec![MemoryState::Suspended]);
    }

    #[test]
    fn json_channel_delivers_decodable_messages() {
        let (sink, receiver) = json_channel();
        sink.send_state_change(MemoryState::Normal);

        let raw = receiver.try_recv().unwrap();
        assert_eq!(
            decode(&raw).unwrap(),
            ChildMessage::StateChange {
                state: MemoryState::Normal
            }
        );
    }
}
