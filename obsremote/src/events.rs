use crate::message::Event;

use std::collections::HashMap;
use tokio::sync::mpsc;

/// Connection-level notifications, independent of OBS events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport is open and the client is waiting for `Hello`.
    Opened,
    /// `Hello` arrived and `Identify` was sent.
    Hello,
    Identified { negotiated_rpc_version: u32 },
    /// A frame could not be decoded; the connection stays up.
    Error { message: String },
    /// Terminal. `code` and `reason` come from the peer's close frame, if any.
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Default)]
pub(crate) struct EventListeners {
    by_type: HashMap<String, Vec<mpsc::UnboundedSender<Event>>>,
    any: Vec<mpsc::UnboundedSender<Event>>,
}
impl EventListeners {
    pub fn subscribe(&mut self, event_type: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.by_type.entry(event_type.to_owned()).or_default().push(tx);
        rx
    }
    pub fn subscribe_all(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.any.push(tx);
        rx
    }
    /// Returns how many listeners received the event. Listeners whose
    /// receiver is gone are dropped.
    pub fn dispatch(&mut self, event: &Event) -> usize {
        let mut delivered = 0;
        if let Some(listeners) = self.by_type.get_mut(&event.event_type) {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
            delivered += listeners.len();
            if listeners.is_empty() {
                self.by_type.remove(&event.event_type);
            }
        }
        self.any.retain(|tx| tx.send(event.clone()).is_ok());
        delivered + self.any.len()
    }
}
