//! Broadcast + history event stream for session event delivery.

use std::{
    collections::VecDeque,
    sync::RwLock,
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::AgentEvent;

/// Default history entry limit.
const HISTORY_ENTRIES: usize = 4096;

/// Ordered event stream with broadcast delivery and bounded history.
///
/// Written to by exactly one control-loop task; readers subscribe for
/// live updates and can snapshot history for late joiners. Delivery
/// order matches production order.
pub struct EventStream {
    history: RwLock<VecDeque<AgentEvent>>,
    sender: broadcast::Sender<AgentEvent>,
    capacity: usize,
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStream {
    /// Create a stream with the default history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_ENTRIES)
    }

    /// Create a stream keeping at most `capacity` history entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            history: RwLock::new(VecDeque::with_capacity(32)),
            sender,
            capacity,
        }
    }

    /// Push an event to live subscribers and history.
    pub fn push(&self, event: AgentEvent) {
        let _ = self.sender.send(event.clone()); // live listeners, if any
        let mut history = self.history.write().unwrap();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Subscribe to live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the history so far.
    #[must_use]
    pub fn history(&self) -> Vec<AgentEvent> {
        self.history.read().unwrap().iter().cloned().collect()
    }

    /// Live updates as a stream, dropping lagged gaps silently.
    #[must_use]
    pub fn live_stream(&self) -> futures::stream::BoxStream<'static, AgentEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}
