//! Event fan-out: kind → listeners.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::CdpError;
use crate::event::{DecodedEvent, EventKind};
use crate::listener::EventListener;

/// Routes decoded events to subscribed listeners.
///
/// Dispatch never suspends: back-pressure surfaces as per-listener
/// overflow (drop + warn) so one slow subscriber cannot stall the read
/// loop or its peers. Listeners observed closed during a dispatch are
/// pruned from that kind's set before the dispatch returns.
#[derive(Debug, Default)]
pub(crate) struct EventRouter {
    subscriptions: HashMap<EventKind, Vec<EventListener>>,
}

impl EventRouter {
    /// Register one listener under each kind. Duplicate kinds in the
    /// input collapse to a single entry so the listener appears at most
    /// once per kind.
    pub fn subscribe(&mut self, kinds: &[EventKind], listener: &EventListener) {
        for (i, kind) in kinds.iter().enumerate() {
            if kinds[..i].contains(kind) {
                continue;
            }
            self.subscriptions
                .entry(kind.clone())
                .or_default()
                .push(listener.clone());
        }
    }

    /// Deliver an event to every listener subscribed to its kind.
    pub fn dispatch(&mut self, event: &DecodedEvent) {
        let Some(listeners) = self.subscriptions.get_mut(event.kind()) else {
            return;
        };
        listeners.retain(|listener| match listener.put(event.clone()) {
            Ok(()) => true,
            Err(CdpError::QueueOverflow) => {
                warn!(
                    method = event.method(),
                    "event dropped: listener queue is full"
                );
                true
            }
            Err(_closed) => false,
        });
        if listeners.is_empty() {
            self.subscriptions.remove(event.kind());
        }
        debug!(method = event.method(), "event dispatched");
    }

    /// Close every listener and clear the map.
    pub fn close_all(&mut self) {
        for listener in self.subscriptions.values().flatten() {
            listener.close();
        }
        self.subscriptions.clear();
    }

    #[cfg(test)]
    pub fn subscription_count(&self, kind: &EventKind) -> usize {
        self.subscriptions.get(kind).map_or(0, Vec::len)
    }
}
