//! Per-channel state: one correlator plus one router.
//!
//! The connection root and every attached session each own one
//! [`ChannelState`]; the demultiplexer picks the channel by `sessionId`
//! and hands it the classified frame.

use crate::correlator::Correlator;
use crate::error::CdpError;
use crate::event::{EventKind, EventRegistry};
use crate::listener::EventListener;
use crate::router::EventRouter;
use crate::types::MessageKind;

#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    pub correlator: Correlator,
    pub router: EventRouter,
}

impl ChannelState {
    /// Route a classified frame: responses to the correlator, events
    /// through the registry to the router.
    pub fn handle_message(&mut self, kind: MessageKind, registry: &EventRegistry) {
        match kind {
            MessageKind::Response(response) => self.correlator.complete(response),
            MessageKind::Event(frame) => {
                let event = registry.decode(frame.method, frame.params);
                self.router.dispatch(&event);
            }
        }
    }

    /// Register a listener for the given kinds.
    pub fn subscribe(&mut self, kinds: &[EventKind], listener: &EventListener) {
        self.router.subscribe(kinds, listener);
    }

    /// Fail every in-flight command with `error`, then close every
    /// listener.
    pub fn close(&mut self, error: &CdpError) {
        self.correlator.fail_all(error);
        self.router.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::PendingCommand;
    use crate::listener::listener_channel;
    use crate::types::RawMessage;
    use tokio::sync::oneshot;

    fn classify(frame: &str) -> MessageKind {
        serde_json::from_str::<RawMessage>(frame)
            .unwrap()
            .classify()
            .unwrap()
    }

    #[tokio::test]
    async fn response_frames_resolve_commands() {
        let registry = EventRegistry::new();
        let mut channel = ChannelState::default();
        let id = channel.correlator.allocate();
        let (tx, rx) = oneshot::channel();
        channel.correlator.register(
            id,
            PendingCommand {
                method: "Page.navigate".into(),
                reply: tx,
            },
        );

        channel.handle_message(
            classify(r#"{"id": 0, "result": {"frameId": "F1"}}"#),
            &registry,
        );
        assert_eq!(rx.await.unwrap().unwrap()["frameId"], "F1");
        assert!(channel.correlator.is_empty());
    }

    #[tokio::test]
    async fn event_frames_reach_subscribed_listeners() {
        let registry = EventRegistry::with_events(["Page.loadEventFired"]);
        let mut channel = ChannelState::default();
        let (listener, mut stream) = listener_channel(4);
        channel.subscribe(&[EventKind::event("Page.loadEventFired")], &listener);

        channel.handle_message(
            classify(r#"{"method": "Page.loadEventFired", "params": {"timestamp": 3.5}}"#),
            &registry,
        );
        assert_eq!(stream.next().await.unwrap().params()["timestamp"], 3.5);
    }

    #[tokio::test]
    async fn close_fails_inflight_and_terminates_streams() {
        let registry = EventRegistry::new();
        let mut channel = ChannelState::default();
        let id = channel.correlator.allocate();
        let (tx, rx) = oneshot::channel();
        channel.correlator.register(
            id,
            PendingCommand {
                method: "Runtime.evaluate".into(),
                reply: tx,
            },
        );
        let (listener, mut stream) = listener_channel(4);
        channel.subscribe(&[EventKind::Unknown], &listener);

        channel.close(&CdpError::SessionClosed);

        assert!(matches!(rx.await.unwrap(), Err(CdpError::SessionClosed)));
        assert!(stream.next().await.is_none());
        // A late response for the drained id is dropped quietly.
        channel.handle_message(classify(r#"{"id": 0, "result": {}}"#), &registry);
        assert!(channel.correlator.is_empty());
    }
}
