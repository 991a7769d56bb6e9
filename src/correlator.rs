//! Command id allocation and response correlation.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::CdpError;
use crate::types::Response;

/// Tracks a command awaiting its response.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub method: String,
    pub reply: oneshot::Sender<Result<Value, CdpError>>,
}

/// Pairs outgoing command ids with their awaiters.
///
/// Ids are monotonic from 0 and scoped to one channel; responses on a
/// different session never reach this correlator because the
/// demultiplexer routes frames first.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    next_id: u64,
    inflight: HashMap<u64, PendingCommand>,
}

impl Correlator {
    /// Hand out the next command id.
    pub fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Track a command. Must be called before its frame hits the wire
    /// so a fast response always finds the entry.
    pub fn register(&mut self, id: u64, pending: PendingCommand) {
        debug_assert!(!self.inflight.contains_key(&id), "duplicate in-flight id");
        self.inflight.insert(id, pending);
    }

    /// Resolve the awaiter matching a response frame.
    ///
    /// A response with no matching entry (already cancelled, or never
    /// ours) is dropped with a debug log. An awaiter whose caller went
    /// away is dropped the same way.
    pub fn complete(&mut self, response: Response) {
        let Some(pending) = self.inflight.remove(&response.id) else {
            debug!(id = response.id, "response for unknown command id dropped");
            return;
        };
        let outcome = match response.result {
            Ok(result) => Ok(result),
            Err(err) => Err(CdpError::Browser {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
        };
        if pending.reply.send(outcome).is_err() {
            debug!(
                id = response.id,
                method = %pending.method,
                "response for cancelled command dropped"
            );
        }
    }

    /// Fail every in-flight command with (a duplicate of) `error` and
    /// clear the map.
    pub fn fail_all(&mut self, error: &CdpError) {
        for (_, pending) in self.inflight.drain() {
            let _ = pending.reply.send(Err(error.duplicate()));
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WireError;
    use serde_json::json;

    fn pending(method: &str) -> (PendingCommand, oneshot::Receiver<Result<Value, CdpError>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingCommand {
                method: method.into(),
                reply: tx,
            },
            rx,
        )
    }

    #[test]
    fn ids_are_monotonic_from_zero() {
        let mut correlator = Correlator::default();
        assert_eq!(correlator.allocate(), 0);
        assert_eq!(correlator.allocate(), 1);
        assert_eq!(correlator.allocate(), 2);
    }

    #[tokio::test]
    async fn completes_matching_awaiter_with_result() {
        let mut correlator = Correlator::default();
        let id = correlator.allocate();
        let (cmd, rx) = pending("Page.navigate");
        correlator.register(id, cmd);

        correlator.complete(Response {
            id,
            result: Ok(json!({"frameId": "F1"})),
        });

        assert!(correlator.is_empty());
        assert_eq!(rx.await.unwrap().unwrap()["frameId"], "F1");
    }

    #[tokio::test]
    async fn error_response_fails_awaiter_with_browser_error() {
        let mut correlator = Correlator::default();
        let id = correlator.allocate();
        let (cmd, rx) = pending("Page.navigate");
        correlator.register(id, cmd);

        correlator.complete(Response {
            id,
            result: Err(WireError {
                code: -32000,
                message: "boom".into(),
                data: None,
            }),
        });

        assert!(correlator.is_empty());
        match rx.await.unwrap().unwrap_err() {
            CdpError::Browser { code, message, .. } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "boom");
            }
            other => panic!("expected browser error, got {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_id_is_dropped() {
        let mut correlator = Correlator::default();
        let id = correlator.allocate();
        let (cmd, _rx) = pending("Page.navigate");
        correlator.register(id, cmd);

        correlator.complete(Response {
            id: 999,
            result: Ok(Value::Null),
        });
        assert!(!correlator.is_empty());
    }

    #[tokio::test]
    async fn response_after_cancellation_leaves_map_empty() {
        let mut correlator = Correlator::default();
        let id = correlator.allocate();
        let (cmd, rx) = pending("Page.navigate");
        correlator.register(id, cmd);

        // The caller cancelled: its receiver is gone.
        drop(rx);
        correlator.complete(Response {
            id,
            result: Ok(Value::Null),
        });
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn fail_all_drains_every_awaiter() {
        let mut correlator = Correlator::default();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let id = correlator.allocate();
            let (cmd, rx) = pending("Runtime.evaluate");
            correlator.register(id, cmd);
            receivers.push(rx);
        }

        correlator.fail_all(&CdpError::SessionClosed);

        assert!(correlator.is_empty());
        for rx in receivers {
            assert!(matches!(
                rx.await.unwrap(),
                Err(CdpError::SessionClosed)
            ));
        }
    }

}
