//! Per-subscription event buffering.
//!
//! Each subscription is backed by a bounded `tokio::sync::mpsc` queue.
//! The producer half ([`EventListener`], held by the router) never
//! suspends: a full queue surfaces as [`CdpError::QueueOverflow`] and a
//! closed listener as [`CdpError::ListenerClosed`]. The consumer half
//! ([`EventStream`]) is a single-pass sequence that suspends while the
//! queue is empty and terminates once the listener is closed and the
//! pre-close backlog is drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::error::CdpError;
use crate::event::DecodedEvent;

/// In-band queue item. `Closed` is the close sentinel; it is enqueued
/// best-effort so a consumer that drained the backlog wakes up and
/// terminates without another event arriving.
#[derive(Debug)]
enum Delivery {
    Event(DecodedEvent),
    Closed,
}

#[derive(Debug, Default)]
struct ListenerShared {
    /// Monotonic: set on close and never cleared.
    closed: AtomicBool,
}

/// Producer half of a subscription, retained by the event router.
#[derive(Debug, Clone)]
pub(crate) struct EventListener {
    tx: mpsc::Sender<Delivery>,
    shared: Arc<ListenerShared>,
}

/// Consumer half of a subscription: a single-pass asynchronous
/// sequence of decoded events.
///
/// Dropping the stream closes the listener, so the router prunes the
/// subscription on its next dispatch instead of buffering into a queue
/// nobody reads.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Delivery>,
    shared: Arc<ListenerShared>,
    done: bool,
}

/// Create a listener/stream pair over a queue of `capacity` events.
pub(crate) fn listener_channel(capacity: usize) -> (EventListener, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(ListenerShared::default());
    (
        EventListener {
            tx,
            shared: Arc::clone(&shared),
        },
        EventStream {
            rx,
            shared,
            done: false,
        },
    )
}

impl EventListener {
    /// Offer an event to the queue. Never suspends.
    ///
    /// # Errors
    ///
    /// [`CdpError::ListenerClosed`] once the listener is closed,
    /// [`CdpError::QueueOverflow`] when the queue is full; the event is
    /// discarded in both cases.
    pub fn put(&self, event: DecodedEvent) -> Result<(), CdpError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CdpError::ListenerClosed);
        }
        match self.tx.try_send(Delivery::Event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CdpError::QueueOverflow),
            Err(TrySendError::Closed(_)) => Err(CdpError::ListenerClosed),
        }
    }

    /// Close the listener. Later `put`s fail; the consumer terminates
    /// after draining whatever was accepted before the close.
    ///
    /// The sentinel is enqueued only if the queue has room. When it is
    /// dropped the consumer still terminates: it re-checks the closed
    /// flag whenever it finds the queue empty.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let _ = self.tx.try_send(Delivery::Closed);
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl EventStream {
    /// Yield the next event, suspending while the queue is empty.
    ///
    /// Returns `None` at end-of-sequence: after the close sentinel, or
    /// when the queue is empty and the listener is closed. An event
    /// buffered before the close is still delivered first
    /// (deliver-then-terminate). Once `None` is returned, every later
    /// call returns `None`.
    pub async fn next(&mut self) -> Option<DecodedEvent> {
        if self.done {
            return None;
        }
        match self.rx.try_recv() {
            Ok(Delivery::Event(event)) => return Some(event),
            Ok(Delivery::Closed) | Err(TryRecvError::Disconnected) => {
                self.done = true;
                return None;
            }
            Err(TryRecvError::Empty) => {}
        }
        if self.shared.closed.load(Ordering::Acquire) {
            // Everything put before the close is visible now; drain one
            // more time in case the sentinel did not fit the queue.
            return match self.rx.try_recv() {
                Ok(Delivery::Event(event)) => Some(event),
                _ => {
                    self.done = true;
                    None
                }
            };
        }
        match self.rx.recv().await {
            Some(Delivery::Event(event)) => Some(event),
            Some(Delivery::Closed) | None => {
                self.done = true;
                None
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}
