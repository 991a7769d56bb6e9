//! The multiplexer task.
//!
//! One background task per connection exclusively owns the WebSocket
//! and all correlation/subscription state: the root channel plus one
//! channel per attached session. Handles talk to it over a bounded
//! command mailbox; nothing here is shared or locked. Inbound frames
//! are decoded once, demultiplexed by `sessionId`, and handed to the
//! owning channel.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::channel::ChannelState;
use crate::correlator::PendingCommand;
use crate::error::CdpError;
use crate::event::{EventKind, EventRegistry};
use crate::listener::EventListener;
use crate::types::{CommandEnvelope, RawMessage};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long an orderly close waits for the peer to finish the
/// handshake before giving up on the drain.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-wide state observable from handles without a round-trip
/// to the task.
#[derive(Debug, Default)]
pub(crate) struct ConnShared {
    closed: AtomicBool,
    normal_closure: AtomicBool,
    close_reason: OnceLock<String>,
}

impl ConnShared {
    fn mark_closed(&self, reason: &str, normal: bool) {
        let _ = self.close_reason.set(reason.to_owned());
        if normal {
            self.normal_closure.store(true, Ordering::Release);
        }
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn had_normal_closure(&self) -> bool {
        self.normal_closure.load(Ordering::Acquire)
    }

    pub fn closed_error(&self) -> CdpError {
        let reason = self
            .close_reason
            .get()
            .cloned()
            .unwrap_or_else(|| "connection closed".to_owned());
        CdpError::ConnectionClosed { reason }
    }
}

/// Per-session flag shared between the task and session handles. Set
/// exactly when the session is removed or the connection goes away.
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    closed: AtomicBool,
}

impl SessionShared {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Requests from handles to the multiplexer task.
pub(crate) enum MuxCommand {
    Execute {
        session_id: Option<String>,
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<Value, CdpError>>,
    },
    Listen {
        session_id: Option<String>,
        kinds: Vec<EventKind>,
        listener: EventListener,
        reply: oneshot::Sender<Result<(), CdpError>>,
    },
    AddSession {
        session_id: String,
        target_id: String,
        reply: oneshot::Sender<Arc<SessionShared>>,
    },
    RemoveSession {
        session_id: String,
        reply: oneshot::Sender<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

struct SessionEntry {
    channel: ChannelState,
    shared: Arc<SessionShared>,
}

/// Spawn the multiplexer for an established WebSocket and return its
/// mailbox.
pub(crate) fn spawn_multiplexer(
    ws: WsStream,
    registry: EventRegistry,
    shared: Arc<ConnShared>,
    mailbox_capacity: usize,
) -> mpsc::Sender<MuxCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(mailbox_capacity.max(1));
    tokio::spawn(async move {
        Multiplexer {
            ws,
            registry,
            shared,
            cmd_rx,
            root: ChannelState::default(),
            sessions: HashMap::new(),
        }
        .run()
        .await;
    });
    cmd_tx
}

struct Multiplexer {
    ws: WsStream,
    registry: EventRegistry,
    shared: Arc<ConnShared>,
    cmd_rx: mpsc::Receiver<MuxCommand>,
    root: ChannelState,
    sessions: HashMap<String, SessionEntry>,
}

impl Multiplexer {
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                frame = self.ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => {
                                format!("{} ({})", frame.reason, u16::from(frame.code))
                            }
                            None => "closed by peer".to_owned(),
                        };
                    }
                    Some(Ok(Message::Binary(_))) => {
                        error!("unexpected binary frame");
                        break "protocol error: unexpected binary frame".to_owned();
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("transport error: {e}"),
                    None => break "connection reset".to_owned(),
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(MuxCommand::Execute { session_id, method, params, reply }) => {
                        if let Err(reason) =
                            self.handle_execute(session_id, method, params, reply).await
                        {
                            break reason;
                        }
                    }
                    Some(MuxCommand::Listen { session_id, kinds, listener, reply }) => {
                        self.handle_listen(session_id, &kinds, &listener, reply);
                    }
                    Some(MuxCommand::AddSession { session_id, target_id, reply }) => {
                        self.handle_add_session(session_id, &target_id, reply);
                    }
                    Some(MuxCommand::RemoveSession { session_id, reply }) => {
                        self.handle_remove_session(&session_id);
                        let _ = reply.send(());
                    }
                    Some(MuxCommand::Close { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    // Every handle is gone; close the transport behind them.
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
            }
        };
        self.teardown(&reason).await;
    }

    /// Decode and demultiplex one inbound text frame.
    fn handle_text(&mut self, text: &str) {
        let mut raw: RawMessage = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("dropping undecodable frame: {e}");
                return;
            }
        };
        let session_id = raw.session_id.take();
        let Some(kind) = raw.classify() else {
            warn!("dropping frame that is neither response nor event");
            return;
        };
        match session_id {
            Some(session_id) => match self.sessions.get_mut(&session_id) {
                Some(entry) => entry.channel.handle_message(kind, &self.registry),
                None => {
                    debug!(session = %session_id, "dropping frame for unknown session");
                }
            },
            None => self.root.handle_message(kind, &self.registry),
        }
    }

    /// Allocate an id, register the awaiter, and put the frame on the
    /// wire. A write failure is fatal for the whole connection; the
    /// returned reason drives teardown, which also fails this command's
    /// freshly registered awaiter.
    async fn handle_execute(
        &mut self,
        session_id: Option<String>,
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<Value, CdpError>>,
    ) -> Result<(), String> {
        let channel = match &session_id {
            Some(sid) => match self.sessions.get_mut(sid) {
                Some(entry) => &mut entry.channel,
                None => {
                    let _ = reply.send(Err(CdpError::SessionClosed));
                    return Ok(());
                }
            },
            None => &mut self.root,
        };

        let id = channel.correlator.allocate();
        let envelope = CommandEnvelope {
            id,
            method,
            params,
            session_id,
        };
        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(CdpError::Internal(format!(
                    "command failed to serialize: {e}"
                ))));
                return Ok(());
            }
        };
        debug!(id, method = %envelope.method, session = ?envelope.session_id, "sending command");
        channel.correlator.register(
            id,
            PendingCommand {
                method: envelope.method,
                reply,
            },
        );

        self.ws
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| format!("write failed: {e}"))
    }

    fn handle_listen(
        &mut self,
        session_id: Option<String>,
        kinds: &[EventKind],
        listener: &EventListener,
        reply: oneshot::Sender<Result<(), CdpError>>,
    ) {
        let result = match &session_id {
            Some(sid) => match self.sessions.get_mut(sid) {
                Some(entry) => {
                    entry.channel.subscribe(kinds, listener);
                    Ok(())
                }
                None => Err(CdpError::SessionClosed),
            },
            None => {
                self.root.subscribe(kinds, listener);
                Ok(())
            }
        };
        let _ = reply.send(result);
    }

    /// Idempotent by session id: re-adding a known session yields the
    /// existing channel rather than a fresh one.
    fn handle_add_session(
        &mut self,
        session_id: String,
        target_id: &str,
        reply: oneshot::Sender<Arc<SessionShared>>,
    ) {
        let shared = match self.sessions.entry(session_id) {
            Entry::Occupied(entry) => Arc::clone(&entry.get().shared),
            Entry::Vacant(slot) => {
                info!(session = %slot.key(), target = %target_id, "session attached");
                let entry = slot.insert(SessionEntry {
                    channel: ChannelState::default(),
                    shared: Arc::new(SessionShared::default()),
                });
                Arc::clone(&entry.shared)
            }
        };
        let _ = reply.send(shared);
    }

    fn handle_remove_session(&mut self, session_id: &str) {
        if let Some(mut entry) = self.sessions.remove(session_id) {
            entry.shared.mark_closed();
            entry.channel.close(&CdpError::SessionClosed);
            info!(session = %session_id, "session removed");
        }
    }

    /// Orderly local close: sessions first, then the root channel, then
    /// the close handshake with code 1000, awaited until the peer side
    /// ends the stream.
    async fn shutdown(&mut self) {
        info!("closing connection");
        self.shared.mark_closed("closed by client", true);
        self.close_channels(
            &CdpError::connection_closed("closed by client"),
            &CdpError::SessionClosed,
        );

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            debug!("close handshake failed: {e}");
            return;
        }
        let drain = async {
            while let Some(frame) = self.ws.next().await {
                if frame.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("peer did not finish the close handshake in time");
        }
    }

    /// Transport-initiated close (peer close frame, I/O error, EOF, or
    /// a protocol violation). Sessions close first, failing their
    /// in-flight commands with [`CdpError::SessionClosed`]; the root
    /// channel's fail with the close reason.
    async fn teardown(&mut self, reason: &str) {
        info!(reason, "connection closed");
        self.shared.mark_closed(reason, false);
        self.close_channels(
            &CdpError::connection_closed(reason),
            &CdpError::SessionClosed,
        );
        let _ = self.ws.close(None).await;
    }

    fn close_channels(&mut self, root_error: &CdpError, session_error: &CdpError) {
        for (_, mut entry) in self.sessions.drain() {
            entry.shared.mark_closed();
            entry.channel.close(session_error);
        }
        self.root.close(root_error);
    }
}
