//! Public connection and session handles.
//!
//! `CdpConnection` owns the transport (through the multiplexer task it
//! spawned); `CdpSession` shares it and lives strictly within the
//! connection's lifetime. Both expose the same channel surface:
//! `execute`, `listen`, `wait_for`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::command::{Command, commands::AttachToTarget};
use crate::discovery;
use crate::error::CdpError;
use crate::event::{DecodedEvent, EventKind, EventRegistry};
use crate::listener::{EventStream, listener_channel};
use crate::transport::{ConnShared, MuxCommand, SessionShared, spawn_multiplexer};

/// Default capacity of a listener's event queue.
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// How many times a refused WebSocket dial is retried (default: 10).
    pub connect_retries: u32,
    /// Spacing between dial attempts (default: 1s).
    pub retry_delay: Duration,
    /// Capacity of the multiplexer's command mailbox (default: 256).
    pub mailbox_capacity: usize,
    /// Event methods that decode to stable kinds; everything else
    /// arrives under [`EventKind::Unknown`].
    pub registry: EventRegistry,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            connect_retries: 10,
            retry_delay: Duration::from_secs(1),
            mailbox_capacity: 256,
            registry: EventRegistry::new(),
        }
    }
}

/// The shared channel surface behind both connection and session
/// handles: a mailbox to the multiplexer plus the closed-state flags
/// consulted before anything is written.
#[derive(Debug, Clone)]
struct ChannelHandle {
    cmd_tx: mpsc::Sender<MuxCommand>,
    conn: Arc<ConnShared>,
    session: Option<Arc<SessionRef>>,
}

#[derive(Debug)]
struct SessionRef {
    id: String,
    target_id: String,
    shared: Arc<SessionShared>,
}

impl ChannelHandle {
    /// The closed check at the start of every operation: nothing is
    /// allocated or written once the transport (or this session) is
    /// gone.
    fn ensure_open(&self) -> Result<(), CdpError> {
        if self.conn.is_closed() {
            return Err(self.conn.closed_error());
        }
        if let Some(session) = &self.session {
            if session.shared.is_closed() {
                return Err(CdpError::SessionClosed);
            }
        }
        Ok(())
    }

    /// The error matching why this channel can no longer be used.
    fn closed_error(&self) -> CdpError {
        match &self.session {
            Some(session) if session.shared.is_closed() && !self.conn.is_closed() => {
                CdpError::SessionClosed
            }
            _ => self.conn.closed_error(),
        }
    }

    async fn send(&self, cmd: MuxCommand) -> Result<(), CdpError> {
        self.cmd_tx.send(cmd).await.map_err(|_| self.closed_error())
    }

    async fn execute<C: Command>(&self, cmd: C) -> Result<C::Response, CdpError> {
        self.ensure_open()?;
        let params = cmd.build_params()?;
        let (reply, response) = oneshot::channel();
        self.send(MuxCommand::Execute {
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            method: cmd.method().to_owned(),
            params,
            reply,
        })
        .await?;
        let result = response.await.map_err(|_| self.closed_error())??;
        cmd.parse_response(result)
    }

    async fn listen(&self, kinds: &[EventKind], buffer_size: usize) -> Result<EventStream, CdpError> {
        self.ensure_open()?;
        let (listener, stream) = listener_channel(buffer_size);
        let (reply, registered) = oneshot::channel();
        self.send(MuxCommand::Listen {
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            kinds: kinds.to_vec(),
            listener,
            reply,
        })
        .await?;
        registered.await.map_err(|_| self.closed_error())??;
        Ok(stream)
    }

    async fn wait_for(&self, kind: EventKind, buffer_size: usize) -> Result<EventWaiter, CdpError> {
        let stream = self.listen(std::slice::from_ref(&kind), buffer_size).await?;
        Ok(EventWaiter {
            stream,
            handle: self.clone(),
        })
    }
}

/// A one-shot event scope: subscribed at creation so the event cannot
/// be missed, resolved by [`wait`](Self::wait), closed afterwards.
#[derive(Debug)]
pub struct EventWaiter {
    stream: EventStream,
    handle: ChannelHandle,
}

impl EventWaiter {
    /// Take the first matching event.
    ///
    /// # Errors
    ///
    /// Returns the channel's closed error when the subscription
    /// terminates before an event arrives.
    pub async fn wait(mut self) -> Result<DecodedEvent, CdpError> {
        match self.stream.next().await {
            Some(event) => Ok(event),
            None => Err(self.handle.closed_error()),
        }
    }
}

/// A connection to a browser's debugging endpoint, multiplexing any
/// number of flat sessions over one WebSocket.
#[derive(Debug)]
pub struct CdpConnection {
    handle: ChannelHandle,
    ws_url: String,
}

impl CdpConnection {
    /// Resolve `url` (HTTP debugging endpoint or direct WebSocket URL),
    /// dial it, and spawn the multiplexer.
    ///
    /// A refused dial is retried `config.connect_retries` times spaced
    /// `config.retry_delay` apart; any other failure is immediate.
    ///
    /// # Errors
    ///
    /// [`CdpError::InvalidUrl`] for unsupported schemes,
    /// [`CdpError::Http`] when the bootstrap request fails, and
    /// [`CdpError::Transport`] when the WebSocket cannot be
    /// established.
    pub async fn connect(url: &str, config: CdpConfig) -> Result<Self, CdpError> {
        let ws_url = discovery::resolve_ws_url(url).await?;
        let ws = discovery::dial(&ws_url, config.connect_retries, config.retry_delay).await?;
        let shared = Arc::new(ConnShared::default());
        let cmd_tx = spawn_multiplexer(
            ws,
            config.registry,
            Arc::clone(&shared),
            config.mailbox_capacity,
        );
        info!(url = %ws_url, "connected");
        Ok(Self {
            handle: ChannelHandle {
                cmd_tx,
                conn: shared,
                session: None,
            },
            ws_url,
        })
    }

    /// Execute a command on the browser-level channel.
    ///
    /// # Errors
    ///
    /// [`CdpError::Browser`] when the browser rejects the command,
    /// [`CdpError::ConnectionClosed`] when the transport is (or goes)
    /// away, [`CdpError::Internal`] on bindings misbehavior.
    pub async fn execute<C: Command>(&self, cmd: C) -> Result<C::Response, CdpError> {
        self.handle.execute(cmd).await
    }

    /// Subscribe to events of the given kinds with a bounded buffer.
    ///
    /// The subscription is owned by the connection; the returned stream
    /// is the only way to read it, and dropping the stream ends the
    /// subscription.
    ///
    /// # Errors
    ///
    /// Fails with the channel's closed error once the connection is
    /// closed.
    pub async fn listen(
        &self,
        kinds: &[EventKind],
        buffer_size: usize,
    ) -> Result<EventStream, CdpError> {
        self.handle.listen(kinds, buffer_size).await
    }

    /// [`listen`](Self::listen) with the default buffer size.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_default(&self, kinds: &[EventKind]) -> Result<EventStream, CdpError> {
        self.handle.listen(kinds, DEFAULT_EVENT_BUFFER).await
    }

    /// Subscribe now, take one event later.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn wait_for(&self, kind: EventKind) -> Result<EventWaiter, CdpError> {
        self.handle.wait_for(kind, DEFAULT_EVENT_BUFFER).await
    }

    /// Register a session by id, as announced by the browser (e.g. via
    /// `Target.attachedToTarget`). Adding an id twice yields a handle
    /// to the same session.
    ///
    /// # Errors
    ///
    /// Fails with the connection's closed error once the connection is
    /// closed.
    pub async fn add_session(
        &self,
        session_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Result<CdpSession, CdpError> {
        self.handle.ensure_open()?;
        let session_id = session_id.into();
        let target_id = target_id.into();
        let (reply, registered) = oneshot::channel();
        self.handle
            .send(MuxCommand::AddSession {
                session_id: session_id.clone(),
                target_id: target_id.clone(),
                reply,
            })
            .await?;
        let shared = registered.await.map_err(|_| self.handle.closed_error())?;
        let session = Arc::new(SessionRef {
            id: session_id,
            target_id,
            shared,
        });
        Ok(CdpSession {
            handle: ChannelHandle {
                cmd_tx: self.handle.cmd_tx.clone(),
                conn: Arc::clone(&self.handle.conn),
                session: Some(Arc::clone(&session)),
            },
            session,
        })
    }

    /// Attach to a target and return a session for it. Attaching the
    /// same target twice yields two distinct sessions.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`execute`](Self::execute).
    pub async fn connect_session(&self, target_id: &str) -> Result<CdpSession, CdpError> {
        let attached = self.execute(AttachToTarget::flat(target_id)).await?;
        self.add_session(attached.session_id, target_id).await
    }

    /// Detach a session: pending commands on it fail with
    /// [`CdpError::SessionClosed`] and its event streams terminate.
    /// Removing an unknown (or already removed) session is a no-op, as
    /// is removing anything once the connection is closed.
    pub async fn remove_session(&self, session_id: &str) {
        let (reply, removed) = oneshot::channel();
        let sent = self
            .handle
            .send(MuxCommand::RemoveSession {
                session_id: session_id.to_owned(),
                reply,
            })
            .await;
        if sent.is_ok() {
            let _ = removed.await;
        }
    }

    /// Close the connection: every session closes first (failing its
    /// in-flight commands with [`CdpError::SessionClosed`]), then the
    /// root channel, then the WebSocket close handshake runs to
    /// completion. Closing an already-dead connection is a no-op.
    pub async fn close(&self) {
        let (reply, closed) = oneshot::channel();
        if self
            .handle
            .cmd_tx
            .send(MuxCommand::Close { reply })
            .await
            .is_ok()
        {
            let _ = closed.await;
        }
    }

    /// Whether the transport is closed, locally or by the peer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.conn.is_closed()
    }

    /// True iff the local side initiated an orderly close (code 1000).
    /// Peer-initiated and abnormal closures report `false`.
    #[must_use]
    pub fn had_normal_closure(&self) -> bool {
        self.handle.conn.had_normal_closure()
    }

    /// The resolved WebSocket URL this connection dialed.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.ws_url
    }
}

/// A logical attachment to one target, sharing the connection's
/// transport. Cheap to clone; all clones address the same session.
#[derive(Debug, Clone)]
pub struct CdpSession {
    handle: ChannelHandle,
    session: Arc<SessionRef>,
}

impl CdpSession {
    /// Execute a command within this session.
    ///
    /// # Errors
    ///
    /// As [`CdpConnection::execute`], plus [`CdpError::SessionClosed`]
    /// once the session has been removed.
    pub async fn execute<C: Command>(&self, cmd: C) -> Result<C::Response, CdpError> {
        self.handle.execute(cmd).await
    }

    /// Subscribe to events routed to this session.
    ///
    /// # Errors
    ///
    /// See [`CdpConnection::listen`].
    pub async fn listen(
        &self,
        kinds: &[EventKind],
        buffer_size: usize,
    ) -> Result<EventStream, CdpError> {
        self.handle.listen(kinds, buffer_size).await
    }

    /// [`listen`](Self::listen) with the default buffer size.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_default(&self, kinds: &[EventKind]) -> Result<EventStream, CdpError> {
        self.handle.listen(kinds, DEFAULT_EVENT_BUFFER).await
    }

    /// Subscribe now, take one event later.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn wait_for(&self, kind: EventKind) -> Result<EventWaiter, CdpError> {
        self.handle.wait_for(kind, DEFAULT_EVENT_BUFFER).await
    }

    /// The browser-issued session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// The target this session is attached to.
    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.session.target_id
    }

    /// Whether this session (or the whole connection) is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.ensure_open().is_err()
    }
}
