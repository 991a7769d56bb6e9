//! Async client for the Chrome DevTools Protocol.
//!
//! One WebSocket carries everything: commands are correlated to
//! responses by id, events fan out to bounded per-subscription queues,
//! and any number of flat target sessions are demultiplexed by
//! `sessionId`. Protocol bindings stay outside the crate; commands
//! implement [`Command`] and events decode through an injected
//! [`EventRegistry`].
//!
//! ```no_run
//! use cdp_client::{RawCommand, connect_cdp};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), cdp_client::CdpError> {
//! let conn = connect_cdp("http://127.0.0.1:9222").await?;
//! let session = conn.connect_session("TARGET-ID").await?;
//! let result = session
//!     .execute(RawCommand::new("Page.navigate").params(json!({"url": "about:blank"})))
//!     .await?;
//! println!("navigated: {result}");
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

mod channel;
mod command;
mod connection;
mod correlator;
pub mod discovery;
mod error;
mod event;
mod listener;
mod router;
mod transport;
mod types;

pub use command::{Command, RawCommand, commands, params_json, response_json};
pub use connection::{
    CdpConfig, CdpConnection, CdpSession, DEFAULT_EVENT_BUFFER, EventWaiter,
};
pub use error::CdpError;
pub use event::{DecodedEvent, EventKind, EventRegistry};
pub use listener::EventStream;

/// Connect to a debugging endpoint with default settings.
///
/// Accepts an `http://` debugging URL (resolved via `/json/version`) or
/// a direct `ws://` URL.
///
/// # Errors
///
/// See [`CdpConnection::connect`].
pub async fn connect_cdp(url: &str) -> Result<CdpConnection, CdpError> {
    CdpConnection::connect(url, CdpConfig::default()).await
}
