//! The command contract consumed from generated protocol bindings.
//!
//! A CDP command is a two-step exchange: build one request, parse one
//! result. [`Command`] captures that contract as a value with two
//! methods; the multiplexer never inspects params or results beyond
//! wrapping them in the wire envelope.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CdpError;

/// One CDP command: a request builder paired with a response parser.
///
/// Generated bindings implement this per protocol method. The
/// multiplexer calls `build_params` exactly once before sending and
/// `parse_response` exactly once with the `result` object of the
/// matching response frame. Error responses never reach
/// `parse_response`.
pub trait Command: Send {
    /// The typed value produced from a successful response.
    type Response;

    /// The qualified protocol method, e.g. `"Page.navigate"`.
    fn method(&self) -> &str;

    /// Serialize the command's parameters. `None` omits the `params`
    /// field from the outgoing frame entirely.
    ///
    /// # Errors
    ///
    /// Returns [`CdpError::Internal`] when the parameters cannot be
    /// serialized; that is a bindings bug, not a protocol condition.
    fn build_params(&self) -> Result<Option<Value>, CdpError>;

    /// Parse the raw `result` object into the typed response.
    ///
    /// # Errors
    ///
    /// Returns [`CdpError::Internal`] when the result does not match
    /// the expected shape.
    fn parse_response(&self, result: Value) -> Result<Self::Response, CdpError>;
}

/// Serialize a bindings type into a params object.
///
/// # Errors
///
/// Returns [`CdpError::Internal`] on serialization failure.
pub fn params_json<T: Serialize>(params: &T) -> Result<Option<Value>, CdpError> {
    serde_json::to_value(params)
        .map(Some)
        .map_err(|e| CdpError::Internal(format!("command params failed to serialize: {e}")))
}

/// Deserialize a raw result object into a bindings type.
///
/// # Errors
///
/// Returns [`CdpError::Internal`] on deserialization failure.
pub fn response_json<T: DeserializeOwned>(result: Value) -> Result<T, CdpError> {
    serde_json::from_value(result)
        .map_err(|e| CdpError::Internal(format!("command result failed to parse: {e}")))
}

/// An untyped command: dynamic method name, raw JSON params, raw JSON
/// result. The escape hatch for methods without generated bindings.
#[derive(Debug, Clone)]
pub struct RawCommand {
    method: String,
    params: Option<Value>,
}

impl RawCommand {
    /// Create a command with no parameters.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    /// Attach a params object to the command.
    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

impl Command for RawCommand {
    type Response = Value;

    fn method(&self) -> &str {
        &self.method
    }

    fn build_params(&self) -> Result<Option<Value>, CdpError> {
        Ok(self.params.clone())
    }

    fn parse_response(&self, result: Value) -> Result<Value, CdpError> {
        Ok(result)
    }
}

/// The one generated-style command the multiplexer itself needs:
/// `Target.attachToTarget` in flat session mode.
pub mod commands {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use super::{Command, params_json, response_json};
    use crate::error::CdpError;

    /// `Target.attachToTarget` with `flatten: true`, yielding the
    /// session id used to multiplex the new target over the shared
    /// transport.
    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AttachToTarget {
        pub target_id: String,
        pub flatten: bool,
    }

    impl AttachToTarget {
        /// Attach to `target_id` in flat mode.
        #[must_use]
        pub fn flat(target_id: impl Into<String>) -> Self {
            Self {
                target_id: target_id.into(),
                flatten: true,
            }
        }
    }

    /// Response to [`AttachToTarget`].
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AttachToTargetResponse {
        pub session_id: String,
    }

    impl Command for AttachToTarget {
        type Response = AttachToTargetResponse;

        fn method(&self) -> &str {
            "Target.attachToTarget"
        }

        fn build_params(&self) -> Result<Option<Value>, CdpError> {
            params_json(self)
        }

        fn parse_response(&self, result: Value) -> Result<Self::Response, CdpError> {
            response_json(result)
        }
    }
}
