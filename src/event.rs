//! Event kinds, decoded events, and the method registry.
//!
//! Decoding is driven by an explicit [`EventRegistry`] injected at
//! connect time; there is no process-global event table. Methods
//! without a registered kind decode to the [`EventKind::Unknown`]
//! sentinel with their raw method and params preserved, and callers
//! must match on the kind before touching the payload.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CdpError;

/// The class token of a decoded event. Listeners subscribe per kind;
/// two events reach the same subscribers iff their kinds are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A registered protocol event, identified by its qualified method
    /// name (e.g. `"Page.loadEventFired"`).
    Event(Cow<'static, str>),
    /// Sentinel kind for events whose method is not in the registry.
    Unknown,
}

impl EventKind {
    /// Kind token for a protocol method.
    #[must_use]
    pub fn event(method: impl Into<Cow<'static, str>>) -> Self {
        Self::Event(method.into())
    }
}

/// A decoded event as delivered to listeners.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    kind: EventKind,
    method: String,
    params: Value,
}

impl DecodedEvent {
    /// The routing kind. [`EventKind::Unknown`] means the method was
    /// not registered and `params` should be treated as raw JSON.
    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// The raw protocol method, also for unknown events.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw event parameters.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Consume the event, yielding its parameters.
    #[must_use]
    pub fn into_params(self) -> Value {
        self.params
    }

    /// Deserialize the parameters into a bindings type.
    ///
    /// # Errors
    ///
    /// Returns [`CdpError::Internal`] when the params do not match the
    /// expected shape.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CdpError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| CdpError::Internal(format!("event params failed to parse: {e}")))
    }
}

/// The set of event methods the client decodes to stable kinds.
///
/// Built at startup (normally by generated bindings) and handed to the
/// connection through [`CdpConfig`](crate::CdpConfig). An empty
/// registry is valid: every event then arrives with the unknown
/// sentinel kind.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    known: HashSet<Cow<'static, str>>,
}

impl EventRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method so its events decode with a stable kind.
    pub fn register(&mut self, method: impl Into<Cow<'static, str>>) -> &mut Self {
        self.known.insert(method.into());
        self
    }

    /// Build a registry from a list of methods.
    #[must_use]
    pub fn with_events<I, M>(methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Cow<'static, str>>,
    {
        let mut registry = Self::new();
        for method in methods {
            registry.register(method);
        }
        registry
    }

    /// Whether `method` has a registered kind.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.known.contains(method)
    }

    /// Decode an event frame into a routed event.
    #[must_use]
    pub fn decode(&self, method: String, params: Value) -> DecodedEvent {
        let kind = match self.known.get(method.as_str()) {
            Some(known) => EventKind::Event(known.clone()),
            None => EventKind::Unknown,
        };
        DecodedEvent {
            kind,
            method,
            params,
        }
    }
}
