//! Signal types exchanged between the dispatch loop and its collaborators.
//!
//! A signal is an immutable record of `{kind, source, payload}`. The kind is
//! the dispatch key: handlers are matched on exact kind equality, there is no
//! hierarchy between kinds.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a signal originator (a screen, an input handler...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocates a process-unique source id.
    pub fn fresh() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Identity of a single input request owned by the input coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// Dispatch key of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Carries a captured failure. Re-raised on the loop thread when no
    /// handler is registered for it.
    Exception,
    /// Emitted by an input worker thread once its blocking read finished.
    InputReceived,
    /// Emitted by the input coordinator towards the original requester.
    InputReady,
    /// Collaborator-defined kind.
    Custom(&'static str),
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Exception => f.write_str("exception"),
            SignalKind::InputReceived => f.write_str("input-received"),
            SignalKind::InputReady => f.write_str("input-ready"),
            SignalKind::Custom(name) => f.write_str(name),
        }
    }
}

/// A failure captured on one thread and shared with the loop thread.
///
/// Displays as the wrapped failure and exposes the wrapped failure's own
/// cause chain through [`Error::source`], so `{:#}` on an `anyhow::Error`
/// built from it prints the original chain.
#[derive(Clone)]
pub struct SharedFailure(Arc<dyn Error + Send + Sync + 'static>);

impl SharedFailure {
    /// Captures an `anyhow::Error`, keeping its context chain.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let boxed: Box<dyn Error + Send + Sync + 'static> = err.into();
        Self(Arc::from(boxed))
    }
}

impl fmt::Debug for SharedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl Error for SharedFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// Result of a background input acquisition.
#[derive(Debug, Clone)]
pub enum InputOutcome {
    Value(String),
    Failed(SharedFailure),
}

/// Payload of an `InputReceived` signal.
#[derive(Debug, Clone)]
pub struct InputPayload {
    pub request: RequestId,
    pub outcome: InputOutcome,
}

/// Typed signal payload.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Failure(SharedFailure),
    Input(InputPayload),
    /// Collaborator-defined data, downcast by the receiving handler.
    Data(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Payload::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
            Payload::Input(input) => f.debug_tuple("Input").field(input).finish(),
            Payload::Data(_) => f.write_str("Data(..)"),
        }
    }
}

/// Immutable event record dispatched by the loop.
#[derive(Debug, Clone)]
pub struct Signal {
    kind: SignalKind,
    source: Option<SourceId>,
    payload: Payload,
    priority: i32,
}

impl Signal {
    pub fn new(kind: SignalKind, source: Option<SourceId>) -> Self {
        Self {
            kind,
            source,
            payload: Payload::Empty,
            priority: 0,
        }
    }

    /// Shorthand for a collaborator-defined signal from `source`.
    pub fn custom(name: &'static str, source: SourceId) -> Self {
        Self::new(SignalKind::Custom(name), Some(source))
    }

    /// Builds an `Exception` signal carrying `err`.
    pub fn exception(source: Option<SourceId>, err: anyhow::Error) -> Self {
        Self::new(SignalKind::Exception, source)
            .with_payload(Payload::Failure(SharedFailure::from_anyhow(err)))
    }

    /// Builds the `InputReady` signal addressed to `source`.
    pub fn input_ready(source: SourceId, value: String) -> Self {
        Self::new(SignalKind::InputReady, Some(source)).with_payload(Payload::Text(value))
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Lower values are dispatched first; equal priorities keep FIFO order.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn source(&self) -> Option<SourceId> {
        self.source
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Text payload, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Downcasts a [`Payload::Data`] payload.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Data(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }
}
