//! Error taxonomy for firing, transport and dispatch.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Every failure surfaced by a [`Sender`](crate::Sender) or [`Receiver`](crate::Receiver).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("event name must not be empty")]
    InvalidEventName,

    /// An argument cannot be carried across the process boundary.
    /// Raised by `fire` before anything is enqueued.
    #[error("unsupported argument type for {argument}: {reason}")]
    UnsupportedArgumentType { argument: String, reason: String },

    /// `fire` was called on a sender that has already been closed.
    #[error("dispatcher sender is closed")]
    DispatcherClosed,

    /// A second `close`, or a receive operation after the close marker was consumed.
    #[error("dispatcher is already closed")]
    AlreadyClosed,

    #[error(transparent)]
    HandlerInvocation(#[from] HandlerInvocationError),

    /// The underlying channel is broken. Fatal to the affected endpoint.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub(crate) fn unsupported(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        DispatchError::UnsupportedArgumentType {
            argument: argument.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of the channel carrying frames between processes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every peer endpoint went away without sending a close marker.
    #[error("transport disconnected")]
    Disconnected,

    #[error("failed to encode frame: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// A registered handler could not be invoked, or returned an error.
#[derive(Debug, Error)]
#[error("handler #{handler} for event {event:?} failed: {kind}")]
pub struct HandlerInvocationError {
    pub event: String,
    /// Position of the handler in registration order for this event.
    pub handler: usize,
    pub kind: InvocationErrorKind,
}

#[derive(Debug, Error)]
pub enum InvocationErrorKind {
    #[error("missing required argument {0:?}")]
    MissingArgument(String),

    #[error("takes {expected} positional arguments but {given} were given")]
    TooManyPositional { expected: usize, given: usize },

    #[error("got an unexpected keyword argument {0:?}")]
    UnexpectedKeyword(String),

    #[error("got multiple values for argument {0:?}")]
    MultipleValues(String),

    #[error("{0:#}")]
    Failed(anyhow::Error),
}
