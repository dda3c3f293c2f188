//! Cross-process signal dispatcher.
//!
//! A [`Dispatcher`] creates a transport queue and a linked [`Sender`] /
//! [`Receiver`] pair. The sender fires named events with positional and
//! keyword arguments; the receiver, usually living in another process, owns a
//! registry of handlers and dispatches every event it dequeues to the handlers
//! connected under that event's name. [`Sender::close`] enqueues a terminal
//! marker that ends the receiver's consumption loops.
//!
//! ```
//! use mpdispatch::{Args, Dispatcher};
//! use std::sync::{Arc, Mutex};
//!
//! let (mut sender, mut receiver) = Dispatcher::in_memory().into_parts();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! receiver.connect_any("greet", move |call| {
//!     sink.lock().unwrap().push(call.arg(0).cloned());
//!     Ok(())
//! });
//!
//! sender.fire("greet", Args::new().arg("Alice")).unwrap();
//! sender.close().unwrap();
//! receiver.handle_until_closed().unwrap();
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod memory;
pub mod receiver;
pub mod registry;
pub mod sender;
#[cfg(unix)]
pub mod socket;
pub mod value;

use std::time::Duration;

pub use config::{ErrorPolicy, ReceiverConfig};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, HandlerInvocationError, InvocationErrorKind, TransportError};
pub use event::{Args, Event};
pub use receiver::{LoopSummary, Receiver, Step};
pub use registry::{BoundArgs, Signature};
pub use sender::Sender;
pub use value::Value;

/// Producing end of a transport queue.
///
/// Each call carries one complete encoded frame. Implementations must keep
/// frames from a single endpoint in FIFO order and must never split or merge
/// them. Frames from different endpoints may interleave.
pub trait Transmit: Send {
    /// Enqueues one frame. May block while a bounded backend is full.
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Creates another producing endpoint onto the same queue.
    fn try_clone(&self) -> Result<Box<dyn Transmit>, TransportError>;

    /// Releases the OS handle backing this endpoint so it can be passed to
    /// another process.
    #[cfg(unix)]
    fn into_owned_fd(self: Box<Self>) -> Result<std::os::fd::OwnedFd, TransportError> {
        Err(unsupported_handoff())
    }
}

/// Consuming end of a transport queue.
///
/// Only one consumer may drain a queue. A backend whose every producer is
/// gone reports [`TransportError::Disconnected`] once its buffered frames are
/// exhausted.
pub trait Receive: Send {
    /// Receives the next frame, blocking until one is available.
    fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Like [`recv`](Receive::recv) but gives up after `timeout`.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Returns the next frame if one is already queued, without blocking.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    #[cfg(unix)]
    fn into_owned_fd(self: Box<Self>) -> Result<std::os::fd::OwnedFd, TransportError> {
        Err(unsupported_handoff())
    }
}

#[cfg(unix)]
fn unsupported_handoff() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "transport endpoint has no OS handle",
    ))
}
