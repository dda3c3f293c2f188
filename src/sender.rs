//! Producing half of a dispatcher.

use crate::error::{DispatchError, Result};
use crate::event::{Args, Event, Frame};
use crate::Transmit;

/// Fires events onto a transport queue and eventually closes it.
///
/// A sender may be moved to another thread or, with the socket transport, to
/// another process. Events fired by one sender reach the receiver in the order
/// they were fired.
pub struct Sender {
    tx: Box<dyn Transmit>,
    closed: bool,
}

impl Sender {
    pub fn new(tx: Box<dyn Transmit>) -> Self {
        Self { tx, closed: false }
    }

    /// Encodes an event and enqueues it.
    ///
    /// Arguments are validated before anything is enqueued, so a rejected
    /// event leaves the queue untouched.
    pub fn fire(&mut self, event: impl Into<String>, args: Args) -> Result<()> {
        if self.closed {
            return Err(DispatchError::DispatcherClosed);
        }
        let event = Event::new(event, args)?;
        let frame = Frame::Event(event).encode()?;
        self.tx.send(&frame)?;
        Ok(())
    }

    /// Enqueues the close marker. A sender can only be closed once; further
    /// calls return [`DispatchError::AlreadyClosed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(DispatchError::AlreadyClosed);
        }
        self.tx.send(&Frame::Close.encode()?)?;
        self.closed = true;
        tracing::debug!("dispatcher sender closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Creates another sender onto the same queue. The clone has its own
    /// closed flag; frames from the two senders may interleave.
    ///
    /// On the socket transport clones share their process's writer, so hand
    /// only one of them to another process.
    pub fn try_clone(&self) -> Result<Self> {
        if self.closed {
            return Err(DispatchError::DispatcherClosed);
        }
        Ok(Self::new(self.tx.try_clone()?))
    }
}

#[cfg(unix)]
mod handoff {
    use std::os::fd::OwnedFd;
    use std::process::Stdio;

    use super::Sender;
    use crate::error::{DispatchError, Result};
    use crate::socket::{self, SocketTx};

    impl Sender {
        /// Releases the socket handle so it can be passed to another process.
        /// Waits until events already fired have been written to the socket.
        pub fn into_owned_fd(self) -> Result<OwnedFd> {
            if self.closed {
                return Err(DispatchError::DispatcherClosed);
            }
            Ok(self.tx.into_owned_fd()?)
        }

        /// Rebuilds a sender from a handle produced by
        /// [`into_owned_fd`](Sender::into_owned_fd).
        ///
        /// `max_frame_len` must match the receiving side's
        /// [`ReceiverConfig::max_frame_len`](crate::ReceiverConfig). Oversized
        /// events are then refused by `fire` instead of breaking the receiver.
        pub fn from_owned_fd(fd: OwnedFd, max_frame_len: usize) -> Result<Self> {
            Ok(Self::new(Box::new(SocketTx::from_owned_fd(fd, max_frame_len)?)))
        }

        /// Turns the sender into a child process's stdin.
        pub fn into_stdio(self) -> Result<Stdio> {
            Ok(Stdio::from(self.into_owned_fd()?))
        }

        /// Rebuilds the sender a parent passed as this process's stdin.
        pub fn from_stdin(max_frame_len: usize) -> Result<Self> {
            Self::from_owned_fd(socket::stdin_fd()?, max_frame_len)
        }
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
