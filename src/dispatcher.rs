//! Composition root pairing one sender and one receiver over one queue.

use crate::config::ReceiverConfig;
use crate::memory;
use crate::receiver::Receiver;
use crate::sender::Sender;

/// Owns a freshly created transport queue and its two ends.
///
/// After construction the dispatcher is only a container: take the halves out
/// with [`into_parts`](Dispatcher::into_parts) and hand them to the threads or
/// processes that will use them.
#[derive(Debug)]
pub struct Dispatcher {
    sender: Sender,
    receiver: Receiver,
}

impl Dispatcher {
    /// Creates a dispatcher over a Unix socket pair whose ends can be passed
    /// to child processes. Fired frames are buffered in memory until the
    /// socket accepts them, so the queue is unbounded like the in-memory one.
    #[cfg(unix)]
    pub fn new() -> crate::error::Result<Self> {
        Self::with_config(ReceiverConfig::default())
    }

    #[cfg(unix)]
    pub fn with_config(config: ReceiverConfig) -> crate::error::Result<Self> {
        let (tx, rx) = crate::socket::queue(config.max_frame_len)?;
        Ok(Self {
            sender: Sender::new(Box::new(tx)),
            receiver: Receiver::new(Box::new(rx), config),
        })
    }

    /// Creates a dispatcher over an unbounded in-process channel. Both halves
    /// must stay in this process.
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(ReceiverConfig::default())
    }

    pub fn in_memory_with_config(config: ReceiverConfig) -> Self {
        let (tx, rx) = memory::queue();
        Self {
            sender: Sender::new(Box::new(tx)),
            receiver: Receiver::new(Box::new(rx), config),
        }
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn into_parts(self) -> (Sender, Receiver) {
        (self.sender, self.receiver)
    }
}
