//! In-process transport backed by an unbounded channel.
//!
//! Useful when sender and receiver live on different threads or tasks of the
//! same process. Endpoints cannot be handed to another process.

use std::time::Duration;

use flume::{RecvTimeoutError, TryRecvError};

use crate::{Receive, Transmit, TransportError};

/// Creates a linked pair of in-memory endpoints.
pub fn queue() -> (MemoryTx, MemoryRx) {
    let (tx, rx) = flume::unbounded();
    tracing::debug!("in-memory transport queue created");
    (MemoryTx { tx }, MemoryRx { rx })
}

#[derive(Debug, Clone)]
pub struct MemoryTx {
    tx: flume::Sender<Vec<u8>>,
}

impl Transmit for MemoryTx {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    fn try_clone(&self) -> Result<Box<dyn Transmit>, TransportError> {
        Ok(Box::new(self.clone()))
    }
}

#[derive(Debug)]
pub struct MemoryRx {
    rx: flume::Receiver<Vec<u8>>,
}

impl Receive for MemoryRx {
    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv().map_err(|_| TransportError::Disconnected)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}
