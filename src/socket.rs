//! Cross-process transport over a connected Unix socket pair.
//!
//! Frames are written as a 4-byte big-endian length followed by the payload.
//! Endpoints are plain file descriptors, so they can be handed to a child
//! process, most conveniently as its stdin.
//!
//! The producing side never writes to the socket directly. Frames go into an
//! unbounded in-process buffer that a feeder thread drains onto the stream,
//! so `send` does not block on a full kernel buffer. The feeder is the only
//! writer in its process and writes whole frames, which keeps clones sharing
//! it from interleaving. Independent writers in different processes are not
//! coordinated, so a socket queue supports one producing process at a time.

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::MAX_FRAME_LEN_LIMIT;
use crate::{Receive, Transmit, TransportError};

const LEN_PREFIX: usize = 4;
const READ_CHUNK: usize = 8 * 1024;

/// Creates a linked pair of socket endpoints.
pub fn queue(max_frame_len: usize) -> Result<(SocketTx, SocketRx), TransportError> {
    let (tx, rx) = UnixStream::pair()?;
    // One-directional: frames only flow from tx to rx.
    tx.shutdown(std::net::Shutdown::Read)?;
    rx.shutdown(std::net::Shutdown::Write)?;
    tracing::debug!(max_frame_len, "socket transport queue created");
    Ok((
        SocketTx::new(tx, max_frame_len)?,
        SocketRx::new(rx, max_frame_len),
    ))
}

/// Duplicates this process's stdin into an owned descriptor.
pub fn stdin_fd() -> Result<OwnedFd, TransportError> {
    Ok(io::stdin().as_fd().try_clone_to_owned()?)
}

enum Job {
    Frame(Vec<u8>),
    Flush(flume::Sender<()>),
}

/// Owns the writing end of the stream and the thread that drains the buffer
/// onto it. Dropping the last handle waits until every buffered frame has
/// been written or the reading end has gone away.
#[derive(Debug)]
struct Feeder {
    jobs: Option<flume::Sender<Job>>,
    writer: Option<JoinHandle<()>>,
    stream: UnixStream,
    failed: Arc<AtomicBool>,
}

impl Feeder {
    fn spawn(stream: UnixStream) -> Result<Self, TransportError> {
        let handle = stream.try_clone()?;
        let (jobs, queued) = flume::unbounded();
        let failed = Arc::new(AtomicBool::new(false));
        let writer = thread::Builder::new()
            .name("mpdispatch-feeder".into())
            .spawn({
                let failed = Arc::clone(&failed);
                move || feed(stream, queued, &failed)
            })?;
        Ok(Self {
            jobs: Some(jobs),
            writer: Some(writer),
            stream: handle,
            failed,
        })
    }

    fn push(&self, job: Job) -> Result<(), TransportError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        self.jobs
            .as_ref()
            .ok_or(TransportError::Disconnected)?
            .send(job)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Blocks until every frame pushed so far has been written.
    fn flush(&self) -> Result<(), TransportError> {
        let (done, written) = flume::bounded(1);
        self.push(Job::Flush(done))?;
        written.recv().map_err(|_| TransportError::Disconnected)
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

fn feed(mut stream: UnixStream, queued: flume::Receiver<Job>, failed: &AtomicBool) {
    for job in queued.iter() {
        match job {
            Job::Frame(buf) => {
                if let Err(e) = stream.write_all(&buf) {
                    let e = map_io(e);
                    tracing::error!(error = %e, "socket feeder stopped");
                    failed.store(true, Ordering::Release);
                    return;
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Producing socket endpoint. Clones within a process share one feeder, so
/// their frames never interleave mid-frame.
#[derive(Debug, Clone)]
pub struct SocketTx {
    feeder: Arc<Feeder>,
    max_frame_len: usize,
}

impl SocketTx {
    pub fn new(stream: UnixStream, max_frame_len: usize) -> Result<Self, TransportError> {
        Ok(Self {
            feeder: Arc::new(Feeder::spawn(stream)?),
            max_frame_len: max_frame_len.min(MAX_FRAME_LEN_LIMIT),
        })
    }

    pub fn from_owned_fd(fd: OwnedFd, max_frame_len: usize) -> Result<Self, TransportError> {
        Self::new(UnixStream::from(fd), max_frame_len)
    }

    /// Waits until every frame sent so far has been written to the socket.
    pub fn flush(&self) -> Result<(), TransportError> {
        self.feeder.flush()
    }
}

impl Transmit for SocketTx {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let len = u32::try_from(frame.len())
            .ok()
            .filter(|_| frame.len() <= self.max_frame_len)
            .ok_or(TransportError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_len,
            })?;
        let mut buf = Vec::with_capacity(LEN_PREFIX + frame.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(frame);
        self.feeder.push(Job::Frame(buf))
    }

    fn try_clone(&self) -> Result<Box<dyn Transmit>, TransportError> {
        Ok(Box::new(self.clone()))
    }

    fn into_owned_fd(self: Box<Self>) -> Result<OwnedFd, TransportError> {
        self.feeder.flush()?;
        Ok(OwnedFd::from(self.feeder.stream.try_clone()?))
    }
}

/// Consuming socket endpoint with its own reassembly buffer.
#[derive(Debug)]
pub struct SocketRx {
    stream: UnixStream,
    buf: Vec<u8>,
    max_frame_len: usize,
    eof: bool,
}

impl SocketRx {
    pub fn new(stream: UnixStream, max_frame_len: usize) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            max_frame_len: max_frame_len.min(MAX_FRAME_LEN_LIMIT),
            eof: false,
        }
    }

    pub fn from_owned_fd(fd: OwnedFd, max_frame_len: usize) -> Self {
        Self::new(UnixStream::from(fd), max_frame_len)
    }

    /// Pops one complete frame off the reassembly buffer.
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        if self.buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }
        let frame = self.buf[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        self.buf.drain(..LEN_PREFIX + len);
        Ok(Some(frame))
    }

    /// Reads one chunk into the buffer. Returns `false` on a timeout or when
    /// the read would block.
    fn fill(&mut self) -> Result<bool, TransportError> {
        if self.eof {
            return Err(TransportError::Disconnected);
        }
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                self.eof = true;
                Err(TransportError::Disconnected)
            }
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(true),
            Err(e) => Err(map_io(e)),
        }
    }
}

impl Receive for SocketRx {
    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let result = loop {
            if let Some(frame) = self.take_frame()? {
                break Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Ok(None);
            }
            self.stream.set_read_timeout(Some(remaining))?;
            if let Err(e) = self.fill() {
                break Err(e);
            }
        };
        self.stream.set_read_timeout(None)?;
        result
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(frame) = self.take_frame()? {
            return Ok(Some(frame));
        }
        self.stream.set_nonblocking(true)?;
        let result = loop {
            match self.fill() {
                Ok(true) => {
                    if let Some(frame) = self.take_frame()? {
                        break Ok(Some(frame));
                    }
                }
                Ok(false) => break Ok(None),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn into_owned_fd(self: Box<Self>) -> Result<OwnedFd, TransportError> {
        if !self.buf.is_empty() {
            // Buffered bytes would be lost with the handle.
            return Err(TransportError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "receiver has partially read frames",
            )));
        }
        Ok(OwnedFd::from(self.stream))
    }
}

fn map_io(e: io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
            TransportError::Disconnected
        }
        _ => TransportError::Io(e),
    }
}
