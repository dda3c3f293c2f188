//! Consuming half of a dispatcher.
//!
//! A [`Receiver`] is either open or closed. It becomes closed when it dequeues
//! the close marker, and never reads from its queue again after that. Every
//! consumption mode shares the same per-frame logic and differs only in how it
//! waits for the next frame:
//!
//! - [`handle_next`](Receiver::handle_next) blocks for exactly one frame.
//! - [`handle_until_closed`](Receiver::handle_until_closed) blocks in a loop.
//! - [`coro_handle_until_closed`](Receiver::coro_handle_until_closed) polls
//!   without blocking and sleeps on the tokio timer between empty checks.
//!
//! Handlers always run synchronously on the consuming thread or task. There
//! is no support for async handlers.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{ErrorPolicy, ReceiverConfig};
use crate::error::{DispatchError, Result, TransportError};
use crate::event::Frame;
use crate::registry::{BoundArgs, Registry, Signature};
use crate::Receive;

/// Outcome of consuming a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// An event was dispatched to this many handlers (zero when nobody listens).
    Dispatched { handlers: usize },
    /// The close marker was consumed. No more events will arrive.
    Closed,
}

/// Counters reported by the multi-step consumption modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Events dequeued, including those whose handlers failed.
    pub events: usize,
    /// Successful handler invocations.
    pub handlers: usize,
    /// Events whose dispatch hit a handler failure.
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Broken,
}

/// Receives events from a transport queue and dispatches them to handlers.
///
/// The receiver is the only consumer of its queue and owns its listener
/// registry. Handlers are local closures and never cross process boundaries;
/// register them on the side where they should run.
pub struct Receiver {
    rx: Box<dyn Receive>,
    registry: Registry,
    config: ReceiverConfig,
    state: State,
}

impl Receiver {
    pub fn new(rx: Box<dyn Receive>, config: ReceiverConfig) -> Self {
        Self {
            rx,
            registry: Registry::new(),
            config,
            state: State::Open,
        }
    }

    /// Registers a handler for `event` with an explicit signature.
    ///
    /// Handlers for the same event run in registration order. Registering a
    /// handler twice makes it run twice. Safe to call between consumption
    /// calls.
    pub fn connect<F>(&mut self, event: impl Into<String>, signature: Signature, handler: F)
    where
        F: FnMut(&BoundArgs<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.registry.connect(event, signature, Box::new(handler));
    }

    /// Registers a handler that accepts any arguments.
    pub fn connect_any<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: FnMut(&BoundArgs<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.connect(event, Signature::any(), handler);
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry.listener_count(event)
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Blocks until one frame arrives and handles it.
    ///
    /// Returns [`Step::Closed`] when the close marker is consumed. Calling
    /// this again afterwards returns [`DispatchError::AlreadyClosed`] without
    /// touching the queue. A handler failure is returned as
    /// [`DispatchError::HandlerInvocation`]; the receiver stays usable.
    pub fn handle_next(&mut self) -> Result<Step> {
        self.ensure_open()?;
        let frame = self.receive(|rx| rx.recv())?;
        self.handle_frame(&frame)
    }

    /// Like [`handle_next`](Receiver::handle_next), but returns `Ok(None)` if
    /// nothing arrives within `timeout`.
    pub fn handle_next_timeout(&mut self, timeout: Duration) -> Result<Option<Step>> {
        self.ensure_open()?;
        match self.receive(|rx| rx.recv_timeout(timeout))? {
            Some(frame) => self.handle_frame(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Handles every frame already queued, without blocking.
    ///
    /// Stops when the queue is empty or at the close marker. Events fired
    /// concurrently may or may not be picked up.
    pub fn handle_pending(&mut self) -> Result<LoopSummary> {
        self.ensure_open()?;
        let mut summary = LoopSummary::default();
        while let Some(frame) = self.receive(|rx| rx.try_recv())? {
            let step = self.handle_frame(&frame);
            if self.tally(&mut summary, step)? {
                break;
            }
        }
        Ok(summary)
    }

    /// Blocks, dispatching events, until the close marker is consumed.
    ///
    /// Handler failures follow [`ReceiverConfig::error_policy`].
    pub fn handle_until_closed(&mut self) -> Result<LoopSummary> {
        self.ensure_open()?;
        let mut summary = LoopSummary::default();
        loop {
            let step = self.handle_next();
            if self.tally(&mut summary, step)? {
                break;
            }
        }
        tracing::debug!(
            events = summary.events,
            failures = summary.failures,
            "receiver loop finished"
        );
        Ok(summary)
    }

    /// Cooperative counterpart of
    /// [`handle_until_closed`](Receiver::handle_until_closed).
    ///
    /// Never blocks the thread. When the queue is empty the task sleeps for
    /// [`ReceiverConfig::poll_interval`] before checking again, and it yields
    /// after every dispatched event, so other tasks on the same runtime keep
    /// making progress. Handlers still run synchronously inside this task.
    pub async fn coro_handle_until_closed(&mut self) -> Result<LoopSummary> {
        self.ensure_open()?;
        let interval = self.config.poll_interval.max(Duration::from_millis(1));
        let mut summary = LoopSummary::default();
        loop {
            match self.receive(|rx| rx.try_recv())? {
                Some(frame) => {
                    let step = self.handle_frame(&frame);
                    if self.tally(&mut summary, step)? {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                None => tokio::time::sleep(interval).await,
            }
        }
        tracing::debug!(
            events = summary.events,
            failures = summary.failures,
            "cooperative receiver loop finished"
        );
        Ok(summary)
    }

    /// Runs [`handle_until_closed`](Receiver::handle_until_closed) on a
    /// dedicated thread. Handlers run on that thread. The receiver is handed
    /// back together with the loop's result when the thread finishes.
    pub fn spawn_until_closed(mut self) -> std::io::Result<JoinHandle<(Self, Result<LoopSummary>)>> {
        thread::Builder::new()
            .name("mpdispatch-listener".into())
            .spawn(move || {
                let result = self.handle_until_closed();
                (self, result)
            })
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(DispatchError::AlreadyClosed),
            State::Broken => Err(TransportError::Disconnected.into()),
        }
    }

    /// Runs a transport operation. Any transport failure is fatal.
    fn receive<T>(
        &mut self,
        op: impl FnOnce(&mut dyn Receive) -> std::result::Result<T, TransportError>,
    ) -> Result<T> {
        op(self.rx.as_mut()).map_err(|e| self.break_on(e))
    }

    /// Marks the receiver unusable after a transport failure.
    fn break_on(&mut self, e: TransportError) -> DispatchError {
        tracing::error!(error = %e, "receiver transport failed");
        self.state = State::Broken;
        e.into()
    }

    fn handle_frame(&mut self, bytes: &[u8]) -> Result<Step> {
        let frame = Frame::decode(bytes).map_err(|e| self.break_on(e))?;
        match frame {
            Frame::Event(event) => {
                let handlers = self.registry.dispatch(&event)?;
                tracing::trace!(event = event.name(), handlers, "event dispatched");
                Ok(Step::Dispatched { handlers })
            }
            Frame::Close => {
                self.state = State::Closed;
                tracing::debug!("close marker received");
                Ok(Step::Closed)
            }
        }
    }

    /// Folds one step into the summary. Returns `true` once closed.
    fn tally(&self, summary: &mut LoopSummary, step: Result<Step>) -> Result<bool> {
        match step {
            Ok(Step::Dispatched { handlers }) => {
                summary.events += 1;
                summary.handlers += handlers;
                Ok(false)
            }
            Ok(Step::Closed) => Ok(true),
            Err(DispatchError::HandlerInvocation(e)) => {
                summary.events += 1;
                summary.failures += 1;
                match self.config.error_policy {
                    ErrorPolicy::LogAndContinue => {
                        tracing::warn!(error = %e, "handler failed, continuing");
                        Ok(false)
                    }
                    ErrorPolicy::Abort => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
mod handoff {
    use std::os::fd::OwnedFd;
    use std::process::Stdio;

    use super::Receiver;
    use crate::config::ReceiverConfig;
    use crate::error::Result;
    use crate::socket::{self, SocketRx};

    impl Receiver {
        /// Releases the socket handle so it can be passed to another process.
        /// Handlers are not transferred.
        pub fn into_owned_fd(self) -> Result<OwnedFd> {
            self.ensure_open()?;
            Ok(self.rx.into_owned_fd()?)
        }

        /// Rebuilds a receiver, with an empty registry, from a handle produced
        /// by [`into_owned_fd`](Receiver::into_owned_fd).
        pub fn from_owned_fd(fd: OwnedFd, config: ReceiverConfig) -> Self {
            let rx = SocketRx::from_owned_fd(fd, config.max_frame_len);
            Self::new(Box::new(rx), config)
        }

        /// Turns the receiver into a child process's stdin.
        pub fn into_stdio(self) -> Result<Stdio> {
            Ok(Stdio::from(self.into_owned_fd()?))
        }

        /// Rebuilds the receiver a parent passed as this process's stdin.
        pub fn from_stdin(config: ReceiverConfig) -> Result<Self> {
            Ok(Self::from_owned_fd(socket::stdin_fd()?, config))
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Args;
    use crate::memory;
    use crate::sender::Sender;
    use crate::value::Value;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    fn pair(config: ReceiverConfig) -> (Sender, Receiver) {
        let (tx, rx) = memory::queue();
        (Sender::new(Box::new(tx)), Receiver::new(Box::new(rx), config))
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(receiver: &mut Receiver, event: &str, log: &Log) {
        let log = Arc::clone(log);
        receiver.connect_any(event, move |call| {
            log.lock().unwrap().push(call.event().to_owned());
            Ok(())
        });
    }

    #[test]
    fn greet_scenario() {
        let (mut sender, mut receiver) = pair(ReceiverConfig::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        receiver.connect(
            "greet",
            Signature::new().required("name"),
            move |call| {
                sink.lock().unwrap().push(call.get("name").cloned());
                Ok(())
            },
        );

        sender.fire("greet", Args::new().arg("Alice")).unwrap();
        assert_eq!(
            receiver.handle_next().unwrap(),
            Step::Dispatched { handlers: 1 }
        );
        assert_eq!(*calls.lock().unwrap(), vec![Some(Value::from("Alice"))]);
    }

    #[test]
    fn handle_next_after_close_is_an_error() {
        let (mut sender, mut receiver) = pair(ReceiverConfig::default());
        sender.fire("a", Args::new()).unwrap();
        sender.close().unwrap();

        assert_eq!(
            receiver.handle_next().unwrap(),
            Step::Dispatched { handlers: 0 }
        );
        assert_eq!(receiver.handle_next().unwrap(), Step::Closed);
        assert!(receiver.is_closed());
        assert!(matches!(
            receiver.handle_next(),
            Err(DispatchError::AlreadyClosed)
        ));
        assert!(matches!(
            receiver.handle_until_closed(),
            Err(DispatchError::AlreadyClosed)
        ));
    }

    #[test]
    fn never_reads_past_the_marker() {
        let (tx, rx) = memory::queue();
        let mut first = Sender::new(Box::new(tx.clone()));
        let mut second = Sender::new(Box::new(tx));
        let mut receiver = Receiver::new(Box::new(rx), ReceiverConfig::default());

        first.close().unwrap();
        second.fire("after", Args::new()).unwrap();

        let summary = receiver.handle_until_closed().unwrap();
        assert_eq!(summary, LoopSummary::default());
        // The trailing event is still queued, untouched.
        assert!(matches!(
            receiver.handle_pending(),
            Err(DispatchError::AlreadyClosed)
        ));
    }

    #[test]
    fn handle_next_propagates_handler_failure() {
        let (mut sender, mut receiver) = pair(ReceiverConfig::default());
        let log = Log::default();
        receiver.connect("e", Signature::new(), |_| Ok(()));
        recorder(&mut receiver, "ok", &log);

        sender.fire("e", Args::new().arg(1)).unwrap();
        sender.fire("ok", Args::new()).unwrap();

        match receiver.handle_next() {
            Err(DispatchError::HandlerInvocation(e)) => {
                assert_eq!(e.event, "e");
                assert!(matches!(
                    e.kind,
                    crate::InvocationErrorKind::TooManyPositional { .. }
                ));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            receiver.handle_next().unwrap(),
            Step::Dispatched { handlers: 1 }
        );
        assert_eq!(*log.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn loop_continues_past_failures_by_default() {
        let (mut sender, mut receiver) = pair(ReceiverConfig::default());
        let log = Log::default();
        receiver.connect_any("bad", |_| Err(anyhow!("nope")));
        recorder(&mut receiver, "good", &log);

        sender.fire("bad", Args::new()).unwrap();
        sender.fire("good", Args::new()).unwrap();
        sender.close().unwrap();

        let summary = receiver.handle_until_closed().unwrap();
        assert_eq!(
            summary,
            LoopSummary {
                events: 2,
                handlers: 1,
                failures: 1
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["good"]);
        assert!(receiver.is_closed());
    }

    #[test]
    fn abort_policy_preserves_the_queue() {
        let config = ReceiverConfig::default().with_error_policy(ErrorPolicy::Abort);
        let (mut sender, mut receiver) = pair(config);
        let log = Log::default();
        receiver.connect_any("bad", |_| Err(anyhow!("nope")));
        recorder(&mut receiver, "good", &log);

        sender.fire("bad", Args::new()).unwrap();
        sender.fire("good", Args::new()).unwrap();
        sender.close().unwrap();

        assert!(matches!(
            receiver.handle_until_closed(),
            Err(DispatchError::HandlerInvocation(_))
        ));
        assert!(log.lock().unwrap().is_empty());

        let summary = receiver.handle_until_closed().unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(*log.lock().unwrap(), vec!["good"]);
    }

    #[test]
    fn handle_pending_stops_when_empty() {
        let (mut sender, mut receiver) = pair(ReceiverConfig::default());
        let log = Log::default();
        recorder(&mut receiver, "a", &log);

        assert_eq!(receiver.handle_pending().unwrap(), LoopSummary::default());
        sender.fire("a", Args::new()).unwrap();
        sender.fire("a", Args::new()).unwrap();
        assert_eq!(receiver.handle_pending().unwrap().events, 2);
        assert!(!receiver.is_closed());

        sender.close().unwrap();
        receiver.handle_pending().unwrap();
        assert!(receiver.is_closed());
    }

    #[test]
    fn timeout_returns_none() {
        let (_sender, mut receiver) = pair(ReceiverConfig::default());
        assert_eq!(
            receiver
                .handle_next_timeout(Duration::from_millis(10))
                .unwrap(),
            None
        );
        assert!(!receiver.is_closed());
    }

    #[test]
    fn connecting_between_steps() {
        let (mut sender, mut receiver) = pair(ReceiverConfig::default());
        let log = Log::default();
        sender.fire("a", Args::new()).unwrap();
        sender.fire("a", Args::new()).unwrap();

        assert_eq!(
            receiver.handle_next().unwrap(),
            Step::Dispatched { handlers: 0 }
        );
        recorder(&mut receiver, "a", &log);
        assert_eq!(
            receiver.handle_next().unwrap(),
            Step::Dispatched { handlers: 1 }
        );
        assert_eq!(receiver.listener_count("a"), 1);
    }

    #[test]
    fn lost_sender_breaks_the_receiver() {
        let (sender, mut receiver) = pair(ReceiverConfig::default());
        drop(sender);
        assert!(matches!(
            receiver.handle_until_closed(),
            Err(DispatchError::Transport(TransportError::Disconnected))
        ));
        assert!(matches!(
            receiver.handle_next(),
            Err(DispatchError::Transport(TransportError::Disconnected))
        ));
        assert!(!receiver.is_closed());
    }

    #[test]
    fn undecodable_frame_breaks_the_receiver() {
        use crate::Transmit;

        let (tx, rx) = memory::queue();
        let mut receiver = Receiver::new(Box::new(rx), ReceiverConfig::default());
        tx.send(b"not a frame").unwrap();
        tx.send(&Frame::Close.encode().unwrap()).unwrap();

        assert!(matches!(
            receiver.handle_next(),
            Err(DispatchError::Transport(TransportError::Decode(_)))
        ));
        assert!(matches!(
            receiver.handle_next(),
            Err(DispatchError::Transport(TransportError::Disconnected))
        ));
        assert!(!receiver.is_closed());
    }
}
