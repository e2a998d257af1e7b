//! Blocking Session Driver
//!
//! Owns the TCP transports of one session and runs the [`SessionCore`]
//! state machine on the caller's thread.
//!
//! ## Event Flow
//! ```text
//! reader thread(s) ──TransportEvent──▶ crossbeam channel
//!                                           │ pump()
//!                                           ▼
//!                                      SessionCore ──Action──▶ TcpTransport
//! ```
//!
//! Requests are pipelined: `queue_*` methods write immediately and return a
//! [`Pending`] that [`Session::wait`] resolves. Completion callbacks and
//! notification handlers run inside `pump`/`wait`.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::protocol::{Item, Record, Request};
use crate::session::{
    Action, Callback, Channel, EventKind, SessionCore, SessionEvent, State, WatchState,
};

use super::query::Query;
use super::transport::{TcpTransport, TransportEvent, TransportEventKind};

/// Reply of a generic command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Command output
    pub result: String,

    /// Server info text (timing, affected documents, ...)
    pub info: String,
}

impl Execution {
    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            result: record.take("result").unwrap_or_default(),
            info: record.take("info").unwrap_or_default(),
        })
    }
}

fn into_info(mut record: Record) -> Result<String> {
    Ok(record.take("result").unwrap_or_default())
}

fn into_unit(_: Record) -> Result<()> {
    Ok(())
}

/// A submitted request whose reply has not been collected yet
#[must_use = "a pending reply does nothing unless passed to Session::wait"]
pub struct Pending<T> {
    rx: Receiver<Result<Record>>,
    map: fn(Record) -> Result<T>,
}

impl<T> Pending<T> {
    /// Already failed; no round trip happened
    fn failed(err: ClientError, map: fn(Record) -> Result<T>) -> Self {
        let (tx, rx) = channel::bounded(1);
        let _ = tx.send(Err(err));
        Self { rx, map }
    }

    /// Whether the reply has arrived
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// One client session against a server
pub struct Session {
    config: Config,
    core: SessionCore,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    primary: Option<TcpTransport>,
    side: Option<TcpTransport>,
    side_generation: u64,
    orphans_tx: Sender<String>,
    orphans_rx: Receiver<String>,
}

impl Session {
    /// Create a session without connecting.
    ///
    /// Requests made before [`open`](Self::open) fail with `NotConnected`
    /// and are never sent.
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        let (orphans_tx, orphans_rx) = channel::unbounded();
        Self {
            core: SessionCore::new(&config),
            config,
            events_tx,
            events_rx,
            primary: None,
            side: None,
            side_generation: 0,
            orphans_tx,
            orphans_rx,
        }
    }

    /// Connect and log in
    pub fn connect(config: Config) -> Result<Self> {
        let mut session = Self::new(config);
        session.open()?;
        Ok(session)
    }

    /// Open the command connection and block until login completes.
    pub fn open(&mut self) -> Result<()> {
        if self.core.is_terminated() {
            return Err(ClientError::SessionClosed);
        }
        if self.primary.is_some() {
            return Ok(());
        }

        tracing::debug!(session = %self.core.tag(), addr = %self.config.addr(), "connecting");
        let transport = TcpTransport::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout_ms,
            self.config.read_chunk_size,
            Channel::Primary,
            0,
            self.events_tx.clone(),
        );
        let transport = match transport {
            Ok(transport) => transport,
            Err(err) => {
                self.core
                    .on_transport_error(ClientError::Transport(err.to_string()));
                self.run_actions();
                return Err(err);
            }
        };
        self.primary = Some(transport);
        self.core.on_connected();

        let deadline = match self.config.connect_timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        };
        while self.core.state() != State::Connected {
            if let Some(err) = self.core.take_failure() {
                return Err(err);
            }
            if self.core.is_terminated() {
                return Err(ClientError::ConnectionClosed);
            }
            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.core.on_transport_error(ClientError::Transport(
                            "login timed out".to_string(),
                        ));
                        self.run_actions();
                        return Err(self
                            .core
                            .take_failure()
                            .unwrap_or(ClientError::ConnectionClosed));
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.pump(timeout);
        }
        Ok(())
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Wait up to `timeout` (forever with `None`) for transport activity and
    /// process it. Returns false when nothing arrived or no transport is open.
    pub fn pump(&mut self, timeout: Option<Duration>) -> bool {
        self.close_orphans();
        self.run_actions();
        if self.primary.is_none() && self.side.is_none() {
            return false;
        }

        let event = match timeout {
            Some(timeout) => match self.events_rx.recv_timeout(timeout) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            },
            None => match self.events_rx.recv() {
                Ok(event) => event,
                Err(_) => return false,
            },
        };
        self.apply(event);
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
        self.run_actions();
        true
    }

    /// Pump until the reply arrives.
    pub fn wait<T>(&mut self, pending: Pending<T>) -> Result<T> {
        loop {
            match pending.rx.try_recv() {
                Ok(result) => return result.and_then(pending.map),
                Err(TryRecvError::Disconnected) => return Err(ClientError::ConnectionClosed),
                Err(TryRecvError::Empty) => {}
            }
            if !self.pump(None) {
                return match pending.rx.try_recv() {
                    Ok(result) => result.and_then(pending.map),
                    Err(_) => Err(ClientError::ConnectionClosed),
                };
            }
        }
    }

    fn apply(&mut self, event: TransportEvent) {
        match event.channel {
            Channel::Primary => match event.kind {
                TransportEventKind::Data(bytes) => self.core.on_data(&bytes),
                TransportEventKind::Closed => {
                    self.primary = None;
                    self.core.on_closed();
                }
                TransportEventKind::Failed(err) => {
                    self.core.on_transport_error(ClientError::Io(err));
                    self.primary = None;
                    self.core.on_closed();
                }
            },
            Channel::Side => {
                if event.generation != self.side_generation {
                    tracing::trace!(session = %self.core.tag(), "ignoring event from stale side channel");
                    return;
                }
                match event.kind {
                    TransportEventKind::Data(bytes) => self.core.on_side_data(&bytes),
                    TransportEventKind::Closed => {
                        self.side = None;
                        self.core.on_side_closed();
                    }
                    TransportEventKind::Failed(err) => {
                        tracing::warn!(session = %self.core.tag(), error = %err, "event channel failed");
                        self.side = None;
                        self.core.on_side_closed();
                    }
                }
            }
        }
    }

    fn run_actions(&mut self) {
        while let Some(action) = self.core.next_action() {
            match action {
                Action::Write(Channel::Primary, bytes) => {
                    let result = match self.primary.as_mut() {
                        Some(primary) => primary.write(&bytes),
                        None => Err(ClientError::ConnectionClosed),
                    };
                    if let Err(err) = result {
                        self.core.on_transport_error(err);
                    }
                }
                Action::Write(Channel::Side, bytes) => {
                    let result = match self.side.as_mut() {
                        Some(side) => side.write(&bytes),
                        None => Err(ClientError::ConnectionClosed),
                    };
                    if let Err(err) = result {
                        tracing::warn!(session = %self.core.tag(), error = %err, "event channel write failed");
                        self.side = None;
                        self.core.on_side_closed();
                    }
                }
                Action::OpenSide { host, port } => {
                    self.side_generation += 1;
                    let side = TcpTransport::connect(
                        &host,
                        port,
                        self.config.connect_timeout_ms,
                        self.config.read_chunk_size,
                        Channel::Side,
                        self.side_generation,
                        self.events_tx.clone(),
                    );
                    match side {
                        Ok(side) => {
                            self.side = Some(side);
                            self.core.on_side_connected();
                        }
                        Err(err) => {
                            tracing::warn!(session = %self.core.tag(), port, error = %err, "event channel connect failed");
                            self.core.on_side_closed();
                        }
                    }
                }
                Action::CloseSide => {
                    self.side_generation += 1;
                    self.side = None;
                }
                Action::ClosePrimary => {
                    if let Some(primary) = self.primary.as_ref() {
                        primary.close();
                    }
                }
            }
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Requests need a session that was opened at least once; after that
    /// the core decides.
    fn ensure_opened(&mut self) -> Result<()> {
        if self.primary.is_none() && !self.core.is_terminated() {
            return Err(ClientError::NotConnected);
        }
        self.close_orphans();
        Ok(())
    }

    /// Close the server cursors of queries dropped without `close()`
    fn close_orphans(&mut self) {
        while let Ok(id) = self.orphans_rx.try_recv() {
            if self.is_closed() {
                continue;
            }
            tracing::debug!(session = %self.core.tag(), query = %id, "closing dropped query");
            if let Err(err) = self.core.send(&Request::CloseQuery { id }, Box::new(|_| {})) {
                tracing::debug!(session = %self.core.tag(), error = %err, "dropped query left open");
            }
        }
    }

    pub(crate) fn submit<T>(
        &mut self,
        request: &Request,
        map: fn(Record) -> Result<T>,
    ) -> Pending<T> {
        if let Err(err) = self.ensure_opened() {
            return Pending::failed(err, map);
        }
        let (tx, rx) = channel::bounded(1);
        let callback: Callback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        match self.core.send(request, callback) {
            Ok(()) => {
                self.run_actions();
                Pending { rx, map }
            }
            Err(err) => Pending::failed(err, map),
        }
    }

    /// Submit a results request; items arrive on the returned receiver
    /// while the stream is parsed.
    pub(crate) fn submit_streaming(
        &mut self,
        request: &Request,
    ) -> Result<(Receiver<Item>, Pending<Record>)> {
        self.ensure_opened()?;
        let (item_tx, item_rx) = channel::unbounded();
        let (tx, rx) = channel::bounded(1);
        self.core.send_streaming(
            request,
            Box::new(move |item| {
                let _ = item_tx.send(item);
            }),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        self.run_actions();
        Ok((item_rx, Pending { rx, map: Ok }))
    }

    /// Pipeline any request; the raw reply record is returned by `wait`.
    pub fn queue(&mut self, request: &Request) -> Pending<Record> {
        self.submit(request, Ok)
    }

    /// Submit any request with a completion callback
    pub fn send_with<F>(&mut self, request: &Request, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Record>) + Send + 'static,
    {
        self.ensure_opened()?;
        self.core.send(request, Box::new(callback))?;
        self.run_actions();
        Ok(())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run a database command, e.g. `create db test`
    pub fn execute(&mut self, command: &str) -> Result<Execution> {
        let pending = self.queue_execute(command);
        self.wait(pending)
    }

    pub fn queue_execute(&mut self, command: &str) -> Pending<Execution> {
        self.submit(&Request::command(command), Execution::from_record)
    }

    pub fn execute_with<F>(&mut self, command: &str, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Execution>) + Send + 'static,
    {
        self.send_with(&Request::command(command), move |result| {
            callback(result.and_then(Execution::from_record))
        })
    }

    /// Create a database from an input document. Returns the server info.
    pub fn create(&mut self, name: &str, input: impl Into<Vec<u8>>) -> Result<String> {
        let pending = self.submit(&Request::create(name, input), into_info);
        self.wait(pending)
    }

    /// Add a document to the opened database
    pub fn add(&mut self, path: &str, input: impl Into<Vec<u8>>) -> Result<String> {
        let pending = self.submit(&Request::add(path, input), into_info);
        self.wait(pending)
    }

    /// Replace the document at `path`
    pub fn replace(&mut self, path: &str, input: impl Into<Vec<u8>>) -> Result<String> {
        let pending = self.submit(&Request::replace(path, input), into_info);
        self.wait(pending)
    }

    /// Store raw data at `path`
    pub fn store(&mut self, path: &str, input: impl Into<Vec<u8>>) -> Result<String> {
        let pending = self.submit(&Request::store(path, input), into_info);
        self.wait(pending)
    }

    /// Register a query and return its handle. The handle does not borrow
    /// the session; pass the session to each of its operations.
    pub fn query(&mut self, text: &str) -> Result<Query> {
        let pending = self.submit(
            &Request::OpenQuery {
                text: text.to_string(),
            },
            into_info,
        );
        let id = self.wait(pending)?;
        tracing::debug!(session = %self.core.tag(), query = %id, "query opened");
        Ok(Query::new(id, self.orphans_tx.clone()))
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Subscribe to a named server event. `notify` runs for each
    /// notification, inside `pump`/`wait`.
    pub fn watch<N>(&mut self, name: &str, notify: N) -> Result<()>
    where
        N: FnMut(&str) + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.watch_with(name, notify, move |result| {
            let _ = tx.send(result);
        })?;
        self.wait(Pending { rx, map: into_unit })
    }

    pub fn watch_with<N, F>(&mut self, name: &str, notify: N, done: F) -> Result<()>
    where
        N: FnMut(&str) + Send + 'static,
        F: FnOnce(Result<Record>) + Send + 'static,
    {
        self.ensure_opened()?;
        self.core.watch(name, Box::new(notify), Box::new(done))?;
        self.run_actions();
        Ok(())
    }

    /// Unsubscribe from a named event; the side channel stays open
    pub fn unwatch(&mut self, name: &str) -> Result<()> {
        let (tx, rx) = channel::bounded(1);
        self.unwatch_with(name, move |result| {
            let _ = tx.send(result);
        })?;
        self.wait(Pending { rx, map: into_unit })
    }

    pub fn unwatch_with<F>(&mut self, name: &str, done: F) -> Result<()>
    where
        F: FnOnce(Result<Record>) + Send + 'static,
    {
        self.ensure_opened()?;
        self.core.unwatch(name, Box::new(done))?;
        self.run_actions();
        Ok(())
    }

    /// Register a lifecycle listener
    pub fn on<L>(&mut self, kind: EventKind, listener: L)
    where
        L: FnMut(&SessionEvent) + Send + 'static,
    {
        self.core.on(kind, Box::new(listener));
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Send `exit` and block until the server closes the connection.
    pub fn close(&mut self) -> Result<()> {
        let (tx, rx) = channel::bounded(1);
        self.close_with(move |result| {
            let _ = tx.send(result);
        })?;
        if self.primary.is_none() {
            // Never connected: nothing will answer the exit command
            self.core.on_closed();
        }
        self.wait(Pending { rx, map: into_unit })
    }

    /// Queue `exit`; `done` runs once the command connection has closed.
    pub fn close_with<F>(&mut self, done: F) -> Result<()>
    where
        F: FnOnce(Result<Record>) + Send + 'static,
    {
        self.close_orphans();
        self.core.close(Box::new(done))?;
        self.run_actions();
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> State {
        self.core.state()
    }

    /// Unique session tag used in log lines
    pub fn tag(&self) -> &str {
        self.core.tag()
    }

    /// Commands written to the command connection so far
    pub fn commands_sent(&self) -> u64 {
        self.core.commands_sent()
    }

    /// The session no longer accepts commands
    pub fn is_closed(&self) -> bool {
        self.core.is_terminated() || self.core.is_transport_closed()
    }

    pub fn watch_state(&self) -> WatchState {
        self.core.watch_state()
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.core.is_subscribed(name)
    }
}
