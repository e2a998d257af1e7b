//! Session state machine
//!
//! `SessionCore` holds all protocol state of one session and performs no I/O.
//! Transport events are fed in through the `on_*` methods; everything the
//! session wants done to its transports comes back out as [`Action`]s.
//!
//! ## States
//! ```text
//! Disconnected ──connect──▶ Connecting ──challenge──▶ Authorizing
//!                                                        │ status 00
//!                         Closing ◀──exit written── Connected
//! ```
//!
//! Commands are only written while `Connected`. Every accepted command's
//! callback runs exactly once: with its reply, with the server's error, or
//! with `ConnectionClosed` when the session goes down first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::protocol::{
    encode_exit, encode_field, encode_request, encode_unwatch, encode_watch, encode_watch_attach,
    encode_watch_init, Expect, FrameBuffer, Record, Request, ResponseShape, STATUS_OK,
};

use super::auth;
use super::events::{EventKind, Listener, Listeners, SessionEvent};
use super::scheduler::{Callback, Command, Completion, ItemSink, Scheduler};
use super::watch::{Notify, PendingAttach, WatchChannel, WatchEndpoint, WatchState};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Connection state of the command connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Authorizing,
    Connected,
    Closing,
}

/// Which transport an action or event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Command connection
    Primary,
    /// Event side channel
    Side,
}

/// Work the session asks its driver to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Write(Channel, Vec<u8>),
    /// Connect the event side channel and report back with `on_side_connected`
    OpenSide { host: String, port: u16 },
    CloseSide,
    ClosePrimary,
}

pub struct SessionCore {
    tag: String,
    host: String,
    username: String,
    password: String,
    trace_wire: bool,

    state: State,
    frames: FrameBuffer,
    scheduler: Scheduler,
    watch: WatchChannel,
    listeners: Listeners,
    actions: VecDeque<Action>,

    close_waiters: Vec<Callback>,
    close_requested: bool,
    /// No further commands are accepted or parsed
    terminated: bool,
    transport_closed: bool,
    failure: Option<ClientError>,
    commands_sent: u64,
}

impl SessionCore {
    pub fn new(config: &Config) -> Self {
        Self {
            tag: format!("S{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed)),
            host: config.host.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            trace_wire: config.trace_wire,
            state: State::Disconnected,
            frames: FrameBuffer::new(),
            scheduler: Scheduler::new(),
            watch: WatchChannel::new(),
            listeners: Listeners::new(),
            actions: VecDeque::new(),
            close_waiters: Vec::new(),
            close_requested: false,
            terminated: false,
            transport_closed: false,
            failure: None,
            commands_sent: 0,
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Unique tag used in log lines (`S1`, `S2`, ...)
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn watch_state(&self) -> WatchState {
        self.watch.state()
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.watch.is_subscribed(name)
    }

    /// Commands written to the command connection so far
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    pub fn pending_len(&self) -> usize {
        self.scheduler.pending_len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.scheduler.in_flight_len()
    }

    pub fn is_blocked(&self) -> bool {
        self.scheduler.is_blocked()
    }

    /// The session accepts no more commands
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_transport_closed(&self) -> bool {
        self.transport_closed
    }

    /// The error that ended the session, if one did
    pub fn failure(&self) -> Option<&ClientError> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<ClientError> {
        self.failure.take()
    }

    pub fn on(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.on(kind, listener);
    }

    /// Next action for the driver, in the order they were produced
    pub fn next_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    pub fn drain_actions(&mut self) -> Vec<Action> {
        self.actions.drain(..).collect()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Queue a request; `callback` receives the reply record.
    pub fn send(&mut self, request: &Request, callback: Callback) -> Result<()> {
        let command = Command::new(
            request.label(),
            encode_request(request),
            request.expect(),
            Completion::Reply(callback),
        );
        self.submit(command)
    }

    /// Queue a results request; `items` receives each item as it is parsed
    /// and `callback` the terminal status.
    pub fn send_streaming(&mut self, request: &Request, items: ItemSink, callback: Callback) -> Result<()> {
        let command = Command::new(
            request.label(),
            encode_request(request),
            request.expect(),
            Completion::Reply(callback),
        )
        .with_items(items);
        self.submit(command)
    }

    /// Subscribe to a named event.
    ///
    /// The first subscription runs the side channel handshake; later ones
    /// only send the attach command.
    pub fn watch(&mut self, name: &str, notify: Notify, done: Callback) -> Result<()> {
        self.ensure_accepting()?;

        if self.watch.needs_handshake() {
            tracing::debug!(session = %self.tag, event = name, "starting event channel handshake");
            self.watch.begin(PendingAttach {
                name: name.to_string(),
                notify,
                done,
            });
            let init = Command::new(
                "watch-init",
                encode_watch_init(),
                Expect::Frame(ResponseShape::WATCH_INIT),
                Completion::WatchInit,
            )
            .blocking();
            return self.submit(init);
        }

        self.watch.subscribe(name, notify);
        self.submit(Command::new(
            "watch",
            encode_watch(name),
            Expect::Frame(ResponseShape::RESULT),
            Completion::Attach {
                name: name.to_string(),
                done,
            },
        ))
    }

    /// Unsubscribe; the local handler is dropped once the server agrees.
    /// The side channel stays open.
    pub fn unwatch(&mut self, name: &str, done: Callback) -> Result<()> {
        self.submit(Command::new(
            "unwatch",
            encode_unwatch(name),
            Expect::Frame(ResponseShape::RESULT),
            Completion::Unwatch {
                name: name.to_string(),
                done,
            },
        ))
    }

    /// Queue the exit command. `done` runs when the command connection closes.
    pub fn close(&mut self, done: Callback) -> Result<()> {
        self.ensure_accepting()?;
        tracing::debug!(session = %self.tag, "closing");

        self.close_requested = true;
        self.close_waiters.push(done);
        self.scheduler.push(Command::new(
            "exit",
            encode_exit(),
            Expect::Status,
            Completion::Exit,
        ));
        self.dispatch_next();
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.terminated || self.close_requested {
            return Err(ClientError::SessionClosed);
        }
        Ok(())
    }

    fn submit(&mut self, command: Command) -> Result<()> {
        self.ensure_accepting()?;
        tracing::trace!(session = %self.tag, command = command.label(), "queued");
        self.scheduler.push(command);
        self.dispatch_next();
        Ok(())
    }

    fn dispatch_next(&mut self) {
        loop {
            let writable = self.state == State::Connected && !self.terminated;
            let dispatch = match self.scheduler.dispatch_one(writable) {
                Some(dispatch) => dispatch,
                None => break,
            };
            self.commands_sent += 1;
            tracing::trace!(session = %self.tag, command = dispatch.label, "dispatched");
            if dispatch.ends_session {
                self.state = State::Closing;
            }
            self.write(Channel::Primary, dispatch.payload);
        }
    }

    fn write(&mut self, channel: Channel, bytes: Vec<u8>) {
        if self.trace_wire {
            tracing::debug!(
                session = %self.tag,
                ?channel,
                bytes = ?String::from_utf8_lossy(&bytes),
                ">>"
            );
        }
        self.actions.push_back(Action::Write(channel, bytes));
    }

    // =========================================================================
    // Command Connection Events
    // =========================================================================

    pub fn on_connected(&mut self) {
        if self.state == State::Disconnected && !self.terminated {
            tracing::debug!(session = %self.tag, "stream connected");
            self.state = State::Connecting;
        }
    }

    pub fn on_data(&mut self, bytes: &[u8]) {
        if self.terminated {
            return;
        }
        if self.trace_wire {
            tracing::debug!(session = %self.tag, bytes = ?String::from_utf8_lossy(bytes), "<<");
        }
        self.frames.feed(bytes);
        if let Err(err) = self.process() {
            self.fail(err);
        }
    }

    /// Read or write failure on the command connection
    pub fn on_transport_error(&mut self, err: ClientError) {
        self.fail(err);
    }

    /// The command connection is gone
    pub fn on_closed(&mut self) {
        if self.transport_closed {
            return;
        }
        self.transport_closed = true;
        self.state = State::Disconnected;
        tracing::debug!(session = %self.tag, "stream closed");

        let cause = if self.close_requested || self.terminated {
            None
        } else {
            Some(ClientError::Transport("connection closed by server".to_string()))
        };
        self.shutdown(cause);

        for waiter in std::mem::take(&mut self.close_waiters) {
            waiter(match &self.failure {
                Some(err) => Err(err.clone()),
                None => Ok(Record::new(true)),
            });
        }
        self.listeners.emit(&SessionEvent::Closed);
    }

    fn process(&mut self) -> Result<()> {
        loop {
            match self.state {
                State::Disconnected => {
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    return Err(ClientError::Parser(format!(
                        "{} bytes received before connect",
                        self.frames.len()
                    )));
                }
                State::Connecting => {
                    let record = match self.frames.read(&ResponseShape::CHALLENGE)? {
                        Some(record) => record,
                        None => return Ok(()),
                    };
                    let challenge = record.get("data").unwrap_or_default();
                    let digest = auth::digest(&self.username, &self.password, challenge);

                    let login = encode_field(&self.username);
                    self.write(Channel::Primary, login);
                    self.write(Channel::Primary, encode_field(&digest));
                    self.state = State::Authorizing;
                }
                State::Authorizing => {
                    let status = match self.frames.pop_byte() {
                        Some(status) => status,
                        None => return Ok(()),
                    };
                    if status != STATUS_OK {
                        return Err(ClientError::Auth(format!(
                            "login rejected for user '{}'",
                            self.username
                        )));
                    }
                    tracing::info!(session = %self.tag, user = %self.username, "authorized");
                    self.state = State::Connected;
                    self.listeners.emit(&SessionEvent::Ready);
                    self.dispatch_next();
                }
                State::Connected | State::Closing => return self.on_bytes_available(),
            }
        }
    }

    fn on_bytes_available(&mut self) -> Result<()> {
        while let Some(finished) = self.scheduler.poll(&mut self.frames)? {
            tracing::trace!(
                session = %self.tag,
                command = finished.label,
                ok = finished.result.is_ok(),
                "reply"
            );
            self.complete(finished.completion, finished.result);
        }

        if !self.scheduler.has_current() && !self.frames.is_empty() {
            return Err(ClientError::Parser(format!(
                "{} bytes received with no command awaiting a reply",
                self.frames.len()
            )));
        }
        Ok(())
    }

    fn complete(&mut self, completion: Completion, result: Result<Record>) {
        match completion {
            Completion::Reply(callback) => callback(result),
            Completion::Discard | Completion::Exit => {
                if let Err(err) = result {
                    tracing::debug!(session = %self.tag, error = %err, "unobserved command failed");
                }
            }
            Completion::WatchInit => self.on_watch_init(result),
            Completion::Attach { name, done } => {
                let result = match result {
                    Ok(_) if !self.watch.is_subscribed(&name) => Err(ClientError::Transport(
                        "event channel closed before the subscription was confirmed".to_string(),
                    )),
                    Ok(record) => Ok(record),
                    Err(err) => {
                        self.watch.unsubscribe(&name);
                        Err(err)
                    }
                };
                done(result);
            }
            Completion::Unwatch { name, done } => {
                if result.is_ok() {
                    self.watch.unsubscribe(&name);
                }
                done(result);
            }
        }
    }

    /// Drop every outstanding command and the side channel.
    fn shutdown(&mut self, cause: Option<ClientError>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if self.state != State::Disconnected {
            self.state = State::Closing;
        }

        if let Some(err) = cause {
            tracing::warn!(session = %self.tag, error = %err, "session failed");
            self.listeners.emit(&SessionEvent::Error(err.to_string()));
            self.failure = Some(err);
        }

        let commands = self.scheduler.drain();
        if !commands.is_empty() {
            tracing::debug!(session = %self.tag, count = commands.len(), "failing unanswered commands");
        }
        for command in commands {
            abandon(command.into_completion());
        }

        let (had_transport, pending) = self.watch.close();
        if had_transport {
            self.actions.push_back(Action::CloseSide);
        }
        if let Some(pending) = pending {
            (pending.done)(Err(ClientError::ConnectionClosed));
        }
        self.frames.clear();
    }

    fn fail(&mut self, err: ClientError) {
        self.shutdown(Some(err));
        self.actions.push_back(Action::ClosePrimary);
    }

    // =========================================================================
    // Event Side Channel
    // =========================================================================

    fn on_watch_init(&mut self, result: Result<Record>) {
        if self.watch.state() != WatchState::Initializing {
            self.scheduler.release();
            self.dispatch_next();
            return;
        }

        let endpoint = match result {
            Ok(record) => WatchEndpoint::from_record(&record).ok_or_else(|| {
                ClientError::Server(format!(
                    "invalid event endpoint: port {:?}",
                    record.get("eport").unwrap_or_default()
                ))
            }),
            Err(err) => Err(err),
        };

        match endpoint {
            Ok(endpoint) => {
                tracing::debug!(session = %self.tag, port = endpoint.port, "connecting event channel");
                self.watch.connecting(&endpoint);
                self.actions.push_back(Action::OpenSide {
                    host: self.host.clone(),
                    port: endpoint.port,
                });
            }
            Err(err) => {
                let (_, pending) = self.watch.close();
                if let Some(pending) = pending {
                    (pending.done)(Err(err.clone()));
                }
                // The server still expects an event name after the lone opcode
                self.fail(err);
            }
        }
    }

    /// The side transport connected; present the connection id.
    pub fn on_side_connected(&mut self) {
        let id = match self.watch.handshake_id() {
            Some(id) => id.to_string(),
            None => return,
        };
        tracing::debug!(session = %self.tag, "event channel connected");
        self.write(Channel::Side, encode_field(&id));
    }

    pub fn on_side_data(&mut self, bytes: &[u8]) {
        if self.trace_wire {
            tracing::debug!(session = %self.tag, bytes = ?String::from_utf8_lossy(bytes), "<< event");
        }
        self.watch.feed(bytes);
        match self.watch.poll() {
            Ok(true) => self.on_side_ready(),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(session = %self.tag, error = %err, "malformed event stream");
                self.on_side_closed();
            }
        }
    }

    fn on_side_ready(&mut self) {
        tracing::debug!(session = %self.tag, "event channel live");
        if let Some(pending) = self.watch.take_pending() {
            self.watch.subscribe(pending.name.clone(), pending.notify);
            let attach = Command::new(
                "watch-attach",
                encode_watch_attach(&pending.name),
                Expect::Frame(ResponseShape::RESULT),
                Completion::Attach {
                    name: pending.name,
                    done: pending.done,
                },
            );
            // The name continues the watch-init opcode, so nothing may come between.
            self.scheduler.push_front(attach);
        }
        self.scheduler.release();
        self.dispatch_next();
    }

    /// The side transport failed to connect, closed, or sent garbage.
    pub fn on_side_closed(&mut self) {
        let state = self.watch.state();
        if matches!(state, WatchState::NotSubscribed | WatchState::Closed) {
            return;
        }
        tracing::debug!(
            session = %self.tag,
            ?state,
            delivered = self.watch.delivered(),
            "event channel closed"
        );

        let (had_transport, pending) = self.watch.close();
        if had_transport {
            self.actions.push_back(Action::CloseSide);
        }
        let err = ClientError::Transport("event channel closed before it was ready".to_string());
        if let Some(pending) = pending {
            (pending.done)(Err(err.clone()));
        }
        // A lone 0x0A is on the wire and whatever is written next would be
        // taken as the event name, so the command connection cannot continue.
        if state == WatchState::SideChannelConnecting && !self.terminated {
            self.fail(err);
        }
    }
}

fn abandon(completion: Completion) {
    match completion {
        Completion::Reply(callback) => callback(Err(ClientError::ConnectionClosed)),
        Completion::Attach { done, .. } | Completion::Unwatch { done, .. } => {
            done(Err(ClientError::ConnectionClosed))
        }
        Completion::Discard | Completion::WatchInit | Completion::Exit => {}
    }
}
