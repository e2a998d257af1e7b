//! Watch Channel
//!
//! Event notifications travel over a second connection to the server's event
//! port. The channel is opened by the first subscription and reused by every
//! later one.
//!
//! ## Handshake
//! 1. `0A` on the command connection (blocking) → `{eport} 00 {id} 00`
//! 2. Connect to `host:eport`, write `{id} 00`
//! 3. Side channel acknowledges with one field → live
//! 4. Release the pipeline gate, send `{name} 00` on the command connection
//!
//! Later subscriptions send `0A {name} 00`. Notifications arrive as
//! `{name} 00 {data} 00` and go to the handler registered for that name;
//! names without a handler are dropped.

use std::collections::HashMap;

use crate::error::Result;
use crate::protocol::{FrameBuffer, Record, ResponseShape};
use super::scheduler::Callback;

/// Notification handler, called with the event payload
pub type Notify = Box<dyn FnMut(&str) + Send>;

/// Lifecycle of the side channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No side channel and no handshake under way
    NotSubscribed,
    /// Watch-init command queued or awaiting its reply
    Initializing,
    /// Side channel connecting or waiting for its acknowledgement
    SideChannelConnecting,
    /// Notifications flow
    SideChannelReady,
    /// Side channel gone; a new subscription starts over
    Closed,
}

/// The first subscription, parked until the side channel is live
pub struct PendingAttach {
    pub name: String,
    pub notify: Notify,
    pub done: Callback,
}

/// Side channel endpoint from the watch-init reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEndpoint {
    pub port: u16,
    pub id: String,
}

impl WatchEndpoint {
    pub fn from_record(record: &Record) -> Option<Self> {
        let port = record.get("eport")?.trim().parse().ok()?;
        let id = record.get("id")?.to_string();
        Some(Self { port, id })
    }
}

pub struct WatchChannel {
    state: WatchState,
    id: Option<String>,
    pending: Option<PendingAttach>,
    frames: FrameBuffer,
    subscriptions: HashMap<String, Notify>,
    delivered: u64,
}

impl Default for WatchChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchChannel {
    pub fn new() -> Self {
        Self {
            state: WatchState::NotSubscribed,
            id: None,
            pending: None,
            frames: FrameBuffer::new(),
            subscriptions: HashMap::new(),
            delivered: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Whether a new subscription must run the full handshake
    pub fn needs_handshake(&self) -> bool {
        matches!(self.state, WatchState::NotSubscribed | WatchState::Closed)
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions.contains_key(name)
    }

    /// Notifications handed to handlers so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Park the first subscription while the handshake runs
    pub fn begin(&mut self, attach: PendingAttach) {
        self.state = WatchState::Initializing;
        self.id = None;
        self.frames.clear();
        self.pending = Some(attach);
    }

    /// The watch-init reply arrived; the side channel is being opened
    pub fn connecting(&mut self, endpoint: &WatchEndpoint) {
        self.state = WatchState::SideChannelConnecting;
        self.id = Some(endpoint.id.clone());
    }

    /// Id the side channel must present once connected
    pub fn handshake_id(&self) -> Option<&str> {
        match self.state {
            WatchState::SideChannelConnecting => self.id.as_deref(),
            _ => None,
        }
    }

    pub fn take_pending(&mut self) -> Option<PendingAttach> {
        self.pending.take()
    }

    pub fn subscribe(&mut self, name: impl Into<String>, notify: Notify) {
        self.subscriptions.insert(name.into(), notify);
    }

    pub fn unsubscribe(&mut self, name: &str) -> bool {
        self.subscriptions.remove(name).is_some()
    }

    /// Buffer bytes from the side channel
    pub fn feed(&mut self, bytes: &[u8]) {
        self.frames.feed(bytes);
    }

    /// Parse buffered side channel frames. Returns true when the handshake
    /// acknowledgement was consumed by this call.
    pub fn poll(&mut self) -> Result<bool> {
        let mut became_ready = false;
        loop {
            match self.state {
                WatchState::SideChannelConnecting => {
                    match self.frames.read(&ResponseShape::EVENT_ACK)? {
                        Some(_) => {
                            self.state = WatchState::SideChannelReady;
                            became_ready = true;
                        }
                        None => return Ok(became_ready),
                    }
                }
                WatchState::SideChannelReady => {
                    // {name}00{data}00
                    match self.frames.read(&ResponseShape::NOTIFICATION)? {
                        Some(record) => self.dispatch(&record),
                        None => return Ok(became_ready),
                    }
                }
                _ => return Ok(became_ready),
            }
        }
    }

    fn dispatch(&mut self, record: &Record) {
        let name = record.get("name").unwrap_or_default();
        let data = record.get("data").unwrap_or_default();
        match self.subscriptions.get_mut(name) {
            Some(notify) => {
                self.delivered += 1;
                notify(data);
            }
            None => tracing::trace!(event = name, "dropping notification without subscriber"),
        }
    }

    /// Mark the side channel closed and forget every subscription.
    ///
    /// Returns whether a side transport may still be open, plus the parked
    /// first subscription if the handshake never completed.
    pub fn close(&mut self) -> (bool, Option<PendingAttach>) {
        let had_transport = matches!(
            self.state,
            WatchState::SideChannelConnecting | WatchState::SideChannelReady
        );
        self.state = WatchState::Closed;
        self.id = None;
        self.frames.clear();
        self.subscriptions.clear();
        (had_transport, self.pending.take())
    }
}
