//! Command Scheduler
//!
//! FIFO pipeline between the caller and the command connection.
//!
//! ## Queues
//! - `pending`: accepted, not yet written
//! - `current`: written, its reply is being parsed
//! - `in_flight`: written behind `current`, replies not yet reached
//!
//! The wire format has no correlation id, so the n-th reply always belongs
//! to the n-th written command. Several commands may be written before any
//! reply arrives; a blocking command stops further writes until the gate is
//! released with [`Scheduler::release`].

use std::collections::VecDeque;

use crate::error::{ClientError, Result};
use crate::protocol::{Expect, FrameBuffer, Item, ItemFrame, Record, STATUS_OK};

/// Completion callback with the (error, record) convention folded into a `Result`
pub type Callback = Box<dyn FnOnce(Result<Record>) + Send>;

/// Receives each item of a results stream as it is parsed
pub type ItemSink = Box<dyn FnMut(Item) + Send>;

/// What happens when a command's reply is complete
pub enum Completion {
    /// Hand the result to the caller
    Reply(Callback),
    /// Nobody is waiting
    Discard,
    /// First watch reply; the session opens the side channel
    WatchInit,
    /// Subscription acknowledgement; a failure drops the local entry
    Attach { name: String, done: Callback },
    /// Unsubscribe acknowledgement; success drops the local entry
    Unwatch { name: String, done: Callback },
    /// Session-terminating command
    Exit,
}

/// One command in the pipeline
pub struct Command {
    label: &'static str,
    payload: Vec<u8>,
    expect: Expect,
    completion: Completion,
    items: Option<ItemSink>,
    blocking: bool,
}

impl Command {
    pub fn new(label: &'static str, payload: Vec<u8>, expect: Expect, completion: Completion) -> Self {
        Self {
            label,
            payload,
            expect,
            completion,
            items: None,
            blocking: false,
        }
    }

    /// Stop later commands from being written until the gate is released
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn with_items(mut self, sink: ItemSink) -> Self {
        self.items = Some(sink);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn into_completion(self) -> Completion {
        self.completion
    }
}

/// Bytes to write for one dispatched command
#[derive(Debug)]
pub struct Dispatch {
    pub label: &'static str,
    pub payload: Vec<u8>,
    /// The command ends the session once written
    pub ends_session: bool,
}

/// A command whose reply has been fully parsed
pub struct Finished {
    pub label: &'static str,
    pub completion: Completion,
    pub result: Result<Record>,
}

#[derive(Default)]
pub struct Scheduler {
    pending: VecDeque<Command>,
    in_flight: VecDeque<Command>,
    current: Option<Command>,
    blocked: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command behind everything already pending
    pub fn push(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    /// Queue a command ahead of everything pending
    pub fn push_front(&mut self, command: Command) {
        self.pending.push_front(command);
    }

    /// Pop the next writable command, if writing is allowed.
    ///
    /// The command becomes `current` when nothing awaits a reply, otherwise
    /// it joins the in-flight queue. A blocking command closes the gate.
    pub fn dispatch_one(&mut self, connected: bool) -> Option<Dispatch> {
        if !connected || self.blocked {
            return None;
        }
        let mut command = self.pending.pop_front()?;

        let dispatch = Dispatch {
            label: command.label,
            payload: std::mem::take(&mut command.payload),
            ends_session: matches!(command.completion, Completion::Exit),
        };
        self.blocked = command.blocking;

        if self.current.is_none() {
            self.current = Some(command);
        } else {
            self.in_flight.push_back(command);
        }
        Some(dispatch)
    }

    /// Reopen the gate closed by a blocking command
    pub fn release(&mut self) {
        self.blocked = false;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Commands not yet written
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Commands written and awaiting a reply, including `current`
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len() + usize::from(self.current.is_some())
    }

    /// Whether some written command is still awaiting its reply
    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Advance the current command's parser.
    ///
    /// Items of a results stream are handed to the command's sink as they
    /// are parsed. Returns the command once its reply is complete and
    /// promotes the next in-flight command; `Ok(None)` means more bytes are
    /// needed (or nothing is in flight).
    pub fn poll(&mut self, frames: &mut FrameBuffer) -> Result<Option<Finished>> {
        loop {
            let command = match self.current.as_mut() {
                Some(command) => command,
                None => return Ok(None),
            };

            let record = match command.expect {
                Expect::Frame(shape) => match frames.read(&shape)? {
                    Some(record) => record,
                    None => return Ok(None),
                },
                Expect::Status => match frames.pop_byte() {
                    Some(status) => Record::new(status == STATUS_OK),
                    None => return Ok(None),
                },
                Expect::Items => match frames.next_item()? {
                    Some(ItemFrame::Item(item)) => {
                        if let Some(sink) = command.items.as_mut() {
                            sink(item);
                        }
                        continue;
                    }
                    Some(ItemFrame::End(record)) => record,
                    None => return Ok(None),
                },
            };

            let expect = command.expect;
            let finished = match self.current.take() {
                Some(command) => command,
                None => return Ok(None),
            };
            self.current = self.in_flight.pop_front();

            let result = if record.ok {
                Ok(record)
            } else {
                Err(ClientError::Server(expect.error_message(&record)))
            };
            return Ok(Some(Finished {
                label: finished.label,
                completion: finished.completion,
                result,
            }));
        }
    }

    /// Remove every command in send order: current, in flight, then pending.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(self.in_flight_len() + self.pending.len());
        commands.extend(self.current.take());
        commands.extend(self.in_flight.drain(..));
        commands.extend(self.pending.drain(..));
        self.blocked = false;
        commands
    }
}
