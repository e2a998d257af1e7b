//! Query Handle
//!
//! A server-side query cursor identified by the id returned when the query
//! text was registered. The handle does not borrow its session: every
//! operation takes the session it was opened on, so several queries can stay
//! open next to ordinary commands. Once closed, operations fail locally with
//! `QueryClosed`.

use crossbeam::channel::{Receiver, Sender};

use crate::error::{ClientError, Result};
use crate::protocol::{Item, Record, Request};

use super::client::{Pending, Session};

fn into_result(mut record: Record) -> Result<String> {
    Ok(record.take("result").unwrap_or_default())
}

pub struct Query {
    id: String,
    closed: bool,
    /// Ids of handles dropped while open; the session closes them
    orphans: Sender<String>,
}

impl Query {
    pub(crate) fn new(id: String, orphans: Sender<String>) -> Self {
        Self {
            id,
            closed: false,
            orphans,
        }
    }

    /// Server-assigned query id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ClientError::QueryClosed);
        }
        Ok(())
    }

    fn queue(&self, session: &mut Session, request: Request) -> Result<Pending<String>> {
        self.ensure_open()?;
        Ok(session.submit(&request, into_result))
    }

    fn call(&self, session: &mut Session, request: Request) -> Result<String> {
        let pending = self.queue(session, request)?;
        session.wait(pending)
    }

    /// Bind an external variable, optionally with an explicit type
    pub fn bind(
        &self,
        session: &mut Session,
        name: &str,
        value: &str,
        type_name: Option<&str>,
    ) -> Result<()> {
        let request = Request::Bind {
            id: self.id.clone(),
            name: name.to_string(),
            value: value.to_string(),
            type_name: type_name.map(str::to_string),
        };
        self.call(session, request).map(|_| ())
    }

    /// Bind the context item
    pub fn context(&self, session: &mut Session, value: &str, type_name: Option<&str>) -> Result<()> {
        let request = Request::Context {
            id: self.id.clone(),
            value: value.to_string(),
            type_name: type_name.map(str::to_string),
        };
        self.call(session, request).map(|_| ())
    }

    /// Evaluate the query and return the whole serialized result
    pub fn execute(&self, session: &mut Session) -> Result<String> {
        self.call(session, Request::ExecuteQuery { id: self.id.clone() })
    }

    /// Pipelined [`execute`](Self::execute); resolve with [`Session::wait`].
    pub fn queue_execute(&self, session: &mut Session) -> Result<Pending<String>> {
        self.queue(session, Request::ExecuteQuery { id: self.id.clone() })
    }

    /// Evaluate the query item by item.
    ///
    /// The sequence is single pass; register the query again for a fresh
    /// cursor.
    pub fn results<'a>(&self, session: &'a mut Session) -> Result<Results<'a>> {
        self.ensure_open()?;
        let (items, done) = session.submit_streaming(&Request::Results { id: self.id.clone() })?;
        Ok(Results {
            session,
            items,
            done: Some(done),
        })
    }

    /// Compilation and evaluation info
    pub fn info(&self, session: &mut Session) -> Result<String> {
        self.call(session, Request::QueryInfo { id: self.id.clone() })
    }

    /// Serialization parameters
    pub fn options(&self, session: &mut Session) -> Result<String> {
        self.call(session, Request::QueryOptions { id: self.id.clone() })
    }

    /// Whether the query performs updates
    pub fn updating(&self, session: &mut Session) -> Result<bool> {
        let value = self.call(session, Request::Updating { id: self.id.clone() })?;
        Ok(value.trim() == "true")
    }

    /// Release the server-side cursor
    pub fn close(&mut self, session: &mut Session) -> Result<()> {
        let result = self.call(session, Request::CloseQuery { id: self.id.clone() });
        self.closed = true;
        result.map(|_| ())
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // The session is gone if nobody receives
        let _ = self.orphans.send(self.id.clone());
    }
}

/// Lazy results of one query evaluation
pub struct Results<'a> {
    session: &'a mut Session,
    items: Receiver<Item>,
    done: Option<Pending<Record>>,
}

impl Results<'_> {
    /// Collect the remaining item values
    pub fn values(self) -> Result<Vec<String>> {
        self.map(|item| item.map(|item| item.value)).collect()
    }
}

impl Iterator for Results<'_> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Items are sent before the terminal status, so drain them first
            if let Ok(item) = self.items.try_recv() {
                return Some(Ok(item));
            }

            let done = self.done.as_ref()?;
            if done.is_ready() || !self.session.pump(None) {
                let done = self.done.take()?;
                return match self.session.wait(done) {
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                };
            }
        }
    }
}
