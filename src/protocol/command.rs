//! Request definitions
//!
//! Represents the requests a client sends over the command connection.

use super::response::{Expect, ResponseShape};

/// Single-byte opcodes preceding document, watch and query requests.
/// Plain text commands carry no opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Query = 0x00,
    Close = 0x02,
    Bind = 0x03,
    Results = 0x04,
    Execute = 0x05,
    Info = 0x06,
    Options = 0x07,
    Create = 0x08,
    Add = 0x09,
    Watch = 0x0A,
    Unwatch = 0x0B,
    Replace = 0x0C,
    Store = 0x0D,
    Context = 0x0E,
    Updating = 0x1E,
}

/// A request that maps onto exactly one command/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Plain database command, e.g. `create db t`
    Command { text: String },

    /// Create a database from an input document
    Create { name: String, input: Vec<u8> },

    /// Add a document to the opened database
    Add { path: String, input: Vec<u8> },

    /// Replace the document at a path
    Replace { path: String, input: Vec<u8> },

    /// Store raw data at a path
    Store { path: String, input: Vec<u8> },

    /// Register query text; the reply is the query id
    OpenQuery { text: String },

    /// Bind an external variable of a query
    Bind {
        id: String,
        name: String,
        value: String,
        type_name: Option<String>,
    },

    /// Bind the context item of a query
    Context {
        id: String,
        value: String,
        type_name: Option<String>,
    },

    /// Stream the result items of a query
    Results { id: String },

    /// Evaluate a query into one string
    ExecuteQuery { id: String },

    /// Compilation and profiling info
    QueryInfo { id: String },

    /// Serialization parameters
    QueryOptions { id: String },

    /// Whether the query contains updating expressions
    Updating { id: String },

    /// Release a query on the server
    CloseQuery { id: String },
}

impl Request {
    pub fn command(text: impl Into<String>) -> Self {
        Request::Command { text: text.into() }
    }

    pub fn create(name: impl Into<String>, input: impl Into<Vec<u8>>) -> Self {
        Request::Create {
            name: name.into(),
            input: input.into(),
        }
    }

    pub fn add(path: impl Into<String>, input: impl Into<Vec<u8>>) -> Self {
        Request::Add {
            path: path.into(),
            input: input.into(),
        }
    }

    pub fn replace(path: impl Into<String>, input: impl Into<Vec<u8>>) -> Self {
        Request::Replace {
            path: path.into(),
            input: input.into(),
        }
    }

    pub fn store(path: impl Into<String>, input: impl Into<Vec<u8>>) -> Self {
        Request::Store {
            path: path.into(),
            input: input.into(),
        }
    }

    /// Opcode byte, `None` for plain text commands
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Request::Command { .. } => None,
            Request::Create { .. } => Some(Opcode::Create),
            Request::Add { .. } => Some(Opcode::Add),
            Request::Replace { .. } => Some(Opcode::Replace),
            Request::Store { .. } => Some(Opcode::Store),
            Request::OpenQuery { .. } => Some(Opcode::Query),
            Request::Bind { .. } => Some(Opcode::Bind),
            Request::Context { .. } => Some(Opcode::Context),
            Request::Results { .. } => Some(Opcode::Results),
            Request::ExecuteQuery { .. } => Some(Opcode::Execute),
            Request::QueryInfo { .. } => Some(Opcode::Info),
            Request::QueryOptions { .. } => Some(Opcode::Options),
            Request::Updating { .. } => Some(Opcode::Updating),
            Request::CloseQuery { .. } => Some(Opcode::Close),
        }
    }

    /// What the reply to this request looks like
    pub fn expect(&self) -> Expect {
        match self {
            Request::Command { .. } => Expect::Frame(ResponseShape::EXECUTE),
            Request::Create { .. }
            | Request::Add { .. }
            | Request::Replace { .. }
            | Request::Store { .. } => Expect::Frame(ResponseShape::RESULT),
            Request::Results { .. } => Expect::Items,
            _ => Expect::Frame(ResponseShape::QUERY),
        }
    }

    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            Request::Command { .. } => "command",
            Request::Create { .. } => "create",
            Request::Add { .. } => "add",
            Request::Replace { .. } => "replace",
            Request::Store { .. } => "store",
            Request::OpenQuery { .. } => "query",
            Request::Bind { .. } => "bind",
            Request::Context { .. } => "context",
            Request::Results { .. } => "results",
            Request::ExecuteQuery { .. } => "execute",
            Request::QueryInfo { .. } => "info",
            Request::QueryOptions { .. } => "options",
            Request::Updating { .. } => "updating",
            Request::CloseQuery { .. } => "close",
        }
    }
}
