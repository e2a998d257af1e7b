//! Response definitions
//!
//! Decoded frames and the shape descriptors that tell the frame parser what
//! a request's reply looks like on the wire.

/// One decoded frame: named string fields plus the derived status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(&'static str, String)>,

    /// False when the frame carried a nonzero status byte
    pub ok: bool,
}

impl Record {
    pub fn new(ok: bool) -> Self {
        Self {
            fields: Vec::new(),
            ok,
        }
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, name: &'static str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field and return its value
    pub fn take(&mut self, name: &str) -> Option<String> {
        let index = self.fields.iter().position(|(field, _)| *field == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Fields in wire order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.fields.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

/// One item of a query results stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Server type id of the item (never 0)
    pub type_id: u8,

    /// Serialized item
    pub value: String,
}

/// Where the error text of a failed frame lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorField {
    /// A named field of the frame carries the message
    Field(&'static str),
    /// The `result` field is moved to `info` on failure
    Remap,
    /// An extra field follows the status byte on failure
    Trailing,
    /// The frame has no error text
    None,
}

/// Layout of a terminated-field frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseShape {
    /// Field names, in wire order
    pub fields: &'static [&'static str],

    /// Whether a status byte follows the fields
    pub status: bool,

    pub error: ErrorField,
}

impl ResponseShape {
    /// Login challenge (timestamp or `realm:nonce`)
    pub const CHALLENGE: Self = Self {
        fields: &["data"],
        status: false,
        error: ErrorField::None,
    };

    /// Generic command: result and info, then status
    pub const EXECUTE: Self = Self {
        fields: &["result", "info"],
        status: true,
        error: ErrorField::Field("info"),
    };

    /// Document operations and watch/unwatch acknowledgements
    pub const RESULT: Self = Self {
        fields: &["result"],
        status: true,
        error: ErrorField::Remap,
    };

    /// First watch reply: event port and connection id, no status
    pub const WATCH_INIT: Self = Self {
        fields: &["eport", "id"],
        status: false,
        error: ErrorField::None,
    };

    /// Query commands: value then status, error text after a failed status
    pub const QUERY: Self = Self {
        fields: &["result"],
        status: true,
        error: ErrorField::Trailing,
    };

    /// Side channel handshake acknowledgement
    pub const EVENT_ACK: Self = Self {
        fields: &["connected"],
        status: false,
        error: ErrorField::None,
    };

    /// Side channel notification.
    ///
    /// One notification carries one payload, but the server prefixes it
    /// with the event name so a single side channel can serve every
    /// subscription. Both fields are read and `name` selects the handler.
    pub const NOTIFICATION: Self = Self {
        fields: &["name", "data"],
        status: false,
        error: ErrorField::None,
    };

    /// Error text of a failed record read with this shape
    pub fn error_message(&self, record: &Record) -> String {
        let message = match self.error {
            ErrorField::Field(name) => record.get(name),
            ErrorField::Remap => record.get("info"),
            ErrorField::Trailing => record.get("error"),
            ErrorField::None => None,
        };
        message.unwrap_or("request failed").to_string()
    }
}

/// What the scheduler must extract to complete a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// One frame of the given shape
    Frame(ResponseShape),
    /// A single raw status byte
    Status,
    /// A results stream: items until the terminal marker
    Items,
}

impl Expect {
    pub fn error_message(&self, record: &Record) -> String {
        match self {
            Expect::Frame(shape) => shape.error_message(record),
            Expect::Items => record.get("error").unwrap_or("request failed").to_string(),
            Expect::Status => "request failed".to_string(),
        }
    }
}
