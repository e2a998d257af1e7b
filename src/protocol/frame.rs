//! Incremental frame parser
//!
//! Bytes from the socket are appended with [`FrameBuffer::feed`]; frames are
//! pulled out with [`FrameBuffer::need`], [`FrameBuffer::read`],
//! [`FrameBuffer::next_item`] and [`FrameBuffer::pop_byte`].
//!
//! Extraction is all-or-nothing: a frame is parsed through a cursor over the
//! buffered bytes and the buffer is only advanced once every part of the
//! frame was found. A short read leaves the buffer untouched, so feeding a
//! response one byte at a time yields exactly the records that feeding it in
//! one chunk does.

use std::io::Cursor;

use bytes::{Buf, BytesMut};

use super::response::{ErrorField, Item, Record, ResponseShape};
use crate::error::{ClientError, Result};

/// Field terminator
pub const TERMINATOR: u8 = 0x00;

/// Status byte for a successful request
pub const STATUS_OK: u8 = 0x00;

/// Outcome of one step through a results stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFrame {
    /// One result item; the stream continues
    Item(Item),
    /// Terminal marker plus status (and error text on failure)
    End(Record),
}

/// Why a cursor pass stopped
#[derive(Debug)]
enum FrameError {
    /// Not enough bytes buffered yet
    Incomplete,
    /// Bytes are present but cannot be decoded
    Malformed(String),
}

/// Accumulating inbound byte buffer
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Append raw bytes. Nothing is parsed here.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered, unconsumed bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Extract one terminated string per name, then optionally one status byte.
    ///
    /// Returns `Ok(None)` when the frame is not fully buffered yet. Without a
    /// status byte the record is always `ok`.
    pub fn need(&mut self, fields: &[&'static str], status: bool) -> Result<Option<Record>> {
        self.extract(|src| read_fields(src, fields, status))
    }

    /// Extract a frame described by `shape`, including the trailing error
    /// field or the result-to-info remap that a failed status implies.
    pub fn read(&mut self, shape: &ResponseShape) -> Result<Option<Record>> {
        self.extract(|src| {
            let mut record = read_fields(src, shape.fields, shape.status)?;
            if !record.ok {
                match shape.error {
                    ErrorField::Trailing => {
                        let message = get_field(src)?;
                        record.set("error", message);
                    }
                    ErrorField::Remap => {
                        if let Some(result) = record.take("result") {
                            record.set("info", result);
                        }
                    }
                    ErrorField::Field(_) | ErrorField::None => {}
                }
            }
            Ok(record)
        })
    }

    /// Extract the next step of a results stream: either one typed item or
    /// the terminal marker with its status.
    pub fn next_item(&mut self) -> Result<Option<ItemFrame>> {
        self.extract(|src| {
            let type_id = get_byte(src)?;
            if type_id != TERMINATOR {
                let value = get_field(src)?;
                return Ok(ItemFrame::Item(Item { type_id, value }));
            }

            let status = get_byte(src)?;
            let mut record = Record::new(status == STATUS_OK);
            if status != STATUS_OK {
                record.set("error", get_field(src)?);
            }
            Ok(ItemFrame::End(record))
        })
    }

    /// Consume a single raw byte if one is buffered.
    pub fn pop_byte(&mut self) -> Option<u8> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.get_u8())
    }

    fn extract<T>(
        &mut self,
        parse: impl FnOnce(&mut Cursor<&[u8]>) -> std::result::Result<T, FrameError>,
    ) -> Result<Option<T>> {
        let mut src = Cursor::new(&self.buffer[..]);

        match parse(&mut src) {
            Ok(value) => {
                let len = src.position() as usize;
                self.buffer.advance(len);
                Ok(Some(value))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(FrameError::Malformed(message)) => Err(ClientError::Parser(message)),
        }
    }
}

fn read_fields(
    src: &mut Cursor<&[u8]>,
    fields: &[&'static str],
    status: bool,
) -> std::result::Result<Record, FrameError> {
    let mut record = Record::new(true);
    for &name in fields {
        let value = get_field(src)?;
        record.set(name, value);
    }
    if status {
        record.ok = get_byte(src)? == STATUS_OK;
    }
    Ok(record)
}

/// A field is every byte up to the next terminator.
fn get_field<'a>(src: &mut Cursor<&'a [u8]>) -> std::result::Result<String, FrameError> {
    let start = src.position() as usize;
    let data: &'a [u8] = *src.get_ref();

    let end = match data[start..].iter().position(|b| *b == TERMINATOR) {
        Some(offset) => start + offset,
        None => return Err(FrameError::Incomplete),
    };
    src.set_position((end + 1) as u64);

    String::from_utf8(data[start..end].to_vec())
        .map_err(|_| FrameError::Malformed(format!("field at offset {} is not valid UTF-8", start)))
}

fn get_byte(src: &mut Cursor<&[u8]>) -> std::result::Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Incomplete);
    }
    Ok(src.get_u8())
}
