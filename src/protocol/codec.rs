//! Protocol codec
//!
//! Encoding functions for outgoing requests. Decoding is incremental and
//! lives in [`super::frame`].
//!
//! ## Wire Format
//!
//! ```text
//! command:   {text} 00
//! document:  {op} {path} 00 {input} 00
//! query:     {op} {id} 00 [{arg} 00 ...]
//! watch:     0A {name} 00            (0A alone for the first subscription)
//! unwatch:   0B {name} 00
//! ```
//!
//! Document inputs are sent raw with `00` and `FF` bytes escaped by a
//! leading `FF`. Every other field must not contain the terminator.

use super::command::{Opcode, Request};
use super::frame::TERMINATOR;

/// Escape byte for raw document input
pub const ESCAPE: u8 = 0xFF;

/// Text command that ends a session
pub const EXIT_COMMAND: &str = "exit";

// =============================================================================
// Request Encoding
// =============================================================================

/// Encode a request to bytes
pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(opcode) = request.opcode() {
        out.push(opcode as u8);
    }

    match request {
        Request::Command { text } => push_field(&mut out, text),
        Request::Create { name: path, input }
        | Request::Add { path, input }
        | Request::Replace { path, input }
        | Request::Store { path, input } => {
            push_field(&mut out, path);
            push_input(&mut out, input);
        }
        Request::OpenQuery { text } => push_field(&mut out, text),
        Request::Bind {
            id,
            name,
            value,
            type_name,
        } => {
            push_field(&mut out, id);
            push_field(&mut out, name);
            push_field(&mut out, value);
            push_field(&mut out, type_name.as_deref().unwrap_or(""));
        }
        Request::Context {
            id,
            value,
            type_name,
        } => {
            push_field(&mut out, id);
            push_field(&mut out, value);
            push_field(&mut out, type_name.as_deref().unwrap_or(""));
        }
        Request::Results { id }
        | Request::ExecuteQuery { id }
        | Request::QueryInfo { id }
        | Request::QueryOptions { id }
        | Request::Updating { id }
        | Request::CloseQuery { id } => push_field(&mut out, id),
    }

    out
}

// =============================================================================
// Session Control
// =============================================================================

/// A single terminated field (login name, digest, side channel id)
pub fn encode_field(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 1);
    push_field(&mut out, value);
    out
}

/// Opening half of the first watch: the opcode alone
pub fn encode_watch_init() -> Vec<u8> {
    vec![Opcode::Watch as u8]
}

/// Closing half of the first watch: the event name that continues `0A`
pub fn encode_watch_attach(name: &str) -> Vec<u8> {
    encode_field(name)
}

/// Watch on a session whose side channel is already open
pub fn encode_watch(name: &str) -> Vec<u8> {
    let mut out = vec![Opcode::Watch as u8];
    push_field(&mut out, name);
    out
}

pub fn encode_unwatch(name: &str) -> Vec<u8> {
    let mut out = vec![Opcode::Unwatch as u8];
    push_field(&mut out, name);
    out
}

pub fn encode_exit() -> Vec<u8> {
    encode_field(EXIT_COMMAND)
}

// =============================================================================
// Helpers
// =============================================================================

fn push_field(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.as_bytes());
    out.push(TERMINATOR);
}

fn push_input(out: &mut Vec<u8>, input: &[u8]) {
    out.reserve(input.len() + 1);
    for &byte in input {
        if byte == TERMINATOR || byte == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(byte);
    }
    out.push(TERMINATOR);
}
