//! Protocol Module
//!
//! Defines the wire protocol spoken with the server. Nothing in here does
//! I/O: requests are encoded to byte vectors and replies are decoded from an
//! accumulating [`FrameBuffer`].
//!
//! ## Framing
//! ```text
//! ┌────────────┬────┬────────────┬────┬─────────────┐
//! │  field 1   │ 00 │  field 2   │ 00 │ status (1)? │
//! └────────────┴────┴────────────┴────┴─────────────┘
//! ```
//!
//! Frames carry no length prefix and no correlation id: the reader must know
//! the shape of the reply it is waiting for, and replies arrive strictly in
//! request order.
//!
//! ### Status Codes
//! - 0x00: OK
//! - anything else: failure

mod command;
mod response;
mod codec;
mod frame;

pub use command::{Opcode, Request};
pub use response::{ErrorField, Expect, Item, Record, ResponseShape};
pub use codec::{
    encode_exit, encode_field, encode_request, encode_unwatch, encode_watch, encode_watch_attach,
    encode_watch_init, ESCAPE, EXIT_COMMAND,
};
pub use frame::{FrameBuffer, ItemFrame, STATUS_OK, TERMINATOR};
