//! Network Module
//!
//! TCP transports and the blocking session driver.
//!
//! ## Architecture
//! - One reader thread per open connection (command and event channel)
//! - Reader threads forward bytes over a crossbeam channel
//! - The thread owning the `Session` applies them to the protocol core

mod client;
mod query;
mod transport;

pub use client::{Execution, Pending, Session};
pub use query::{Query, Results};
pub use transport::{TcpTransport, TransportEvent, TransportEventKind};
