//! Session Module
//!
//! Protocol state of one client session, independent of any transport.
//!
//! ## Components
//! - `core`: the session state machine, fed transport events, emits actions
//! - `scheduler`: FIFO command pipeline with a blocking gate
//! - `watch`: event side channel and subscription routing
//! - `auth`: login digest
//! - `events`: ready/closed/error listeners

mod auth;
mod core;
mod events;
mod scheduler;
mod watch;

pub use self::auth::{digest, md5_hex};
pub use self::core::{Action, Channel, SessionCore, State};
pub use self::events::{EventKind, Listener, Listeners, SessionEvent};
pub use self::scheduler::{Callback, Command, Completion, ItemSink, Scheduler};
pub use self::watch::{Notify, WatchState};
