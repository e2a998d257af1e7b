//! # basex-client
//!
//! Client engine for the BaseX server protocol:
//! - Incremental frame parser for NUL-terminated fields and status bytes
//! - FIFO command pipeline with a blocking gate
//! - Login with MD5 challenge/response
//! - Query cursors (bind, context, execute, streamed results, info)
//! - Event notifications over an on-demand side channel
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 network::Session (driver)                   │
//! │         queue / wait / pump, Query handles, watch           │
//! └──────────────┬──────────────────────────────▲───────────────┘
//!                │ operations                   │ actions
//! ┌──────────────▼──────────────────────────────┴───────────────┐
//! │                  session::SessionCore                       │
//! │        (state machine, no I/O, one owning thread)           │
//! └──────┬──────────────────┬──────────────────────┬────────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//!   ┌───────────┐    ┌─────────────┐        ┌─────────────┐
//!   │ Scheduler │    │ FrameBuffer │        │ WatchChannel│
//!   │  (FIFO)   │    │  (parser)   │        │ (side conn) │
//!   └───────────┘    └─────────────┘        └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod session;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClientError, Result};
pub use config::Config;
pub use network::{Execution, Pending, Query, Results, Session};
pub use protocol::{Item, Record, Request};
pub use session::{EventKind, SessionEvent, State, WatchState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of basex-client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
