//! Serial Link Protocol
//!
//! Single-byte command transport to the controller: guarded link session,
//! command frames, timed response collection and the post-flash drain.

pub mod commands;
mod error;
mod flush;
pub mod guard;
mod reader;
pub mod serial;
mod session;
mod writer;

use std::time::Duration;

pub use commands::{Command, CommandFrame};
pub use error::LinkError;
#[cfg(unix)]
pub use guard::NamedGuard;
pub use guard::{GuardKind, LinkGuard, Permit, ProcessGuard};
pub use serial::{map_speed, BaudRate, LinkPort, NativePort};
pub use session::Session;

/// Default baud rate for the link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Wait granularity while collecting a response
pub const POLL_SLICE: Duration = Duration::from_millis(20);

/// Wait granularity while draining after a reflash
pub const FLUSH_SLICE: Duration = Duration::from_millis(50);

/// Largest response a single read can return
pub const RESPONSE_CAPACITY: usize = 2048;

/// How long to drain after a reflash, in milliseconds
pub const REFLASH_FLUSH_MS: u32 = 10_000;
