//! # uartlink Core Library
//!
//! Host-side driver for a microcontroller that takes single-byte commands
//! over a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Persisted link configuration (rate and device path)
//! - A guarded link session shared between threads or processes
//! - Command frames and a timed, read-once response reader
//! - A post-reflash input drain
//!
//! ## Example
//!
//! ```rust,ignore
//! use uartlink_core::{config::ConfigStore, protocol::{Command, Session}};
//!
//! let config = ConfigStore::default().load().unwrap_or_default();
//! let session = Session::open(&config)?;
//!
//! session.write_command(Command::SendStatus.opcode())?;
//! match session.read_response(500)? {
//!     Some(bytes) => println!("{:02x?}", bytes),
//!     None => println!("no response"),
//! }
//! ```

pub mod config;
pub mod protocol;

pub use config::{ConfigStore, LinkConfig};
pub use protocol::{BaudRate, Command, CommandFrame, LinkError, Session};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
