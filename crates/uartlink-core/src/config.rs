//! Link configuration
//!
//! The persisted record is two whitespace-separated tokens, the decimal
//! rate and the device path:
//!
//! ```text
//! 115200
//! /dev/ttyUSB0
//! ```
//!
//! Persistence is advisory. A missing or garbled record loads as "no
//! config" and a failed save is only logged.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{map_speed, BaudRate, GuardKind};

/// Well-known location of the persisted record
pub const CONFIG_FILE: &str = "/tmp/uart_config.txt";

/// Device used when nothing else is configured
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Parameters needed to open the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Transport speed
    pub speed: BaudRate,
    /// Serial device path (e.g. "/dev/ttyUSB0")
    pub device_path: String,
    /// Guard serializing access to the device (not persisted)
    pub guard: GuardKind,
    /// Upper bound on waiting for the guard (not persisted)
    pub acquire_timeout: Option<Duration>,
}

impl LinkConfig {
    /// Config for `device_path` at `speed` with the default guard
    pub fn new(speed: BaudRate, device_path: impl Into<String>) -> Self {
        Self {
            speed,
            device_path: device_path.into(),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            speed: BaudRate::default(),
            device_path: DEFAULT_DEVICE.to_string(),
            guard: GuardKind::default(),
            acquire_timeout: None,
        }
    }
}

/// Reads and writes the persisted link record
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::at(CONFIG_FILE)
    }
}

impl ConfigStore {
    /// Store backed by a record at `path`
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Location of the record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, `None` if it is absent or malformed
    pub fn load(&self) -> Option<LinkConfig> {
        let content = fs::read_to_string(&self.path).ok()?;
        let (rate, device_path) = parse_record(&content)?;
        Some(LinkConfig::new(map_speed(rate), device_path))
    }

    /// Overwrite the record with `config`'s rate and device path
    pub fn save(&self, config: &LinkConfig) {
        let record = format!("{}\n{}", config.speed.as_u32(), config.device_path);
        if let Err(e) = fs::write(&self.path, record) {
            tracing::debug!("not saving link config to {}: {e}", self.path.display());
        }
    }
}

/// Split a record into its rate and device path
fn parse_record(content: &str) -> Option<(u32, String)> {
    let mut tokens = content.split_whitespace();
    let rate = tokens.next()?.parse::<u32>().ok()?;
    let device_path = tokens.next()?.to_string();
    Some((rate, device_path))
}
