//! Firmware reflash
//!
//! Runs the external flashing tool against the device, then drains the
//! boot chatter the controller prints while it restarts.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use uartlink_core::protocol::{NativePort, Session, REFLASH_FLUSH_MS};

/// Default firmware image
pub const DEFAULT_FIRMWARE: &str = "dcs-test.bin";

/// Default flash offset of the application image
pub const DEFAULT_OFFSET: &str = "0x10000";

/// How to invoke the flashing tool
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Flashing tool executable
    pub tool: String,
    /// Target chip family
    pub chip: String,
    /// Device the tool should talk to
    pub port: String,
    /// Offset the image is written at
    pub offset: String,
    /// Firmware image
    pub firmware: PathBuf,
}

impl FlashOptions {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.tool);
        cmd.arg("--chip")
            .arg(&self.chip)
            .arg("--port")
            .arg(&self.port)
            .arg("write-flash")
            .arg(&self.offset)
            .arg(&self.firmware);
        cmd
    }
}

/// Flash the controller and drain the link afterwards.
///
/// A failing flash tool is reported but the drain still runs, so the link
/// is left clean either way.
pub fn run(options: &FlashOptions, session: &Session<NativePort>) -> Result<()> {
    tracing::info!(
        "flashing {} to {} at {}",
        options.firmware.display(),
        options.port,
        options.offset
    );

    match options.command().status() {
        Ok(status) if status.success() => tracing::info!("flash complete"),
        Ok(status) => tracing::warn!("{} exited with {status}", options.tool),
        Err(e) => tracing::warn!("could not run {}: {e}", options.tool),
    }

    let discarded = session
        .flush_for(REFLASH_FLUSH_MS)
        .context("draining link after reflash")?;
    tracing::debug!("discarded {discarded} bytes of boot output");
    Ok(())
}
