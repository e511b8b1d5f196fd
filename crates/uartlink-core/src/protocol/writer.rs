//! Command writer

use super::{
    commands::{Command, CommandFrame},
    serial::LinkPort,
    LinkError, Session,
};

impl<P: LinkPort> Session<P> {
    /// Transmit one frame under the guard.
    ///
    /// Returns the number of bytes the port accepted. A short write is
    /// logged but not treated as an error; callers that care can compare
    /// against [`CommandFrame::encoded_len`].
    pub fn send_frame(&self, frame: CommandFrame) -> Result<usize, LinkError> {
        let bytes = frame.to_bytes();
        self.with_link(|port| {
            let written = port.write(&bytes).map_err(|e| {
                tracing::warn!("write to {} failed: {e}", self.device_path());
                LinkError::from(e)
            })?;
            if written < frame.encoded_len() {
                tracing::debug!(
                    "short write on {}: {} of {} bytes",
                    self.device_path(),
                    written,
                    frame.encoded_len()
                );
            }
            tracing::debug!("sent {:02x?}", &bytes[..written.min(bytes.len())]);
            Ok(written)
        })
    }

    /// Send a single opcode byte
    pub fn write_command(&self, opcode: u8) -> Result<(), LinkError> {
        self.send_frame(CommandFrame::Single(opcode)).map(|_| ())
    }

    /// Send `INIT` followed by `rate` as a little-endian 32-bit value
    pub fn write_init(&self, rate: u32) -> Result<(), LinkError> {
        self.send_frame(CommandFrame::Init(rate)).map(|_| ())
    }

    /// Send a [`Command`]; `Init` is sent with `param`, others ignore it
    pub fn send_command(&self, cmd: Command, param: u32) -> Result<(), LinkError> {
        match cmd {
            Command::Init => self.write_init(param),
            other => self.write_command(other.opcode()),
        }
    }
}
