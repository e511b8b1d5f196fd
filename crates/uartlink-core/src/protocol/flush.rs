//! Startup flusher
//!
//! Drains whatever a freshly flashed controller prints while it boots.

use super::{serial::LinkPort, LinkError, Session, FLUSH_SLICE};

impl<P: LinkPort> Session<P> {
    /// Read and discard input for `duration_ms`, then flush the input queue.
    ///
    /// Does not take the guard: this runs between command cycles, typically
    /// right after an external tool has had exclusive use of the device.
    /// Time is counted in whole [`FLUSH_SLICE`] steps. Returns how many
    /// bytes were thrown away.
    pub fn flush_for(&self, duration_ms: u32) -> Result<usize, LinkError> {
        let mut slot = self.lock_port();
        let port = slot.as_mut().ok_or(LinkError::LinkNotOpen)?;

        let slice_ms = FLUSH_SLICE.as_millis() as u32;
        let mut scratch = [0u8; 256];
        let mut discarded = 0usize;
        let mut waited_ms = 0u32;

        while waited_ms < duration_ms {
            if let Ok(true) = port.wait_readable(FLUSH_SLICE) {
                match port.read(&mut scratch) {
                    Ok(n) if n > 0 => {
                        discarded += n;
                        tracing::trace!("discarded {:02x?}", &scratch[..n]);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("flush read failed: {e}"),
                }
            }
            waited_ms = waited_ms.saturating_add(slice_ms);
        }

        if let Err(e) = port.clear_input() {
            tracing::warn!("input flush on {} failed: {e}", self.device_path());
        }

        tracing::debug!("startup flush discarded {discarded} bytes");
        Ok(discarded)
    }
}
