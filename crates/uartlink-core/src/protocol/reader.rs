//! Response reader

use std::time::{Duration, Instant};

use super::{serial::LinkPort, LinkError, Session, POLL_SLICE, RESPONSE_CAPACITY};

impl<P: LinkPort> Session<P> {
    /// Collect one response within `timeout_ms`.
    ///
    /// Polls in [`POLL_SLICE`] steps and stops after the first read that
    /// returns data, even if more is on its way and time remains. Returns
    /// `Ok(None)` when nothing arrived; that is an answer, not an error.
    /// At most [`RESPONSE_CAPACITY`] bytes are returned.
    pub fn read_response(&self, timeout_ms: u32) -> Result<Option<Vec<u8>>, LinkError> {
        let timeout = Duration::from_millis(u64::from(timeout_ms));

        self.with_link(|port| {
            let mut buffer = vec![0u8; RESPONSE_CAPACITY];
            let mut total = 0usize;
            let start = Instant::now();

            while start.elapsed() < timeout && total < RESPONSE_CAPACITY {
                match port.wait_readable(POLL_SLICE) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        tracing::warn!("poll on {} failed: {e}", self.device_path());
                        break;
                    }
                }

                match port.read(&mut buffer[total..]) {
                    Ok(0) => continue,
                    Ok(n) => {
                        total += n;
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // any other failure, EAGAIN included, ends collection
                    Err(e) => {
                        tracing::warn!("read from {} failed: {e}", self.device_path());
                        break;
                    }
                }
            }

            tracing::debug!(
                "read_response: {} bytes after {}ms",
                total,
                start.elapsed().as_millis()
            );

            if total == 0 {
                return Ok(None);
            }
            buffer.truncate(total);
            Ok(Some(buffer))
        })
    }
}
