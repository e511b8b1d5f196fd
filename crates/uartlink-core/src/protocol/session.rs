//! Link session
//!
//! Owns the open port and the guard that serializes access to it. Every
//! operation goes through a `&Session`, so a session shared behind an `Arc`
//! is all the coordination callers need.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use super::{
    guard::{LinkGuard, Permit},
    serial::{self, LinkPort, NativePort},
    LinkError, POLL_SLICE,
};
use crate::config::LinkConfig;

/// Device paths with an open session in this process
fn open_paths() -> &'static Mutex<HashSet<String>> {
    static OPEN_PATHS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    OPEN_PATHS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claim `path` for this process; false if another session holds it
fn register_path(path: &str) -> bool {
    open_paths()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(path.to_string())
}

fn unregister_path(path: &str) {
    open_paths()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(path);
}

/// An open (or closed) serial link
pub struct Session<P: LinkPort = NativePort> {
    /// Port handle, `None` once closed
    port: Mutex<Option<P>>,
    /// Permit shared with every other user of the device
    guard: Arc<dyn LinkGuard>,
    /// Device path the port was opened from
    device_path: String,
    /// Upper bound on waiting for the guard, `None` to wait forever
    acquire_timeout: Option<Duration>,
    /// Whether `device_path` is claimed in the open-path registry
    registered: bool,
}

impl Session<NativePort> {
    /// Open and configure the device described by `config`.
    ///
    /// Attribute configuration runs while holding the guard, so no other
    /// transfer can interleave with it. On any failure the device is closed
    /// again and the guard released before returning.
    pub fn open(config: &LinkConfig) -> Result<Self, LinkError> {
        let path = config.device_path.as_str();
        let guard = config.guard.build()?;

        let permit = Permit::acquire(guard.as_ref(), config.acquire_timeout)?;

        if !register_path(path) {
            tracing::error!("{path} is already open in this process");
            return Err(LinkError::AlreadyOpen(path.to_string()));
        }

        let port = match Self::configure(path, config) {
            Ok(port) => port,
            Err(e) => {
                unregister_path(path);
                return Err(e);
            }
        };
        drop(permit);

        tracing::debug!("opened {path} at {} baud", config.speed);

        Ok(Self {
            port: Mutex::new(Some(port)),
            guard,
            device_path: path.to_string(),
            acquire_timeout: config.acquire_timeout,
            registered: true,
        })
    }

    fn configure(path: &str, config: &LinkConfig) -> Result<NativePort, LinkError> {
        let mut port = serial::open_native(path, config.speed, POLL_SLICE).map_err(|e| {
            tracing::error!("Failed to open UART device {path}: {e}");
            LinkError::DeviceOpenFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;

        serial::read_attributes(&port).map_err(|e| {
            tracing::error!("Failed to get UART attributes: {e}");
            LinkError::AttributeReadFailed(e.to_string())
        })?;

        if let Err(e) = port.clear_input() {
            tracing::warn!("Failed to flush input on {path}: {e}");
        }

        serial::apply_attributes(&mut port, config.speed).map_err(|e| {
            tracing::error!("Failed to set UART attributes: {e}");
            LinkError::AttributeWriteFailed(e.to_string())
        })?;

        Ok(port)
    }
}

impl<P: LinkPort> Session<P> {
    /// Wrap an already-configured port.
    ///
    /// The device path is only used for diagnostics and is not claimed in
    /// the open-path registry.
    pub fn with_port(port: P, guard: Arc<dyn LinkGuard>, device_path: impl Into<String>) -> Self {
        Self {
            port: Mutex::new(Some(port)),
            guard,
            device_path: device_path.into(),
            acquire_timeout: None,
            registered: false,
        }
    }

    /// Bound how long operations wait for the guard
    pub fn set_acquire_timeout(&mut self, timeout: Option<Duration>) {
        self.acquire_timeout = timeout;
    }

    /// Device path the link was opened from
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Check whether the port is still open
    pub fn is_open(&self) -> bool {
        self.lock_port().is_some()
    }

    /// Close the port. Closing an already-closed session does nothing.
    pub fn close(&self) {
        let port = self.lock_port().take();
        if port.is_some() {
            tracing::debug!("closing {}", self.device_path);
            if self.registered {
                unregister_path(&self.device_path);
            }
        }
    }

    pub(crate) fn lock_port(&self) -> MutexGuard<'_, Option<P>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` against the port while holding the guard.
    ///
    /// The permit is released on every path out, including errors.
    pub(crate) fn with_link<T>(
        &self,
        op: impl FnOnce(&mut P) -> Result<T, LinkError>,
    ) -> Result<T, LinkError> {
        let _permit = Permit::acquire(self.guard.as_ref(), self.acquire_timeout)?;
        let mut slot = self.lock_port();
        let port = slot.as_mut().ok_or(LinkError::LinkNotOpen)?;
        op(port)
    }
}

impl<P: LinkPort> Drop for Session<P> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: LinkPort> std::fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_path", &self.device_path)
            .field("open", &self.is_open())
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}
