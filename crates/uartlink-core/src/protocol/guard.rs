//! Link guard
//!
//! A single permit that serializes every transfer on the link. Two flavours:
//! [`ProcessGuard`] for callers that all live in this process, and
//! [`NamedGuard`] for several processes sharing one physical device.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::LinkError;

/// How often `acquire_within` retries a busy guard
const ACQUIRE_POLL: Duration = Duration::from_millis(2);

/// Default name of the cross-process guard
pub const DEFAULT_GUARD_NAME: &str = "/uart_sem";

/// A mutual-exclusion capability with one permit
pub trait LinkGuard: Send + Sync {
    /// Block until the permit is available and take it
    fn acquire(&self) -> Result<(), LinkError>;

    /// Take the permit if it is free; `Ok(false)` if someone else holds it
    fn try_acquire(&self) -> Result<bool, LinkError>;

    /// Return the permit
    fn release(&self);

    /// Take the permit, giving up after `timeout`
    fn acquire_within(&self, timeout: Duration) -> Result<(), LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LinkError::ExclusionTimeout(timeout));
            }
            std::thread::sleep(ACQUIRE_POLL);
        }
    }
}

/// A held permit, returned to its guard on drop
#[must_use = "the permit is released as soon as it is dropped"]
pub struct Permit<'a> {
    guard: &'a dyn LinkGuard,
}

impl<'a> Permit<'a> {
    /// Take the permit, blocking forever when `timeout` is `None`
    pub fn acquire(guard: &'a dyn LinkGuard, timeout: Option<Duration>) -> Result<Self, LinkError> {
        match timeout {
            Some(t) => guard.acquire_within(t)?,
            None => guard.acquire()?,
        }
        Ok(Self { guard })
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

/// Which guard a session should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardKind {
    /// In-process lock; only threads of this process are serialized
    Process,
    /// Named system semaphore shared by every process using the same name
    Named(String),
}

impl Default for GuardKind {
    fn default() -> Self {
        GuardKind::Named(DEFAULT_GUARD_NAME.to_string())
    }
}

impl GuardKind {
    /// Create (or attach to) the guard
    pub fn build(&self) -> Result<Arc<dyn LinkGuard>, LinkError> {
        match self {
            GuardKind::Process => Ok(Arc::new(ProcessGuard::new())),
            #[cfg(unix)]
            GuardKind::Named(name) => Ok(Arc::new(NamedGuard::open(name)?)),
            #[cfg(not(unix))]
            GuardKind::Named(name) => Err(LinkError::ExclusionUnavailable(format!(
                "named guard {name} is not supported on this platform"
            ))),
        }
    }
}

/// Binary semaphore local to this process
#[derive(Debug, Default)]
pub struct ProcessGuard {
    held: Mutex<bool>,
    freed: Condvar,
}

impl ProcessGuard {
    /// Create a guard with its permit available
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkGuard for ProcessGuard {
    fn acquire(&self) -> Result<(), LinkError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self
                .freed
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        Ok(())
    }

    fn try_acquire(&self) -> Result<bool, LinkError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if *held {
            return Ok(false);
        }
        *held = true;
        Ok(true)
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = false;
        self.freed.notify_one();
    }
}

#[cfg(unix)]
pub use named::NamedGuard;

#[cfg(unix)]
mod named {
    use std::ffi::CString;
    use std::io;

    use super::LinkGuard;
    use crate::protocol::LinkError;

    /// POSIX named semaphore with an initial count of one
    #[derive(Debug)]
    pub struct NamedGuard {
        name: String,
        sem: *mut libc::sem_t,
    }

    // SAFETY: POSIX semaphore operations are thread-safe and the handle is
    // only closed in `Drop`.
    unsafe impl Send for NamedGuard {}
    unsafe impl Sync for NamedGuard {}

    impl NamedGuard {
        /// Open the semaphore `name`, creating it with one permit if needed
        pub fn open(name: &str) -> Result<Self, LinkError> {
            let c_name = CString::new(name)
                .map_err(|e| LinkError::ExclusionUnavailable(e.to_string()))?;

            // SAFETY: `c_name` is NUL-terminated; mode and value are passed
            // as the promoted integer types sem_open reads them as.
            let sem = unsafe {
                libc::sem_open(
                    c_name.as_ptr(),
                    libc::O_CREAT,
                    0o644 as libc::c_uint,
                    1 as libc::c_uint,
                )
            };
            if sem == libc::SEM_FAILED {
                let err = io::Error::last_os_error();
                tracing::error!("sem_open {name} failed: {err}");
                return Err(LinkError::ExclusionUnavailable(format!("{name}: {err}")));
            }

            Ok(Self {
                name: name.to_string(),
                sem,
            })
        }

        /// Name the semaphore was opened with
        pub fn name(&self) -> &str {
            &self.name
        }

        /// Remove the semaphore name from the system.
        ///
        /// Handles that are already open keep working; the next `open`
        /// creates a fresh semaphore with one permit.
        pub fn unlink(name: &str) -> Result<(), LinkError> {
            let c_name = CString::new(name)
                .map_err(|e| LinkError::ExclusionUnavailable(e.to_string()))?;
            // SAFETY: `c_name` is NUL-terminated.
            if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(LinkError::ExclusionUnavailable(format!("{name}: {err}")));
                }
            }
            Ok(())
        }
    }

    impl LinkGuard for NamedGuard {
        fn acquire(&self) -> Result<(), LinkError> {
            loop {
                // SAFETY: `sem` came from a successful sem_open and stays
                // open for the lifetime of `self`.
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(());
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    tracing::error!("sem_wait {} failed: {err}", self.name);
                    return Err(LinkError::ExclusionUnavailable(format!(
                        "{}: {err}",
                        self.name
                    )));
                }
            }
        }

        fn try_acquire(&self) -> Result<bool, LinkError> {
            loop {
                // SAFETY: see `acquire`.
                if unsafe { libc::sem_trywait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) => return Ok(false),
                    Some(libc::EINTR) => continue,
                    _ => {
                        return Err(LinkError::ExclusionUnavailable(format!(
                            "{}: {err}",
                            self.name
                        )))
                    }
                }
            }
        }

        fn release(&self) {
            // SAFETY: see `acquire`.
            if unsafe { libc::sem_post(self.sem) } != 0 {
                tracing::warn!(
                    "sem_post {} failed: {}",
                    self.name,
                    io::Error::last_os_error()
                );
            }
        }
    }

    impl Drop for NamedGuard {
        fn drop(&mut self) {
            // SAFETY: `sem` is open and not used after this point.
            unsafe {
                libc::sem_close(self.sem);
            }
        }
    }
}
