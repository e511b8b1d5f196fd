//! Serial port handling
//!
//! Speed mapping and the low-level port abstraction the session drives.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Transport speeds the link can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
    B230400,
    B460800,
    B921600,
}

impl BaudRate {
    /// Every supported speed, slowest first
    pub const ALL: [BaudRate; 8] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
        BaudRate::B230400,
        BaudRate::B460800,
        BaudRate::B921600,
    ];

    /// Exact lookup, `None` for anything outside the supported set
    pub fn from_rate(rate: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_u32() == rate)
    }

    /// Numeric rate in bits per second
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
            BaudRate::B230400 => 230400,
            BaudRate::B460800 => 460800,
            BaudRate::B921600 => 921600,
        }
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Map a numeric rate to a transport speed.
///
/// Unsupported rates log a warning and fall back to 115200.
pub fn map_speed(rate: u32) -> BaudRate {
    BaudRate::from_rate(rate).unwrap_or_else(|| {
        tracing::warn!("Unsupported baudrate: {rate}. Using default 115200.");
        BaudRate::default()
    })
}

/// Byte-level operations the link needs from a serial descriptor.
///
/// Implemented for the native serial port types and for test doubles.
pub trait LinkPort: Send {
    /// Wait up to `slice` for input. `Ok(false)` means the slice expired.
    fn wait_readable(&mut self, slice: Duration) -> io::Result<bool>;

    /// One read of up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// One write; returns the number of bytes accepted
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Discard anything queued on the input side
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Platform serial port the session opens by default
#[cfg(unix)]
pub type NativePort = serialport::TTYPort;

/// Platform serial port the session opens by default
#[cfg(windows)]
pub type NativePort = serialport::COMPort;

/// Open `path` at `speed`, 8N1 with no flow control.
///
/// The port is left non-exclusive so an external flashing tool can still
/// take the device while the session holds it.
#[cfg(unix)]
pub(crate) fn open_native(
    path: &str,
    speed: BaudRate,
    read_slice: Duration,
) -> Result<NativePort, serialport::Error> {
    let mut port = builder(path, speed, read_slice).open_native()?;
    port.set_exclusive(false)?;
    Ok(port)
}

#[cfg(windows)]
pub(crate) fn open_native(
    path: &str,
    speed: BaudRate,
    read_slice: Duration,
) -> Result<NativePort, serialport::Error> {
    builder(path, speed, read_slice).open_native()
}

fn builder(path: &str, speed: BaudRate, read_slice: Duration) -> serialport::SerialPortBuilder {
    serialport::new(path, speed.as_u32())
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_slice)
}

/// Read the current attributes back from the port
pub(crate) fn read_attributes<S: SerialPort + ?Sized>(port: &S) -> Result<(), serialport::Error> {
    let baud = port.baud_rate()?;
    let data_bits = port.data_bits()?;
    let parity = port.parity()?;
    let stop_bits = port.stop_bits()?;
    tracing::debug!(
        "current attributes: baud={}, data_bits={:?}, parity={:?}, stop_bits={:?}",
        baud,
        data_bits,
        parity,
        stop_bits
    );
    Ok(())
}

/// Commit speed and 8N1 framing with no flow control
pub(crate) fn apply_attributes<S: SerialPort + ?Sized>(
    port: &mut S,
    speed: BaudRate,
) -> Result<(), serialport::Error> {
    port.set_baud_rate(speed.as_u32())?;
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    Ok(())
}

#[cfg(unix)]
impl LinkPort for serialport::TTYPort {
    fn wait_readable(&mut self, slice: Duration) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let mut fds = libc::pollfd {
            fd: self.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = slice.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `fds` is a single valid pollfd that outlives the call.
        let ready = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(false);
        }
        if fds.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial descriptor reported an error condition",
            ));
        }
        Ok(true)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        SerialPort::clear(self, serialport::ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Wait for input by polling the driver's queue length
#[cfg(windows)]
fn poll_queue<S: SerialPort + ?Sized>(port: &S, slice: Duration) -> io::Result<bool> {
    let deadline = std::time::Instant::now() + slice;
    loop {
        if port.bytes_to_read()? > 0 {
            return Ok(true);
        }
        if std::time::Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(windows)]
impl LinkPort for serialport::COMPort {
    fn wait_readable(&mut self, slice: Duration) -> io::Result<bool> {
        poll_queue(self, slice)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        SerialPort::clear(self, serialport::ClearBuffer::Input).map_err(io::Error::from)
    }
}
