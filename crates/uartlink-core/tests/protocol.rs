use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use uartlink_core::protocol::{
    Command, CommandFrame, LinkError, LinkGuard, LinkPort, Permit, ProcessGuard, Session,
    RESPONSE_CAPACITY,
};

/// What the far end of the mock link sees and sends
#[derive(Default)]
struct Wire {
    sent: Vec<u8>,
    incoming: VecDeque<Vec<u8>>,
    clears: usize,
    reads: usize,
    zero_reads: usize,
    write_limit: Option<usize>,
    byte_delay: Duration,
    fail_wait: bool,
    read_error: Option<io::ErrorKind>,
}

/// Mock serial port for testing
#[derive(Clone, Default)]
struct MockSerial {
    wire: Arc<Mutex<Wire>>,
}

impl MockSerial {
    fn new() -> Self {
        Self::default()
    }

    fn with_response(chunks: &[&[u8]]) -> Self {
        let mock = Self::new();
        mock.wire
            .lock()
            .unwrap()
            .incoming
            .extend(chunks.iter().map(|c| c.to_vec()));
        mock
    }

    /// A second port attached to the same physical wire
    fn sharing(&self) -> Self {
        self.clone()
    }

    fn sent(&self) -> Vec<u8> {
        self.wire.lock().unwrap().sent.clone()
    }

    fn pending(&self) -> Vec<Vec<u8>> {
        self.wire.lock().unwrap().incoming.iter().cloned().collect()
    }

    fn edit(&self, f: impl FnOnce(&mut Wire)) {
        f(&mut self.wire.lock().unwrap());
    }
}

impl LinkPort for MockSerial {
    fn wait_readable(&mut self, slice: Duration) -> io::Result<bool> {
        {
            let wire = self.wire.lock().unwrap();
            if wire.fail_wait {
                return Err(io::Error::new(io::ErrorKind::Other, "poll failed"));
            }
            if !wire.incoming.is_empty() || wire.zero_reads > 0 {
                return Ok(true);
            }
        }
        thread::sleep(slice);
        Ok(false)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        wire.reads += 1;
        if let Some(kind) = wire.read_error {
            return Err(io::Error::new(kind, "read failed"));
        }
        if wire.zero_reads > 0 {
            wire.zero_reads -= 1;
            return Ok(0);
        }
        let Some(mut chunk) = wire.incoming.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            wire.incoming.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (limit, delay) = {
            let wire = self.wire.lock().unwrap();
            (wire.write_limit.unwrap_or(buf.len()).min(buf.len()), wire.byte_delay)
        };
        // one byte at a time so unguarded writers would interleave
        for &byte in &buf[..limit] {
            self.wire.lock().unwrap().sent.push(byte);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        Ok(limit)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut wire = self.wire.lock().unwrap();
        wire.incoming.clear();
        wire.clears += 1;
        Ok(())
    }
}

fn session(mock: &MockSerial) -> Session<MockSerial> {
    Session::with_port(mock.sharing(), Arc::new(ProcessGuard::new()), "mock")
}

#[test]
fn test_simple_opcodes_reach_the_wire_unmodified() {
    for cmd in Command::SIMPLE {
        let mock = MockSerial::new();
        let link = session(&mock);
        link.write_command(cmd.opcode()).unwrap();
        assert_eq!(mock.sent(), vec![cmd.opcode()]);
    }
}

#[test]
fn test_init_frame_on_the_wire() {
    for rate in [0u32, 1, 9600, 115200, 0xDEAD_BEEF, u32::MAX] {
        let mock = MockSerial::new();
        let link = session(&mock);
        link.write_init(rate).unwrap();

        let sent = mock.sent();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0], 0xFF);
        assert_eq!(u32::from_le_bytes([sent[1], sent[2], sent[3], sent[4]]), rate);
    }
}

#[test]
fn test_send_command_dispatch() {
    let mock = MockSerial::new();
    let link = session(&mock);
    link.send_command(Command::LedOff, 1234).unwrap();
    link.send_command(Command::Init, 57600).unwrap();
    assert_eq!(mock.sent(), vec![0xA5, 0xFF, 0x00, 0xE1, 0x00, 0x00]);
}

#[test]
fn test_short_write_is_not_an_error() {
    let mock = MockSerial::new();
    mock.edit(|w| w.write_limit = Some(0));
    let link = session(&mock);

    // current behaviour: a write the port does not accept still succeeds
    assert!(link.write_command(Command::StopSystem.opcode()).is_ok());
    assert_eq!(link.send_frame(CommandFrame::Init(42)).unwrap(), 0);
    assert!(mock.sent().is_empty());
}

#[test]
fn test_closed_session_reports_link_not_open() {
    let mock = MockSerial::with_response(&[b"late"]);
    let link = session(&mock);
    link.close();

    assert!(matches!(link.write_command(0xA1), Err(LinkError::LinkNotOpen)));
    assert!(matches!(link.write_init(9600), Err(LinkError::LinkNotOpen)));
    assert!(matches!(link.read_response(50), Err(LinkError::LinkNotOpen)));
    assert!(matches!(link.flush_for(50), Err(LinkError::LinkNotOpen)));
    assert!(mock.sent().is_empty());
}

#[test]
fn test_read_response_times_out_with_none() {
    let mock = MockSerial::new();
    let link = session(&mock);

    let start = Instant::now();
    let response = link.read_response(100).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response, None);
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    // at most one poll slice of overshoot, plus a little scheduler slack
    assert!(elapsed < Duration::from_millis(100 + 20 + 10), "{elapsed:?}");
}

#[test]
fn test_read_response_stops_after_first_read() {
    let mock = MockSerial::with_response(&[b"OK", b"MORE"]);
    let link = session(&mock);

    let response = link.read_response(1000).unwrap();
    assert_eq!(response, Some(b"OK".to_vec()));
    // the second chunk was ready but not collected
    assert_eq!(mock.pending(), vec![b"MORE".to_vec()]);

    assert_eq!(link.read_response(1000).unwrap(), Some(b"MORE".to_vec()));
}

#[test]
fn test_read_response_returns_quickly_when_data_is_ready() {
    let mock = MockSerial::with_response(&[&[0x01, 0x02, 0x03]]);
    let link = session(&mock);

    let start = Instant::now();
    assert_eq!(link.read_response(5000).unwrap(), Some(vec![1, 2, 3]));
    assert!(start.elapsed() < Duration::from_millis(1000));
}

#[test]
fn test_read_response_is_capped() {
    let big = vec![0x55u8; RESPONSE_CAPACITY + 500];
    let mock = MockSerial::with_response(&[&big]);
    let link = session(&mock);

    let response = link.read_response(100).unwrap().unwrap();
    assert_eq!(response.len(), RESPONSE_CAPACITY);
    assert_eq!(mock.pending()[0].len(), 500);
}

#[test]
fn test_zero_byte_read_keeps_polling() {
    let mock = MockSerial::with_response(&[b"hi"]);
    mock.edit(|w| w.zero_reads = 2);
    let link = session(&mock);

    assert_eq!(link.read_response(500).unwrap(), Some(b"hi".to_vec()));
    assert_eq!(mock.wire.lock().unwrap().reads, 3);
}

#[test]
fn test_read_failure_aborts_but_keeps_link_open() {
    let mock = MockSerial::with_response(&[b"x"]);
    mock.edit(|w| w.read_error = Some(io::ErrorKind::Other));
    let link = session(&mock);

    assert_eq!(link.read_response(500).unwrap(), None);
    assert_eq!(mock.wire.lock().unwrap().reads, 1);
    assert!(link.is_open());
    link.write_command(0xA6).unwrap();
    assert_eq!(mock.sent(), vec![0xA6]);
}

#[test]
fn test_would_block_read_aborts_instead_of_spinning() {
    for kind in [io::ErrorKind::WouldBlock, io::ErrorKind::TimedOut] {
        let mock = MockSerial::with_response(&[b"x"]);
        mock.edit(|w| w.read_error = Some(kind));
        let link = session(&mock);

        let start = Instant::now();
        assert_eq!(link.read_response(200).unwrap(), None, "{kind:?}");
        assert!(start.elapsed() < Duration::from_millis(100), "{kind:?}");
        assert_eq!(mock.wire.lock().unwrap().reads, 1, "{kind:?}");
    }
}

#[test]
fn test_poll_failure_aborts_immediately() {
    let mock = MockSerial::new();
    mock.edit(|w| w.fail_wait = true);
    let link = session(&mock);

    let start = Instant::now();
    assert_eq!(link.read_response(5000).unwrap(), None);
    assert!(start.elapsed() < Duration::from_millis(1000));
}

#[test]
fn test_operations_release_the_guard() {
    let guard = Arc::new(ProcessGuard::new());
    let mock = MockSerial::with_response(&[b"r"]);
    let link = Session::with_port(mock.sharing(), guard.clone(), "mock");

    link.write_command(0xA1).unwrap();
    link.read_response(100).unwrap();
    link.read_response(40).unwrap();
    link.close();
    let _ = link.write_command(0xA1);

    assert!(guard.try_acquire().unwrap());
    guard.release();
}

#[test]
fn test_acquire_timeout_when_guard_is_held() {
    let guard = Arc::new(ProcessGuard::new());
    let mock = MockSerial::new();
    let mut link = Session::with_port(mock.sharing(), guard.clone(), "mock");
    link.set_acquire_timeout(Some(Duration::from_millis(30)));

    let _held = Permit::acquire(guard.as_ref(), None).unwrap();
    let err = link.write_command(0xA1).unwrap_err();
    assert!(matches!(err, LinkError::ExclusionTimeout(_)));
    assert!(mock.sent().is_empty());
}

#[test]
fn test_concurrent_commands_on_one_session() {
    let mock = MockSerial::new();
    mock.edit(|w| w.byte_delay = Duration::from_millis(1));
    let link = Arc::new(session(&mock));

    let handles: Vec<_> = [Command::Direction1, Command::Direction2]
        .into_iter()
        .map(|cmd| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for _ in 0..20 {
                    link.write_command(cmd.opcode()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let sent = mock.sent();
    assert_eq!(sent.len(), 40);
    assert_eq!(sent.iter().filter(|&&b| b == 0xA1).count(), 20);
    assert_eq!(sent.iter().filter(|&&b| b == 0xA2).count(), 20);
}

#[test]
fn test_shared_guard_keeps_frames_whole() {
    // two independent sessions (think: two processes) on one physical wire
    let guard: Arc<dyn LinkGuard> = Arc::new(ProcessGuard::new());
    let mock = MockSerial::new();
    mock.edit(|w| w.byte_delay = Duration::from_millis(1));

    let a = Session::with_port(mock.sharing(), Arc::clone(&guard), "mock-a");
    let b = Session::with_port(mock.sharing(), Arc::clone(&guard), "mock-b");

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..10 {
                a.write_init(0x1111_1111).unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..10 {
                b.write_init(0x2222_2222).unwrap();
            }
        });
    });

    let sent = mock.sent();
    assert_eq!(sent.len(), 100);
    let frame_a = CommandFrame::Init(0x1111_1111).to_bytes();
    let frame_b = CommandFrame::Init(0x2222_2222).to_bytes();
    for frame in sent.chunks(5) {
        assert!(frame == frame_a.as_slice() || frame == frame_b.as_slice(), "{frame:02x?}");
    }
}

#[test]
fn test_flush_discards_and_clears() {
    let mock = MockSerial::with_response(&[b"boot: rst:0x1", b"load:0x3fff0030", b"entry 0x400806"]);
    let link = session(&mock);

    let discarded = link.flush_for(200).unwrap();
    assert_eq!(discarded, 13 + 15 + 14);
    assert!(mock.pending().is_empty());
    assert_eq!(mock.wire.lock().unwrap().clears, 1);
    assert!(link.read_response(40).unwrap().is_none());
}

#[test]
fn test_flush_runs_without_the_guard() {
    let guard = Arc::new(ProcessGuard::new());
    let mock = MockSerial::with_response(&[b"noise"]);
    let link = Session::with_port(mock.sharing(), guard.clone(), "mock");

    let _held = Permit::acquire(guard.as_ref(), None).unwrap();
    let start = Instant::now();
    assert_eq!(link.flush_for(100).unwrap(), 5);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_flush_zero_duration_only_clears() {
    let mock = MockSerial::with_response(&[b"stale"]);
    let link = session(&mock);

    assert_eq!(link.flush_for(0).unwrap(), 0);
    assert_eq!(mock.wire.lock().unwrap().reads, 0);
    assert_eq!(mock.wire.lock().unwrap().clears, 1);
}

#[test]
fn test_link_error_display() {
    assert_eq!(LinkError::LinkNotOpen.to_string(), "Link not open");
    let err = LinkError::DeviceOpenFailed {
        path: "/dev/ttyUSB9".to_string(),
        reason: "No such file or directory".to_string(),
    };
    assert!(err.to_string().contains("/dev/ttyUSB9"));
    assert!(err.is_recoverable());
    assert!(!LinkError::ExclusionUnavailable("x".to_string()).is_recoverable());
}
