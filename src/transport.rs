//! Line-oriented, paced duplex link to the MCU.
//!
//! A dedicated I/O thread owns the pacing: it polls the port for complete
//! lines and pushes them onto the inbound queue, and drains the outbound queue
//! one message at a time with a minimum gap between writes. The MCU has a tiny
//! receive buffer and drops or garbles bytes when sends arrive back to back.
//!
//! Both queues are unbounded. Inbound data from the MCU is never dropped; if
//! memory ever becomes a concern this is the place to bound them.

use crate::error::TransportError;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The physical byte pipe. Implemented for real serial ports and for the
/// in-memory [`MemoryLink`].
pub trait SerialLink: Send {
    /// Bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> io::Result<usize>;
    /// Reads up to and including the next `\n`, appending to `buf`.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Discards anything buffered in either direction.
    fn clear_buffers(&mut self) -> io::Result<()>;
}

/// Port parameters for [`SerialTransport::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

/// Delays the link needs to keep the MCU happy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportTiming {
    /// Wait after opening the port while the MCU resets.
    pub startup_settle: Duration,
    /// Minimum time between the start of two consecutive writes.
    pub min_send_gap: Duration,
    pub pre_send_delay: Duration,
    pub post_send_settle: Duration,
    /// Sleep at the end of every I/O loop iteration.
    pub loop_interval: Duration,
    /// Upper bound on how long [`SerialTransport::stop`] waits for the I/O thread.
    pub join_timeout: Duration,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            startup_settle: Duration::from_secs(3),
            min_send_gap: Duration::from_millis(200),
            pre_send_delay: Duration::from_millis(50),
            post_send_settle: Duration::from_millis(150),
            loop_interval: Duration::from_millis(20),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Real serial port.
pub struct SerialPortLink {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
}

impl SerialPortLink {
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|source| TransportError::Open {
                port: settings.port.clone(),
                source,
            })?;
        Ok(Self {
            reader: BufReader::new(port),
        })
    }
}

impl SerialLink for SerialPortLink {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let buffered = self.reader.buffer().len();
        if buffered > 0 {
            return Ok(buffered);
        }
        self.reader
            .get_ref()
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let before = buf.len();
        match self.reader.read_until(b'\n', buf) {
            Ok(n) => Ok(n),
            // a partial line is still a line once the read timeout expires
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(buf.len() - before),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        io::Write::write_all(self.reader.get_mut(), bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(self.reader.get_mut())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.reader
            .get_ref()
            .clear(serialport::ClearBuffer::All)
            .map_err(io::Error::from)
    }
}

#[derive(Debug, Default)]
struct MemoryLinkInner {
    inbound: VecDeque<u8>,
    writes: Vec<(Instant, Vec<u8>)>,
    fail_writes: bool,
    failed_writes: usize,
    fail_reads: bool,
    failed_reads: usize,
}

/// In-memory link for tests and dry runs: bytes pushed with
/// [`MemoryLink::push_inbound`] are what the "MCU" sends, and every write is
/// recorded with the instant it started.
#[derive(Debug, Clone, Default)]
pub struct MemoryLink {
    inner: Arc<Mutex<MemoryLinkInner>>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLinkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes.iter().copied());
    }

    /// Written lines, newline included, in write order.
    pub fn written(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        self.lock().writes.iter().map(|(at, _)| *at).collect()
    }

    /// Makes every following write fail, as if the cable were pulled.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn failed_writes(&self) -> usize {
        self.lock().failed_writes
    }

    /// Makes every following read fail. Polling fails while nothing is
    /// buffered, reading fails once something is; buffered bytes are kept.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn failed_reads(&self) -> usize {
        self.lock().failed_reads
    }
}

impl SerialLink for MemoryLink {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let mut inner = self.lock();
        if inner.fail_reads && inner.inbound.is_empty() {
            inner.failed_reads += 1;
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port gone"));
        }
        Ok(inner.inbound.len())
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut inner = self.lock();
        if inner.fail_reads {
            inner.failed_reads += 1;
            return Err(io::Error::new(io::ErrorKind::InvalidData, "framing error"));
        }
        let mut read = 0;
        while let Some(byte) = inner.inbound.pop_front() {
            buf.push(byte);
            read += 1;
            if byte == b'\n' {
                break;
            }
        }
        Ok(read)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            inner.failed_writes += 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        inner.writes.push((Instant::now(), bytes.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.lock().inbound.clear();
        Ok(())
    }
}

/// The open link plus the time of the last write, shared by the I/O thread and
/// [`SerialTransport::send_blocking`].
struct LinkSlot {
    link: Box<dyn SerialLink>,
    last_send: Option<Instant>,
}

type SharedLink = Arc<Mutex<Option<LinkSlot>>>;

fn lock_link(link: &SharedLink) -> MutexGuard<'_, Option<LinkSlot>> {
    link.lock().unwrap_or_else(|e| e.into_inner())
}

fn with_newline(message: &str) -> String {
    if message.ends_with('\n') {
        message.to_string()
    } else {
        format!("{message}\n")
    }
}

pub struct SerialTransport {
    timing: TransportTiming,
    inbound_tx: Sender<String>,
    inbound_rx: Receiver<String>,
    outbound_tx: Sender<String>,
    outbound_rx: Arc<Mutex<Receiver<String>>>,
    link: SharedLink,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SerialTransport {
    pub fn new(timing: TransportTiming) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        Self {
            timing,
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            link: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn timing(&self) -> &TransportTiming {
        &self.timing
    }

    /// Opens the serial port and starts the I/O thread. On failure the
    /// transport stays stopped and the error is returned to the caller.
    pub fn start(&mut self, settings: &SerialSettings) -> Result<(), TransportError> {
        let link = SerialPortLink::open(settings).inspect_err(|e| error!(error = %e, "serial connection failed"))?;
        info!(port = %settings.port, baud = settings.baud_rate, "serial port open");
        self.start_with_link(Box::new(link))
    }

    /// Starts the I/O thread on an already opened link.
    pub fn start_with_link(&mut self, mut link: Box<dyn SerialLink>) -> Result<(), TransportError> {
        self.stop();

        if !self.timing.startup_settle.is_zero() {
            info!(
                settle_ms = self.timing.startup_settle.as_millis() as u64,
                "waiting for MCU to initialize"
            );
            thread::sleep(self.timing.startup_settle);
        }
        link.clear_buffers()?;

        *lock_link(&self.link) = Some(LinkSlot {
            link,
            last_send: None,
        });
        self.running.store(true, Ordering::SeqCst);

        let io_loop = IoLoop {
            timing: self.timing,
            link: Arc::clone(&self.link),
            running: Arc::clone(&self.running),
            inbound: self.inbound_tx.clone(),
            outbound: Arc::clone(&self.outbound_rx),
        };
        let spawned = thread::Builder::new()
            .name("serial-io".into())
            .spawn(move || io_loop.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                *lock_link(&self.link) = None;
                Err(TransportError::Io(e))
            }
        }
    }

    /// Stops the I/O thread and closes the link. Safe to call at any time.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.worker.take() {
            let deadline = Instant::now() + self.timing.join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("serial I/O thread panicked");
                }
            } else {
                warn!("serial I/O thread did not stop in time, detaching");
            }
        }

        if lock_link(&self.link).take().is_some() {
            info!("serial port closed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queues a line for the I/O thread. Never blocks. Lines queued while the
    /// transport is stopped are sent once it starts.
    pub fn enqueue_send(&self, message: &str) {
        let _ = self.outbound_tx.send(with_newline(message));
    }

    /// Oldest received line, if any. Never blocks.
    pub fn poll_received(&self) -> Option<String> {
        match self.inbound_rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Writes immediately, skipping the queue, then sleeps `wait_after`.
    /// Must not be called from the I/O thread.
    pub fn send_blocking(&self, message: &str, wait_after: Duration) -> Result<(), TransportError> {
        let line = with_newline(message);
        {
            let mut guard = lock_link(&self.link);
            let slot = guard.as_mut().ok_or(TransportError::NotConnected)?;
            thread::sleep(self.timing.pre_send_delay);
            debug!(line = line.trim_end(), "tx (blocking)");
            slot.last_send = Some(Instant::now());
            slot.link.write_all(line.as_bytes())?;
            slot.link.flush()?;
        }
        thread::sleep(wait_after);
        Ok(())
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(TransportTiming::default())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

struct IoLoop {
    timing: TransportTiming,
    link: SharedLink,
    running: Arc<AtomicBool>,
    inbound: Sender<String>,
    outbound: Arc<Mutex<Receiver<String>>>,
}

impl IoLoop {
    fn run(self) {
        debug!("serial I/O loop started");
        while self.running.load(Ordering::SeqCst) {
            self.receive();
            if self.send_next() {
                thread::sleep(self.timing.post_send_settle);
            }
            thread::sleep(self.timing.loop_interval);
        }
        debug!("serial I/O loop stopped");
    }

    fn receive(&self) {
        let mut guard = lock_link(&self.link);
        let Some(slot) = guard.as_mut() else {
            return;
        };

        match slot.link.bytes_to_read() {
            Ok(0) => {}
            Ok(_) => {
                let mut buf = Vec::new();
                match slot.link.read_line(&mut buf) {
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim();
                        if !line.is_empty() {
                            debug!(%line, "rx");
                            let _ = self.inbound.send(line.to_string());
                        }
                    }
                    Err(e) => error!(error = %e, "rx error"),
                }
            }
            Err(e) => error!(error = %e, "rx poll error"),
        }
    }

    /// Writes one queued message, if any. Returns whether a message was taken.
    fn send_next(&self) -> bool {
        let next = {
            let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            outbound.try_recv().ok()
        };
        let Some(message) = next else {
            return false;
        };

        let mut guard = lock_link(&self.link);
        let Some(slot) = guard.as_mut() else {
            warn!(line = message.trim_end(), "link closed, dropping message");
            return true;
        };

        if let Some(last) = slot.last_send {
            let since = last.elapsed();
            if since < self.timing.min_send_gap {
                thread::sleep(self.timing.min_send_gap - since);
            }
        }
        thread::sleep(self.timing.pre_send_delay);

        debug!(line = message.trim_end(), "tx");
        slot.last_send = Some(Instant::now());
        let written = slot
            .link
            .write_all(message.as_bytes())
            .and_then(|()| slot.link.flush());
        if let Err(e) = written {
            error!(error = %e, "tx error");
        }
        true
    }
}
