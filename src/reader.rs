use crate::mailbox::{MailboxSender, PushOutcome};
use crate::transport::{Connector, Transport};
use crate::types::{ChannelConfig, ChannelKind, ChannelStatus, ReaderStats};
use crate::{Result, TrackerError};
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest line kept while waiting for a newline. Anything longer is noise.
pub const MAX_LINE_LEN: usize = 1024;

/// Granularity at which the reconnect delay checks for a stop request.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Background reader for one serial channel.
///
/// Owns the connection on a dedicated thread, pushes every complete line into
/// its mailbox, and reconnects after faults until asked to stop. Nothing it
/// encounters on the wire propagates to the consumer.
pub struct ChannelReader {
    kind: ChannelKind,
    config: ChannelConfig,
    shared: Arc<ReaderShared>,
    outbox: Sender<String>,
    pending: Option<ReaderLoop>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ChannelReader {
    /// Prepare a reader. No thread runs and no port is opened until [`start`](Self::start).
    pub fn new(
        kind: ChannelKind,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        mailbox: MailboxSender<String>,
    ) -> ChannelReader {
        let shared = Arc::new(ReaderShared::new());
        let (outbox, outbox_rx) = crossbeam_channel::unbounded();

        let pending = ReaderLoop {
            kind,
            config: config.clone(),
            connector,
            mailbox,
            outbox: outbox_rx,
            shared: shared.clone(),
        };

        ChannelReader {
            kind,
            config,
            shared,
            outbox,
            pending: Some(pending),
            thread: None,
        }
    }

    /// Spawn the reader thread. Returns immediately; connecting happens off-thread.
    pub fn start(&mut self) -> Result<()> {
        let reader_loop = self
            .pending
            .take()
            .ok_or(TrackerError::AlreadyStarted(self.kind))?;

        let thread = std::thread::Builder::new()
            .name(format!("pentrack-{}", self.kind))
            .spawn(move || reader_loop.run())
            .map_err(|e| TrackerError::ThreadSpawn(format!("{} reader: {}", self.kind, e)))?;

        self.thread = Some(thread);
        Ok(())
    }

    /// Ask the thread to exit at its next polling point. Does not interrupt a read.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    /// Block until the reader thread has exited. Call after [`request_stop`](Self::request_stop).
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{} reader thread panicked", self.kind);
                self.shared.set_status(ChannelStatus::Stopped);
            }
        }
    }

    /// Queue a line (newline appended) to be written to the device.
    ///
    /// Lines still queued when the reader stops are written before the
    /// connection is released.
    pub fn send_line(&self, line: impl Into<String>) -> Result<()> {
        self.outbox
            .send(line.into())
            .map_err(|_| TrackerError::ReaderStopped(self.kind))
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            lines: self.shared.lines.load(Ordering::Relaxed),
            superseded: self.shared.superseded.load(Ordering::Relaxed),
            faults: self.shared.faults.load(Ordering::Relaxed),
            unsent: self.shared.unsent.load(Ordering::Relaxed),
        }
    }

    /// True between `start` and the thread exiting.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}

struct ReaderShared {
    stop: AtomicBool,
    status: AtomicU8,
    lines: AtomicU64,
    superseded: AtomicU64,
    faults: AtomicU64,
    unsent: AtomicU64,
}

impl ReaderShared {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            status: AtomicU8::new(ChannelStatus::Idle as u8),
            lines: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            unsent: AtomicU64::new(0),
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }
}

/// An open connection plus the bytes of a line not yet terminated.
struct LineLink {
    reader: BufReader<Box<dyn Transport>>,
    partial: Vec<u8>,
    /// Set once `partial` overflowed; bytes are dropped until the next newline.
    discarding: bool,
}

impl LineLink {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            reader: BufReader::new(transport),
            partial: Vec::with_capacity(64),
            discarding: false,
        }
    }

    /// Read until a newline. `Ok(None)` means the read timed out; bytes received
    /// so far are kept for the next call. Lines over `MAX_LINE_LEN` are dropped.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed"));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let used = newline.map_or(available.len(), |i| i + 1);
            if !self.discarding {
                let body = newline.map_or(available, |i| &available[..i]);
                self.partial.extend_from_slice(body);
            }
            self.reader.consume(used);

            if self.partial.len() > MAX_LINE_LEN {
                log::warn!("Discarding line longer than {} bytes", MAX_LINE_LEN);
                self.partial.clear();
                self.discarding = true;
            }
            if newline.is_some() {
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        let mut end = self.partial.len();
        while end > 0 && matches!(self.partial[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.partial[..end]).into_owned();
        self.partial.clear();
        line
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()
    }
}

/// State moved onto the reader thread.
struct ReaderLoop {
    kind: ChannelKind,
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    mailbox: MailboxSender<String>,
    outbox: Receiver<String>,
    shared: Arc<ReaderShared>,
}

impl ReaderLoop {
    /// Connect, read, publish; on any fault wait out the reconnect delay and
    /// start over. Only a stop request ends the loop.
    fn run(self) {
        log::info!("{} reader started ({})", self.kind, self.config.port);
        let mut link: Option<LineLink> = None;

        while !self.shared.stopping() {
            if link.is_none() {
                link = self.connect();
                if link.is_none() {
                    continue;
                }
            }
            let Some(current) = link.as_mut() else {
                continue;
            };

            if let Err(e) = self.flush_outbox(current) {
                link = None;
                self.fault(format_args!("write failed: {}", e));
                continue;
            }

            match current.read_line() {
                Ok(Some(line)) => self.publish(line),
                Ok(None) => {} // timeout, no data this cycle
                Err(e) => {
                    link = None;
                    self.fault(format_args!("read failed: {}", e));
                }
            }
        }

        // Tear-down lines queued just before the stop request still go out.
        if let Some(current) = link.as_mut() {
            if let Err(e) = self.flush_outbox(current) {
                log::warn!("{} reader: final write failed: {}", self.kind, e);
            }
        }
        drop(link);

        let unsent = self.outbox.try_iter().count() as u64;
        if unsent > 0 {
            self.shared.unsent.fetch_add(unsent, Ordering::Relaxed);
            log::warn!("{} reader: not connected at stop, discarded {} queued line(s)", self.kind, unsent);
        }

        self.shared.set_status(ChannelStatus::Stopped);
        log::info!("{} reader stopping (stop flag set)", self.kind);
    }

    fn connect(&self) -> Option<LineLink> {
        self.shared.set_status(ChannelStatus::Connecting);
        match self.connector.connect(&self.config) {
            Ok(transport) => {
                self.shared.set_status(ChannelStatus::Connected);
                log::info!("{} reader connected to {}", self.kind, self.config.port);
                Some(LineLink::new(transport))
            }
            Err(e) => {
                self.fault(format_args!("open {} failed: {}", self.config.port, e));
                None
            }
        }
    }

    fn flush_outbox(&self, link: &mut LineLink) -> io::Result<()> {
        while let Ok(line) = self.outbox.try_recv() {
            log::debug!("{} reader: sending {:?}", self.kind, line);
            link.write_line(&line)?;
        }
        Ok(())
    }

    fn publish(&self, line: String) {
        log::trace!("{} <- {:?}", self.kind, line);
        self.shared.lines.fetch_add(1, Ordering::Relaxed);
        if self.mailbox.push(line) == PushOutcome::Superseded {
            self.shared.superseded.fetch_add(1, Ordering::Relaxed);
            log::trace!("{} mailbox full, dropped oldest line", self.kind);
        }
    }

    /// Record a connection fault and wait out the reconnect delay.
    fn fault(&self, what: std::fmt::Arguments<'_>) {
        self.shared.faults.fetch_add(1, Ordering::Relaxed);
        self.shared.set_status(ChannelStatus::Disconnected);
        log::warn!(
            "{} reader: {}; retrying in {:?}",
            self.kind,
            what,
            self.config.reconnect_delay
        );
        sleep_unless_stopped(&self.shared.stop, self.config.reconnect_delay);
    }
}

/// Sleep for `delay`, returning early if `stop` is raised. Returns false if interrupted.
fn sleep_unless_stopped(stop: &AtomicBool, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{mailbox, MailboxReceiver};
    use crate::transport::testing::{wait_for, FakeConnector, FakeDevice};

    const WAIT: Duration = Duration::from_secs(3);

    fn test_config(port: &str, delay_ms: u64) -> ChannelConfig {
        ChannelConfig::new(port)
            .reconnect_delay(Duration::from_millis(delay_ms))
            .read_timeout(Duration::from_millis(10))
    }

    fn spawn_reader(
        config: ChannelConfig,
        depth: usize,
    ) -> (ChannelReader, MailboxReceiver<String>, FakeDevice) {
        let connector = Arc::new(FakeConnector::default());
        let device = connector.device(&config.port);
        let (tx, rx) = mailbox(depth);
        let mut reader = ChannelReader::new(ChannelKind::Xy, config, connector, tx);
        reader.start().unwrap();
        (reader, rx, device)
    }

    #[test]
    fn test_publishes_lines() {
        let (mut reader, rx, device) = spawn_reader(test_config("xy", 50), 1);
        device.send_line("0.25,0.75\r");
        let line = wait_for(WAIT, || rx.pop()).expect("line");
        assert_eq!(line, "0.25,0.75");
        assert_eq!(reader.status(), ChannelStatus::Connected);
        reader.request_stop();
        reader.join();
        assert_eq!(reader.status(), ChannelStatus::Stopped);
        assert_eq!(reader.stats().lines, 1);
    }

    #[test]
    fn test_reconnects_after_configured_delay() {
        let delay = Duration::from_millis(120);
        let (mut reader, rx, device) = spawn_reader(test_config("xy", 120), 8);

        device.send_line("a");
        device.fault();
        device.send_line("b");

        let mut got = Vec::new();
        wait_for(WAIT, || {
            while let Some(line) = rx.pop() {
                got.push(line);
            }
            (got.len() >= 2).then_some(())
        })
        .expect("both lines");
        assert_eq!(got, vec!["a", "b"]);

        let opens = device.opens();
        assert_eq!(opens.len(), 2);
        let waited = opens[1] - opens[0];
        assert!(waited >= delay, "reconnected after {:?}", waited);
        assert!(waited < delay + Duration::from_secs(1), "reconnected after {:?}", waited);
        assert_eq!(reader.stats().faults, 1);

        reader.request_stop();
        reader.join();
    }

    #[test]
    fn test_retries_failed_opens() {
        let config = test_config("z", 20);
        let connector = Arc::new(FakeConnector::default());
        let device = connector.device("z");
        device.refuse_opens(2);
        device.send_line("0.5");

        let (tx, rx) = mailbox(1);
        let mut reader = ChannelReader::new(ChannelKind::Z, config, connector, tx);
        reader.start().unwrap();

        assert_eq!(wait_for(WAIT, || rx.pop()).as_deref(), Some("0.5"));
        assert_eq!(device.opens().len(), 3);
        assert_eq!(reader.stats().faults, 2);
    }

    #[test]
    fn test_partial_line_survives_timeouts() {
        let (_reader, rx, device) = spawn_reader(test_config("xy", 50), 1);
        device.send_bytes(b"0.2");
        std::thread::sleep(Duration::from_millis(40));
        assert!(rx.pop().is_none());
        device.send_bytes(b",0.4\n");
        assert_eq!(wait_for(WAIT, || rx.pop()).as_deref(), Some("0.2,0.4"));
    }

    #[test]
    fn test_stop_interrupts_reconnect_delay() {
        let config = test_config("xy", 10_000);
        let connector = Arc::new(FakeConnector::default());
        connector.device("xy").refuse_opens(usize::MAX);
        let (tx, _rx) = mailbox(1);
        let mut reader = ChannelReader::new(ChannelKind::Xy, config, connector, tx);
        reader.start().unwrap();

        wait_for(WAIT, || (reader.status() == ChannelStatus::Disconnected).then_some(()))
            .expect("open failure");
        let started = Instant::now();
        reader.request_stop();
        reader.join();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!reader.is_running());
    }

    #[test]
    fn test_queued_lines_flushed_before_release() {
        let (mut reader, _rx, device) = spawn_reader(test_config("orientation", 50), 1);
        wait_for(WAIT, || (reader.status() == ChannelStatus::Connected).then_some(()))
            .expect("connected");

        reader.send_line("SHUTDOWN").unwrap();
        reader.request_stop();
        reader.join();
        assert_eq!(device.written(), "SHUTDOWN\n");
        assert!(reader.send_line("late").is_err());
    }

    #[test]
    fn test_queued_lines_counted_when_disconnected_at_stop() {
        let config = test_config("orientation", 10_000);
        let connector = Arc::new(FakeConnector::default());
        connector.device("orientation").refuse_opens(usize::MAX);
        let (tx, _rx) = mailbox(1);
        let mut reader = ChannelReader::new(ChannelKind::Orientation, config, connector, tx);
        reader.start().unwrap();
        wait_for(WAIT, || (reader.status() == ChannelStatus::Disconnected).then_some(()))
            .expect("open failure");

        reader.send_line("SHUTDOWN").unwrap();
        reader.send_line("OFF").unwrap();
        reader.request_stop();
        reader.join();
        assert_eq!(reader.stats().unsent, 2);
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let (_reader, rx, device) = spawn_reader(test_config("xy", 50), 8);
        let mut noise = vec![b'7'; 100_000];
        noise.push(b'\n');
        device.send_bytes(&noise);
        device.send_line("0.5,0.5");

        assert_eq!(wait_for(WAIT, || rx.pop()).as_deref(), Some("0.5,0.5"));
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_overlong_line_across_timeouts_is_dropped() {
        let (_reader, rx, device) = spawn_reader(test_config("xy", 50), 8);
        for _ in 0..3 {
            device.send_bytes(&[b'7'; MAX_LINE_LEN / 2]);
            std::thread::sleep(Duration::from_millis(25));
        }
        device.send_bytes(b"tail\n0.1,0.2\n");

        assert_eq!(wait_for(WAIT, || rx.pop()).as_deref(), Some("0.1,0.2"));
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut reader, _rx, _device) = spawn_reader(test_config("xy", 50), 1);
        assert!(matches!(reader.start(), Err(TrackerError::AlreadyStarted(ChannelKind::Xy))));
    }

    #[test]
    fn test_sleep_unless_stopped() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(&stop, Duration::from_millis(5)));
        stop.store(true, Ordering::Relaxed);
        assert!(!sleep_unless_stopped(&stop, Duration::from_secs(10)));
    }
}
