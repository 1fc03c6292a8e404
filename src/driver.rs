//! The serial side of the house: a driver trait the session talks through,
//! a `serial`-crate implementation of it, and the monitor that tells the
//! receive thread something happened on the wire.

use crate::errors::{GsmError, GsmResult};
use bytes::BytesMut;
use serial::prelude::*;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// What the wire has been up to since the monitor was last reset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, is_enum_variant)]
pub enum LinkEvent {
    /// Nothing of note.
    Idle,
    /// Bytes arrived.
    Data,
    /// A `+CMTI` new-message indication arrived.
    Cmti
}

/// A latching condition shared between the serial reader and the receive
/// thread. Events only ever escalate (`Cmti` outranks `Data`) until someone
/// resets it.
pub struct MessageMonitor {
    state: Mutex<LinkEvent>,
    cond: Condvar
}
impl MessageMonitor {
    pub fn new() -> MessageMonitor {
        MessageMonitor {
            state: Mutex::new(LinkEvent::Idle),
            cond: Condvar::new()
        }
    }
    /// Record an event and wake anyone waiting.
    pub fn raise(&self, ev: LinkEvent) {
        let mut st = self.state.lock().unwrap();
        if ev > *st {
            *st = ev;
        }
        self.cond.notify_all();
    }
    /// Wake waiters without recording anything; used to interrupt a wait.
    pub fn nudge(&self) {
        self.cond.notify_all();
    }
    /// Forget the current event.
    pub fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        *st = LinkEvent::Idle;
    }
    /// Wait until an event is raised or `timeout` passes, and return the
    /// current state. May return `Idle` early when nudged.
    pub fn wait_event(&self, timeout: Duration) -> LinkEvent {
        let st = self.state.lock().unwrap();
        if *st != LinkEvent::Idle {
            return *st;
        }
        let (st, _) = self.cond.wait_timeout(st, timeout).unwrap();
        *st
    }
}

/// What the session needs from a serial port. Kept as a trait so tests can
/// substitute a scripted implementation.
pub trait SerialDriver: Send {
    fn open(&mut self) -> GsmResult<()>;
    fn close(&mut self);
    /// Write raw bytes to the device.
    fn send(&mut self, data: &[u8]) -> GsmResult<()>;
    /// Throw away everything received so far, stashing it for
    /// `last_cleared_buffer`.
    fn empty_buffer(&mut self);
    /// What the last `empty_buffer` threw away. Occasionally useful when a
    /// response raced a command.
    fn last_cleared_buffer(&mut self) -> String;
    /// Drain and return everything received so far.
    fn read_buffer(&mut self) -> String;
    fn has_data(&self) -> bool;
    fn set_monitor(&mut self, monitor: Arc<MessageMonitor>);
    fn port_name(&self) -> &str;
}

struct DriverShared {
    buffer: Mutex<BytesMut>,
    stop: AtomicBool,
    monitor: Mutex<Option<Arc<MessageMonitor>>>,
    last_cleared: Mutex<String>
}

/// `SerialDriver` over a real serial port, 8N1, no flow control. A reader
/// thread owns the receiving half: it accumulates bytes into the shared
/// buffer and raises the monitor, upgrading to `Cmti` when an unsolicited
/// new-message indication shows up in the stream.
pub struct SerialPortDriver {
    port_name: String,
    baud_rate: usize,
    shared: Arc<DriverShared>,
    port: Option<Arc<Mutex<::serial::SystemPort>>>,
    reader: Option<thread::JoinHandle<()>>
}
impl SerialPortDriver {
    pub fn new(port_name: &str, baud_rate: usize) -> SerialPortDriver {
        SerialPortDriver {
            port_name: port_name.to_owned(),
            baud_rate,
            shared: Arc::new(DriverShared {
                buffer: Mutex::new(BytesMut::new()),
                stop: AtomicBool::new(false),
                monitor: Mutex::new(None),
                last_cleared: Mutex::new(String::new())
            }),
            port: None,
            reader: None
        }
    }
}

fn reader_loop(port: Arc<Mutex<::serial::SystemPort>>, shared: Arc<DriverShared>) {
    let mut buf = [0u8; 256];
    while !shared.stop.load(Ordering::SeqCst) {
        let res = {
            let mut p = port.lock().unwrap();
            p.read(&mut buf)
        };
        match res {
            Ok(0) => thread::sleep(Duration::from_millis(10)),
            Ok(n) => {
                trace!("serial read {} bytes", n);
                let cmti = {
                    let mut b = shared.buffer.lock().unwrap();
                    b.extend_from_slice(&buf[..n]);
                    b.windows(6).any(|w| w == b"+CMTI:")
                };
                let mon = shared.monitor.lock().unwrap();
                if let Some(ref mon) = *mon {
                    mon.raise(if cmti { LinkEvent::Cmti } else { LinkEvent::Data });
                }
            },
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut
                       || e.kind() == io::ErrorKind::Interrupted
                       || e.kind() == io::ErrorKind::WouldBlock => {},
            Err(e) => {
                error!("serial reader thread failed: {}", e);
                break;
            }
        }
    }
    trace!("serial reader thread exiting");
}

impl SerialDriver for SerialPortDriver {
    fn open(&mut self) -> GsmResult<()> {
        if self.port.is_some() {
            return Err(GsmError::AlreadyConnected);
        }
        info!("opening serial port {} at {} baud", self.port_name, self.baud_rate);
        let mut port = ::serial::open(&self.port_name)?;
        let baud = self.baud_rate;
        port.reconfigure(&|settings| {
            settings.set_baud_rate(::serial::BaudRate::from_speed(baud))?;
            settings.set_char_size(::serial::Bits8);
            settings.set_parity(::serial::ParityNone);
            settings.set_stop_bits(::serial::Stop1);
            settings.set_flow_control(::serial::FlowNone);
            Ok(())
        })?;
        // Short read timeout; the reader thread uses it as its poll tick,
        // and writers never wait longer than this for the port mutex.
        port.set_timeout(Duration::from_millis(100))?;
        let port = Arc::new(Mutex::new(port));
        self.shared.stop.store(false, Ordering::SeqCst);
        let reader_port = port.clone();
        let reader_shared = self.shared.clone();
        self.reader = Some(thread::Builder::new()
            .name(format!("serial-reader {}", self.port_name))
            .spawn(move || reader_loop(reader_port, reader_shared))?);
        self.port = Some(port);
        Ok(())
    }
    fn close(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.port = None;
    }
    fn send(&mut self, data: &[u8]) -> GsmResult<()> {
        let port = self.port.as_ref().ok_or(GsmError::NotConnected)?;
        let mut port = port.lock().unwrap();
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }
    fn empty_buffer(&mut self) {
        let mut b = self.shared.buffer.lock().unwrap();
        if !b.is_empty() {
            let cleared = String::from_utf8_lossy(&b).into_owned();
            trace!("clearing {} buffered bytes", cleared.len());
            *self.shared.last_cleared.lock().unwrap() = cleared;
            b.clear();
        }
    }
    fn last_cleared_buffer(&mut self) -> String {
        self.shared.last_cleared.lock().unwrap().clone()
    }
    fn read_buffer(&mut self) -> String {
        let mut b = self.shared.buffer.lock().unwrap();
        let ret = String::from_utf8_lossy(&b).into_owned();
        b.clear();
        ret
    }
    fn has_data(&self) -> bool {
        !self.shared.buffer.lock().unwrap().is_empty()
    }
    fn set_monitor(&mut self, monitor: Arc<MessageMonitor>) {
        *self.shared.monitor.lock().unwrap() = Some(monitor);
    }
    fn port_name(&self) -> &str {
        &self.port_name
    }
}
impl Drop for SerialPortDriver {
    fn drop(&mut self) {
        self.close();
    }
}

/// A scripted stand-in for a modem, used by the link and session tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    pub struct MockState {
        script: Mutex<Vec<(String, VecDeque<String>)>>,
        buffer: Mutex<String>,
        sent: Mutex<Vec<String>>,
        monitor: Mutex<Option<Arc<MessageMonitor>>>
    }
    impl MockState {
        /// Queue a canned response for commands starting with `pattern`.
        /// Repeated calls with the same pattern stack responses; the last
        /// one repeats forever.
        pub fn expect(&self, pattern: &str, response: &str) {
            let mut script = self.script.lock().unwrap();
            for &mut (ref p, ref mut q) in script.iter_mut() {
                if p == pattern {
                    q.push_back(response.to_owned());
                    return;
                }
            }
            let mut q = VecDeque::new();
            q.push_back(response.to_owned());
            script.push((pattern.to_owned(), q));
        }
        /// Pretend the modem sent something unsolicited.
        pub fn inject(&self, text: &str) {
            self.buffer.lock().unwrap().push_str(text);
            let ev = if text.contains("+CMTI:") { LinkEvent::Cmti } else { LinkEvent::Data };
            if let Some(ref mon) = *self.monitor.lock().unwrap() {
                mon.raise(ev);
            }
        }
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
        pub fn sent_matching(&self, prefix: &str) -> usize {
            self.sent.lock().unwrap().iter().filter(|s| s.starts_with(prefix)).count()
        }
    }
    pub struct MockDriver {
        state: Arc<MockState>
    }
    impl MockDriver {
        pub fn new() -> (MockDriver, Arc<MockState>) {
            let state = Arc::new(MockState {
                script: Mutex::new(vec![]),
                buffer: Mutex::new(String::new()),
                sent: Mutex::new(vec![]),
                monitor: Mutex::new(None)
            });
            (MockDriver { state: state.clone() }, state)
        }
    }
    impl SerialDriver for MockDriver {
        fn open(&mut self) -> GsmResult<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn send(&mut self, data: &[u8]) -> GsmResult<()> {
            let line = String::from_utf8_lossy(data)
                .trim_end_matches(|c| c == '\r' || c == '\n' || c == '\x1A')
                .to_owned();
            self.state.sent.lock().unwrap().push(line.clone());
            let response = {
                let mut script = self.state.script.lock().unwrap();
                let mut found = None;
                for &mut (ref p, ref mut q) in script.iter_mut() {
                    if line.starts_with(p.as_str()) {
                        found = Some(if q.len() > 1 {
                            q.pop_front().unwrap()
                        }
                        else {
                            q.front().cloned().unwrap_or_default()
                        });
                        break;
                    }
                }
                found.unwrap_or_else(|| "\r\nOK\r\n".to_owned())
            };
            self.state.buffer.lock().unwrap().push_str(&response);
            Ok(())
        }
        fn empty_buffer(&mut self) {
            self.state.buffer.lock().unwrap().clear();
        }
        fn last_cleared_buffer(&mut self) -> String {
            String::new()
        }
        fn read_buffer(&mut self) -> String {
            let mut b = self.state.buffer.lock().unwrap();
            ::std::mem::replace(&mut *b, String::new())
        }
        fn has_data(&self) -> bool {
            !self.state.buffer.lock().unwrap().is_empty()
        }
        fn set_monitor(&mut self, monitor: Arc<MessageMonitor>) {
            *self.state.monitor.lock().unwrap() = Some(monitor);
        }
        fn port_name(&self) -> &str {
            "mock"
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn monitor_escalates_and_resets() {
        let m = MessageMonitor::new();
        m.raise(LinkEvent::Data);
        m.raise(LinkEvent::Cmti);
        m.raise(LinkEvent::Data);
        assert_eq!(m.wait_event(Duration::from_millis(1)), LinkEvent::Cmti);
        m.reset();
        assert_eq!(m.wait_event(Duration::from_millis(1)), LinkEvent::Idle);
    }
    #[test]
    fn monitor_wakes_waiter() {
        let m = Arc::new(MessageMonitor::new());
        let m2 = m.clone();
        let t = thread::spawn(move || m2.wait_event(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        m.raise(LinkEvent::Data);
        assert_eq!(t.join().unwrap(), LinkEvent::Data);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
