//! The modem session controller: one serial line, one mutex, and the three
//! long-lived threads that keep messages flowing.
//!
//! A [`ModemSession`] owns the serial driver through its AT handler and
//! serializes every interaction with the device behind one mutex. Incoming
//! traffic is handled either by polling [`read_messages`] (`Sync` mode) or
//! by a background receive thread woken through the driver's monitor; a
//! second background thread pulses the link to notice dead devices early.
//!
//! [`read_messages`]: ModemSession::read_messages

use crate::driver::{MessageMonitor, SerialDriver, SerialPortDriver};
use crate::errors::{GsmError, GsmResult};
use crate::handler::{self, AtHandler, SEND_FATAL};
use crate::link::{RetryPolicy, SerialLink};
use crate::message::{InboundMessage, IncomingMessage, MessageClass, OutgoingMessage,
                     StatusReport};
use crate::pdu::{self, IncomingPdu};
use crate::reassembly::MultipartReassembler;
use crate::response::{self, PinState, RegistrationState};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Which message protocol the session drives the modem in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, is_enum_variant)]
pub enum Protocol {
    /// Binary PDUs; the full feature set.
    Pdu,
    /// Legacy text mode: outbound only, 7-bit text only.
    Text
}
/// How incoming messages reach the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, is_enum_variant)]
pub enum ReceiveMode {
    /// The application calls `read_messages` itself.
    Sync,
    /// A receive thread reads whenever the modem raises `+CMTI`.
    AsyncCmti,
    /// A receive thread reads on a fixed interval.
    AsyncPoll
}

/// Everything configurable about a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: String,
    pub baud_rate: usize,
    /// Manufacturer string used to resolve the AT dialect.
    pub manufacturer: String,
    /// Model string used to resolve the AT dialect.
    pub model: String,
    /// Explicit dialect override; wins over manufacturer/model.
    pub handler_alias: String,
    pub smsc_number: Option<String>,
    pub sim_pin: Option<String>,
    pub sim_pin2: Option<String>,
    /// Fail connecting when the SIM wants a PIN2 we don't have. Off by
    /// default: most operations work fine without PIN2.
    pub throw_on_missing_pin2: bool,
    pub protocol: Protocol,
    pub receive_mode: ReceiveMode,
    /// Which stored messages the receive thread picks up.
    pub async_recv_class: MessageClass,
    /// Two-letter memory codes to read, concatenated (e.g. `"SMME"`).
    /// Empty means: ask the modem.
    pub storage_locations: String,
    pub keep_alive_interval: Duration,
    pub async_poll_interval: Duration,
    /// Per-command response timeout.
    pub command_timeout: Duration,
    /// Response timeout for `AT+CMGS`, which waits on the network.
    pub send_timeout: Duration,
    pub retries_no_response: u32,
    pub delay_no_response: Duration,
    pub retries_cms_errors: u32,
    pub delay_cms_errors: Duration
}
impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115200,
            manufacturer: String::new(),
            model: String::new(),
            handler_alias: String::new(),
            smsc_number: None,
            sim_pin: None,
            sim_pin2: None,
            throw_on_missing_pin2: false,
            protocol: Protocol::Pdu,
            receive_mode: ReceiveMode::Sync,
            async_recv_class: MessageClass::All,
            storage_locations: String::new(),
            keep_alive_interval: Duration::from_secs(30),
            async_poll_interval: Duration::from_secs(15),
            command_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            retries_no_response: 3,
            delay_no_response: Duration::from_secs(5),
            retries_cms_errors: 5,
            delay_cms_errors: Duration::from_secs(5)
        }
    }
}

/// A snapshot of what the device told us about itself at connect time.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial_no: String,
    pub imsi: String,
    pub sw_version: String,
    pub signal_percent: u32,
    pub battery_percent: u32
}
impl Default for DeviceInfo {
    fn default() -> DeviceInfo {
        DeviceInfo {
            manufacturer: response::NA.into(),
            model: response::NA.into(),
            serial_no: response::NA.into(),
            imsi: response::NA.into(),
            sw_version: response::NA.into(),
            signal_percent: 0,
            battery_percent: 0
        }
    }
}

/// The single inbound-message callback. Return `true` to consume the
/// message, which deletes it (and all its parts) from modem memory.
pub type MessageListener = Box<dyn FnMut(&InboundMessage) -> bool + Send>;

/// State guarded by the session mutex: the handler (and with it the serial
/// line) plus everything the receive path mutates.
struct SessionCore {
    handler: Box<dyn AtHandler>,
    storage_locations: String,
    out_mp_ref: u16,
    reassembler: MultipartReassembler,
    device_info: DeviceInfo
}
impl SessionCore {
    fn read_messages(&mut self, class: MessageClass) -> GsmResult<Vec<InboundMessage>> {
        let mut out = vec![];
        let locations: Vec<String> = if self.storage_locations.is_empty() {
            vec!["SM".to_owned()]
        }
        else {
            self.storage_locations.as_bytes().chunks(2)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect()
        };
        for loc in locations {
            if let Err(e) = self.handler.set_memory_location(&loc) {
                warn!("cannot select memory location {}: {}", loc, e);
                continue;
            }
            let blob = self.handler.list_messages(class)?;
            if response::is_error(&blob) {
                warn!("listing {} failed: {}", loc, blob.trim());
                continue;
            }
            let mut pending_index = None;
            for line in response::useful_lines(&blob) {
                if line.starts_with("+CMGL") {
                    pending_index = match response::get_mem_index(line) {
                        Ok(i) => Some(i),
                        Err(e) => {
                            warn!("{}", e);
                            None
                        }
                    };
                    continue;
                }
                let index = match pending_index.take() {
                    Some(i) => i,
                    // Echoes, blank padding, the final OK.
                    None => continue
                };
                match pdu::parse_pdu(line) {
                    Ok(p) => self.accept_pdu(p, index, &loc, &mut out),
                    Err(e) => warn!("skipping undecodable PDU {}:{}: {}", loc, index, e)
                }
            }
        }
        Ok(out)
    }
    fn accept_pdu(&mut self, p: IncomingPdu, index: u32, location: &str,
                  out: &mut Vec<InboundMessage>) {
        match p {
            IncomingPdu::Deliver(d) => {
                let concat = d.concat();
                let msg = IncomingMessage {
                    mem_index: index as i32,
                    mem_location: location.to_owned(),
                    originator: d.originator,
                    smsc: d.smsc,
                    timestamp_millis: d.timestamp_millis,
                    encoding: d.encoding,
                    payload: d.payload,
                    concat,
                    mp_mem_indices: vec![]
                };
                match concat {
                    Some(c) if c.parts > 1 => {
                        debug!("fragment {}/{} of ref {} from {}",
                               c.sequence, c.parts, c.reference, msg.originator);
                        if let Some(whole) = self.reassembler.push(msg) {
                            out.push(InboundMessage::Sms(whole));
                        }
                    },
                    _ => out.push(InboundMessage::Sms(msg))
                }
            },
            IncomingPdu::StatusReport(r) => {
                out.push(InboundMessage::StatusReport(StatusReport {
                    mem_index: index as i32,
                    mem_location: location.to_owned(),
                    ref_no: r.ref_no,
                    recipient: r.recipient,
                    smsc: r.smsc,
                    submit_timestamp_millis: r.submit_timestamp_millis,
                    discharge_timestamp_millis: r.discharge_timestamp_millis,
                    delivery_status: r.delivery_status,
                    text: format!("{}", r.delivery_status)
                }));
            }
        }
    }
    fn delete_message(&mut self, msg: &InboundMessage) -> GsmResult<()> {
        self.handler.set_memory_location(msg.mem_location())?;
        if msg.mem_index() < 0 {
            for &idx in msg.mp_mem_indices() {
                self.handler.delete_message(idx as u32)?;
            }
            Ok(())
        }
        else {
            self.handler.delete_message(msg.mem_index() as u32)
        }
    }
}

struct SessionShared {
    /// The session mutex. Every handler interaction holds it.
    core: Mutex<Option<SessionCore>>,
    connected: AtomicBool,
    stop: AtomicBool,
    monitor: Arc<MessageMonitor>,
    listener: Mutex<Option<MessageListener>>,
    keepalive_gate: Mutex<()>,
    keepalive_cond: Condvar,
    inbound: AtomicUsize,
    outbound: AtomicUsize
}

/// A session with one GSM modem.
pub struct ModemSession {
    config: SessionConfig,
    shared: Arc<SessionShared>,
    receive_thread: Option<thread::JoinHandle<()>>,
    keepalive_thread: Option<thread::JoinHandle<()>>
}
impl ModemSession {
    pub fn new(config: SessionConfig) -> ModemSession {
        ModemSession {
            config,
            shared: Arc::new(SessionShared {
                core: Mutex::new(None),
                connected: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                monitor: Arc::new(MessageMonitor::new()),
                listener: Mutex::new(None),
                keepalive_gate: Mutex::new(()),
                keepalive_cond: Condvar::new(),
                inbound: AtomicUsize::new(0),
                outbound: AtomicUsize::new(0)
            }),
            receive_thread: None,
            keepalive_thread: None
        }
    }
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
    /// Messages delivered to the application so far.
    pub fn total_inbound(&self) -> usize {
        self.shared.inbound.load(Ordering::SeqCst)
    }
    /// Message parts accepted by the modem so far.
    pub fn total_outbound(&self) -> usize {
        self.shared.outbound.load(Ordering::SeqCst)
    }
    /// Install the inbound listener. Returning `true` from it consumes the
    /// message: the session deletes it from modem memory.
    pub fn set_message_listener<F>(&self, listener: F)
        where F: FnMut(&InboundMessage) -> bool + Send + 'static {
        *self.shared.listener.lock().unwrap() = Some(Box::new(listener));
    }
    pub fn clear_message_listener(&self) {
        *self.shared.listener.lock().unwrap() = None;
    }

    /// Connect to the modem on the configured serial port.
    pub fn connect(&mut self) -> GsmResult<()> {
        let driver = SerialPortDriver::new(&self.config.port, self.config.baud_rate);
        self.connect_with_driver(Box::new(driver))
    }
    /// Connect over an externally supplied driver. This is the whole
    /// connect sequence: sync, reset, liveness, SIM unlock, registration,
    /// protocol and receive-mode setup, then the background threads.
    pub fn connect_with_driver(&mut self, driver: Box<dyn SerialDriver>) -> GsmResult<()> {
        if self.is_connected() {
            return Err(GsmError::AlreadyConnected);
        }
        match self.try_connect(driver) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("connect failed: {}", e);
                self.disconnect();
                Err(e)
            }
        }
    }
    fn try_connect(&mut self, mut driver: Box<dyn SerialDriver>) -> GsmResult<()> {
        let cfg = self.config.clone();
        driver.set_monitor(self.shared.monitor.clone());
        driver.open()?;
        let mut link = SerialLink::new(driver, RetryPolicy {
            retries_no_response: cfg.retries_no_response,
            delay_no_response: cfg.delay_no_response,
            retries_cms_errors: cfg.retries_cms_errors,
            delay_cms_errors: cfg.delay_cms_errors
        });
        link.command_timeout = cfg.command_timeout;
        link.send_timeout = cfg.send_timeout;
        let mut handler = handler::resolve_handler(
            link, &cfg.manufacturer, &cfg.model, &cfg.handler_alias);
        handler.sync()?;
        handler.link().driver_mut().empty_buffer();
        handler.reset()?;
        if !handler.is_alive()? {
            return Err(GsmError::NotConnected);
        }
        self.unlock_sim(&mut *handler)?;
        handler.init()?;
        handler.echo_off()?;
        if !wait_for_registration(&mut *handler)? {
            warn!("modem does not report registration state; continuing");
        }
        handler.set_verbose_errors()?;
        let storage_locations = if cfg.storage_locations.is_empty() {
            let discovered = handler.get_storage_locations()?;
            debug!("discovered storage locations: {:?}", discovered);
            discovered
        }
        else {
            cfg.storage_locations.clone()
        };
        match cfg.protocol {
            Protocol::Pdu => handler.set_pdu_mode()
                .map_err(|_| GsmError::Unsupported("PDU mode"))?,
            Protocol::Text => {
                if !cfg.receive_mode.is_sync() {
                    return Err(GsmError::Unsupported("receiving in text mode"));
                }
                handler.set_text_mode()
                    .map_err(|_| GsmError::Unsupported("text mode"))?;
            }
        }
        if let Some(ref smsc) = cfg.smsc_number {
            handler.set_smsc(smsc)?;
        }
        if !cfg.receive_mode.is_sync() && !handler.supports_receive() {
            return Err(GsmError::Unsupported("receiving messages"));
        }
        match cfg.receive_mode {
            ReceiveMode::AsyncCmti => handler.enable_indications()?,
            // Stray URCs would confuse response framing.
            _ => {
                if let Err(e) = handler.disable_indications() {
                    debug!("cannot disable indications: {}", e);
                }
            }
        }
        let device_info = query_device_info(&mut *handler);
        info!("connected to {} {} on {}", device_info.manufacturer,
              device_info.model, handler.link().driver_mut().port_name());
        *self.shared.core.lock().unwrap() = Some(SessionCore {
            handler,
            storage_locations,
            out_mp_ref: ::rand::random::<u16>(),
            reassembler: MultipartReassembler::new(),
            device_info
        });
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);
        if !cfg.receive_mode.is_sync() {
            let shared = self.shared.clone();
            let thread_cfg = cfg.clone();
            self.receive_thread = Some(thread::Builder::new()
                .name("sms-receive".into())
                .spawn(move || receive_loop(shared, thread_cfg))?);
        }
        let shared = self.shared.clone();
        let interval = cfg.keep_alive_interval;
        self.keepalive_thread = Some(thread::Builder::new()
            .name("sms-keepalive".into())
            .spawn(move || keepalive_loop(shared, interval))?);
        Ok(())
    }
    fn unlock_sim(&self, handler: &mut dyn AtHandler) -> GsmResult<()> {
        match handler.get_pin_state()? {
            PinState::Ready => return Ok(()),
            PinState::SimPuk | PinState::SimPuk2 => return Err(GsmError::PukRequired),
            PinState::SimPin => {
                let pin = self.config.sim_pin.as_ref().ok_or(GsmError::NoPin)?;
                info!("SIM wants a PIN; entering it");
                handler.enter_pin(pin)?;
            },
            // Dealt with on the re-query below.
            PinState::SimPin2 => {}
        }
        match handler.get_pin_state()? {
            PinState::Ready => Ok(()),
            PinState::SimPin => Err(GsmError::InvalidPin),
            PinState::SimPuk | PinState::SimPuk2 => Err(GsmError::PukRequired),
            PinState::SimPin2 => {
                match self.config.sim_pin2 {
                    Some(ref pin2) => {
                        info!("SIM wants a PIN2; entering it");
                        handler.enter_pin(pin2)?;
                        match handler.get_pin_state()? {
                            PinState::Ready => Ok(()),
                            _ => Err(GsmError::InvalidPin2)
                        }
                    },
                    None => {
                        if self.config.throw_on_missing_pin2 {
                            Err(GsmError::NoPin2)
                        }
                        else {
                            warn!("SIM wants a PIN2 and none is configured; most \
                                   operations will still work");
                            Ok(())
                        }
                    }
                }
            }
        }
    }

    /// Tear the session down. Idempotent and best-effort: background
    /// threads are signalled and the receive thread joined, but the
    /// keep-alive thread is left to die on its own in case it is wedged
    /// behind an unresponsive device.
    pub fn disconnect(&mut self) {
        debug!("disconnecting");
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.monitor.nudge();
        self.shared.keepalive_cond.notify_all();
        if let Some(t) = self.receive_thread.take() {
            let _ = t.join();
        }
        self.keepalive_thread.take();
        if let Some(mut core) = self.shared.core.lock().unwrap().take() {
            core.handler.link().driver_mut().close();
        }
        self.shared.monitor.reset();
    }

    /// Send a message, fragmenting as needed. On success returns the
    /// number of parts submitted and fills in the message's bookkeeping
    /// fields.
    pub fn send_message(&mut self, msg: &mut OutgoingMessage) -> GsmResult<u8> {
        if !self.is_connected() {
            return Err(GsmError::NotConnected);
        }
        if self.config.protocol.is_text() {
            return self.send_message_text(msg);
        }
        let mp_ref = {
            let mut guard = self.shared.core.lock().unwrap();
            let core = guard.as_mut().ok_or(GsmError::NotConnected)?;
            match msg.encoding {
                crate::pdu::MessageEncoding::Ucs2 if !core.handler.supports_ucs2() => {
                    return Err(GsmError::Unsupported("UCS-2 messages on this modem"));
                },
                crate::pdu::MessageEncoding::EightBit if !core.handler.supports_binary() => {
                    return Err(GsmError::Unsupported("binary messages on this modem"));
                },
                _ => {}
            }
            core.out_mp_ref
        };
        msg.concat_ref = mp_ref;
        let parts = pdu::encode_submit(msg, mp_ref)?;
        let total = parts.len() as u8;
        for part in parts.iter() {
            let r = {
                let mut guard = self.shared.core.lock().unwrap();
                let core = guard.as_mut().ok_or(GsmError::NotConnected)?;
                core.handler.send_message(part.tpdu_length, &part.hex)
            };
            if r == SEND_FATAL {
                error!("link failure sending part {}/{}; disconnecting",
                       part.sequence, total);
                self.disconnect();
                return Err(GsmError::LinkDead);
            }
            if r < 0 {
                warn!("modem rejected part {}/{} for {}", part.sequence, total,
                      msg.recipient);
                return Err(GsmError::SendFailed);
            }
            msg.assigned_ref = r;
            msg.dispatch_timestamp = Some(Utc::now());
            self.shared.outbound.fetch_add(1, Ordering::SeqCst);
            debug!("part {}/{} accepted as ref {}", part.sequence, total, r);
        }
        // One reference per message, however many parts it took.
        let mut guard = self.shared.core.lock().unwrap();
        if let Some(core) = guard.as_mut() {
            core.out_mp_ref = core.out_mp_ref.wrapping_add(1);
        }
        Ok(total)
    }
    fn send_message_text(&mut self, msg: &mut OutgoingMessage) -> GsmResult<u8> {
        let text = msg.payload.as_text()
            .ok_or(GsmError::Unsupported("binary payloads in text mode"))?
            .to_owned();
        let recipient = format!("{}", msg.recipient);
        let r = {
            let mut guard = self.shared.core.lock().unwrap();
            let core = guard.as_mut().ok_or(GsmError::NotConnected)?;
            core.handler.send_text_message(&recipient, &text)
        };
        if r == SEND_FATAL {
            self.disconnect();
            return Err(GsmError::LinkDead);
        }
        if r < 0 {
            return Err(GsmError::SendFailed);
        }
        msg.assigned_ref = r;
        msg.dispatch_timestamp = Some(Utc::now());
        self.shared.outbound.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    /// Read stored messages of the given class from every configured
    /// memory location. Complete multipart sets come back as one message;
    /// incomplete ones stay buffered for a later read.
    pub fn read_messages(&mut self, class: MessageClass) -> GsmResult<Vec<InboundMessage>> {
        if !self.is_connected() {
            return Err(GsmError::NotConnected);
        }
        if self.config.protocol.is_text() {
            return Err(GsmError::Unsupported("reading messages in text mode"));
        }
        let msgs = {
            let mut guard = self.shared.core.lock().unwrap();
            guard.as_mut().ok_or(GsmError::NotConnected)?.read_messages(class)?
        };
        self.shared.inbound.fetch_add(msgs.len(), Ordering::SeqCst);
        Ok(msgs)
    }
    /// Delete a message from modem memory; a reassembled message has all
    /// its parts deleted.
    pub fn delete_message(&mut self, msg: &InboundMessage) -> GsmResult<()> {
        if !self.is_connected() {
            return Err(GsmError::NotConnected);
        }
        let mut guard = self.shared.core.lock().unwrap();
        guard.as_mut().ok_or(GsmError::NotConnected)?.delete_message(msg)
    }
    /// The device info gathered at connect time.
    pub fn device_info(&self) -> GsmResult<DeviceInfo> {
        let guard = self.shared.core.lock().unwrap();
        Ok(guard.as_ref().ok_or(GsmError::NotConnected)?.device_info.clone())
    }
    /// Re-query the device, updating the stored snapshot.
    pub fn refresh_device_info(&mut self) -> GsmResult<DeviceInfo> {
        let mut guard = self.shared.core.lock().unwrap();
        let core = guard.as_mut().ok_or(GsmError::NotConnected)?;
        core.device_info = query_device_info(&mut *core.handler);
        Ok(core.device_info.clone())
    }
}
impl Drop for ModemSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn query_device_info(handler: &mut dyn AtHandler) -> DeviceInfo {
    DeviceInfo {
        manufacturer: handler.get_manufacturer(),
        model: handler.get_model(),
        serial_no: handler.get_serial_no(),
        imsi: handler.get_imsi(),
        sw_version: handler.get_sw_version(),
        signal_percent: handler.get_signal_level(),
        battery_percent: handler.get_battery_level()
    }
}

const REGISTRATION_WAIT_SECS: u64 = 120;

/// Wait until the modem registers on a network. `Ok(false)` means the
/// modem doesn't support the query at all.
fn wait_for_registration(handler: &mut dyn AtHandler) -> GsmResult<bool> {
    for _ in 0..REGISTRATION_WAIT_SECS {
        let resp = handler.get_network_registration()?;
        if response::is_error(&resp) {
            return Ok(false);
        }
        match response::registration_state(&resp)? {
            s if s.is_registered() => return Ok(true),
            RegistrationState::NotRegisteredSearching => {
                debug!("registration pending; waiting");
                thread::sleep(Duration::from_secs(1));
            },
            RegistrationState::NotRegisteredAndDisabled => {
                return Err(GsmError::RegistrationFailed(
                    "automatic registration is disabled"));
            },
            RegistrationState::RegistrationDenied => {
                return Err(GsmError::RegistrationFailed(
                    "registration denied by the network"));
            },
            _ => {
                return Err(GsmError::RegistrationFailed("registration state unknown"));
            }
        }
    }
    Err(GsmError::RegistrationFailed("timed out waiting for registration"))
}

fn receive_loop(shared: Arc<SessionShared>, config: SessionConfig) {
    debug!("receive thread starting");
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let ev = shared.monitor.wait_event(config.async_poll_interval);
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let triggered = match config.receive_mode {
            ReceiveMode::AsyncPoll => true,
            _ => ev.is_cmti() || {
                let mut guard = shared.core.lock().unwrap();
                match guard.as_mut() {
                    Some(core) => core.handler.link().driver_mut().has_data(),
                    None => false
                }
            }
        };
        if !triggered {
            continue;
        }
        shared.monitor.reset();
        let msgs = {
            let mut guard = shared.core.lock().unwrap();
            let core = match guard.as_mut() {
                Some(c) => c,
                None => break
            };
            match core.read_messages(config.async_recv_class) {
                Ok(m) => m,
                Err(e) => {
                    error!("receive thread could not read messages: {}", e);
                    continue;
                }
            }
        };
        shared.inbound.fetch_add(msgs.len(), Ordering::SeqCst);
        for msg in msgs {
            // Dispatch outside the session mutex so the listener can take
            // its time.
            let consumed = {
                let mut listener = shared.listener.lock().unwrap();
                match *listener {
                    Some(ref mut cb) => cb(&msg),
                    None => false
                }
            };
            if consumed {
                let mut guard = shared.core.lock().unwrap();
                if let Some(core) = guard.as_mut() {
                    if let Err(e) = core.delete_message(&msg) {
                        error!("could not delete consumed message: {}", e);
                    }
                }
            }
        }
    }
    debug!("receive thread exiting");
}

fn keepalive_loop(shared: Arc<SessionShared>, interval: Duration) {
    debug!("keep-alive thread starting");
    loop {
        {
            let gate = shared.keepalive_gate.lock().unwrap();
            let _ = shared.keepalive_cond.wait_timeout(gate, interval).unwrap();
        }
        if shared.stop.load(Ordering::SeqCst) || !shared.connected.load(Ordering::SeqCst) {
            break;
        }
        let alive = {
            let mut guard = shared.core.lock().unwrap();
            match guard.as_mut() {
                Some(core) => core.handler.is_alive(),
                None => break
            }
        };
        match alive {
            Ok(true) => trace!("keep-alive pulse OK"),
            Ok(false) => warn!("keep-alive pulse got an error response"),
            Err(e) => {
                error!("keep-alive pulse failed; marking session dead: {}", e);
                shared.connected.store(false, Ordering::SeqCst);
                shared.stop.store(true, Ordering::SeqCst);
                shared.monitor.nudge();
                break;
            }
        }
    }
    debug!("keep-alive thread exiting");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::mock::{MockDriver, MockState};
    use crate::hex::HexData;
    use crate::message::Payload;

    fn quick_config() -> SessionConfig {
        SessionConfig {
            retries_no_response: 1,
            delay_no_response: Duration::from_millis(5),
            retries_cms_errors: 1,
            delay_cms_errors: Duration::from_millis(5),
            async_poll_interval: Duration::from_millis(50),
            command_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        }
    }
    fn connected_session(cfg: SessionConfig) -> (ModemSession, Arc<MockState>) {
        let (driver, state) = MockDriver::new();
        state.expect("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
        state.expect("AT+CREG?", "\r\n+CREG: 0,1\r\n\r\nOK\r\n");
        state.expect("AT+CPMS=?", "\r\n+CPMS: (\"SM\"),(\"SM\"),(\"SM\")\r\n\r\nOK\r\n");
        state.expect("AT+CGMI", "\r\n WAVECOM WIRELESS CPU\r\n\r\nOK\r");
        state.expect("AT+CSQ", "\r\n+CSQ: 22,0\r\n\r\nOK\r\n");
        let mut session = ModemSession::new(cfg);
        session.connect_with_driver(Box::new(driver)).unwrap();
        (session, state)
    }

    #[test]
    fn connect_runs_the_whole_flow() {
        let (mut session, state) = connected_session(quick_config());
        assert!(session.is_connected());
        let info = session.device_info().unwrap();
        assert_eq!(info.manufacturer, "WAVECOMWIRELESSCPU");
        assert_eq!(info.signal_percent, 70);
        let sent = state.sent();
        assert!(sent.contains(&"ATZ".to_owned()));
        assert!(sent.contains(&"ATE0".to_owned()));
        assert!(sent.contains(&"AT+CMEE=1".to_owned()));
        assert!(sent.contains(&"AT+CMGF=0".to_owned()));
        session.disconnect();
        assert!(!session.is_connected());
        // Idempotent.
        session.disconnect();
    }
    #[test]
    fn connect_enters_the_pin() {
        let (driver, state) = MockDriver::new();
        state.expect("AT+CPIN?", "\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        state.expect("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
        state.expect("AT+CREG?", "\r\n+CREG: 0,1\r\n\r\nOK\r\n");
        let mut cfg = quick_config();
        cfg.sim_pin = Some("1234".into());
        let mut session = ModemSession::new(cfg);
        session.connect_with_driver(Box::new(driver)).unwrap();
        assert!(state.sent().contains(&"AT+CPIN=\"1234\"".to_owned()));
    }
    #[test]
    fn connect_without_needed_pin_fails() {
        let (driver, state) = MockDriver::new();
        state.expect("AT+CPIN?", "\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        let mut session = ModemSession::new(quick_config());
        match session.connect_with_driver(Box::new(driver)) {
            Err(GsmError::NoPin) => {},
            oth => panic!("expected NoPin, got {:?}", oth)
        }
        assert!(!session.is_connected());
    }
    #[test]
    fn denied_registration_is_fatal() {
        let (driver, state) = MockDriver::new();
        state.expect("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
        state.expect("AT+CREG?", "\r\n+CREG: 0,3\r\n\r\nOK\r\n");
        let mut session = ModemSession::new(quick_config());
        match session.connect_with_driver(Box::new(driver)) {
            Err(GsmError::RegistrationFailed(_)) => {},
            oth => panic!("expected RegistrationFailed, got {:?}", oth)
        }
    }
    #[test]
    fn send_message_advances_the_reference_per_message() {
        let (mut session, state) = connected_session(quick_config());
        state.expect("AT+CMGS=", "\r\n> ");
        // Multipart GSM-7 SUBMIT PDUs from this session start with first
        // octet 0x51 (SUBMIT | UDHI | VPF-relative).
        state.expect("51", "\r\n+CMGS: 9\r\n\r\nOK\r\n");
        // Single-part ones with 0x11.
        state.expect("11", "\r\n+CMGS: 10\r\n\r\nOK\r\n");
        let long_text: String = ::std::iter::repeat('x').take(200).collect();
        let mut long = OutgoingMessage::new("+441234567890", &long_text).unwrap();
        assert_eq!(session.send_message(&mut long).unwrap(), 2);
        assert_eq!(long.assigned_ref, 9);
        assert!(long.dispatch_timestamp.is_some());
        assert_eq!(session.total_outbound(), 2);
        let mut short = OutgoingMessage::new("+441234567890", "hi").unwrap();
        assert_eq!(session.send_message(&mut short).unwrap(), 1);
        // The rolling reference advanced once for the whole multipart
        // message, not once per part.
        assert_eq!(short.concat_ref, long.concat_ref.wrapping_add(1));
    }
    #[test]
    fn fatal_send_errors_disconnect() {
        let (mut session, state) = connected_session(quick_config());
        // No prompt ever arrives.
        state.expect("AT+CMGS=", "");
        let mut msg = OutgoingMessage::new("+441234567890", "hello").unwrap();
        match session.send_message(&mut msg) {
            Err(GsmError::LinkDead) => {},
            oth => panic!("expected LinkDead, got {:?}", oth)
        }
        assert!(!session.is_connected());
    }
    #[test]
    fn sync_read_parses_listings() {
        let (mut session, state) = connected_session(quick_config());
        state.expect("AT+CMGL=4",
            "\r\n+CMGL: 2,0,,26\r\n07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37\r\nOK\r\n");
        let msgs = session.read_messages(MessageClass::All).unwrap();
        assert_eq!(msgs.len(), 1);
        match msgs[0] {
            InboundMessage::Sms(ref m) => {
                assert_eq!(m.mem_index, 2);
                assert_eq!(m.payload.as_text(), Some("hellohello"));
            },
            _ => panic!("expected an SMS")
        }
        assert_eq!(session.total_inbound(), 1);
    }

    /// Build a two-part concatenated DELIVER PDU for the async test.
    fn concat_deliver_pdu(seq: u8, total: u8, reference: u8, body: &str) -> String {
        let septets = crate::gsm_encoding::try_gsm_encode_string(body).unwrap();
        let mut ud = vec![0x05, 0x00, 0x03, reference, total, seq];
        ud.extend(crate::gsm_encoding::pack_septets(&septets, 1));
        let mut b = vec![0x00, 0x40, 0x04, 0x91, 0x21, 0x43, 0x00, 0x00];
        b.extend(&[0x10, 0x10, 0x10, 0x00, 0x00, 0x00, 0x00]);
        b.push((7 + septets.len()) as u8);
        b.extend(&ud);
        format!("{}", HexData(&b))
    }
    #[test]
    fn async_receive_reassembles_and_consumes() {
        let mut cfg = quick_config();
        cfg.receive_mode = ReceiveMode::AsyncCmti;
        let (mut session, state) = connected_session(cfg);
        let listing = format!(
            "\r\n+CMGL: 1,0,,30\r\n{}\r\n+CMGL: 2,0,,30\r\n{}\r\nOK\r\n",
            concat_deliver_pdu(2, 2, 0x42, "world"),
            concat_deliver_pdu(1, 2, 0x42, "hello "));
        state.expect("AT+CMGL=4", &listing);
        let received = Arc::new(Mutex::new(vec![]));
        let sink = received.clone();
        session.set_message_listener(move |msg: &InboundMessage| {
            sink.lock().unwrap().push(msg.clone());
            true
        });
        state.inject("\r\n+CMTI: \"SM\",2\r\n");
        for _ in 0..100 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1, "listener never saw the message");
        match received[0] {
            InboundMessage::Sms(ref m) => {
                assert_eq!(m.payload, Payload::Text("hello world".into()));
                assert_eq!(m.mem_index, -1);
                assert_eq!(m.mp_mem_indices, vec![2, 1]);
            },
            _ => panic!("expected an SMS")
        }
        // Consuming a reassembled message deletes every part.
        for _ in 0..100 {
            if state.sent_matching("AT+CMGD=") >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let sent = state.sent();
        assert!(sent.contains(&"AT+CMGD=1".to_owned()), "part 1 not deleted: {:?}", sent);
        assert!(sent.contains(&"AT+CMGD=2".to_owned()), "part 2 not deleted: {:?}", sent);
        session.disconnect();
    }
    #[test]
    fn operations_require_a_connection() {
        let mut session = ModemSession::new(quick_config());
        match session.read_messages(MessageClass::All) {
            Err(GsmError::NotConnected) => {},
            oth => panic!("expected NotConnected, got {:?}", oth)
        }
        let mut msg = OutgoingMessage::new("+44123", "x").unwrap();
        match session.send_message(&mut msg) {
            Err(GsmError::NotConnected) => {},
            oth => panic!("expected NotConnected, got {:?}", oth)
        }
    }
}
