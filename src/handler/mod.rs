//! The AT dialect layer. `AtHandler`'s default methods speak the plain
//! TS 27.005/27.007 command set; vendor types override the places where
//! real firmware disagrees with the standard, and the registry picks one
//! from the configured manufacturer, model and alias strings.

pub mod vendors;

use crate::errors::{GsmError, GsmResult};
use crate::link::SerialLink;
use crate::message::MessageClass;
use crate::response::{self, PinState};
use std::thread;
use std::time::Duration;

/// `send_message` sentinel: the modem rejected this part; skip the rest of
/// the message.
pub const SEND_FAILED: i32 = -1;
/// `send_message` sentinel: the link itself is gone; disconnect.
pub const SEND_FATAL: i32 = -2;

/// A vendor dialect of the AT command set. All methods are defaulted to the
/// standard dialect and go through [`link()`](AtHandler::link).
pub trait AtHandler: Send {
    /// The live serial link.
    fn link(&mut self) -> &mut SerialLink;
    /// Registry name this handler was resolved under.
    fn name(&self) -> &'static str {
        "base"
    }

    /// Coax the modem's autobauding into life. The response, if any, is
    /// deliberately ignored.
    fn sync(&mut self) -> GsmResult<()> {
        let _ = self.link().send_receive("AT");
        Ok(())
    }
    /// Soft-reset to the stored profile.
    fn reset(&mut self) -> GsmResult<()> {
        let _ = self.link().send_receive("ATZ")?;
        Ok(())
    }
    fn echo_off(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("ATE0")?;
        response::assert_ok(&r)
    }
    /// Vendor-specific setup after reset; the standard dialect needs none.
    fn init(&mut self) -> GsmResult<()> {
        Ok(())
    }
    fn is_alive(&mut self) -> GsmResult<bool> {
        let r = self.link().send_receive("AT")?;
        Ok(!response::is_error(&r))
    }
    fn set_verbose_errors(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CMEE=1")?;
        response::assert_ok(&r)
    }

    fn get_pin_response(&mut self) -> GsmResult<String> {
        self.link().send_receive("AT+CPIN?")
    }
    fn get_pin_state(&mut self) -> GsmResult<PinState> {
        let r = self.get_pin_response()?;
        response::pin_state(&r)
    }
    fn enter_pin(&mut self, pin: &str) -> GsmResult<()> {
        let r = self.link().send_receive(&format!("AT+CPIN=\"{}\"", pin))?;
        response::assert_ok(&r)?;
        // SIMs want a beat between unlocking and the next query.
        thread::sleep(Duration::from_millis(500));
        Ok(())
    }

    fn set_pdu_mode(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CMGF=0")?;
        response::assert_ok(&r)
    }
    fn set_text_mode(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CMGF=1")?;
        response::assert_ok(&r)
    }
    /// Ask for `+CMTI` URCs on new messages.
    fn enable_indications(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CNMI=1,1,0,0,0")?;
        response::assert_ok(&r)
    }
    fn disable_indications(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CNMI=0,0,0,0,0")?;
        response::assert_ok(&r)
    }
    fn set_smsc(&mut self, smsc: &str) -> GsmResult<()> {
        let r = self.link().send_receive(&format!("AT+CSCA=\"{}\"", smsc))?;
        response::assert_ok(&r)
    }

    fn set_memory_location(&mut self, location: &str) -> GsmResult<()> {
        let r = self.link().send_receive(&format!("AT+CPMS=\"{}\"", location))?;
        response::assert_ok(&r)
    }
    /// Discover the preferred-storage codes the modem offers, as a
    /// concatenated string of two-letter codes.
    fn get_storage_locations(&mut self) -> GsmResult<String> {
        let r = self.link().send_receive("AT+CPMS=?")?;
        if response::is_error(&r) {
            return Ok(String::new());
        }
        Ok(response::storage_locations(&r))
    }
    /// List stored messages; returns the raw response blob for the caller
    /// to walk.
    fn list_messages(&mut self, class: MessageClass) -> GsmResult<String> {
        self.link().send_receive(&format!("AT+CMGL={}", class as u8))
    }
    fn delete_message(&mut self, index: u32) -> GsmResult<()> {
        let r = self.link().send_receive(&format!("AT+CMGD={}", index))?;
        response::assert_ok(&r)
    }

    /// Submit a PDU. Returns the assigned message reference, or
    /// `SEND_FAILED` / `SEND_FATAL`.
    fn send_message(&mut self, tpdu_length: usize, pdu_hex: &str) -> i32 {
        match self.link().send_pdu(&format!("AT+CMGS={}", tpdu_length), pdu_hex) {
            Ok(resp) => {
                if response::is_error(&resp) {
                    warn!("modem rejected PDU: {}", resp.trim());
                    return SEND_FAILED;
                }
                match response::cmgs_reference(&resp) {
                    Some(r) => r as i32,
                    None => {
                        warn!("no +CMGS reference in response: {:?}", resp);
                        SEND_FAILED
                    }
                }
            },
            Err(GsmError::NoResponse) => SEND_FATAL,
            Err(GsmError::IoError(_)) | Err(GsmError::SerialError(_)) => SEND_FATAL,
            Err(e) => {
                warn!("send failed: {}", e);
                SEND_FAILED
            }
        }
    }
    /// Text-mode submission, for modems (or sessions) that never leave
    /// text mode.
    fn send_text_message(&mut self, recipient: &str, text: &str) -> i32 {
        match self.link().send_pdu(&format!("AT+CMGS=\"{}\"", recipient), text) {
            Ok(resp) => {
                if response::is_error(&resp) {
                    return SEND_FAILED;
                }
                match response::cmgs_reference(&resp) {
                    Some(r) => r as i32,
                    None => SEND_FAILED
                }
            },
            Err(GsmError::NoResponse) => SEND_FATAL,
            Err(GsmError::IoError(_)) | Err(GsmError::SerialError(_)) => SEND_FATAL,
            Err(_) => SEND_FAILED
        }
    }

    fn get_network_registration(&mut self) -> GsmResult<String> {
        self.link().send_receive("AT+CREG?")
    }

    /// Run a string query through the tolerant pipeline; link failures read
    /// as the sentinel.
    fn string_query(&mut self, cmd: &str) -> String {
        match self.link().send_receive(cmd) {
            Ok(r) => response::string_field(&r),
            Err(_) => response::NA.to_owned()
        }
    }
    fn get_manufacturer(&mut self) -> String {
        self.string_query("AT+CGMI")
    }
    fn get_model(&mut self) -> String {
        self.string_query("AT+CGMM")
    }
    fn get_serial_no(&mut self) -> String {
        self.string_query("AT+CGSN")
    }
    fn get_imsi(&mut self) -> String {
        self.string_query("AT+CIMI")
    }
    fn get_sw_version(&mut self) -> String {
        self.string_query("AT+CGMR")
    }
    fn get_msisdn(&mut self) -> String {
        match self.link().send_receive("AT+CNUM") {
            Ok(r) => response::msisdn(&r),
            Err(_) => response::NA.to_owned()
        }
    }
    fn get_signal_level(&mut self) -> u32 {
        match self.link().send_receive("AT+CSQ") {
            Ok(r) => response::signal_percent(&r),
            Err(_) => 0
        }
    }
    fn get_battery_level(&mut self) -> u32 {
        match self.link().send_receive("AT+CBC") {
            Ok(r) => response::battery_percent(&r),
            Err(_) => 0
        }
    }
    fn get_gprs_status(&mut self) -> bool {
        match self.link().send_receive("AT+CGATT?") {
            Ok(r) => response::gprs_attached(&r),
            Err(_) => false
        }
    }

    fn supports_receive(&self) -> bool {
        true
    }
    fn supports_binary(&self) -> bool {
        true
    }
    fn supports_ucs2(&self) -> bool {
        true
    }
    fn supports_stk(&self) -> bool {
        false
    }
}

/// The standard dialect with nothing overridden.
pub struct BaseHandler {
    link: SerialLink
}
impl BaseHandler {
    pub fn new(link: SerialLink) -> BaseHandler {
        BaseHandler { link }
    }
    pub fn boxed(link: SerialLink) -> Box<dyn AtHandler> {
        Box::new(BaseHandler::new(link))
    }
}
impl AtHandler for BaseHandler {
    fn link(&mut self) -> &mut SerialLink {
        &mut self.link
    }
}

type HandlerCtor = fn(SerialLink) -> Box<dyn AtHandler>;

/// The compiled-in dialect table.
static HANDLERS: &[(&str, HandlerCtor)] = &[
    ("huawei", vendors::HuaweiHandler::boxed),
    ("wavecom", vendors::WavecomHandler::boxed),
    ("siemens", vendors::SiemensHandler::boxed),
];

fn candidate_matches(candidate: &str, name: &str) -> bool {
    !candidate.is_empty() && candidate.to_lowercase().contains(name)
}

/// Pick a dialect for the device at hand. The alias wins over
/// manufacturer+model, which wins over manufacturer alone; anything
/// unrecognized gets the standard dialect.
pub fn resolve_handler(link: SerialLink, manufacturer: &str, model: &str, alias: &str)
                       -> Box<dyn AtHandler> {
    let manufacturer = manufacturer.trim();
    let model = model.trim();
    let candidates = [
        alias.trim().to_owned(),
        if manufacturer.is_empty() || model.is_empty() {
            String::new()
        }
        else {
            format!("{}_{}", manufacturer, model)
        },
        manufacturer.to_owned(),
    ];
    for cand in candidates.iter() {
        for &(name, ctor) in HANDLERS.iter() {
            if candidate_matches(cand, name) {
                debug!("resolved AT handler {:?} from {:?}", name, cand);
                return ctor(link);
            }
        }
    }
    debug!("no vendor handler matched; using the standard dialect");
    BaseHandler::boxed(link)
}
