//! Tolerant parsing of AT command responses.
//!
//! Modem firmware disagrees about whitespace, quoting and echo, so the
//! string-typed queries funnel through one forgiving pipeline and fall back
//! to sentinel values rather than failing: `"* N/A *"` for strings, `0` for
//! numbers. The structured lines (`+CMGL`, `+CMGS`, `+CMTI`, errors) get
//! proper parsers instead.

use crate::errors::{GsmError, GsmResult};
use crate::error_codes::CmsError;
use crate::util::GsmFromPrimitive;
use nom::{digit, IResult};

/// Sentinel for string fields the modem did not (or could not) supply.
pub const NA: &str = "* N/A *";

named!(pub parse_integer(&[u8]) -> u32,
       map_res!(
           map_res!(digit, ::std::str::from_utf8),
           |s: &str| s.parse::<u32>()
       )
);
named!(pub parse_quoted_string(&[u8]) -> String,
       do_parse!(
           tag!("\"") >>
           contents: take_until!("\"") >>
           tag!("\"") >>
           (String::from_utf8_lossy(contents).into_owned())
       )
);
named!(parse_mem_index_line(&[u8]) -> u32,
       do_parse!(
           take_until!(":") >>
           tag!(":") >>
           many0!(tag!(" ")) >>
           index: parse_integer >>
           (index)
       )
);
named!(parse_cms_error_line(&[u8]) -> u32,
       do_parse!(
           take_until!("CMS ERROR:") >>
           tag!("CMS ERROR:") >>
           many0!(tag!(" ")) >>
           code: parse_integer >>
           (code)
       )
);
named!(parse_cme_error_line(&[u8]) -> u32,
       do_parse!(
           take_until!("CME ERROR:") >>
           tag!("CME ERROR:") >>
           many0!(tag!(" ")) >>
           code: parse_integer >>
           (code)
       )
);
named!(parse_cmgs_line(&[u8]) -> u32,
       do_parse!(
           take_until!("+CMGS:") >>
           tag!("+CMGS:") >>
           many0!(tag!(" ")) >>
           reference: parse_integer >>
           (reference)
       )
);
named!(parse_cmti_line(&[u8]) -> (String, u32),
       do_parse!(
           take_until!("+CMTI:") >>
           tag!("+CMTI:") >>
           many0!(tag!(" ")) >>
           location: parse_quoted_string >>
           tag!(",") >>
           index: parse_integer >>
           (location, index)
       )
);

fn run<T>(res: IResult<&[u8], T>) -> Option<T> {
    match res {
        IResult::Done(_, v) => Some(v),
        _ => None
    }
}

/// Whether a response indicates command failure.
///
/// A bare `ERROR` line, a `CME ERROR:`/`CMS ERROR:` trailer, or a
/// completely empty response all count; the word "ERROR" buried inside a
/// quoted string (menu titles and the like) does not.
pub fn is_error(response: &str) -> bool {
    if response.is_empty() {
        return true;
    }
    for line in response.lines() {
        let t = line.trim();
        if t == "ERROR" || t.contains("CME ERROR:") || t.contains("CMS ERROR:") {
            return true;
        }
    }
    false
}

/// The `+CMS ERROR` code in a response, if there is one.
pub fn cms_error_code(response: &str) -> Option<u32> {
    run(parse_cms_error_line(response.as_bytes()))
}
/// The `+CME ERROR` code in a response, if there is one.
pub fn cme_error_code(response: &str) -> Option<u32> {
    run(parse_cme_error_line(response.as_bytes()))
}

/// Turn a failed response into a typed error; `Ok(())` when the response
/// succeeded.
pub fn assert_ok(response: &str) -> GsmResult<()> {
    if !is_error(response) {
        return Ok(());
    }
    if let Some(code) = cms_error_code(response) {
        return Err(GsmError::CmsError(CmsError::from_code(code)));
    }
    Err(GsmError::AtError(response.trim().to_owned()))
}

/// Extract the memory index from a listing header like `+CMGL: 2,0,,26`.
pub fn get_mem_index(line: &str) -> GsmResult<u32> {
    run(parse_mem_index_line(line.as_bytes()))
        .ok_or(GsmError::AtError(format!("malformed listing header: {:?}", line)))
}

/// The message reference from a `+CMGS: <n>` send confirmation.
pub fn cmgs_reference(response: &str) -> Option<u32> {
    run(parse_cmgs_line(response.as_bytes()))
}

/// Location and index from an unsolicited `+CMTI: "<mem>",<n>` line.
pub fn cmti_notification(text: &str) -> Option<(String, u32)> {
    run(parse_cmti_line(text.as_bytes()))
}

/// Non-blank lines of a response, trimmed.
pub fn useful_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// The common string-query pipeline: error check, then strip the trailing
/// `OK` and every bit of whitespace, quoting and separator punctuation.
pub fn string_field(response: &str) -> String {
    if is_error(response) {
        return NA.to_owned();
    }
    let mut s = response.trim().to_owned();
    if s.ends_with("OK") {
        let len = s.len() - 2;
        s.truncate(len);
    }
    let cleaned: String = s.chars()
        .filter(|c| !c.is_whitespace() && *c != '"' && *c != ',' && *c != ':')
        .collect();
    if cleaned.is_empty() {
        NA.to_owned()
    }
    else {
        cleaned
    }
}

/// Comma-separated fields on the first line after the first colon; fields
/// that are not integers come out as `None`.
fn int_fields(response: &str) -> Vec<Option<u32>> {
    let after = match response.find(':') {
        Some(p) => &response[p + 1..],
        None => return vec![]
    };
    let line = after.trim().lines().next().unwrap_or("");
    line.split(',').map(|f| f.trim().parse().ok()).collect()
}

/// Signal strength as a percentage: the RSSI from `+CSQ: <rssi>,<ber>`,
/// rescaled from 0-31. Malformed responses read as 0.
pub fn signal_percent(response: &str) -> u32 {
    if is_error(response) {
        return 0;
    }
    match int_fields(response).get(0).cloned().unwrap_or(None) {
        Some(v) => v * 100 / 31,
        None => 0
    }
}
/// Battery charge from `+CBC: <bcs>,<bcl>`: the second integer. Malformed
/// responses read as 0.
pub fn battery_percent(response: &str) -> u32 {
    if is_error(response) {
        return 0;
    }
    int_fields(response).get(1).cloned().unwrap_or(None).unwrap_or(0)
}
/// GPRS attachment from `+CGATT: <state>`.
pub fn gprs_attached(response: &str) -> bool {
    !is_error(response)
        && int_fields(response).get(0).cloned().unwrap_or(None) == Some(1)
}

/// The subscriber number from a `+CNUM` response, or the sentinel.
pub fn msisdn(response: &str) -> String {
    if is_error(response) {
        return NA.to_owned();
    }
    let after = match response.find(':') {
        Some(p) => &response[p + 1..],
        None => return NA.to_owned()
    };
    let line = after.trim().lines().next().unwrap_or("");
    match line.split(',').nth(1) {
        Some(field) => {
            let number = field.trim().trim_matches('"');
            if number.is_empty() {
                NA.to_owned()
            }
            else {
                number.to_owned()
            }
        },
        None => NA.to_owned()
    }
}

/// Every quoted memory code in a `+CPMS=?` response, deduplicated, glued
/// into the session's preference-ordered location string (e.g. `"SMME"`).
pub fn storage_locations(response: &str) -> String {
    let mut ret = String::new();
    for (i, chunk) in response.split('"').enumerate() {
        if i % 2 == 1 && chunk.len() == 2 {
            if !ret.as_bytes().chunks(2).any(|c| c == chunk.as_bytes()) {
                ret.push_str(chunk);
            }
        }
    }
    ret
}

/// The PIN state of the modem (from `AT+CPIN?`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, is_enum_variant)]
pub enum PinState {
    /// Ready - not pending for any password.
    Ready,
    /// Waiting for a SIM PIN to be entered.
    SimPin,
    /// Waiting for a SIM PUK to be given (i.e. the SIM PIN is blocked).
    SimPuk,
    /// Waiting for a SIM PIN2 to be entered.
    SimPin2,
    /// Waiting for a SIM PUK2 to be given (i.e. the SIM PIN2 is blocked).
    SimPuk2
}
/// Parse a `+CPIN?` response.
pub fn pin_state(response: &str) -> GsmResult<PinState> {
    assert_ok(response)?;
    let after = match response.find("+CPIN:") {
        Some(p) => &response[p + 6..],
        None => response
    };
    let token = after.trim().lines().next().unwrap_or("").trim().trim_matches('"');
    let r = match token {
        "READY" => PinState::Ready,
        "SIM PIN" => PinState::SimPin,
        "SIM PUK" => PinState::SimPuk,
        "SIM PIN2" => PinState::SimPin2,
        "SIM PUK2" => PinState::SimPuk2,
        oth => return Err(GsmError::AtError(format!("unknown PIN state: {:?}", oth)))
    };
    Ok(r)
}

/// The current registration state of the modem (from `AT+CREG?`).
///
/// Modems have to be 'registered' (i.e. connected to) a given cellular
/// network to be able to do anything useful (text, call, etc.).
#[repr(u8)]
#[derive(Debug, FromPrimitive, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegistrationState {
    /// Not registered, and not searching for a new operator at present.
    NotRegisteredAndDisabled = 0,
    /// Registered, and on our 'home' network (i.e. not roaming).
    RegisteredHome = 1,
    /// Not registered, and searching for a new operator.
    NotRegisteredSearching = 2,
    /// Registration denied.
    RegistrationDenied = 3,
    /// Registration state unknown.
    Unknown = 4,
    /// Registered, and on a 'roaming' network.
    RegisteredRoaming = 5
}
impl RegistrationState {
    /// If the `RegistrationState` is either `RegisteredHome` or
    /// `RegisteredRoaming`, returns `true`. Otherwise, returns `false`.
    pub fn is_registered(&self) -> bool {
        use self::RegistrationState::*;

        match *self {
            RegisteredHome => true,
            RegisteredRoaming => true,
            _ => false
        }
    }
}
/// Parse the second integer of a `+CREG: <n>,<stat>` response.
pub fn registration_state(response: &str) -> GsmResult<RegistrationState> {
    match int_fields(response).get(1).cloned().unwrap_or(None) {
        Some(v) => RegistrationState::from_integer(v)
            .map_err(|_| GsmError::RegistrationFailed("invalid registration response")),
        None => Err(GsmError::RegistrationFailed("invalid registration response"))
    }
}
