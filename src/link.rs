//! The AT round-trip layer: writes a command, frames the response out of
//! the receive buffer, and applies the retry policy.

use crate::driver::SerialDriver;
use crate::error_codes::CmsError;
use crate::errors::{GsmError, GsmResult};
use crate::response;
use std::thread;
use std::time::{Duration, Instant};

/// How stubborn to be about commands that go wrong.
#[derive(Debug, Copy, Clone)]
pub struct RetryPolicy {
    /// Retries when a command gets no response at all.
    pub retries_no_response: u32,
    pub delay_no_response: Duration,
    /// Retries when a command fails with a *transient* CMS error.
    pub retries_cms_errors: u32,
    pub delay_cms_errors: Duration
}
impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            retries_no_response: 3,
            delay_no_response: Duration::from_secs(5),
            retries_cms_errors: 5,
            delay_cms_errors: Duration::from_secs(5)
        }
    }
}

/// Result codes that terminate a response. PDU listing lines and
/// information responses never look like these.
fn is_complete(resp: &str) -> bool {
    if resp.ends_with("> ") {
        return true;
    }
    for line in resp.lines().rev() {
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        return t == "OK" || t == "ERROR" || t == "NO CARRIER" || t == "BUSY"
            || t == "NO DIALTONE" || t == "NO ANSWER" || t == "COMMAND NOT SUPPORT"
            || t.starts_with("+CME ERROR") || t.starts_with("+CMS ERROR");
    }
    false
}

/// One serial line with request/response framing on top.
pub struct SerialLink {
    driver: Box<dyn SerialDriver>,
    policy: RetryPolicy,
    /// How long an ordinary command may take.
    pub command_timeout: Duration,
    /// How long a message submission may take; the network round-trip after
    /// `AT+CMGS` is much slower than anything else.
    pub send_timeout: Duration
}
impl SerialLink {
    pub fn new(driver: Box<dyn SerialDriver>, policy: RetryPolicy) -> SerialLink {
        SerialLink {
            driver,
            policy,
            command_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30)
        }
    }
    pub fn driver_mut(&mut self) -> &mut dyn SerialDriver {
        &mut *self.driver
    }
    /// Issue a command and collect its response, retrying per policy.
    pub fn send_receive(&mut self, cmd: &str) -> GsmResult<String> {
        let timeout = self.command_timeout;
        self.transact(cmd, None, timeout)
    }
    /// Issue a two-phase `AT+CMGS`-style command: wait for the `> ` prompt,
    /// then ship the payload terminated by Ctrl-Z.
    pub fn send_pdu(&mut self, cmd: &str, pdu_hex: &str) -> GsmResult<String> {
        let timeout = self.send_timeout;
        self.transact(cmd, Some(pdu_hex), timeout)
    }

    fn transact(&mut self, cmd: &str, payload: Option<&str>, timeout: Duration)
                -> GsmResult<String> {
        let mut no_resp_tries = 0;
        let mut cms_tries = 0;
        loop {
            match self.attempt(cmd, payload, timeout) {
                Ok(resp) => {
                    if let Some(code) = response::cms_error_code(&resp) {
                        let e = CmsError::from_code(code);
                        if e.is_transient() && cms_tries < self.policy.retries_cms_errors {
                            cms_tries += 1;
                            warn!("transient CMS error running {:?} ({}), retry {}/{}",
                                  cmd, e, cms_tries, self.policy.retries_cms_errors);
                            thread::sleep(self.policy.delay_cms_errors);
                            continue;
                        }
                    }
                    return Ok(resp);
                },
                Err(GsmError::NoResponse) => {
                    if no_resp_tries >= self.policy.retries_no_response {
                        return Err(GsmError::NoResponse);
                    }
                    no_resp_tries += 1;
                    warn!("no response to {:?}, retry {}/{}",
                          cmd, no_resp_tries, self.policy.retries_no_response);
                    thread::sleep(self.policy.delay_no_response);
                },
                Err(e) => return Err(e)
            }
        }
    }
    fn attempt(&mut self, cmd: &str, payload: Option<&str>, timeout: Duration)
               -> GsmResult<String> {
        self.driver.empty_buffer();
        trace!("sending command: {}", cmd);
        self.driver.send(format!("{}\r", cmd).as_bytes())?;
        match payload {
            None => self.collect_response(timeout),
            Some(p) => {
                let prompt_timeout = self.command_timeout;
                let prompt = self.collect_response(prompt_timeout)?;
                if !prompt.contains('>') {
                    // No prompt. A straight error response here is an
                    // answer in its own right; anything else is a lost
                    // command.
                    if response::is_error(&prompt) {
                        return Ok(prompt);
                    }
                    return Err(GsmError::NoResponse);
                }
                trace!("got prompt, sending {} hex chars", p.len());
                self.driver.send(format!("{}\x1A", p).as_bytes())?;
                self.collect_response(timeout)
            }
        }
    }
    fn collect_response(&mut self, timeout: Duration) -> GsmResult<String> {
        let deadline = Instant::now() + timeout;
        let mut resp = String::new();
        loop {
            let chunk = self.driver.read_buffer();
            if !chunk.is_empty() {
                resp.push_str(&chunk);
                if is_complete(&resp) {
                    trace!("response complete: {:?}", resp);
                    return Ok(resp);
                }
            }
            if Instant::now() >= deadline {
                if resp.is_empty() {
                    return Err(GsmError::NoResponse);
                }
                warn!("response never completed, using what there is: {:?}", resp);
                return Ok(resp);
            }
            thread::sleep(Duration::from_millis(25));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::mock::MockDriver;

    fn quick_link() -> (SerialLink, ::std::sync::Arc<crate::driver::mock::MockState>) {
        let (driver, state) = MockDriver::new();
        let mut link = SerialLink::new(Box::new(driver), RetryPolicy {
            retries_no_response: 2,
            delay_no_response: Duration::from_millis(5),
            retries_cms_errors: 2,
            delay_cms_errors: Duration::from_millis(5)
        });
        link.command_timeout = Duration::from_millis(100);
        link.send_timeout = Duration::from_millis(200);
        (link, state)
    }

    #[test]
    fn simple_round_trip() {
        let (mut link, state) = quick_link();
        state.expect("AT+CGMI", "\r\nACME Modems\r\n\r\nOK\r\n");
        let resp = link.send_receive("AT+CGMI").unwrap();
        assert!(resp.contains("ACME"));
        assert_eq!(state.sent(), vec!["AT+CGMI"]);
    }
    #[test]
    fn no_response_exhausts_retries() {
        let (mut link, state) = quick_link();
        state.expect("AT+CGSN", "");
        match link.send_receive("AT+CGSN") {
            Err(GsmError::NoResponse) => {},
            oth => panic!("expected NoResponse, got {:?}", oth)
        }
        // Initial try plus two retries.
        assert_eq!(state.sent().len(), 3);
    }
    #[test]
    fn missing_response_eventually_arrives() {
        let (mut link, state) = quick_link();
        state.expect("AT", "");
        state.expect("AT", "\r\nOK\r\n");
        assert!(link.send_receive("AT").is_ok());
        assert_eq!(state.sent().len(), 2);
    }
    #[test]
    fn transient_cms_errors_retry() {
        let (mut link, state) = quick_link();
        state.expect("AT+CMGD=1", "\r\n+CMS ERROR: 314\r\n");
        state.expect("AT+CMGD=1", "\r\nOK\r\n");
        let resp = link.send_receive("AT+CMGD=1").unwrap();
        assert!(!crate::response::is_error(&resp));
        assert_eq!(state.sent().len(), 2);
    }
    #[test]
    fn permanent_cms_errors_do_not_retry() {
        let (mut link, state) = quick_link();
        state.expect("AT+CMGD=1", "\r\n+CMS ERROR: 321\r\n");
        let resp = link.send_receive("AT+CMGD=1").unwrap();
        assert!(crate::response::is_error(&resp));
        assert_eq!(state.sent().len(), 1);
    }
    #[test]
    fn pdu_prompt_flow() {
        let (mut link, state) = quick_link();
        state.expect("AT+CMGS=19", "\r\n> ");
        state.expect("0011000A", "\r\n+CMGS: 7\r\n\r\nOK\r\n");
        let resp = link.send_pdu("AT+CMGS=19", "0011000A8121436500000AE8329BFD4697D9EC37").unwrap();
        assert_eq!(crate::response::cmgs_reference(&resp), Some(7));
        let sent = state.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].ends_with("D9EC37"));
    }
}
