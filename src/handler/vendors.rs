//! Vendor dialects. Each one is the standard dialect with the smallest set
//! of overrides that makes the hardware behave.

use crate::errors::GsmResult;
use crate::link::SerialLink;
use crate::response;
use super::{AtHandler, BaseHandler};

/// Huawei USB sticks. Happy to route indications directly as long as
/// `+CNMI` asks for buffered delivery.
pub struct HuaweiHandler {
    base: BaseHandler
}
impl HuaweiHandler {
    pub fn boxed(link: SerialLink) -> Box<dyn AtHandler> {
        Box::new(HuaweiHandler { base: BaseHandler::new(link) })
    }
}
impl AtHandler for HuaweiHandler {
    fn link(&mut self) -> &mut SerialLink {
        self.base.link()
    }
    fn name(&self) -> &'static str {
        "huawei"
    }
    fn enable_indications(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CNMI=2,1,0,2,0")?;
        response::assert_ok(&r)
    }
}

/// Wavecom wireless CPUs. Chatty by default; `+WIND` indications get
/// silenced during init so they don't pollute response framing.
pub struct WavecomHandler {
    base: BaseHandler
}
impl WavecomHandler {
    pub fn boxed(link: SerialLink) -> Box<dyn AtHandler> {
        Box::new(WavecomHandler { base: BaseHandler::new(link) })
    }
}
impl AtHandler for WavecomHandler {
    fn link(&mut self) -> &mut SerialLink {
        self.base.link()
    }
    fn name(&self) -> &'static str {
        "wavecom"
    }
    fn init(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+WIND=0")?;
        response::assert_ok(&r)
    }
    fn enable_indications(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CNMI=2,1,0,0,0")?;
        response::assert_ok(&r)
    }
    fn supports_stk(&self) -> bool {
        true
    }
}

/// Older Siemens phones. No UCS-2, and they only buffer indications.
pub struct SiemensHandler {
    base: BaseHandler
}
impl SiemensHandler {
    pub fn boxed(link: SerialLink) -> Box<dyn AtHandler> {
        Box::new(SiemensHandler { base: BaseHandler::new(link) })
    }
}
impl AtHandler for SiemensHandler {
    fn link(&mut self) -> &mut SerialLink {
        self.base.link()
    }
    fn name(&self) -> &'static str {
        "siemens"
    }
    fn enable_indications(&mut self) -> GsmResult<()> {
        let r = self.link().send_receive("AT+CNMI=1,1,0,0,1")?;
        response::assert_ok(&r)
    }
    fn supports_ucs2(&self) -> bool {
        false
    }
}
