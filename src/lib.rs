//! Send and receive SMS messages by driving a GSM modem over a serial
//! AT-command link.
//!
//! The crate has two tightly coupled halves:
//!
//! - a byte-exact **TPDU codec** for 3GPP TS 23.040 short messages (the
//!   `pdu`, `gsm_encoding` and `hex` modules): addresses, data coding
//!   schemes, user data headers, concatenation, GSM 7-bit / 8-bit / UCS-2
//!   payloads, status reports and service-centre timestamps;
//! - a **session controller** (the `session` module, with `driver`, `link`,
//!   `handler` and `response` underneath) that owns the serial line,
//!   handles connect/PIN/registration, sends PDUs with a retry policy,
//!   receives either by polling or on `+CMTI` indications, and reassembles
//!   multipart messages before anyone else sees them.
//!
//! ```no_run
//! use gsm_modem::{ModemSession, OutgoingMessage, SessionConfig};
//!
//! let mut session = ModemSession::new(SessionConfig {
//!     port: "/dev/ttyUSB0".into(),
//!     ..SessionConfig::default()
//! });
//! session.connect().unwrap();
//! let mut msg = OutgoingMessage::new("+441234567890", "hello there").unwrap();
//! session.send_message(&mut msg).unwrap();
//! session.disconnect();
//! ```

extern crate bytes;
extern crate chrono;
#[macro_use] extern crate derive_is_enum_variant;
extern crate encoding;
extern crate failure;
#[macro_use] extern crate failure_derive;
#[macro_use] extern crate log;
#[macro_use] extern crate nom;
extern crate num;
#[macro_use] extern crate num_derive;
extern crate rand;
extern crate serial;

macro_rules! check_offset {
    ($b:ident, $offset:expr, $reason:expr) => {
        if $b.get($offset).is_none() {
            return Err(GsmError::InvalidPdu(concat!("Offset check failed for: ", $reason)));
        }
    }
}

pub mod error_codes;
pub mod errors;
pub mod hex;
pub mod gsm_encoding;
pub mod pdu;
pub mod response;
pub mod message;
pub mod reassembly;
pub mod driver;
pub mod link;
pub mod handler;
pub mod session;
pub mod util;

pub use crate::errors::{GsmError, GsmResult};
pub use crate::message::{InboundMessage, IncomingMessage, MessageClass, OutgoingMessage,
                         Payload, StatusReport};
pub use crate::pdu::{MessageEncoding, PduAddress};
pub use crate::session::{DeviceInfo, ModemSession, Protocol, ReceiveMode, SessionConfig};
