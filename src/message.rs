//! High-level message types: what callers hand to the session to send, and
//! what listeners get back when something arrives.

use crate::errors::GsmResult;
use crate::gsm_encoding;
use crate::pdu::{MessageEncoding, PduAddress};
use chrono::{DateTime, Utc};

/// The payload of a message: text for GSM 7-bit and UCS-2, raw bytes for
/// 8-bit data messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>)
}
impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match *self {
            Payload::Text(ref t) => Some(t),
            _ => None
        }
    }
    pub fn as_binary(&self) -> Option<&[u8]> {
        match *self {
            Payload::Binary(ref b) => Some(b),
            _ => None
        }
    }
}

/// The storage status of messages to list (the `AT+CMGL` PDU-mode classes).
#[repr(u8)]
#[derive(Debug, FromPrimitive, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageClass {
    /// Received and unread.
    ReceivedUnread = 0,
    /// Received and read.
    ReceivedRead = 1,
    /// Outgoing and unsent.
    StoredUnsent = 2,
    /// Outgoing and sent.
    StoredSent = 3,
    /// Any kind.
    All = 4
}

/// An outgoing short message. Create one, hand it to
/// [`ModemSession::send_message`](crate::session::ModemSession::send_message);
/// the session fills in `concat_ref`, `assigned_ref` and
/// `dispatch_timestamp` as it goes.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipient: PduAddress,
    /// SMSC to route through. `None` leaves the choice to the modem.
    pub smsc: Option<PduAddress>,
    pub payload: Payload,
    pub encoding: MessageEncoding,
    pub source_port: Option<u16>,
    pub dest_port: Option<u16>,
    pub request_status_report: bool,
    /// Relative validity period. Zero means "as long as the network
    /// allows".
    pub validity_period_hours: u16,
    pub protocol_id: u8,
    /// TP-DCS octet; derived from `encoding` by the constructors, but may
    /// be overridden for exotic coding groups.
    pub dcs: u8,
    /// Concatenation reference used for this message's parts; set on send.
    pub concat_ref: u16,
    /// Message reference the modem assigned, or -1 before dispatch.
    pub assigned_ref: i32,
    pub dispatch_timestamp: Option<DateTime<Utc>>
}
impl OutgoingMessage {
    /// Create a text message. Picks GSM 7-bit when the text fits the
    /// default alphabet, UCS-2 otherwise; override `encoding` if you know
    /// better.
    pub fn new(recipient: &str, text: &str) -> GsmResult<OutgoingMessage> {
        let encoding = if gsm_encoding::is_gsm_encodable(text) {
            MessageEncoding::Gsm7Bit
        }
        else {
            MessageEncoding::Ucs2
        };
        Ok(OutgoingMessage {
            recipient: recipient.parse()?,
            smsc: None,
            payload: Payload::Text(text.to_owned()),
            encoding,
            source_port: None,
            dest_port: None,
            request_status_report: false,
            validity_period_hours: 0,
            protocol_id: 0,
            dcs: encoding.dcs_byte(),
            concat_ref: 0,
            assigned_ref: -1,
            dispatch_timestamp: None
        })
    }
    /// Create an 8-bit data message, usually aimed at an application port.
    pub fn new_binary(recipient: &str, data: Vec<u8>) -> GsmResult<OutgoingMessage> {
        let mut ret = OutgoingMessage::new(recipient, "")?;
        ret.payload = Payload::Binary(data);
        ret.encoding = MessageEncoding::EightBit;
        ret.dcs = MessageEncoding::EightBit.dcs_byte();
        Ok(ret)
    }
}

/// Concatenation info attached to an incoming fragment.
pub use crate::gsm_encoding::udh::ConcatenatedSmsData;

/// A received short message, either a single-part one or the result of
/// reassembling a multipart set.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Index in modem memory, or -1 for a reassembled virtual message.
    pub mem_index: i32,
    /// Two-letter memory location code the message was read from.
    pub mem_location: String,
    pub originator: PduAddress,
    pub smsc: PduAddress,
    /// Service-centre timestamp, UTC milliseconds.
    pub timestamp_millis: i64,
    pub encoding: MessageEncoding,
    pub payload: Payload,
    /// Present when this is one fragment of a multipart message.
    pub concat: Option<ConcatenatedSmsData>,
    /// For reassembled messages, the memory indices of the individual
    /// parts, so that consuming the message can delete all of them.
    pub mp_mem_indices: Vec<u16>
}

/// How a status report says the message fared.
#[derive(Debug, Copy, Clone, PartialEq, Eq, is_enum_variant)]
pub enum DeliveryStatus {
    Unknown,
    Delivered,
    KeepTrying,
    Aborted
}
impl DeliveryStatus {
    /// Map a TP-ST octet onto a coarse delivery outcome.
    pub fn from_tp_st(st: u8) -> DeliveryStatus {
        match (st >> 5) & 0x3 {
            0 => DeliveryStatus::Delivered,
            1 => DeliveryStatus::KeepTrying,
            _ => DeliveryStatus::Aborted
        }
    }
}
impl ::std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        let s = match *self {
            DeliveryStatus::Unknown => "Delivery status unknown",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::KeepTrying => "Still trying to deliver",
            DeliveryStatus::Aborted => "Delivery failed permanently"
        };
        write!(f, "{}", s)
    }
}

/// A delivery status report for a previously sent message.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub mem_index: i32,
    pub mem_location: String,
    /// The TP-MR of the message this report is about.
    pub ref_no: u8,
    /// The address carried in the report; the recipient of the original
    /// message.
    pub recipient: PduAddress,
    pub smsc: PduAddress,
    /// When the service centre accepted the original message, UTC ms.
    pub submit_timestamp_millis: i64,
    /// When the service centre learned of the outcome, UTC ms.
    pub discharge_timestamp_millis: i64,
    pub delivery_status: DeliveryStatus,
    /// Human-readable rendering of the outcome.
    pub text: String
}
impl StatusReport {
    /// The address the report is about. This is the same datum as
    /// `recipient`; the accessor exists because reports arrive on the
    /// receive path, where code reaches for an originator.
    pub fn originator(&self) -> &PduAddress {
        &self.recipient
    }
}

/// Anything the receive path can hand to a listener.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Sms(IncomingMessage),
    StatusReport(StatusReport)
}
impl InboundMessage {
    pub fn mem_index(&self) -> i32 {
        match *self {
            InboundMessage::Sms(ref m) => m.mem_index,
            InboundMessage::StatusReport(ref r) => r.mem_index
        }
    }
    pub fn mem_location(&self) -> &str {
        match *self {
            InboundMessage::Sms(ref m) => &m.mem_location,
            InboundMessage::StatusReport(ref r) => &r.mem_location
        }
    }
    /// Memory indices of multipart fragments, empty for everything else.
    pub fn mp_mem_indices(&self) -> &[u16] {
        match *self {
            InboundMessage::Sms(ref m) => &m.mp_mem_indices,
            InboundMessage::StatusReport(_) => &[]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn encoding_auto_selection() {
        let plain = OutgoingMessage::new("+441234567890", "hello").unwrap();
        assert_eq!(plain.encoding, MessageEncoding::Gsm7Bit);
        assert_eq!(plain.dcs, 0x00);
        let fancy = OutgoingMessage::new("+441234567890", "héllo ☺").unwrap();
        assert_eq!(fancy.encoding, MessageEncoding::Ucs2);
        assert_eq!(fancy.dcs, 0x08);
        let binary = OutgoingMessage::new_binary("+441234567890", vec![1, 2, 3]).unwrap();
        assert_eq!(binary.encoding, MessageEncoding::EightBit);
        assert_eq!(binary.dcs, 0x04);
    }
    #[test]
    fn delivery_status_mapping() {
        assert_eq!(DeliveryStatus::from_tp_st(0x00), DeliveryStatus::Delivered);
        assert_eq!(DeliveryStatus::from_tp_st(0x20), DeliveryStatus::KeepTrying);
        assert_eq!(DeliveryStatus::from_tp_st(0x40), DeliveryStatus::Aborted);
        assert_eq!(DeliveryStatus::from_tp_st(0x60), DeliveryStatus::Aborted);
        assert!(DeliveryStatus::from_tp_st(0).is_delivered());
    }
}
