//! Parsing incoming PDUs: SMS-DELIVER and SMS-STATUS-REPORT, with their
//! 7-octet service-centre timestamps.

use crate::errors::{GsmError, GsmResult};
use crate::gsm_encoding::{self, udh::UserDataHeader};
use crate::hex::HexData;
use crate::message::{DeliveryStatus, Payload};
use super::{parse_address, MessageEncoding, PduAddress, PduFirstOctet};
use chrono::{NaiveDate, TimeZone, Utc};
use encoding::{DecoderTrap, Encoding};
use encoding::all::UTF_16BE;
use std::convert::TryFrom;

/// A decoded SMS-DELIVER TPDU.
#[derive(Debug, Clone)]
pub struct DeliverPdu {
    pub smsc: PduAddress,
    pub first_octet: PduFirstOctet,
    /// The undigested first octet. MTI value 3 is reserved but decoded as a
    /// DELIVER; keeping the original byte around lets callers tell.
    pub raw_first_octet: u8,
    pub originator: PduAddress,
    pub protocol_id: u8,
    pub dcs: u8,
    pub encoding: MessageEncoding,
    /// Service-centre timestamp, UTC milliseconds.
    pub timestamp_millis: i64,
    pub payload: Payload,
    pub udh: Option<UserDataHeader>
}
impl DeliverPdu {
    /// Concatenation data from the UDH, if this is a multipart fragment.
    pub fn concat(&self) -> Option<crate::gsm_encoding::udh::ConcatenatedSmsData> {
        self.udh.as_ref().and_then(|u| u.concat())
    }
}

/// A decoded SMS-STATUS-REPORT TPDU.
#[derive(Debug, Clone)]
pub struct StatusReportPdu {
    pub smsc: PduAddress,
    /// TP-MR of the message this report refers to.
    pub ref_no: u8,
    pub recipient: PduAddress,
    /// When the service centre took the original message, UTC ms.
    pub submit_timestamp_millis: i64,
    /// When the outcome was determined, UTC ms.
    pub discharge_timestamp_millis: i64,
    /// The raw TP-ST octet.
    pub status: u8,
    pub delivery_status: DeliveryStatus
}

/// Either kind of PDU a `+CMGL` listing can produce.
#[derive(Debug, Clone)]
pub enum IncomingPdu {
    Deliver(DeliverPdu),
    StatusReport(StatusReportPdu)
}

/// Parse a hex PDU as listed by the modem.
pub fn parse_pdu(hex: &str) -> GsmResult<IncomingPdu> {
    let bytes = HexData::decode(hex.trim())?;
    parse_pdu_bytes(&bytes)
}

fn parse_pdu_bytes(b: &[u8]) -> GsmResult<IncomingPdu> {
    let (smsc, mut off) = parse_address(b, true)?;
    check_offset!(b, off, "first octet");
    let raw_first_octet = b[off];
    off += 1;
    match raw_first_octet & 0b11 {
        0b01 => Err(GsmError::InvalidPdu("SMS-SUBMIT-REPORT PDUs are not handled")),
        0b10 => parse_status_report(b, off, smsc, raw_first_octet),
        _ => parse_deliver(b, off, smsc, raw_first_octet)
    }
}

fn parse_deliver(b: &[u8], mut off: usize, smsc: PduAddress, raw_first_octet: u8)
                 -> GsmResult<IncomingPdu> {
    let first_octet = PduFirstOctet::from_u8(raw_first_octet);
    let (originator, n) = parse_address(&b[off..], false)?;
    off += n;
    check_offset!(b, off, "TP-PID");
    let protocol_id = b[off];
    off += 1;
    check_offset!(b, off, "TP-DCS");
    let dcs = b[off];
    off += 1;
    let encoding = MessageEncoding::from_dcs(dcs);
    let timestamp_millis = parse_scts(b.get(off..off + 7)
        .ok_or(GsmError::InvalidPdu("truncated TP-SCTS"))?)?;
    off += 7;
    check_offset!(b, off, "TP-UDL");
    let udl = b[off] as usize;
    off += 1;
    let ud_octets = match encoding {
        MessageEncoding::Gsm7Bit => (udl * 7 + 7) / 8,
        _ => udl
    };
    let ud = b.get(off..off + ud_octets)
        .ok_or(GsmError::InvalidPdu("user data goes past end of PDU"))?;
    let (payload, udh) = decode_user_data(encoding, first_octet.udhi, ud, udl)?;
    Ok(IncomingPdu::Deliver(DeliverPdu {
        smsc, first_octet, raw_first_octet, originator, protocol_id, dcs,
        encoding, timestamp_millis, payload, udh
    }))
}

fn parse_status_report(b: &[u8], mut off: usize, smsc: PduAddress, _raw_first_octet: u8)
                       -> GsmResult<IncomingPdu> {
    check_offset!(b, off, "TP-MR");
    let ref_no = b[off];
    off += 1;
    let (recipient, n) = parse_address(&b[off..], false)?;
    off += n;
    let submit_timestamp_millis = parse_scts(b.get(off..off + 7)
        .ok_or(GsmError::InvalidPdu("truncated submit TP-SCTS"))?)?;
    off += 7;
    let discharge_timestamp_millis = parse_scts(b.get(off..off + 7)
        .ok_or(GsmError::InvalidPdu("truncated discharge TP-SCTS"))?)?;
    off += 7;
    check_offset!(b, off, "TP-ST");
    let status = b[off];
    Ok(IncomingPdu::StatusReport(StatusReportPdu {
        smsc, ref_no, recipient, submit_timestamp_millis, discharge_timestamp_millis,
        status,
        delivery_status: DeliveryStatus::from_tp_st(status)
    }))
}

fn decode_user_data(encoding: MessageEncoding, udhi: bool, ud: &[u8], udl: usize)
                    -> GsmResult<(Payload, Option<UserDataHeader>)> {
    let mut start = 0;
    let mut udh = None;
    if udhi {
        if ud.is_empty() {
            return Err(GsmError::InvalidPdu("UDHI specified, but no data"));
        }
        let udhl = ud[0] as usize;
        start = udhl + 1;
        if ud.len() < start {
            return Err(GsmError::InvalidPdu("UDHL goes past end of data"));
        }
        udh = Some(UserDataHeader::try_from(&ud[1..start])?);
    }
    let body = if start <= ud.len() { &ud[start..] } else { &[][..] };
    let payload = match encoding {
        MessageEncoding::Gsm7Bit => {
            let skip = if udhi { gsm_encoding::skip_bits(start) } else { 0 };
            let count = udl.saturating_sub((start * 8 + skip) / 7);
            let septets = gsm_encoding::unpack_septets(body, skip, count);
            Payload::Text(gsm_encoding::gsm_decode_string(&septets))
        },
        MessageEncoding::Ucs2 => {
            // The replacing decode is total; the unwrap cannot fire.
            Payload::Text(UTF_16BE.decode(body, DecoderTrap::Replace).unwrap())
        },
        MessageEncoding::EightBit => Payload::Binary(body.to_vec()),
        MessageEncoding::Reserved => {
            return Err(GsmError::UnsupportedEncoding(encoding, ud.to_vec()));
        }
    };
    Ok((payload, udh))
}

/// Decode a 7-octet TP-SCTS field into UTC milliseconds.
///
/// The first six octets are nibble-swapped BCD; the timezone octet carries
/// its sign in the top bit and a quarter-hour count below it, which gets
/// subtracted from the naively-parsed timestamp to reach UTC.
fn parse_scts(b: &[u8]) -> GsmResult<i64> {
    let d: Vec<u32> = b[..6].iter().map(|x| ((x & 0xF) * 10 + (x >> 4)) as u32).collect();
    let naive = NaiveDate::from_ymd_opt(2000 + d[0] as i32, d[1], d[2])
        .and_then(|nd| nd.and_hms_opt(d[3], d[4], d[5]))
        .ok_or(GsmError::InvalidPdu("invalid service-centre timestamp"))?;
    let tz = b[6];
    let quarters = (((tz >> 4) & 0x7) * 10 + (tz & 0xF)) as i64;
    let offset_minutes = if tz & 0x80 != 0 { -(quarters * 15) } else { quarters * 15 };
    Ok(Utc.from_utc_datetime(&naive).timestamp_millis() - offset_minutes * 60_000)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pdu::TypeOfNumber;

    #[test]
    fn deliver_known_vector() {
        let pdu = parse_pdu(
            "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37"
        ).unwrap();
        let d = match pdu {
            IncomingPdu::Deliver(d) => d,
            _ => panic!("expected a DELIVER")
        };
        assert_eq!(d.smsc.number, "27381000015 ");
        assert_eq!(d.originator.number, "27838890001");
        assert_eq!(d.encoding, MessageEncoding::Gsm7Bit);
        assert_eq!(d.payload.as_text(), Some("hellohello"));
        assert!(d.udh.is_none());
        assert!(d.timestamp_millis > 0);
    }
    #[test]
    fn status_report_known_vector() {
        let pdu = parse_pdu(
            "07A17098103254F606130C91527420121670110172111332E11101721113322100"
        ).unwrap();
        let r = match pdu {
            IncomingPdu::StatusReport(r) => r,
            _ => panic!("expected a STATUS-REPORT")
        };
        assert_eq!(r.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(r.ref_no, 0x13);
        assert_eq!(r.recipient.type_addr.type_of_number, TypeOfNumber::International);
        assert!(format!("{}", r.recipient).starts_with("+2547"));
        assert!(r.submit_timestamp_millis > 0);
        assert!(r.discharge_timestamp_millis > 0);
    }
    #[test]
    fn submit_report_rejected() {
        // MTI == 1 in the deliver direction: not ours to parse.
        assert!(parse_pdu("0001000000").is_err());
    }
    #[test]
    fn reserved_mti_decoded_as_deliver() {
        // Same as the known DELIVER vector, with MTI patched to 3.
        let pdu = parse_pdu(
            "07917283010010F5070BC87238880900F10000993092516195800AE8329BFD4697D9EC37"
        ).unwrap();
        match pdu {
            IncomingPdu::Deliver(d) => {
                assert_eq!(d.raw_first_octet & 0b11, 0b11);
                assert_eq!(d.payload.as_text(), Some("hellohello"));
            },
            _ => panic!("expected a DELIVER")
        }
    }
    fn synth_deliver(dcs: u8, udhi: bool, udl: usize, ud: &[u8]) -> Vec<u8> {
        let mut b = vec![0x00]; // no SMSC
        b.push(if udhi { 0x40 } else { 0x00 });
        b.extend(&[0x04, 0x91, 0x21, 0x43]); // +1234
        b.push(0x00); // PID
        b.push(dcs);
        b.extend(&[0x10, 0x10, 0x10, 0x00, 0x00, 0x00, 0x00]); // 2001-01-01
        b.push(udl as u8);
        b.extend(ud);
        b
    }
    #[test]
    fn deliver_with_concat_udh() {
        let septets = crate::gsm_encoding::try_gsm_encode_string("part one").unwrap();
        let mut ud = vec![0x05, 0x00, 0x03, 0x2A, 0x02, 0x01];
        ud.extend(crate::gsm_encoding::pack_septets(&septets, 1));
        let udl = 7 + septets.len();
        let b = synth_deliver(0x00, true, udl, &ud);
        let pdu = parse_pdu_bytes(&b).unwrap();
        let d = match pdu {
            IncomingPdu::Deliver(d) => d,
            _ => panic!()
        };
        let concat = d.concat().unwrap();
        assert_eq!(concat.reference, 0x2A);
        assert_eq!(concat.parts, 2);
        assert_eq!(concat.sequence, 1);
        assert_eq!(d.payload.as_text(), Some("part one"));
    }
    #[test]
    fn deliver_ucs2() {
        let text = "Привет";
        let bytes = UTF_16BE.encode(text, ::encoding::EncoderTrap::Strict).unwrap();
        let b = synth_deliver(0x08, false, bytes.len(), &bytes);
        match parse_pdu_bytes(&b).unwrap() {
            IncomingPdu::Deliver(d) => {
                assert_eq!(d.encoding, MessageEncoding::Ucs2);
                assert_eq!(d.payload.as_text(), Some(text));
            },
            _ => panic!()
        }
    }
    #[test]
    fn deliver_eight_bit() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let b = synth_deliver(0x04, false, data.len(), &data);
        match parse_pdu_bytes(&b).unwrap() {
            IncomingPdu::Deliver(d) => {
                assert_eq!(d.encoding, MessageEncoding::EightBit);
                assert_eq!(d.payload.as_binary(), Some(&data[..]));
            },
            _ => panic!()
        }
    }
    #[test]
    fn truncated_pdu_rejected() {
        assert!(parse_pdu("07917283010010F504").is_err());
    }
    #[test]
    fn scts_timezone_handling() {
        let base = [0x10, 0x10, 0x10, 0x00, 0x00, 0x00, 0x00];
        let utc = parse_scts(&base).unwrap();
        // 0x8A: negative, 10 quarter-hours -> the instant is 150 minutes
        // later than a naive read.
        let mut west = base;
        west[6] = 0x8A;
        assert_eq!(parse_scts(&west).unwrap(), utc + 150 * 60_000);
        // Positive offsets shift the other way.
        let mut east = base;
        east[6] = 0x21;
        assert_eq!(parse_scts(&east).unwrap(), utc - 21 * 15 * 60_000);
    }
    #[test]
    fn scts_garbage_rejected() {
        // Month 77 does not exist.
        let bad = [0x10, 0x77, 0x10, 0x00, 0x00, 0x00, 0x00];
        assert!(parse_scts(&bad).is_err());
    }
}
