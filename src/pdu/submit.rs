//! Building SMS-SUBMIT PDUs, including splitting long payloads into
//! concatenated parts.

use crate::errors::{GsmError, GsmResult};
use crate::gsm_encoding::{self, udh};
use crate::hex::HexData;
use crate::message::{OutgoingMessage, Payload};
use super::{relative_validity_period, MessageEncoding, MessageType, PduFirstOctet,
            VpFieldValidity};
use encoding::{EncoderTrap, Encoding};
use encoding::all::UTF_16BE;

/// Maximum octets of user data (UDH included) a single TPDU can carry.
pub const MAX_UD_OCTETS: usize = 140;

/// One ready-to-send part of an outgoing message.
#[derive(Debug, Clone)]
pub struct SubmitPart {
    /// The whole PDU (SMSC prefix included) as an uppercase hex string.
    pub hex: String,
    /// Byte length of the TPDU *excluding* the SMSC prefix; this is the
    /// length `AT+CMGS` wants.
    pub tpdu_length: usize,
    /// 1-based part number.
    pub sequence: u8
}

/// How many septets fit in a part whose UDH occupies `udh_octets` octets
/// (length octet included; 0 for none).
fn septet_capacity(udh_octets: usize) -> usize {
    (MAX_UD_OCTETS * 8 - udh_octets * 8 - gsm_encoding::skip_bits(udh_octets)) / 7
}

/// Split unpacked septets into chunks of at most `cap`, taking care not to
/// strand an escape septet at a chunk boundary.
fn split_septets(mut buf: Vec<u8>, cap: usize) -> Vec<Vec<u8>> {
    let mut ret = vec![];
    while buf.len() > cap {
        let mut at = cap;
        if buf[at - 1] == 0x1B {
            at -= 1;
        }
        let rest = buf.split_off(at);
        ret.push(::std::mem::replace(&mut buf, rest));
    }
    ret.push(buf);
    ret
}

/// Split text into chunks of at most `cap` UTF-16 code units, on character
/// boundaries only, so no surrogate pair is ever bisected.
fn split_utf16_units(text: &str, cap: usize) -> Vec<String> {
    let mut ret = vec![];
    let mut cur = String::new();
    let mut units = 0;
    for ch in text.chars() {
        let u = ch.len_utf16();
        if units + u > cap && !cur.is_empty() {
            ret.push(::std::mem::replace(&mut cur, String::new()));
            units = 0;
        }
        cur.push(ch);
        units += u;
    }
    if !cur.is_empty() || ret.is_empty() {
        ret.push(cur);
    }
    ret
}

enum UserDataChunks {
    /// Unpacked septets per part.
    Septets(Vec<Vec<u8>>),
    /// Raw UD octets per part.
    Octets(Vec<Vec<u8>>)
}
impl UserDataChunks {
    fn len(&self) -> usize {
        match *self {
            UserDataChunks::Septets(ref v) => v.len(),
            UserDataChunks::Octets(ref v) => v.len()
        }
    }
}

fn split_user_data(msg: &OutgoingMessage, is_ported: bool) -> GsmResult<UserDataChunks> {
    let udh_single = udh::udh_size(true, is_ported, false) as usize;
    let udh_multi = udh::udh_size(true, is_ported, true) as usize;
    match (&msg.payload, msg.encoding) {
        (&Payload::Text(ref text), MessageEncoding::Gsm7Bit) => {
            let septets = gsm_encoding::gsm_encode_string_lossy(text);
            if septets.len() <= septet_capacity(udh_single) {
                Ok(UserDataChunks::Septets(vec![septets]))
            }
            else {
                Ok(UserDataChunks::Septets(split_septets(septets, septet_capacity(udh_multi))))
            }
        },
        (&Payload::Text(ref text), MessageEncoding::Ucs2) => {
            let total_units: usize = text.chars().map(|c| c.len_utf16()).sum();
            let chunks = if total_units * 2 + udh_single <= MAX_UD_OCTETS {
                vec![text.clone()]
            }
            else {
                split_utf16_units(text, (MAX_UD_OCTETS - udh_multi) / 2)
            };
            let mut ret = vec![];
            for c in chunks {
                // UTF_16BE encoding is total; the trap never fires.
                ret.push(UTF_16BE.encode(&c, EncoderTrap::Replace).unwrap());
            }
            Ok(UserDataChunks::Octets(ret))
        },
        (&Payload::Binary(ref data), MessageEncoding::EightBit) => {
            if data.len() + udh_single <= MAX_UD_OCTETS {
                Ok(UserDataChunks::Octets(vec![data.clone()]))
            }
            else {
                let cap = MAX_UD_OCTETS - udh_multi;
                Ok(UserDataChunks::Octets(data.chunks(cap).map(|c| c.to_owned()).collect()))
            }
        },
        _ => Err(GsmError::InvalidPdu("payload does not match the selected encoding"))
    }
}

/// Encode an outgoing message into one or more SUBMIT PDUs.
///
/// `mp_ref` is the concatenation reference to stamp on the parts; it is
/// only actually emitted when more than one part is needed.
pub fn encode_submit(msg: &OutgoingMessage, mp_ref: u16) -> GsmResult<Vec<SubmitPart>> {
    let is_ported = msg.dest_port.is_some() || msg.source_port.is_some();
    let chunks = split_user_data(msg, is_ported)?;
    let total = chunks.len();
    if total > 255 {
        return Err(GsmError::InvalidPdu("message would need more than 255 parts"));
    }
    let requires_concat = total > 1;
    let udh_octets = udh::udh_size(true, is_ported, requires_concat) as usize;
    let requires_udh = udh_octets > 0;

    let smsc_bytes = match msg.smsc {
        Some(ref smsc) => smsc.as_bytes(true)?,
        None => vec![]
    };
    let first_octet = PduFirstOctet {
        mti: MessageType::SmsSubmit,
        rd: false,
        vpf: VpFieldValidity::Relative,
        srr: msg.request_status_report,
        udhi: requires_udh,
        rp: false
    };
    let recipient_bytes = msg.recipient.as_bytes(false)?;
    let vp = relative_validity_period(msg.validity_period_hours as i64);

    let build_part = |seq: usize, udl: usize, payload: Vec<u8>| -> GsmResult<SubmitPart> {
        let mut ret = smsc_bytes.clone();
        ret.push(first_octet.as_u8());
        ret.push(0); // TP-MR; the modem assigns the real one
        ret.extend(recipient_bytes.iter().cloned());
        ret.push(msg.protocol_id);
        ret.push(msg.dcs);
        ret.push(vp);
        ret.push(udl as u8);
        if requires_udh {
            ret.extend(udh::build_udh(seq as u8, total as u8, mp_ref,
                                      msg.source_port.unwrap_or(0),
                                      msg.dest_port.unwrap_or(0),
                                      is_ported, requires_concat));
        }
        ret.extend(payload);
        Ok(SubmitPart {
            tpdu_length: ret.len() - smsc_bytes.len(),
            hex: format!("{}", HexData(&ret)),
            sequence: seq as u8
        })
    };

    let mut parts = vec![];
    match chunks {
        UserDataChunks::Septets(chunks) => {
            let skip = gsm_encoding::skip_bits(udh_octets);
            for (i, chunk) in chunks.into_iter().enumerate() {
                let udl = (udh_octets * 8 + skip) / 7 + chunk.len();
                let packed = gsm_encoding::pack_septets(&chunk, skip);
                parts.push(build_part(i + 1, udl, packed)?);
            }
        },
        UserDataChunks::Octets(chunks) => {
            for (i, chunk) in chunks.into_iter().enumerate() {
                let udl = udh_octets + chunk.len();
                parts.push(build_part(i + 1, udl, chunk)?);
            }
        }
    }
    Ok(parts)
}
