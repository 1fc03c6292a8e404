//! Types shared by the TPDU encoder and decoder: addresses, first octets,
//! data coding schemes and validity periods (3GPP TS 23.040).

pub mod submit;
pub mod deliver;

pub use self::submit::{encode_submit, SubmitPart};
pub use self::deliver::{parse_pdu, DeliverPdu, IncomingPdu, StatusReportPdu};

use crate::errors::{GsmError, GsmResult};
use crate::gsm_encoding;
use crate::hex;
use std::fmt;
use std::str::FromStr;

/// The longest address we will encode, in digits.
pub const MAX_ADDRESS_DIGITS: usize = 20;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeOfNumber {
    Unknown = 0b0_000_0000,
    International = 0b0_001_0000,
    National = 0b0_010_0000,
    NetworkSpecific = 0b0_011_0000,
    Subscriber = 0b0_100_0000,
    Alphanumeric = 0b0_101_0000,
    Abbreviated = 0b0_110_0000,
    Reserved = 0b0_111_0000
}
impl TypeOfNumber {
    fn from_u8(b: u8) -> TypeOfNumber {
        use self::TypeOfNumber::*;
        match b & 0b0_111_0000 {
            0b0_000_0000 => Unknown,
            0b0_001_0000 => International,
            0b0_010_0000 => National,
            0b0_011_0000 => NetworkSpecific,
            0b0_100_0000 => Subscriber,
            0b0_101_0000 => Alphanumeric,
            0b0_110_0000 => Abbreviated,
            _ => Reserved
        }
    }
}
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumberingPlanIdentification {
    NetworkDetermined = 0b0_000_0000,
    IsdnTelephone = 0b0_000_0001,
    Data = 0b0_000_0011,
    Telex = 0b0_000_0100,
    National = 0b0_000_1000,
    Private = 0b0_000_1001,
    Ermes = 0b0_000_1010
}
impl NumberingPlanIdentification {
    fn from_u8(b: u8) -> NumberingPlanIdentification {
        use self::NumberingPlanIdentification::*;
        match b & 0b0_000_1111 {
            0b0_000_0000 => NetworkDetermined,
            0b0_000_0011 => Data,
            0b0_000_0100 => Telex,
            0b0_000_1000 => National,
            0b0_000_1001 => Private,
            0b0_000_1010 => Ermes,
            _ => IsdnTelephone
        }
    }
}
/// A Type-of-Address octet, combining a type of number with a numbering
/// plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressType {
    pub type_of_number: TypeOfNumber,
    pub numbering_plan_identification: NumberingPlanIdentification
}
impl Default for AddressType {
    fn default() -> Self {
        AddressType {
            type_of_number: TypeOfNumber::Unknown,
            numbering_plan_identification: NumberingPlanIdentification::IsdnTelephone
        }
    }
}
impl AddressType {
    pub fn as_u8(self) -> u8 {
        let mut ret: u8 = 0b1_000_0000;
        ret |= self.type_of_number as u8;
        ret |= self.numbering_plan_identification as u8;
        ret
    }
    pub fn from_u8(b: u8) -> AddressType {
        AddressType {
            type_of_number: TypeOfNumber::from_u8(b),
            numbering_plan_identification: NumberingPlanIdentification::from_u8(b)
        }
    }
}
/// An SMSC, originator or destination address.
///
/// The digits are stored without any `+` prefix; international numbers carry
/// `TypeOfNumber::International` instead, and `Display` puts the `+` back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduAddress {
    pub type_addr: AddressType,
    pub number: String
}
impl PduAddress {
    pub fn empty() -> PduAddress {
        PduAddress {
            type_addr: AddressType::default(),
            number: String::new()
        }
    }
    pub fn international(number: &str) -> PduAddress {
        PduAddress {
            type_addr: AddressType {
                type_of_number: TypeOfNumber::International,
                numbering_plan_identification: NumberingPlanIdentification::IsdnTelephone
            },
            number: number.trim_start_matches('+').to_owned()
        }
    }
    pub fn national(number: &str) -> PduAddress {
        PduAddress {
            type_addr: AddressType {
                type_of_number: TypeOfNumber::National,
                numbering_plan_identification: NumberingPlanIdentification::IsdnTelephone
            },
            number: number.to_owned()
        }
    }
    /// Serialize to the wire form `[length][toa][semi-octets…]`.
    ///
    /// The length octet means different things in different places: for an
    /// SMSC it counts the octets that follow it (fill nibble included), for
    /// everything else it counts useful semi-octets.
    pub fn as_bytes(&self, is_smsc: bool) -> GsmResult<Vec<u8>> {
        if self.number.is_empty() && is_smsc {
            return Ok(vec![0]);
        }
        if self.type_addr.type_of_number == TypeOfNumber::Alphanumeric {
            return Err(GsmError::InvalidPdu("cannot encode an alphanumeric address"));
        }
        if self.number.len() > MAX_ADDRESS_DIGITS {
            return Err(GsmError::AddressTooLong(self.number.len()));
        }
        let semi = hex::encode_semi_octets(&self.number)?;
        let len = if is_smsc {
            1 + semi.len()
        } else {
            self.number.len()
        };
        let mut ret = Vec::with_capacity(2 + semi.len());
        ret.push(len as u8);
        ret.push(self.type_addr.as_u8());
        ret.extend(semi);
        Ok(ret)
    }
}
impl FromStr for PduAddress {
    type Err = GsmError;
    fn from_str(s: &str) -> GsmResult<PduAddress> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('+') {
            Ok(PduAddress::international(rest))
        }
        else {
            Ok(PduAddress {
                type_addr: AddressType::default(),
                number: s.to_owned()
            })
        }
    }
}
impl fmt::Display for PduAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.type_addr.type_of_number == TypeOfNumber::International {
            write!(f, "+")?;
        }
        write!(f, "{}", self.number)
    }
}

/// Parse an address field, returning the address and the number of bytes
/// consumed.
pub(crate) fn parse_address(b: &[u8], is_smsc: bool) -> GsmResult<(PduAddress, usize)> {
    check_offset!(b, 0, "address length");
    let len = b[0] as usize;
    if len == 0 {
        return Ok((PduAddress::empty(), 1));
    }
    check_offset!(b, 1, "address type");
    let type_addr = AddressType::from_u8(b[1]);
    let semi_count = if is_smsc { (len - 1) * 2 } else { len };
    let octets = (semi_count + 1) / 2;
    let end = 2 + octets;
    if b.len() < end {
        return Err(GsmError::InvalidPdu("address data goes past end of PDU"));
    }
    let data = &b[2..end];
    let number = match type_addr.type_of_number {
        TypeOfNumber::Alphanumeric => {
            let septets = gsm_encoding::unpack_septets(data, 0, data.len() * 8 / 7);
            gsm_encoding::gsm_decode_string(&septets)
        },
        // Fill nibbles count towards an SMSC length octet, so they have to
        // survive the decode there; everywhere else they are dropped.
        _ => hex::decode_semi_octets(data, semi_count, is_smsc)
    };
    Ok((PduAddress { type_addr, number }, end))
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageType {
    SmsDeliver = 0b000000_00,
    SmsSubmit = 0b000000_01,
    SmsStatusReport = 0b000000_10,
    Reserved = 0b000000_11
}
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum VpFieldValidity {
    Invalid = 0b000_00_000,
    Enhanced = 0b000_01_000,
    Relative = 0b000_10_000,
    Absolute = 0b000_11_000,
}
/// The first octet of a TPDU, a packed bag of flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PduFirstOctet {
    pub mti: MessageType,
    pub rd: bool,
    pub vpf: VpFieldValidity,
    pub srr: bool,
    pub udhi: bool,
    pub rp: bool
}
impl PduFirstOctet {
    pub fn as_u8(self) -> u8 {
        let mut ret = 0b0000_0000;
        ret |= self.mti as u8;
        ret |= self.vpf as u8;
        if self.rd {
            ret |= 0b0000_0100;
        }
        if self.srr {
            ret |= 0b0010_0000;
        }
        if self.udhi {
            ret |= 0b0100_0000;
        }
        if self.rp {
            ret |= 0b1000_0000;
        }
        ret
    }
    pub fn from_u8(b: u8) -> PduFirstOctet {
        let mti = match b & 0b11 {
            0b00 => MessageType::SmsDeliver,
            0b01 => MessageType::SmsSubmit,
            0b10 => MessageType::SmsStatusReport,
            _ => MessageType::Reserved
        };
        let vpf = match b & 0b000_11_000 {
            0b000_01_000 => VpFieldValidity::Enhanced,
            0b000_10_000 => VpFieldValidity::Relative,
            0b000_11_000 => VpFieldValidity::Absolute,
            _ => VpFieldValidity::Invalid
        };
        PduFirstOctet {
            mti, vpf,
            rd: b & 0b0000_0100 != 0,
            srr: b & 0b0010_0000 != 0,
            udhi: b & 0b0100_0000 != 0,
            rp: b & 0b1000_0000 != 0
        }
    }
}
/// User data encodings, as the low DCS group encodes them.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageEncoding {
    Gsm7Bit = 0b0000_00_00,
    EightBit = 0b0000_01_00,
    Ucs2 = 0b0000_10_00,
    Reserved = 0b0000_11_00,
}
impl MessageEncoding {
    /// Extract the encoding from a TP-DCS octet (mask `0x0C`).
    pub fn from_dcs(dcs: u8) -> MessageEncoding {
        match dcs & 0b0000_11_00 {
            0b0000_01_00 => MessageEncoding::EightBit,
            0b0000_10_00 => MessageEncoding::Ucs2,
            0b0000_11_00 => MessageEncoding::Reserved,
            _ => MessageEncoding::Gsm7Bit
        }
    }
    /// The TP-DCS octet announcing this encoding, with no message class.
    pub fn dcs_byte(self) -> u8 {
        self as u8
    }
}

/// Encode a relative validity period from hours, per the TS 23.040 TP-VP
/// table. Values at or below zero yield the maximum (63 weeks).
pub fn relative_validity_period(hours: i64) -> u8 {
    if hours <= 0 {
        0xFF
    }
    else if hours <= 12 {
        (hours * 12 - 1) as u8
    }
    else if hours <= 24 {
        ((hours - 12) * 2 + 143) as u8
    }
    else if hours <= 720 {
        (hours / 24 + 166) as u8
    }
    else {
        ::std::cmp::min(hours / 168 + 192, 0xFF) as u8
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn smsc_address_length_counts_octets() {
        // 11 international digits -> 6 semi-octet bytes + 1 ToA = 7.
        let addr: PduAddress = "+44778899001".parse().unwrap();
        let enc = addr.as_bytes(true).unwrap();
        assert_eq!(enc[0], 0x07);
        assert_eq!(enc[1], 0x91);
    }
    #[test]
    fn plain_address_length_counts_semi_octets() {
        let addr: PduAddress = "+44778899001".parse().unwrap();
        let enc = addr.as_bytes(false).unwrap();
        assert_eq!(enc[0], 11);
        assert_eq!(enc[1], 0x91);
    }
    #[test]
    fn non_international_toa() {
        let addr: PduAddress = "0684103777".parse().unwrap();
        let enc = addr.as_bytes(false).unwrap();
        assert_eq!(enc[1], 0x81);
    }
    #[test]
    fn odd_address_roundtrip_drops_fill() {
        let addr: PduAddress = "+44712".parse().unwrap();
        let enc = addr.as_bytes(false).unwrap();
        assert_eq!(enc, vec![5, 0x91, 0x44, 0x17, 0xF2]);
        let (back, used) = parse_address(&enc, false).unwrap();
        assert_eq!(used, enc.len());
        assert_eq!(back.number, "44712");
        assert_eq!(back.type_addr.type_of_number, TypeOfNumber::International);
        assert_eq!(format!("{}", back), "+44712");
    }
    #[test]
    fn smsc_roundtrip_keeps_fill_space() {
        let addr: PduAddress = "07890123456".parse().unwrap();
        let enc = addr.as_bytes(true).unwrap();
        let (back, _) = parse_address(&enc, true).unwrap();
        assert_eq!(back.number, "07890123456 ");
    }
    #[test]
    fn empty_smsc_is_single_zero() {
        let addr = PduAddress::empty();
        assert_eq!(addr.as_bytes(true).unwrap(), vec![0]);
        let (back, used) = parse_address(&[0], true).unwrap();
        assert_eq!(used, 1);
        assert!(back.number.is_empty());
    }
    #[test]
    fn over_long_address_rejected() {
        let addr: PduAddress = "123456789012345678901".parse().unwrap();
        assert!(addr.as_bytes(false).is_err());
    }
    #[test]
    fn alphanumeric_address_decodes() {
        // "Hi" in packed GSM septets, 4 semi-octets long.
        let raw = [0x04, 0xD0, 0xC8, 0x34];
        let (addr, used) = parse_address(&raw, false).unwrap();
        assert_eq!(used, 4);
        assert_eq!(addr.type_addr.type_of_number, TypeOfNumber::Alphanumeric);
        assert_eq!(addr.number, "Hi");
    }
    #[test]
    fn first_octet_roundtrip() {
        let fo = PduFirstOctet {
            mti: MessageType::SmsSubmit,
            rd: false,
            vpf: VpFieldValidity::Relative,
            srr: true,
            udhi: true,
            rp: false
        };
        let b = fo.as_u8();
        assert_eq!(b, 0x71);
        assert_eq!(PduFirstOctet::from_u8(b), fo);
    }
    #[test]
    fn encoding_from_dcs() {
        assert_eq!(MessageEncoding::from_dcs(0x00), MessageEncoding::Gsm7Bit);
        assert_eq!(MessageEncoding::from_dcs(0x04), MessageEncoding::EightBit);
        assert_eq!(MessageEncoding::from_dcs(0x08), MessageEncoding::Ucs2);
    }
    #[test]
    fn validity_period_table() {
        assert_eq!(relative_validity_period(0), 0xFF);
        assert_eq!(relative_validity_period(-3), 0xFF);
        assert_eq!(relative_validity_period(1), 11);
        assert_eq!(relative_validity_period(12), 143);
        assert_eq!(relative_validity_period(24), 167);
        assert_eq!(relative_validity_period(720), 196);
    }
    #[test]
    fn validity_period_monotonic_and_capped() {
        let mut last = 0u8;
        for h in 1..20000 {
            let vp = relative_validity_period(h);
            assert!(vp >= last, "vp went backwards at {} hours", h);
            last = vp;
        }
        assert_eq!(relative_validity_period(1_000_000), 0xFF);
    }
}
