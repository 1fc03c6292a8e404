//! User Data Headers: the optional prefix of a message's user data that
//! carries information elements for concatenation and application port
//! addressing.
//!
//! On the wire a UDH is `[UDHL][IEI][IE-len][IE-data]…`, the length octet
//! counting everything after itself. Only the handful of IEs this crate
//! acts on get typed accessors; unrecognized ones are kept raw so nothing
//! is lost.
use crate::errors::*;
use std::convert::TryFrom;

/// IEI for 8-bit concatenated short messages.
pub const IEI_CONCAT_8BIT: u8 = 0x00;
/// IEI for application port addressing, 16-bit ports.
pub const IEI_PORT_16BIT: u8 = 0x05;
/// IEI for 16-bit concatenated short messages.
pub const IEI_CONCAT_16BIT: u8 = 0x08;

/// Whether outgoing concatenation IEs carry a 16-bit reference. The 8-bit
/// form is universally understood, so that is what we emit; flip this to
/// trade 255 in-flight references for one more octet per part.
pub const USE_16BIT_CONCAT_REF: bool = false;

/// One information element: identifier octet plus its raw data.
#[derive(Debug, Clone)]
pub struct InformationElement {
    pub iei: u8,
    pub data: Vec<u8>
}
/// A parsed (or under-construction) User Data Header.
#[derive(Debug, Clone)]
pub struct UserDataHeader {
    pub elements: Vec<InformationElement>
}
/// The concatenation IE: which multipart message a fragment belongs to,
/// and where in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatenatedSmsData {
    /// Groups the fragments of one message together.
    pub reference: u16,
    /// Total number of fragments in the message.
    pub parts: u8,
    /// This fragment's 1-based position.
    pub sequence: u8
}
/// The application port addressing IE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationPortData {
    pub dest_port: u16,
    pub source_port: u16
}
impl UserDataHeader {
    /// Concatenation data, from either the 8-bit or the 16-bit IE.
    pub fn concat(&self) -> Option<ConcatenatedSmsData> {
        self.elements.iter().find_map(|ie| {
            match (ie.iei, ie.data.as_slice()) {
                (IEI_CONCAT_8BIT, &[reference, parts, sequence]) => {
                    Some(ConcatenatedSmsData {
                        reference: reference as u16,
                        parts, sequence
                    })
                },
                (IEI_CONCAT_16BIT, &[hi, lo, parts, sequence]) => {
                    Some(ConcatenatedSmsData {
                        reference: u16::from_be_bytes([hi, lo]),
                        parts, sequence
                    })
                },
                _ => None
            }
        })
    }
    /// Port addressing data, if this header carries the 16-bit port IE.
    pub fn ports(&self) -> Option<ApplicationPortData> {
        self.elements.iter().find_map(|ie| {
            match (ie.iei, ie.data.as_slice()) {
                (IEI_PORT_16BIT, &[dst_hi, dst_lo, src_hi, src_lo]) => {
                    Some(ApplicationPortData {
                        dest_port: u16::from_be_bytes([dst_hi, dst_lo]),
                        source_port: u16::from_be_bytes([src_hi, src_lo])
                    })
                },
                _ => None
            }
        })
    }
    /// Serialize to wire form, leading UDHL octet included.
    pub fn as_bytes(&self) -> Vec<u8> {
        let body_len: usize = self.elements.iter().map(|ie| 2 + ie.data.len()).sum();
        let mut out = Vec::with_capacity(1 + body_len);
        out.push(body_len as u8);
        for ie in self.elements.iter() {
            out.push(ie.iei);
            out.push(ie.data.len() as u8);
            out.extend_from_slice(&ie.data);
        }
        out
    }
}
impl<'a> TryFrom<&'a [u8]> for UserDataHeader {
    type Error = GsmError;
    /// Walks the IE list of a UDH, *without* the leading UDHL octet.
    fn try_from(bytes: &[u8]) -> GsmResult<Self> {
        let mut rest = bytes;
        let mut elements = vec![];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(GsmError::InvalidPdu("dangling information element header"));
            }
            let (iei, len) = (rest[0], rest[1] as usize);
            if rest.len() < 2 + len {
                return Err(GsmError::InvalidPdu("information element data runs past the header"));
            }
            elements.push(InformationElement {
                iei,
                data: rest[2..2 + len].to_vec()
            });
            rest = &rest[2 + len..];
        }
        Ok(UserDataHeader { elements })
    }
}

/// Size in octets of the UDH an outgoing part needs, or 0 when it needs
/// none.
pub fn udh_size(include_length_octet: bool, is_ported: bool, requires_concat: bool) -> u8 {
    if !is_ported && !requires_concat {
        return 0;
    }
    let mut size = if include_length_octet { 1 } else { 0 };
    if is_ported {
        size += 6;
    }
    if requires_concat {
        size += if USE_16BIT_CONCAT_REF { 6 } else { 5 };
    }
    size
}

/// Build the UDH for one part of an outgoing message. Ports come first,
/// then the concatenation IE; IEs whose flag is off are omitted.
pub fn build_udh(part: u8, total: u8, mp_ref: u16, source_port: u16, dest_port: u16,
                 is_ported: bool, requires_concat: bool) -> Vec<u8> {
    let mut elements = vec![];
    if is_ported {
        let mut data = dest_port.to_be_bytes().to_vec();
        data.extend_from_slice(&source_port.to_be_bytes());
        elements.push(InformationElement { iei: IEI_PORT_16BIT, data });
    }
    if requires_concat {
        let (iei, data) = if USE_16BIT_CONCAT_REF {
            let mut data = mp_ref.to_be_bytes().to_vec();
            data.extend_from_slice(&[total, part]);
            (IEI_CONCAT_16BIT, data)
        }
        else {
            (IEI_CONCAT_8BIT, vec![mp_ref as u8, total, part])
        };
        elements.push(InformationElement { iei, data });
    }
    UserDataHeader { elements }.as_bytes()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;
    #[test]
    fn sizes() {
        assert_eq!(udh_size(true, false, false), 0);
        assert_eq!(udh_size(true, false, true), 6);
        assert_eq!(udh_size(true, true, false), 7);
        assert_eq!(udh_size(true, true, true), 12);
        assert_eq!(udh_size(false, true, true), 11);
    }
    #[test]
    fn concat_udh_layout() {
        let b = build_udh(2, 3, 0xAB, 0, 0, false, true);
        assert_eq!(b, vec![0x05, 0x00, 0x03, 0xAB, 3, 2]);
        let udh = UserDataHeader::try_from(&b[1..]).unwrap();
        let concat = udh.concat().unwrap();
        assert_eq!(concat, ConcatenatedSmsData { reference: 0xAB, parts: 3, sequence: 2 });
    }
    #[test]
    fn ported_concat_udh_layout() {
        let b = build_udh(1, 2, 0x42, 9200, 2948, true, true);
        assert_eq!(b[0], 11);
        assert_eq!(&b[1..7], &[0x05, 0x04, 0x0B, 0x84, 0x23, 0xF0]);
        assert_eq!(&b[7..], &[0x00, 0x03, 0x42, 2, 1]);
        let udh = UserDataHeader::try_from(&b[1..]).unwrap();
        let ports = udh.ports().unwrap();
        assert_eq!(ports.dest_port, 2948);
        assert_eq!(ports.source_port, 9200);
    }
    #[test]
    fn sixteen_bit_concat_parses() {
        let raw = [IEI_CONCAT_16BIT, 4, 0x01, 0x10, 4, 3];
        let udh = UserDataHeader::try_from(&raw[..]).unwrap();
        let concat = udh.concat().unwrap();
        assert_eq!(concat.reference, 0x0110);
        assert_eq!(concat.parts, 4);
        assert_eq!(concat.sequence, 3);
    }
    #[test]
    fn unknown_elements_survive() {
        // A wild IE we don't interpret still parses and reserializes.
        let raw = [0x70, 2, 0xAA, 0xBB, IEI_CONCAT_8BIT, 3, 7, 2, 1];
        let udh = UserDataHeader::try_from(&raw[..]).unwrap();
        assert_eq!(udh.elements.len(), 2);
        assert_eq!(udh.concat().unwrap().reference, 7);
        assert_eq!(&udh.as_bytes()[1..], &raw[..]);
    }
    #[test]
    fn truncated_udh_rejected() {
        let raw = [IEI_CONCAT_8BIT, 3, 0x01];
        assert!(UserDataHeader::try_from(&raw[..]).is_err());
        assert!(UserDataHeader::try_from(&[IEI_CONCAT_8BIT][..]).is_err());
    }
}
