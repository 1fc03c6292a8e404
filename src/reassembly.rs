//! Reassembling concatenated SMS fragments that may arrive out of order,
//! across reads, or twice.

use crate::message::{IncomingMessage, Payload};
use std::collections::HashMap;

/// Pending fragment groups, keyed by originator digits and concatenation
/// reference.
#[derive(Default)]
pub struct MultipartReassembler {
    pending: HashMap<(String, u16), Vec<IncomingMessage>>
}
impl MultipartReassembler {
    pub fn new() -> MultipartReassembler {
        MultipartReassembler {
            pending: HashMap::new()
        }
    }
    /// Number of fragment groups still waiting for parts.
    pub fn pending_groups(&self) -> usize {
        self.pending.len()
    }
    /// Offer a fragment. Returns the whole message once its group is
    /// complete; duplicates (same sequence number in the same group) are
    /// dropped silently.
    pub fn push(&mut self, msg: IncomingMessage) -> Option<IncomingMessage> {
        let concat = match msg.concat {
            Some(c) => c,
            // Not actually multipart; hand it straight back.
            None => return Some(msg)
        };
        let key = (msg.originator.number.clone(), concat.reference);
        let group = self.pending.entry(key.clone()).or_insert_with(Vec::new);
        if group.iter().any(|m| m.concat.map(|c| c.sequence) == Some(concat.sequence)) {
            debug!("dropping duplicate fragment {}/{} of ref {} from {}",
                   concat.sequence, concat.parts, concat.reference, msg.originator);
            return None;
        }
        group.push(msg);
        if group.len() < concat.parts as usize {
            return None;
        }
        let mut parts = self.pending.remove(&key).unwrap();
        parts.sort_by_key(|m| m.concat.map(|c| c.sequence).unwrap_or(0));
        Some(assemble(parts))
    }
}

fn assemble(parts: Vec<IncomingMessage>) -> IncomingMessage {
    let mut indices = Vec::with_capacity(parts.len());
    let mut text = String::new();
    let mut binary = vec![];
    let is_binary = parts[0].payload.as_binary().is_some();
    for part in parts.iter() {
        if part.mem_index >= 0 {
            indices.push(part.mem_index as u16);
        }
        match part.payload {
            Payload::Text(ref t) => text.push_str(t),
            Payload::Binary(ref b) => binary.extend_from_slice(b)
        }
    }
    let first = parts.into_iter().next().unwrap();
    IncomingMessage {
        mem_index: -1,
        mem_location: first.mem_location,
        originator: first.originator,
        smsc: first.smsc,
        timestamp_millis: first.timestamp_millis,
        encoding: first.encoding,
        payload: if is_binary { Payload::Binary(binary) } else { Payload::Text(text) },
        concat: first.concat,
        mp_mem_indices: indices
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::ConcatenatedSmsData;
    use crate::pdu::{MessageEncoding, PduAddress};

    fn fragment(from: &str, reference: u16, seq: u8, parts: u8, body: &str, idx: i32)
                -> IncomingMessage {
        IncomingMessage {
            mem_index: idx,
            mem_location: "SM".into(),
            originator: PduAddress::international(from),
            smsc: PduAddress::empty(),
            timestamp_millis: 1_500_000_000_000,
            encoding: MessageEncoding::Gsm7Bit,
            payload: Payload::Text(body.into()),
            concat: Some(ConcatenatedSmsData { reference, parts, sequence: seq }),
            mp_mem_indices: vec![]
        }
    }

    #[test]
    fn non_multipart_passes_through() {
        let mut r = MultipartReassembler::new();
        let mut m = fragment("111", 0, 1, 1, "whole", 3);
        m.concat = None;
        let out = r.push(m).unwrap();
        assert_eq!(out.mem_index, 3);
        assert_eq!(r.pending_groups(), 0);
    }
    #[test]
    fn any_arrival_order_reassembles_the_same() {
        for order in &[[1u8, 2, 3], [3, 1, 2], [2, 3, 1], [3, 2, 1]] {
            let mut r = MultipartReassembler::new();
            let mut out = None;
            for &seq in order.iter() {
                let body = match seq {
                    1 => "first ",
                    2 => "second ",
                    _ => "third"
                };
                let res = r.push(fragment("4477", 9, seq, 3, body, seq as i32 + 10));
                assert!(out.is_none() || res.is_none());
                if res.is_some() {
                    out = res;
                }
            }
            let out = out.expect("group never completed");
            assert_eq!(out.payload.as_text(), Some("first second third"));
            assert_eq!(out.mem_index, -1);
            assert_eq!(out.mp_mem_indices.len(), 3);
            assert!(out.mp_mem_indices.contains(&11));
            assert_eq!(r.pending_groups(), 0);
        }
    }
    #[test]
    fn duplicates_dropped() {
        let mut r = MultipartReassembler::new();
        assert!(r.push(fragment("4477", 5, 1, 2, "a", 1)).is_none());
        assert!(r.push(fragment("4477", 5, 1, 2, "a", 1)).is_none());
        assert_eq!(r.pending_groups(), 1);
        let out = r.push(fragment("4477", 5, 2, 2, "b", 2)).unwrap();
        assert_eq!(out.payload.as_text(), Some("ab"));
    }
    #[test]
    fn groups_are_keyed_by_originator_and_ref() {
        let mut r = MultipartReassembler::new();
        assert!(r.push(fragment("1000", 7, 1, 2, "x", 1)).is_none());
        assert!(r.push(fragment("2000", 7, 1, 2, "y", 2)).is_none());
        assert!(r.push(fragment("1000", 8, 1, 2, "z", 3)).is_none());
        assert_eq!(r.pending_groups(), 3);
        let done = r.push(fragment("2000", 7, 2, 2, "!", 4)).unwrap();
        assert_eq!(done.payload.as_text(), Some("y!"));
        assert_eq!(r.pending_groups(), 2);
    }
    #[test]
    fn binary_fragments_append() {
        let mut r = MultipartReassembler::new();
        let mut a = fragment("5", 1, 2, 2, "", 1);
        a.payload = Payload::Binary(vec![3, 4]);
        let mut b = fragment("5", 1, 1, 2, "", 2);
        b.payload = Payload::Binary(vec![1, 2]);
        assert!(r.push(a).is_none());
        let out = r.push(b).unwrap();
        assert_eq!(out.payload.as_binary(), Some(&[1u8, 2, 3, 4][..]));
    }
}
