//! CBOR encoding adapter.
//!
//! Stands in for DER: messages are serialized with `ciborium`, and the
//! certificate syntax check only inspects the outer DER `SEQUENCE` header,
//! which is all a well-formedness check can say without a PKIX parser.

use bytes::Bytes;
use cmpcheck_core::{DecodeError, EncodeError, EncodingAdapter};
use cmpcheck_proto::PkiMessage;

/// DER tag of a constructed `SEQUENCE`.
const SEQUENCE_TAG: u8 = 0x30;

/// CBOR implementation of [`EncodingAdapter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl EncodingAdapter for CborCodec {
    fn encode(&self, message: &PkiMessage) -> Result<Bytes, EncodeError> {
        let mut buf = Vec::new();
        ciborium::into_writer(message, &mut buf)
            .map_err(|e| EncodeError { reason: e.to_string() })?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, bytes: &[u8]) -> Result<PkiMessage, DecodeError> {
        ciborium::from_reader(bytes).map_err(|e| DecodeError { reason: e.to_string() })
    }

    fn certificate_well_formed(&self, certificate: &[u8]) -> bool {
        sequence_content_len(certificate).is_some()
    }
}

/// Wrap `content` in a DER `SEQUENCE`.
pub fn der_sequence(content: &[u8]) -> Vec<u8> {
    let mut out = vec![SEQUENCE_TAG];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Length of the content of a DER `SEQUENCE` that spans all of `bytes`.
fn sequence_content_len(bytes: &[u8]) -> Option<usize> {
    let (&tag, rest) = bytes.split_first()?;
    if tag != SEQUENCE_TAG {
        return None;
    }
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let count = usize::from(first & 0x7f);
        // Indefinite and oversized lengths are not DER.
        if count == 0 || count > 4 || rest.len() < count {
            return None;
        }
        let (len_bytes, rest) = rest.split_at(count);
        if len_bytes[0] == 0 {
            return None;
        }
        let len = len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        if len < 0x80 {
            return None;
        }
        (len, rest)
    };
    (len > 0 && rest.len() == len).then_some(len)
}
