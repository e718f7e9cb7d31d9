//! SOOD datagram codec.
//!
//! A datagram is the 4-byte magic `SOOD`, a version byte, an opcode byte and
//! a run of TLV fields. Each field is a 1-byte name length, the name, a
//! 2-byte big-endian value length and the value, all UTF-8.

use std::collections::HashMap;

use super::types::DiscoveryError;
use crate::protocol_constants::{SOOD_MAGIC, SOOD_OPCODE_QUERY, SOOD_OPCODE_REPLY, SOOD_VERSION};

/// Replies at or below this length cannot hold a header plus one field.
const MIN_REPLY_LEN: usize = 10;

/// Offset of the first TLV field.
const HEADER_LEN: usize = 6;

/// Appends one TLV field to `buf`.
pub fn encode_field(buf: &mut Vec<u8>, name: &str, value: &str) -> Result<(), DiscoveryError> {
    let name_bytes = name.as_bytes();
    let value_bytes = value.as_bytes();

    let name_len = u8::try_from(name_bytes.len()).map_err(|_| DiscoveryError::FieldTooLong {
        name: name.to_string(),
        len: name_bytes.len(),
    })?;
    let value_len =
        u16::try_from(value_bytes.len()).map_err(|_| DiscoveryError::FieldTooLong {
            name: name.to_string(),
            len: value_bytes.len(),
        })?;

    buf.push(name_len);
    buf.extend_from_slice(name_bytes);
    buf.extend_from_slice(&value_len.to_be_bytes());
    buf.extend_from_slice(value_bytes);
    Ok(())
}

/// Builds a query datagram for `service_id` tagged with correlation id `tid`.
pub fn build_query(service_id: &str, tid: &str) -> Result<Vec<u8>, DiscoveryError> {
    let mut buf = Vec::with_capacity(64 + service_id.len() + tid.len());
    buf.extend_from_slice(SOOD_MAGIC);
    buf.push(SOOD_VERSION);
    buf.push(SOOD_OPCODE_QUERY);
    encode_field(&mut buf, "query_service_id", service_id)?;
    encode_field(&mut buf, "_tid", tid)?;
    Ok(buf)
}

/// Decodes the TLV run starting at `data[0]`.
///
/// A field cut short by the end of the datagram is dropped along with
/// anything after it. Later duplicates of a name overwrite earlier ones.
pub fn decode_fields(data: &[u8]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut pos = 0;

    while pos < data.len() {
        let name_len = data[pos] as usize;
        pos += 1;
        let Some(name) = data.get(pos..pos + name_len) else {
            break;
        };
        pos += name_len;

        let Some(len_bytes) = data.get(pos..pos + 2) else {
            break;
        };
        let value_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        pos += 2;

        let Some(value) = data.get(pos..pos + value_len) else {
            break;
        };
        pos += value_len;

        fields.insert(
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        );
    }

    fields
}

/// Validates a reply header and decodes its fields.
///
/// Returns `None` for datagrams that are too short or are not version 2
/// replies.
pub fn parse_reply(data: &[u8]) -> Option<HashMap<String, String>> {
    if data.len() <= MIN_REPLY_LEN {
        return None;
    }
    if &data[..4] != SOOD_MAGIC || data[4] != SOOD_VERSION || data[5] != SOOD_OPCODE_REPLY {
        return None;
    }
    Some(decode_fields(&data[HEADER_LEN..]))
}
