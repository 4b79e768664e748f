//! Key encoding and decoding for the storage layer.
//!
//! Namespaced key format: `{channel}-{suffix}`
//! - channel: caller-chosen namespace, must not contain `-`
//! - suffix: either an 8-byte big-endian id or an arbitrary sub-key
//!
//! Big-endian ids keep numeric order under RocksDB's bytewise comparator,
//! and the shared `{channel}-` prefix groups a channel's entries together.
//!
//! Decoding is best-effort: malformed input yields `0` / empty strings
//! instead of an error. Callers must not use decode to validate key shape.

use crate::error::StoreError;

/// Separator between channel and suffix
pub const SEPARATOR: u8 = b'-';

/// Width of an encoded id
pub const ID_LEN: usize = 8;

/// Encode an id as 8 big-endian bytes
pub fn encode_id(id: u64) -> [u8; ID_LEN] {
    id.to_be_bytes()
}

/// Decode an 8-byte big-endian id, 0 if `bytes` is not exactly 8 bytes
pub fn decode_id(bytes: &[u8]) -> u64 {
    <[u8; ID_LEN]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

/// Encode a 16-bit id as 2 big-endian bytes
pub fn encode_id_u16(id: u16) -> [u8; 2] {
    id.to_be_bytes()
}

/// Decode a 2-byte big-endian id, 0 if `bytes` is not exactly 2 bytes
pub fn decode_id_u16(bytes: &[u8]) -> u16 {
    <[u8; 2]>::try_from(bytes)
        .map(u16::from_be_bytes)
        .unwrap_or(0)
}

/// Prefix shared by every key in `channel`: `{channel}-`
pub fn namespace_prefix(channel: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(channel.len() + 1);
    prefix.extend_from_slice(channel.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

/// Encode `{channel}-{id:be64}`
pub fn encode_namespaced_id(channel: &str, id: u64) -> Vec<u8> {
    let mut key = namespace_prefix(channel);
    key.extend_from_slice(&encode_id(id));
    key
}

/// Decode `{channel}-{id:be64}` into `(channel, id)`.
///
/// The id is read from the fixed 8-byte tail, so a separator inside the
/// id bytes does not confuse the split.
pub fn decode_namespaced_id(key: &[u8]) -> (String, u64) {
    if key.len() <= ID_LEN {
        return (String::new(), 0);
    }
    let (head, id) = key.split_at(key.len() - ID_LEN);
    match head.split_last() {
        Some((&SEPARATOR, channel)) => {
            (String::from_utf8_lossy(channel).into_owned(), decode_id(id))
        }
        _ => (String::new(), 0),
    }
}

/// Encode `{channel}-{subkey}`
pub fn encode_namespaced_key(channel: &str, subkey: &str) -> Vec<u8> {
    let mut key = namespace_prefix(channel);
    key.extend_from_slice(subkey.as_bytes());
    key
}

/// Decode `{channel}-{subkey}`, splitting on the first separator
pub fn decode_namespaced_key(key: &[u8]) -> (String, String) {
    match key.iter().position(|&b| b == SEPARATOR) {
        Some(pos) => (
            String::from_utf8_lossy(&key[..pos]).into_owned(),
            String::from_utf8_lossy(&key[pos + 1..]).into_owned(),
        ),
        None => (String::new(), String::new()),
    }
}

/// Channel of a two-part compound key, empty if the key has any other shape
pub fn namespace_of(key: &[u8]) -> String {
    let mut parts = key.split(|&b| b == SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(channel), Some(_), None) => String::from_utf8_lossy(channel).into_owned(),
        _ => String::new(),
    }
}

/// Encode a length-framed key: `{len(channel):be16}{channel}{subkey}`.
///
/// Unambiguous for any channel content. Keys of one channel still share a
/// prefix, but channels sort by name length first. Channels longer than
/// `u16::MAX` bytes do not fit the frame and are rejected.
pub fn encode_framed_key(channel: &[u8], subkey: &[u8]) -> Result<Vec<u8>, StoreError> {
    let len = u16::try_from(channel.len()).map_err(|_| {
        StoreError::InvalidArgument(format!(
            "framed channel is {} bytes (max {})",
            channel.len(),
            u16::MAX
        ))
    })?;
    let mut key = Vec::with_capacity(2 + channel.len() + subkey.len());
    key.extend_from_slice(&encode_id_u16(len));
    key.extend_from_slice(channel);
    key.extend_from_slice(subkey);
    Ok(key)
}

/// Decode a length-framed key into `(channel, subkey)`, empty on malformed input
pub fn decode_framed_key(key: &[u8]) -> (Vec<u8>, Vec<u8>) {
    if key.len() < 2 {
        return (Vec::new(), Vec::new());
    }
    let len = decode_id_u16(&key[..2]) as usize;
    let rest = &key[2..];
    if rest.len() < len {
        return (Vec::new(), Vec::new());
    }
    let (channel, subkey) = rest.split_at(len);
    (channel.to_vec(), subkey.to_vec())
}
