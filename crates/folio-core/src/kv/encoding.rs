//! Order-preserving binary key encoding.
//!
//! Encoded keys compare bytewise in the same order as the tuples they
//! represent, which lets SQLite (BLOB comparison is `memcmp`) and the
//! in-memory `BTreeMap` share one ordering.
//!
//! Layout per part (ints sort before strings):
//!
//! | Part | Bytes |
//! |------|-------|
//! | `Int` | `0x01`, 8 bytes big-endian of `v ^ i64::MIN` |
//! | `Str` | `0x02`, UTF-8 bytes with `0x00` escaped as `0x00 0xFF`, `0x00` |
//!
//! Every part starts with a tag below `0xFF`, so all keys extending a prefix
//! fall in `[encode(prefix), encode(prefix) ++ 0xFF)`.

use super::{Key, KeyPart};
use crate::error::{Result, StoreError};

const INT_TAG: u8 = 0x01;
const STR_TAG: u8 = 0x02;
const ESCAPE: u8 = 0xFF;

/// Encode a key into its sortable byte form.
pub fn encode(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    for part in key.parts() {
        match part {
            KeyPart::Int(v) => {
                out.push(INT_TAG);
                out.extend_from_slice(&((*v as u64) ^ (1u64 << 63)).to_be_bytes());
            }
            KeyPart::Str(s) => {
                out.push(STR_TAG);
                for &b in s.as_bytes() {
                    out.push(b);
                    if b == 0x00 {
                        out.push(ESCAPE);
                    }
                }
                out.push(0x00);
            }
        }
    }
    out
}

/// Decode bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Key> {
    let mut parts = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let tag = bytes[i];
        i += 1;
        match tag {
            INT_TAG => {
                let raw: [u8; 8] = bytes
                    .get(i..i + 8)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| StoreError::KeyDecode("truncated int part".to_string()))?;
                parts.push(KeyPart::Int((u64::from_be_bytes(raw) ^ (1u64 << 63)) as i64));
                i += 8;
            }
            STR_TAG => {
                let mut buf = Vec::new();
                loop {
                    let b = *bytes.get(i).ok_or_else(|| {
                        StoreError::KeyDecode("unterminated string part".to_string())
                    })?;
                    i += 1;
                    if b != 0x00 {
                        buf.push(b);
                        continue;
                    }
                    if bytes.get(i) == Some(&ESCAPE) {
                        buf.push(0x00);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let s = String::from_utf8(buf)
                    .map_err(|e| StoreError::KeyDecode(format!("invalid UTF-8: {e}")))?;
                parts.push(KeyPart::Str(s));
            }
            other => {
                return Err(StoreError::KeyDecode(format!("unknown tag 0x{other:02x}")));
            }
        }
    }

    Ok(Key::new(parts))
}

/// Half-open byte range `[start, end)` covering every key strictly extending `prefix`.
pub fn prefix_range(prefix: &Key) -> (Vec<u8>, Vec<u8>) {
    let start = encode(prefix);
    let mut end = start.clone();
    end.push(ESCAPE);
    (start, end)
}
