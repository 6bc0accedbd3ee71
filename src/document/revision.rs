//! Revision metadata codec.
//!
//! Every stored revision carries a fixed-layout record:
//!
//! ```text
//! offset  size  field
//!      0     8  cas (opaque here)
//!      8     4  expiration, big-endian u32
//!     12     4  flags, big-endian u32
//! ```
//!
//! The whole record, hex-encoded, is also the suffix of the revision id.

use crate::core::{MappleError, Result};

/// Minimum length of a revision metadata record.
pub const REV_META_LEN: usize = 16;

const EXPIRATION_OFFSET: usize = 8;
const FLAGS_OFFSET: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RevisionMeta {
    pub expiration: u32,
    pub flags: u32,
}

impl RevisionMeta {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < REV_META_LEN {
            return Err(MappleError::MalformedMetadata {
                expected: REV_META_LEN,
                actual: raw.len(),
            });
        }

        Ok(Self {
            expiration: read_be_u32(raw, EXPIRATION_OFFSET),
            flags: read_be_u32(raw, FLAGS_OFFSET),
        })
    }
}

fn read_be_u32(raw: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&raw[offset..offset + 4]);
    u32::from_be_bytes(word)
}

/// Lowercase hex, two digits per byte.
pub fn hex_encode(raw: &[u8]) -> String {
    hex::encode(raw)
}

/// `"<seq>-<hex(meta)>"`
pub fn compose_revision(seq: u64, raw_meta: &[u8]) -> String {
    format!("{}-{}", seq, hex_encode(raw_meta))
}
