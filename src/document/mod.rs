//! Logical document reconstruction.
//!
//! - `revision.rs` - revision metadata codec and `_rev` composition
//! - `reconstruct.rs` - merges a stored body with its system fields

pub mod reconstruct;
pub mod revision;

pub use reconstruct::reconstruct;
pub use revision::{REV_META_LEN, RevisionMeta, compose_revision, hex_encode};
