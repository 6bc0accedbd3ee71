//! Partition discovery.
//!
//! - `state.rs` - parses the `_local/vbstate` record into a `PartitionState`
//! - `discovery.rs` - finds store files and filters the active partitions

pub mod discovery;
pub mod state;

pub use discovery::{find_active_partitions, find_single_file};
pub use state::parse_state;
