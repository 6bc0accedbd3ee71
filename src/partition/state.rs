use crate::core::{MappleError, PartitionState, Result};
use serde_json::Value;

/// Classify a partition from its state document.
///
/// Returns `Ok(None)` when the document is valid JSON but records no
/// `"state"`; callers treat that as not active. A non-string state is
/// `Unknown`.
pub fn parse_state(source: &str) -> Result<Option<PartitionState>> {
    let doc: Value =
        serde_json::from_str(source).map_err(|e| MappleError::InvalidStateDocument(e.to_string()))?;

    let state = match doc.get("state") {
        None => return Ok(None),
        Some(Value::String(name)) => PartitionState::from_name(name),
        Some(_) => PartitionState::Unknown,
    };
    Ok(Some(state))
}
