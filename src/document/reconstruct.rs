use super::revision::{RevisionMeta, compose_revision};
use crate::core::{MappleError, Result};
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";
pub const EXPIRATION_FIELD: &str = "$expiration";
pub const FLAGS_FIELD: &str = "$flags";

/// Rebuild the logical document handed to map functions.
///
/// The stored body's members keep their order; the system fields follow.
/// A body that already carries one of the system fields has it overwritten
/// in place, so the result never holds duplicate keys.
pub fn reconstruct(body: &[u8], doc_id: &str, rev_seq: u64, raw_meta: &[u8]) -> Result<String> {
    let mut object = parse_object(body, doc_id)?;
    let meta = RevisionMeta::decode(raw_meta)?;

    object.insert(ID_FIELD.to_string(), Value::String(doc_id.to_string()));
    object.insert(REV_FIELD.to_string(), Value::String(compose_revision(rev_seq, raw_meta)));
    object.insert(EXPIRATION_FIELD.to_string(), Value::from(meta.expiration));
    object.insert(FLAGS_FIELD.to_string(), Value::from(meta.flags));

    Ok(Value::Object(object).to_string())
}

fn parse_object(body: &[u8], doc_id: &str) -> Result<Map<String, Value>> {
    let malformed = |reason: String| MappleError::MalformedStoredBody {
        doc_id: doc_id.to_string(),
        reason,
    };

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(malformed(format!("top-level value is {}", json_kind(&other)))),
        Err(e) => Err(malformed(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
