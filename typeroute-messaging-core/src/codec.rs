// typeroute-messaging-core/src/codec.rs
//! JSON codec for the flat key/value [`Payload`].
//!
//! Decoding is lenient about value shapes: strings are taken as-is, other
//! scalars keep their JSON text and `null` entries are dropped. Anything that
//! is not a JSON object is rejected.

use serde_json::Value;

use crate::{MessagingError, Payload};

pub fn encode(payload: &Payload) -> Result<Vec<u8>, MessagingError> {
    serde_json::to_vec(payload).map_err(|e| MessagingError::Serialization(e.to_string()))
}

pub fn decode(body: &[u8]) -> Result<Payload, MessagingError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| MessagingError::Serialization(e.to_string()))?;

    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(MessagingError::Serialization(format!(
                "expected a JSON object, got {}",
                kind(&other)
            )))
        }
    };

    Ok(map
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
