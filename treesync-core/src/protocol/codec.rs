//! Value codec.
//!
//! Two encodings exist:
//!
//! - *with type info*, used in change records. Node references become
//!   `[0, id]` and JSON arrays are wrapped as `[1, array]`, so a bare array on
//!   the wire always carries a type marker. Everything else is sent as-is.
//! - *without type info*, used for event data and property syncs. Only
//!   primitives are allowed; arrays and objects are rejected.

use serde_json::{json, Number, Value as Json};

use super::node::NodeId;
use super::value::Value;
use crate::client::StateTree;
use crate::error::CodecError;

/// Type marker for node references.
pub const NODE_TYPE: u64 = 0;
/// Type marker for wrapped arrays.
pub const ARRAY_TYPE: u64 = 1;

/// Encode a value for a change record.
pub fn encode_with_type_info(value: &Value) -> Result<Json, CodecError> {
    match value {
        Value::Node(id) => Ok(json!([NODE_TYPE, id.raw()])),
        Value::Json(array @ Json::Array(_)) => Ok(json!([ARRAY_TYPE, array])),
        other => encode_without_type_info(other),
    }
}

/// Decode a change record value.
///
/// A node reference is resolved through `tree`, creating the node if it has
/// not been seen yet. Without a tree, node references decode to
/// [`Value::Null`].
pub fn decode_with_type_info(json: &Json, tree: Option<&StateTree>) -> Result<Value, CodecError> {
    let Json::Array(items) = json else {
        return decode_primitive_or_object(json);
    };

    let [marker, payload] = items.as_slice() else {
        return Err(CodecError::MalformedTypedValue {
            reason: format!("expected [type, value], got {} elements", items.len()),
        });
    };

    match marker.as_u64() {
        Some(NODE_TYPE) => {
            let id = payload
                .as_u64()
                .and_then(|raw| u32::try_from(raw).ok())
                .map(NodeId::new)
                .ok_or_else(|| CodecError::MalformedTypedValue {
                    reason: format!("invalid node id {payload}"),
                })?;
            Ok(match tree {
                Some(tree) => {
                    tree.ensure_node(id);
                    Value::Node(id)
                }
                None => Value::Null,
            })
        }
        Some(ARRAY_TYPE) if payload.is_array() => Ok(Value::Json(payload.clone())),
        _ => Err(CodecError::MalformedTypedValue {
            reason: format!("unknown type marker {marker}"),
        }),
    }
}

/// Encode a primitive value.
pub fn encode_without_type_info(value: &Value) -> Result<Json, CodecError> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Number(n) => Number::from_f64(*n)
            .map(Json::Number)
            .ok_or(CodecError::NonFiniteNumber { value: *n }),
        Value::String(s) => Ok(Json::String(s.clone())),
        Value::Json(json) => Ok(json.clone()),
        Value::Node(id) => Ok(json!(id.raw())),
    }
}

/// Decode a primitive value. Arrays and objects are errors.
pub fn decode_without_type_info(json: &Json) -> Result<Value, CodecError> {
    match json {
        Json::Array(_) => Err(CodecError::UnsupportedJsonType { kind: "array" }),
        Json::Object(_) => Err(CodecError::UnsupportedJsonType { kind: "object" }),
        primitive => decode_primitive_or_object(primitive),
    }
}

fn decode_primitive_or_object(json: &Json) -> Result<Value, CodecError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_f64() {
            Some(n) => Value::Number(n),
            None => {
                return Err(CodecError::MalformedTypedValue {
                    reason: format!("number {n} is not representable"),
                })
            }
        },
        Json::String(s) => Value::String(s.clone()),
        other => Value::Json(other.clone()),
    })
}
