//! # Field Values
//!
//! Values stored in jig fields, passed as method arguments and returned from
//! method bodies. References to other objects are arena handles, so equality
//! compares nested data deeply and references by identity.
//!
//! On the wire a reference is written as `{"$ref": "<token>"}`; map keys
//! starting with `$` are reserved for that form.

use crate::domain::value_objects::{CodeId, Handle, JigId};
use crate::errors::JigError;
use std::collections::BTreeMap;

/// Wire key of a reference object.
pub const REF_KEY: &str = "$ref";

/// A field or argument value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer. Floats are not representable.
    Int(i64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list.
    Array(Vec<Value>),
    /// Key-ordered map.
    Map(BTreeMap<String, Value>),
    /// Reference to a jig.
    Jig(JigId),
    /// Reference to deployed code.
    Code(CodeId),
}

impl Value {
    /// Integer content.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String content.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Referenced jig.
    #[must_use]
    pub fn as_jig(&self) -> Option<JigId> {
        match self {
            Self::Jig(id) => Some(*id),
            _ => None,
        }
    }

    /// Referenced code.
    #[must_use]
    pub fn as_code(&self) -> Option<CodeId> {
        match self {
            Self::Code(id) => Some(*id),
            _ => None,
        }
    }

    /// List content.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// True for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Rejects map keys reserved for the wire reference form.
    pub fn validate(&self) -> Result<(), JigError> {
        match self {
            Self::Array(items) => items.iter().try_for_each(Value::validate),
            Self::Map(map) => {
                for (key, value) in map {
                    if key.starts_with('$') {
                        return Err(JigError::validation(format!("reserved key: {key}")));
                    }
                    value.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Calls `visit` for every referenced object, depth first.
    pub fn visit_refs(&self, visit: &mut impl FnMut(Handle)) {
        match self {
            Self::Jig(id) => visit(Handle::Jig(*id)),
            Self::Code(id) => visit(Handle::Code(*id)),
            Self::Array(items) => items.iter().for_each(|v| v.visit_refs(visit)),
            Self::Map(map) => map.values().for_each(|v| v.visit_refs(visit)),
            _ => {}
        }
    }

    /// Encodes to JSON, turning references into tokens via `token`.
    pub fn to_wire(
        &self,
        token: &mut impl FnMut(Handle) -> Result<String, JigError>,
    ) -> Result<serde_json::Value, JigError> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_wire(token))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), value.to_wire(token)?);
                }
                serde_json::Value::Object(out)
            }
            Self::Jig(id) => ref_object(token(Handle::Jig(*id))?),
            Self::Code(id) => ref_object(token(Handle::Code(*id))?),
        })
    }

    /// Decodes from JSON, resolving reference tokens via `resolve`.
    pub fn from_wire(
        json: &serde_json::Value,
        resolve: &mut impl FnMut(&str) -> Result<Handle, JigError>,
    ) -> Result<Self, JigError> {
        Ok(match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Int(
                n.as_i64()
                    .ok_or_else(|| JigError::validation(format!("non-integer number: {n}")))?,
            ),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => Self::Array(
                items
                    .iter()
                    .map(|v| Self::from_wire(v, resolve))
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                if let Some(token) = ref_token(json) {
                    return Ok(match resolve(token)? {
                        Handle::Jig(id) => Self::Jig(id),
                        Handle::Code(id) => Self::Code(id),
                    });
                }
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    if key.starts_with('$') {
                        return Err(JigError::validation(format!("reserved key: {key}")));
                    }
                    out.insert(key.clone(), Self::from_wire(value, resolve)?);
                }
                Self::Map(out)
            }
        })
    }
}

/// Collects every reference token inside a wire value.
pub fn wire_tokens(json: &serde_json::Value, out: &mut Vec<String>) {
    match json {
        serde_json::Value::Array(items) => items.iter().for_each(|v| wire_tokens(v, out)),
        serde_json::Value::Object(map) => match ref_token(json) {
            Some(token) => out.push(token.to_string()),
            None => map.values().for_each(|v| wire_tokens(v, out)),
        },
        _ => {}
    }
}

fn ref_object(token: String) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(REF_KEY.to_string(), serde_json::Value::String(token));
    serde_json::Value::Object(map)
}

fn ref_token(json: &serde_json::Value) -> Option<&str> {
    match json {
        serde_json::Value::Object(map) if map.len() == 1 => map.get(REF_KEY)?.as_str(),
        _ => None,
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<JigId> for Value {
    fn from(id: JigId) -> Self {
        Self::Jig(id)
    }
}

impl From<CodeId> for Value {
    fn from(id: CodeId) -> Self {
        Self::Code(id)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_refs(_: Handle) -> Result<String, JigError> {
        Err(JigError::Internal("unexpected reference".to_string()))
    }

    #[test]
    fn test_reference_identity_equality() {
        assert_eq!(Value::Jig(JigId(1)), Value::Jig(JigId(1)));
        assert_ne!(Value::Jig(JigId(1)), Value::Jig(JigId(2)));
        assert_ne!(Value::Jig(JigId(1)), Value::Code(CodeId(1)));
    }

    #[test]
    fn test_reserved_key_rejected() {
        let mut map = BTreeMap::new();
        map.insert("$ref".to_string(), Value::from("x"));
        let value = Value::Array(vec![Value::Map(map)]);
        assert!(matches!(value.validate(), Err(JigError::Validation(_))));
    }

    #[test]
    fn test_refs_become_tokens() {
        let value = Value::Array(vec![Value::Jig(JigId(4)), Value::Code(CodeId(0))]);
        let json = value
            .to_wire(&mut |h| {
                Ok(match h {
                    Handle::Jig(_) => "_i0".to_string(),
                    Handle::Code(_) => "_o1".to_string(),
                })
            })
            .unwrap();
        assert_eq!(json, serde_json::json!([{"$ref": "_i0"}, {"$ref": "_o1"}]));

        let mut tokens = Vec::new();
        wire_tokens(&json, &mut tokens);
        assert_eq!(tokens, vec!["_i0".to_string(), "_o1".to_string()]);
    }

    #[test]
    fn test_float_rejected_on_decode() {
        let json = serde_json::json!(1.5);
        let result = Value::from_wire(&json, &mut |_| Err(JigError::validation("none")));
        assert!(result.is_err());
    }

    fn plain_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,8}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_wire_encoding_is_canonical(value in plain_value()) {
            let json = value.to_wire(&mut no_refs).unwrap();
            let first = serde_json::to_vec(&json).unwrap();
            let decoded = Value::from_wire(&json, &mut |_| Err(JigError::validation("none"))).unwrap();
            let second = serde_json::to_vec(&decoded.to_wire(&mut no_refs).unwrap()).unwrap();
            prop_assert_eq!(&decoded, &value);
            prop_assert_eq!(first, second);
        }
    }
}
