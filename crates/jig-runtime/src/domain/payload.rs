//! # Action Payload
//!
//! The serialized action log embedded in output 0 of every jig transaction.
//!
//! ```text
//! chunk 0   b"run"            protocol marker
//! chunk 1   [0x05]            protocol version
//! chunk 2   app id            utf-8
//! chunk 3   hex(json)         the payload below
//! chunk 4   b"r11r" or empty  debug marker
//! ```
//!
//! Field order is fixed by the struct layout and maps are key-sorted, so
//! encoding the same logical payload twice yields identical bytes.

use crate::domain::ledger_tx::Script;
use crate::domain::value_objects::{DEBUG_MARKER, PROTOCOL_MARKER, PROTOCOL_VERSION};
use crate::errors::JigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One deployed class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    /// Source text, the evaluator key.
    pub text: String,
    /// Dependency name to reference token.
    pub deps: BTreeMap<String, String>,
    /// Static properties, wire encoded.
    pub props: serde_json::Value,
    /// Deploying owner.
    pub owner: String,
}

/// One top-level call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    /// Reference token of the receiver.
    pub target: String,
    /// Method name.
    pub method: String,
    /// Arguments, wire encoded as an array.
    pub args: serde_json::Value,
    /// Owner of a jig constructed at top level.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub creator: Option<String>,
}

/// The embedded action log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Code deployed by this transaction.
    pub code: Vec<CodeEntry>,
    /// Actions in execution order.
    pub actions: Vec<ActionEntry>,
    /// Number of jig outputs after the code outputs.
    pub jigs: usize,
    /// Side-read locations, indexed by `_r<N>` tokens.
    pub refs: Vec<String>,
}

impl Payload {
    /// Canonical JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JigError> {
        serde_json::to_vec(self).map_err(|e| JigError::Internal(format!("payload encode: {e}")))
    }

    /// Wraps the payload in protocol chunks.
    pub fn to_script(&self, app_id: &str, debug: bool) -> Result<Script, JigError> {
        let marker = if debug { DEBUG_MARKER.to_vec() } else { Vec::new() };
        Ok(Script::Payload {
            chunks: vec![
                PROTOCOL_MARKER.to_vec(),
                vec![PROTOCOL_VERSION],
                app_id.as_bytes().to_vec(),
                hex::encode(self.to_bytes()?).into_bytes(),
                marker,
            ],
        })
    }

    /// Unwraps a payload script, returning the payload and its raw JSON.
    ///
    /// Fails with `Validation` if the script is not a payload for `app_id`.
    pub fn from_script(script: &Script, app_id: &str) -> Result<(Self, Vec<u8>), JigError> {
        let Script::Payload { chunks } = script else {
            return Err(JigError::validation("output 0 is not a payload"));
        };
        if chunks.len() != 5 || chunks[0] != PROTOCOL_MARKER {
            return Err(JigError::validation("missing protocol marker"));
        }
        if chunks[1] != [PROTOCOL_VERSION] {
            return Err(JigError::validation(format!(
                "unsupported protocol version {:?}",
                chunks[1]
            )));
        }
        if chunks[2] != app_id.as_bytes() {
            return Err(JigError::validation(format!(
                "payload belongs to app {:?}",
                String::from_utf8_lossy(&chunks[2])
            )));
        }
        if !chunks[4].is_empty() && chunks[4] != DEBUG_MARKER {
            return Err(JigError::validation("bad debug marker"));
        }
        let raw = hex::decode(&chunks[3])
            .map_err(|e| JigError::validation(format!("payload encoding: {e}")))?;
        let payload = serde_json::from_slice(&raw)
            .map_err(|e| JigError::validation(format!("payload json: {e}")))?;
        Ok((payload, raw))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        Payload {
            code: vec![CodeEntry {
                text: "class A {}".to_string(),
                deps: BTreeMap::new(),
                props: serde_json::json!({}),
                owner: "alice".to_string(),
            }],
            actions: vec![ActionEntry {
                target: "_o1".to_string(),
                method: "init".to_string(),
                args: serde_json::json!([]),
                creator: Some("alice".to_string()),
            }],
            jigs: 1,
            refs: vec![],
        }
    }

    #[test]
    fn test_script_wraps_and_unwraps() {
        let script = sample().to_script("app", true).unwrap();
        let (decoded, raw) = Payload::from_script(&script, "app").unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(raw, sample().to_bytes().unwrap());
    }

    #[test]
    fn test_wrong_app_rejected() {
        let script = sample().to_script("app", false).unwrap();
        assert!(matches!(
            Payload::from_script(&script, "other"),
            Err(JigError::Validation(_))
        ));
    }

    #[test]
    fn test_creator_omitted_when_absent() {
        let mut payload = sample();
        payload.actions[0].creator = None;
        let json = String::from_utf8(payload.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("creator"));
    }

    #[test]
    fn test_non_payload_script_rejected() {
        let script = Script::Owner {
            pubkey: "alice".to_string(),
        };
        assert!(Payload::from_script(&script, "app").is_err());
    }
}
