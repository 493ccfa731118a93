//! # Cached State
//!
//! The serialized form of a jig or code version written to the state cache
//! under its ledger location. References are absolute ledger locations, so
//! the same version always serializes to the same bytes.

use crate::domain::arena::Arena;
use crate::domain::entities::JigState;
use crate::domain::value::Value;
use crate::domain::value_objects::{CodeId, Handle, Location};
use crate::errors::JigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One cached object version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedState {
    /// A jig version.
    Jig {
        /// Location of the jig's class.
        class: Location,
        /// Jig origin.
        origin: Location,
        /// Owner.
        owner: String,
        /// Attached value.
        satoshis: u64,
        /// User fields, wire encoded with absolute references.
        props: serde_json::Value,
    },
    /// A deployed class.
    Code {
        /// Source text.
        text: String,
        /// Dependency name to location.
        deps: BTreeMap<String, Location>,
        /// Static properties, wire encoded with absolute references.
        props: serde_json::Value,
        /// Deploying owner.
        owner: String,
    },
}

/// Serializes a jig version. `locate` maps referenced objects to the
/// location they had as of this version.
pub fn capture_jig(
    state: &JigState,
    locate: &mut impl FnMut(Handle) -> Result<Location, JigError>,
) -> Result<CachedState, JigError> {
    let class = locate(Handle::Code(state.class))?;
    let props = Value::Map(state.fields.clone()).to_wire(&mut |h| Ok(locate(h)?.to_string()))?;
    Ok(CachedState::Jig {
        class,
        origin: state.origin.clone(),
        owner: state.owner.clone(),
        satoshis: state.satoshis,
        props,
    })
}

/// Serializes a code record.
pub fn capture_code(
    arena: &Arena,
    id: CodeId,
    locate: &mut impl FnMut(Handle) -> Result<Location, JigError>,
) -> Result<CachedState, JigError> {
    let record = arena.code(id)?;
    let mut deps = BTreeMap::new();
    for (name, dep) in &record.deps {
        deps.insert(name.clone(), locate(Handle::Code(*dep))?);
    }
    let props = Value::Map(record.props.clone()).to_wire(&mut |h| Ok(locate(h)?.to_string()))?;
    Ok(CachedState::Code {
        text: record.class.source().to_string(),
        deps,
        props,
        owner: record.owner.clone(),
    })
}

/// Every location referenced by a cached state, in encounter order.
#[must_use]
pub fn referenced_locations(state: &CachedState) -> Vec<String> {
    let mut out = Vec::new();
    match state {
        CachedState::Jig { class, props, .. } => {
            out.push(class.to_string());
            crate::domain::value::wire_tokens(props, &mut out);
        }
        CachedState::Code { deps, props, .. } => {
            out.extend(deps.values().map(ToString::to_string));
            crate::domain::value::wire_tokens(props, &mut out);
        }
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{CodeId, JigId, Txid};

    fn ledger(n: u8) -> Location {
        Location::ledger(Txid::new([n; 32]), 1)
    }

    #[test]
    fn test_jig_capture_uses_absolute_references() {
        let mut state = JigState::new(CodeId(0), "alice".to_string());
        state.origin = ledger(1);
        state.location = ledger(2);
        state
            .fields
            .insert("friend".to_string(), Value::Jig(JigId(5)));

        let cached = capture_jig(&state, &mut |h| {
            Ok(match h {
                Handle::Code(_) => ledger(9),
                Handle::Jig(_) => ledger(7),
            })
        })
        .unwrap();

        assert_eq!(
            referenced_locations(&cached),
            vec![ledger(9).to_string(), ledger(7).to_string()]
        );
        let json = serde_json::to_value(&cached).unwrap();
        assert_eq!(json["kind"], "jig");
        assert_eq!(json["origin"], ledger(1).to_string());
    }

    #[test]
    fn test_cached_state_round_trips_through_json() {
        let cached = CachedState::Code {
            text: "class A {}".to_string(),
            deps: BTreeMap::from([("Base".to_string(), ledger(3))]),
            props: serde_json::json!({"n": 1}),
            owner: "alice".to_string(),
        };
        let bytes = serde_json::to_vec(&cached).unwrap();
        let back: CachedState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, cached);
    }
}
