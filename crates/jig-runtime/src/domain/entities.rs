//! # Core Domain Entities
//!
//! Jig state, deployed code records and recorded actions.

use crate::domain::class::ClassDef;
use crate::domain::value::Value;
use crate::domain::value_objects::{CodeId, Handle, JigId, Location};
use indexmap::IndexSet;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// JIG STATE
// =============================================================================

/// Full state of one jig.
///
/// Also serves as the pre-call snapshot: comparing two `JigState`s compares
/// fields deeply and references by identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JigState {
    /// Deployed class.
    pub class: CodeId,
    /// First-appearance location. Stable identity once on the ledger.
    pub origin: Location,
    /// Current location.
    pub location: Location,
    /// Public key allowed to spend the next version.
    pub owner: String,
    /// Attached ledger value.
    pub satoshis: u64,
    /// User fields.
    pub fields: BTreeMap<String, Value>,
}

impl JigState {
    /// Fresh state for a jig created by `owner`.
    #[must_use]
    pub fn new(class: CodeId, owner: String) -> Self {
        Self {
            class,
            origin: Location::Pending,
            location: Location::Pending,
            owner,
            satoshis: 0,
            fields: BTreeMap::new(),
        }
    }

    /// True once the jig was marked permanently invalid.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.origin.is_invalid() || self.location.is_invalid()
    }

    /// Every object referenced from the fields.
    #[must_use]
    pub fn references(&self) -> Vec<Handle> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            value.visit_refs(&mut |h| out.push(h));
        }
        out
    }
}

// =============================================================================
// CODE RECORD
// =============================================================================

/// A deployed class.
#[derive(Clone, Debug)]
pub struct CodeRecord {
    /// Definition returned by the evaluator.
    pub class: Arc<ClassDef>,
    /// Base type, resolved from the class's parent dependency.
    pub parent: Option<CodeId>,
    /// Named dependencies.
    pub deps: BTreeMap<String, CodeId>,
    /// Static properties.
    pub props: BTreeMap<String, Value>,
    /// Assigned exactly once, at deploy.
    pub origin: Location,
    /// Equal to `origin` once published.
    pub location: Location,
    /// Deploying owner.
    pub owner: String,
}

impl CodeRecord {
    /// Class name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.class.name()
    }

    /// True once the code was marked permanently invalid.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.origin.is_invalid()
    }
}

// =============================================================================
// ACTION
// =============================================================================

/// Receiver of an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Method call on a jig.
    Jig(JigId),
    /// Constructor call on a class.
    Code(CodeId),
}

impl From<Target> for Handle {
    fn from(target: Target) -> Self {
        match target {
            Target::Jig(id) => Handle::Jig(id),
            Target::Code(id) => Handle::Code(id),
        }
    }
}

/// A committed top-level method call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    /// Receiver.
    pub target: Target,
    /// Method name.
    pub method: String,
    /// Arguments.
    pub args: Vec<Value>,
    /// Owner given to a jig constructed at top level.
    pub creator: Option<String>,
    /// Versions consumed, in first-touch order.
    pub inputs: IndexSet<JigId>,
    /// Versions produced, in first-touch order.
    pub outputs: IndexSet<JigId>,
    /// Observed but unchanged.
    pub reads: IndexSet<JigId>,
}

impl Action {
    /// Every object the serialized action refers to: target, then arguments.
    #[must_use]
    pub fn referenced(&self) -> Vec<Handle> {
        let mut out = vec![Handle::from(self.target)];
        for arg in &self.args {
            arg.visit_refs(&mut |h| out.push(h));
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_jig_is_pending() {
        let state = JigState::new(CodeId(0), "owner".to_string());
        assert_eq!(state.origin, Location::Pending);
        assert!(!state.is_invalid());
    }

    #[test]
    fn test_snapshot_equality_is_deep() {
        let mut a = JigState::new(CodeId(0), "owner".to_string());
        a.fields
            .insert("friends".to_string(), Value::Array(vec![Value::Jig(JigId(1))]));
        let mut b = a.clone();
        assert_eq!(a, b);

        b.fields
            .insert("friends".to_string(), Value::Array(vec![Value::Jig(JigId(2))]));
        assert_ne!(a, b);
        assert_eq!(a.references(), vec![Handle::Jig(JigId(1))]);
    }

    #[test]
    fn test_action_references_target_first() {
        let action = Action {
            target: Target::Code(CodeId(3)),
            method: "init".to_string(),
            args: vec![Value::Jig(JigId(9))],
            creator: Some("owner".to_string()),
            inputs: IndexSet::new(),
            outputs: IndexSet::new(),
            reads: IndexSet::new(),
        };
        assert_eq!(
            action.referenced(),
            vec![Handle::Code(CodeId(3)), Handle::Jig(JigId(9))]
        );
    }
}
