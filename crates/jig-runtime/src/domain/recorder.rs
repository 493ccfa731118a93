//! # Action Recorder
//!
//! Runs once the outermost call returns successfully. Diffs every snapshot
//! against the live arena and infers the action's input, output and read
//! sets.
//!
//! ## Commit rules
//!
//! 1. `changed` = snapshotted jigs whose state differs (deep value compare,
//!    references by identity).
//! 2. Nothing changed and nothing created: a pure read, no action.
//! 3. `outputs` = changed + created + one hop of their callers, in first-touch
//!    order.
//! 4. `inputs` = `outputs` minus created.
//! 5. `reads` = observed jigs that are not outputs.

use crate::domain::arena::Arena;
use crate::domain::controller::Controller;
use crate::domain::entities::{Action, JigState, Target};
use crate::domain::value::Value;
use crate::domain::value_objects::JigId;
use crate::errors::JigError;
use indexmap::{IndexMap, IndexSet};

/// An action together with the states it moved between.
#[derive(Clone, Debug)]
pub struct Recorded {
    /// The action to store.
    pub action: Action,
    /// Pre-call state of every input.
    pub before: IndexMap<JigId, JigState>,
    /// Jigs created by the call.
    pub creates: IndexSet<JigId>,
}

/// Diffs the finished call. Returns `None` for a pure read.
pub fn record(
    arena: &Arena,
    ctx: &Controller,
    target: Target,
    method: &str,
    args: Vec<Value>,
    creator: Option<String>,
) -> Result<Option<Recorded>, JigError> {
    let mut changed = IndexSet::new();
    for (id, before) in ctx.saves() {
        if arena.jig(*id)? != before {
            changed.insert(*id);
        }
    }

    if changed.is_empty() && ctx.creates().is_empty() {
        return Ok(None);
    }

    let mut produced: IndexSet<JigId> = changed.iter().chain(ctx.creates()).copied().collect();
    for id in produced.clone() {
        if let Some(callers) = ctx.callers_of(id) {
            produced.extend(callers.iter().copied());
        }
    }

    // Re-order by first touch so slot assignment is deterministic.
    let mut outputs: IndexSet<JigId> = ctx
        .touched()
        .iter()
        .filter(|id| produced.contains(*id))
        .copied()
        .collect();
    outputs.extend(produced.iter().copied());

    let inputs: IndexSet<JigId> = outputs
        .iter()
        .filter(|id| !ctx.creates().contains(*id))
        .copied()
        .collect();

    let reads: IndexSet<JigId> = ctx
        .reads()
        .iter()
        .filter(|id| !outputs.contains(*id))
        .copied()
        .collect();

    let mut before = IndexMap::new();
    for id in &inputs {
        let state = ctx
            .saves()
            .get(id)
            .ok_or_else(|| JigError::Internal(format!("{id} changed without a snapshot")))?;
        before.insert(*id, state.clone());
    }

    Ok(Some(Recorded {
        action: Action {
            target,
            method: method.to_string(),
            args,
            creator,
            inputs,
            outputs,
            reads,
        },
        before,
        creates: ctx.creates().clone(),
    }))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::class::ClassDef;
    use crate::domain::controller::Frame;
    use crate::domain::entities::CodeRecord;
    use crate::domain::value_objects::{CodeId, Location};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn arena_with(n: usize) -> (Arena, CodeId, Vec<JigId>) {
        let mut arena = Arena::new();
        let class = arena.alloc_code();
        arena.put_code(
            class,
            CodeRecord {
                class: Arc::new(ClassDef::new("Counter", "counter")),
                parent: None,
                deps: BTreeMap::new(),
                props: BTreeMap::new(),
                origin: Location::Deploy(0),
                location: Location::Deploy(0),
                owner: "owner".to_string(),
            },
        );
        let ids = (0..n)
            .map(|_| {
                let id = arena.alloc_jig();
                arena.put_jig(id, JigState::new(class, "owner".to_string()));
                id
            })
            .collect();
        (arena, class, ids)
    }

    #[test]
    fn test_pure_read_records_nothing() {
        let (arena, class, ids) = arena_with(1);
        let mut ctx = Controller::new();
        ctx.push(Frame { jig: ids[0], class });
        ctx.snapshot(ids[0], arena.jig(ids[0]).unwrap());
        ctx.record_read(ids[0]);

        let recorded = record(&arena, &ctx, Target::Jig(ids[0]), "peek", vec![], None).unwrap();
        assert!(recorded.is_none());
    }

    #[test]
    fn test_outputs_include_callers() {
        let (mut arena, _, ids) = arena_with(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let mut ctx = Controller::new();

        // a calls b, which changes itself; c is only read.
        for id in [a, b, c] {
            let state = arena.jig(id).unwrap().clone();
            ctx.snapshot(id, &state);
            ctx.record_read(id);
        }
        ctx.record_caller(b, a);
        arena.jig_mut(b).unwrap().satoshis = 10;

        let recorded = record(&arena, &ctx, Target::Jig(a), "poke", vec![], None)
            .unwrap()
            .unwrap();
        let outputs: Vec<_> = recorded.action.outputs.iter().copied().collect();
        assert_eq!(outputs, vec![a, b]);
        assert_eq!(recorded.action.inputs, recorded.action.outputs);
        assert_eq!(recorded.action.reads.iter().copied().collect::<Vec<_>>(), vec![c]);
        assert_eq!(recorded.before.get(&b).map(|s| s.satoshis), Some(0));
    }

    #[test]
    fn test_created_jigs_are_outputs_not_inputs() {
        let (mut arena, class, _) = arena_with(0);
        let mut ctx = Controller::new();
        let id = arena.alloc_jig();
        arena.put_jig(id, JigState::new(class, "owner".to_string()));
        ctx.record_create(id);

        let recorded = record(
            &arena,
            &ctx,
            Target::Code(class),
            "init",
            vec![],
            Some("owner".to_string()),
        )
        .unwrap()
        .unwrap();
        assert!(recorded.action.inputs.is_empty());
        assert!(recorded.action.outputs.contains(&id));
        assert!(recorded.creates.contains(&id));
    }
}
