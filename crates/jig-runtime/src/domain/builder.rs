//! # Transaction Builder
//!
//! Serializes a pending transaction into its payload and ledger transaction.
//!
//! ## Reference tokens
//!
//! | Referenced object | Token |
//! |-------------------|-------|
//! | jig consumed by this tx | `_i<input index>` |
//! | jig created by this tx | `_o<vout>` |
//! | code deployed by this tx | `_o<vout>` |
//! | any other jig | `_r<index into refs>` |
//! | any other code | its ledger location |
//!
//! Output layout: vout 0 is the payload, then one output per deployed code,
//! then one output per jig slot.

use crate::domain::arena::Arena;
use crate::domain::ledger_tx::{Script, Transaction, TxInput, TxOutput};
use crate::domain::payload::{ActionEntry, CodeEntry, Payload};
use crate::domain::pending::PendingTransaction;
use crate::domain::value::Value;
use crate::domain::value_objects::{Handle, JigId, Location};
use crate::errors::JigError;
use indexmap::IndexSet;
use std::collections::BTreeMap;

/// Protocol settings that shape the built transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    /// Application id chunk.
    pub app_id: String,
    /// Write the debug marker.
    pub debug: bool,
    /// Minimum output value.
    pub dust: u64,
}

/// Result of [`build`].
#[derive(Clone, Debug)]
pub struct BuiltTransaction {
    /// Embedded action log.
    pub payload: Payload,
    /// Unfunded, unsigned transaction.
    pub tx: Transaction,
    /// Side-read locations with their owners, for re-validation.
    pub reads: Vec<(Location, String)>,
}

struct Tokens<'a> {
    pending: &'a PendingTransaction,
    arena: &'a Arena,
    refs: &'a IndexSet<JigId>,
}

impl Tokens<'_> {
    fn token(&self, handle: Handle) -> Result<String, JigError> {
        let code_len = self.pending.code().len();
        match handle {
            Handle::Jig(id) => {
                if let Some(index) = self.pending.inputs().get_index_of(&id) {
                    Ok(format!("_i{index}"))
                } else if let Some(index) = self.pending.outputs().get_index_of(&id) {
                    Ok(format!("_o{}", 1 + code_len + index))
                } else if let Some(index) = self.refs.get_index_of(&id) {
                    Ok(format!("_r{index}"))
                } else {
                    Err(JigError::Internal(format!("{id} referenced but not recorded")))
                }
            }
            Handle::Code(id) => {
                if let Some(index) = self.pending.code().iter().position(|c| *c == id) {
                    return Ok(format!("_o{}", 1 + index));
                }
                let location = &self.arena.code(id)?.location;
                if location.is_ledger() {
                    Ok(location.to_string())
                } else {
                    Err(JigError::conflict(format!(
                        "{id} is referenced before it is published ({location})"
                    )))
                }
            }
        }
    }
}

/// Side-read jigs in first-appearance order: per action the target, then
/// the arguments, then the recorded reads.
#[must_use]
pub fn side_reads(pending: &PendingTransaction) -> IndexSet<JigId> {
    let mut refs = IndexSet::new();
    for action in pending.actions() {
        let referenced = action
            .referenced()
            .into_iter()
            .filter_map(Handle::as_jig)
            .chain(action.reads.iter().copied());
        for id in referenced {
            if !pending.outputs().contains(&id) {
                refs.insert(id);
            }
        }
    }
    refs
}

/// Builds the payload and transaction for `pending`.
///
/// Deterministic: building the same logical transaction twice yields
/// byte-identical payloads.
pub fn build(
    pending: &PendingTransaction,
    arena: &Arena,
    options: &BuildOptions,
) -> Result<BuiltTransaction, JigError> {
    if pending.is_empty() {
        return Err(JigError::Internal("empty pending transaction".to_string()));
    }

    let refs = side_reads(pending);
    let tokens = Tokens {
        pending,
        arena,
        refs: &refs,
    };
    let mut token = |h: Handle| tokens.token(h);

    let mut ref_locations = Vec::with_capacity(refs.len());
    let mut reads = Vec::with_capacity(refs.len());
    for id in &refs {
        let location = pending
            .read_locs()
            .get(id)
            .filter(|loc| loc.is_ledger())
            .ok_or_else(|| JigError::conflict(format!("read of unpublished jig {id}")))?;
        ref_locations.push(location.to_string());
        reads.push((location.clone(), arena.jig(*id)?.owner.clone()));
    }

    let mut code = Vec::with_capacity(pending.code().len());
    for id in pending.code() {
        let record = arena.code(*id)?;
        let mut deps = BTreeMap::new();
        for (name, dep) in &record.deps {
            deps.insert(name.clone(), token(Handle::Code(*dep))?);
        }
        code.push(CodeEntry {
            text: record.class.source().to_string(),
            deps,
            props: Value::Map(record.props.clone()).to_wire(&mut token)?,
            owner: record.owner.clone(),
        });
    }

    let mut actions = Vec::with_capacity(pending.actions().len());
    for action in pending.actions() {
        actions.push(ActionEntry {
            target: token(Handle::from(action.target))?,
            method: action.method.clone(),
            args: Value::Array(action.args.clone()).to_wire(&mut token)?,
            creator: action.creator.clone(),
        });
    }

    let payload = Payload {
        code,
        actions,
        jigs: pending.outputs().len(),
        refs: ref_locations,
    };

    let mut inputs = Vec::with_capacity(pending.inputs().len());
    for id in pending.inputs() {
        let prev = &pending
            .state_before()
            .get(id)
            .ok_or_else(|| JigError::Internal(format!("no prior state for input {id}")))?
            .location;
        if !prev.is_ledger() {
            return Err(JigError::conflict(format!(
                "input {id} is not on the ledger ({prev})"
            )));
        }
        inputs.push(TxInput {
            prev: prev.clone(),
            unlock: None,
        });
    }

    let mut outputs = vec![TxOutput {
        script: payload.to_script(&options.app_id, options.debug)?,
        satoshis: 0,
    }];
    for id in pending.code() {
        outputs.push(TxOutput {
            script: Script::Owner {
                pubkey: arena.code(*id)?.owner.clone(),
            },
            satoshis: options.dust,
        });
    }
    for id in pending.outputs() {
        let after = pending
            .state_after()
            .get(id)
            .ok_or_else(|| JigError::Internal(format!("no output state for {id}")))?;
        outputs.push(TxOutput {
            script: Script::Owner {
                pubkey: after.owner.clone(),
            },
            satoshis: after.satoshis.max(options.dust),
        });
    }

    Ok(BuiltTransaction {
        payload,
        tx: Transaction { inputs, outputs },
        reads,
    })
}

// =============================================================================
// TESTS
// =============================================================================
