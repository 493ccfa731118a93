//! # Transaction Replay
//!
//! The inverse of [`builder::build`](crate::domain::builder::build): re-runs
//! every action of a ledger transaction through the kernel and checks that
//! the result reproduces the transaction exactly.
//!
//! Replay runs in its own pending transaction, swapped in for the duration,
//! so it never mixes with the caller's open work. Referenced objects must
//! already be loaded; the async loader in [`crate::service`] does that.
//!
//! ## Checks, in order
//!
//! 1. declared jig count equals replayed outputs and owner outputs
//! 2. each replayed input's prior location equals the spent outpoint
//! 3. rebuilding the payload gives identical bytes
//! 4. each output's owner and value match the ledger output

use crate::domain::builder::{build, BuildOptions};
use crate::domain::kernel::Kernel;
use crate::domain::ledger_tx::FetchedTransaction;
use crate::domain::payload::Payload;
use crate::domain::pending::{CacheWrite, PendingTransaction};
use crate::domain::value::Value;
use crate::domain::value_objects::{CodeId, Handle, JigId, Location, CONSTRUCTOR};
use crate::errors::JigError;
use crate::ports::Evaluator;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Everything replay needs, resolved up front.
pub struct ReplayPlan<'a> {
    /// The transaction being imported.
    pub fetched: &'a FetchedTransaction,
    /// Its decoded payload.
    pub payload: &'a Payload,
    /// The payload's raw JSON bytes.
    pub raw: &'a [u8],
    /// Loaded jig per jig input, in input order.
    pub inputs: Vec<JigId>,
    /// Loaded jig per `refs` entry.
    pub refs: Vec<JigId>,
    /// Loaded object per absolute location token.
    pub absolute: HashMap<String, Handle>,
}

/// Replays `plan` and, if every check passes, assigns final locations.
/// Returns the versions to write to the state cache.
pub fn replay(
    kernel: &mut Kernel,
    plan: &ReplayPlan<'_>,
    evaluator: &dyn Evaluator,
    options: &BuildOptions,
) -> Result<Vec<CacheWrite>, JigError> {
    let open = std::mem::take(&mut kernel.pending);
    kernel.pending.begin();

    let result = run(kernel, plan, evaluator, options);
    let mut replayed = std::mem::replace(&mut kernel.pending, open);

    match result {
        Ok(()) => {
            let txid = plan.fetched.txid;
            debug!(txid = %txid, actions = plan.payload.actions.len(), "replay verified");
            replayed.finalize(txid, &mut kernel.arena, &mut [])
        }
        Err(e) => {
            replayed.rollback(&mut kernel.arena, true);
            Err(e)
        }
    }
}

fn run(
    kernel: &mut Kernel,
    plan: &ReplayPlan<'_>,
    evaluator: &dyn Evaluator,
    options: &BuildOptions,
) -> Result<(), JigError> {
    let payload = plan.payload;
    let mut installed: Vec<CodeId> = Vec::with_capacity(payload.code.len());

    for entry in &payload.code {
        let env: BTreeSet<String> = entry.deps.keys().cloned().collect();
        let class = evaluator.evaluate(&entry.text, &env)?;
        let mut deps = BTreeMap::new();
        for (name, token) in &entry.deps {
            let dep = resolve(kernel, plan, &installed, token)?
                .as_code()
                .ok_or_else(|| JigError::validation(format!("dependency {name} is not code")))?;
            deps.insert(name.clone(), dep);
        }
        let (id, _) = kernel.deploy_as(class, deps, entry.owner.clone())?;
        installed.push(id);
    }

    for entry in &payload.actions {
        let target = resolve(kernel, plan, &installed, &entry.target)?;
        let args = {
            let shared: &Kernel = kernel;
            match Value::from_wire(&entry.args, &mut |t| resolve(shared, plan, &installed, t))? {
                Value::Array(items) => items,
                _ => return Err(JigError::validation("action args must be an array")),
            }
        };
        match target {
            Handle::Code(class) => {
                if entry.method != CONSTRUCTOR {
                    return Err(JigError::validation(format!(
                        "code target with method {}",
                        entry.method
                    )));
                }
                let creator = entry
                    .creator
                    .clone()
                    .ok_or_else(|| JigError::validation("constructor action without creator"))?;
                kernel.create_as(class, args, creator)?;
            }
            Handle::Jig(jig) => {
                kernel.call(jig, &entry.method, args)?;
            }
        }
    }

    verify(kernel.pending(), kernel, plan, options)
}

fn verify(
    pending: &PendingTransaction,
    kernel: &Kernel,
    plan: &ReplayPlan<'_>,
    options: &BuildOptions,
) -> Result<(), JigError> {
    let tx = &plan.fetched.tx;
    let declared = plan.payload.jigs;
    let code_len = plan.payload.code.len();

    if pending.outputs().len() != declared {
        return Err(JigError::CountMismatch {
            declared,
            actual: pending.outputs().len(),
        });
    }
    let owner_outputs = tx
        .outputs
        .iter()
        .skip(1 + code_len)
        .filter(|o| o.script.owner().is_some())
        .count();
    if owner_outputs != declared {
        return Err(JigError::CountMismatch {
            declared,
            actual: owner_outputs,
        });
    }

    for (index, id) in pending.inputs().iter().enumerate() {
        let expected = &pending.state_before()[id].location;
        let spent = tx.inputs.get(index).map(|i| &i.prev);
        if spent != Some(expected) {
            return Err(JigError::conflict(format!(
                "input {index} spends {spent:?}, replay expected {expected}"
            )));
        }
    }

    let rebuilt = build(pending, &kernel.arena, options)?;
    if rebuilt.payload.to_bytes()? != plan.raw {
        return Err(JigError::PayloadMismatch);
    }

    for (index, id) in pending.code().iter().enumerate() {
        let output = tx
            .outputs
            .get(1 + index)
            .ok_or_else(|| JigError::validation("transaction lacks code outputs"))?;
        let owner = &kernel.arena.code(*id)?.owner;
        if output.script.owner() != Some(owner.as_str()) {
            return Err(JigError::conflict(format!(
                "code output {} is not locked to {owner}",
                1 + index
            )));
        }
    }
    for (index, id) in pending.outputs().iter().enumerate() {
        let vout = 1 + code_len + index;
        let output = tx
            .outputs
            .get(vout)
            .ok_or(JigError::CountMismatch {
                declared,
                actual: tx.outputs.len().saturating_sub(1 + code_len),
            })?;
        let after = &pending.state_after()[id];
        if output.script.owner() != Some(after.owner.as_str())
            || output.satoshis != after.satoshis.max(options.dust)
        {
            return Err(JigError::conflict(format!(
                "output {vout} does not match replayed owner or satoshis"
            )));
        }
    }
    Ok(())
}

fn resolve(
    kernel: &Kernel,
    plan: &ReplayPlan<'_>,
    installed: &[CodeId],
    token: &str,
) -> Result<Handle, JigError> {
    let location: Location = token.parse()?;
    let unknown = || JigError::validation(format!("unresolvable reference {token}"));
    match location {
        Location::Input(n) => plan
            .inputs
            .get(n as usize)
            .map(|id| Handle::Jig(*id))
            .ok_or_else(unknown),
        Location::Read(n) => plan
            .refs
            .get(n as usize)
            .map(|id| Handle::Jig(*id))
            .ok_or_else(unknown),
        Location::Output(vout) => {
            let index = (vout as usize).checked_sub(1).ok_or_else(unknown)?;
            if let Some(code) = installed.get(index) {
                return Ok(Handle::Code(*code));
            }
            let slot = index.checked_sub(plan.payload.code.len()).ok_or_else(unknown)?;
            kernel
                .pending()
                .outputs()
                .get_index(slot)
                .filter(|id| kernel.pending().creates().contains(*id))
                .map(|id| Handle::Jig(*id))
                .ok_or_else(unknown)
        }
        Location::Ledger { .. } => plan.absolute.get(token).copied().ok_or_else(unknown),
        _ => Err(unknown()),
    }
}
