//! Import: decode a ledger transaction, load everything it references,
//! check side-read freshness, then replay it under the kernel lock.

use super::Inner;
use crate::domain::ledger_tx::{FetchedTransaction, Script, SpendStatus};
use crate::domain::payload::Payload;
use crate::domain::replay::{replay, ReplayPlan};
use crate::domain::state::CachedState;
use crate::domain::value::wire_tokens;
use crate::domain::value_objects::{Handle, JigId, Location};
use crate::errors::JigError;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

impl Inner {
    /// Replays `fetched`. Must run under the load queue.
    #[instrument(skip(self, fetched), fields(txid = %fetched.txid))]
    pub(super) async fn import_fetched(self: &Arc<Self>, fetched: &FetchedTransaction) -> Result<(), JigError> {
        let payload_output = fetched
            .tx
            .outputs
            .first()
            .ok_or_else(|| JigError::validation("transaction has no outputs"))?;
        let (payload, raw) = Payload::from_script(&payload_output.script, &self.config.app_id)?;

        if self.already_imported(fetched, &payload) {
            debug!("already known, skipping import");
            return Ok(());
        }

        let inputs = self.load_jig_inputs(fetched).await?;
        let refs = self.load_refs(fetched, &payload).await?;
        let absolute = self.load_tokens(payload_tokens(&payload)).await?;

        let plan = ReplayPlan {
            fetched,
            payload: &payload,
            raw: &raw,
            inputs,
            refs,
            absolute,
        };
        let writes = {
            let mut kernel = self.kernel.lock();
            replay(&mut kernel, &plan, &*self.evaluator, &self.config.build_options())
        };
        let writes = match writes {
            Ok(writes) => writes,
            Err(e) => {
                warn!(error = %e, "import rejected");
                return Err(e);
            }
        };

        for (location, state) in writes {
            self.cache.set(&location, state).await?;
        }
        self.seen.lock().insert(fetched.txid);
        self.stats.lock().imported += 1;
        info!(
            code = payload.code.len(),
            actions = payload.actions.len(),
            jigs = payload.jigs,
            "transaction imported"
        );
        Ok(())
    }

    fn already_imported(&self, fetched: &FetchedTransaction, payload: &Payload) -> bool {
        if self.seen.lock().contains(&fetched.txid) {
            return true;
        }
        let kernel = self.kernel.lock();
        let count = payload.code.len() + payload.jigs;
        (1..=count).any(|vout| {
            u32::try_from(vout).is_ok_and(|vout| {
                let location = Location::ledger(fetched.txid, vout);
                kernel.arena.lookup_location(&location).is_some()
                    || kernel.arena.lookup_origin(&location).is_some()
            })
        })
    }

    /// Jig inputs come first; the first input that is not a jig output
    /// starts the purse funding.
    async fn load_jig_inputs(self: &Arc<Self>, fetched: &FetchedTransaction) -> Result<Vec<JigId>, JigError> {
        let mut out = Vec::new();
        for input in &fetched.tx.inputs {
            let prev = &input.prev;
            if !prev.is_ledger() {
                break;
            }
            let known = self.kernel.lock().arena.lookup_location(prev);
            let is_jig = match known {
                Some(Handle::Jig(_)) => true,
                Some(Handle::Code(_)) => false,
                None => match self.cache.get(prev).await? {
                    Some(CachedState::Jig { .. }) => true,
                    Some(CachedState::Code { .. }) => false,
                    None => self.spends_owner_output(prev).await?,
                },
            };
            if !is_jig {
                break;
            }
            let id = self
                .load_inner(prev.clone())
                .await?
                .as_jig()
                .ok_or_else(|| JigError::validation(format!("input {prev} is not a jig")))?;
            out.push(id);
        }
        Ok(out)
    }

    async fn spends_owner_output(&self, prev: &Location) -> Result<bool, JigError> {
        let Some((txid, vout)) = prev.outpoint() else {
            return Ok(false);
        };
        let parent = self.ledger.fetch(&txid).await?;
        let is_payload_tx = matches!(
            parent.tx.outputs.first().map(|o| &o.script),
            Some(Script::Payload { .. })
        );
        Ok(is_payload_tx
            && vout > 0
            && parent
                .tx
                .outputs
                .get(vout as usize)
                .is_some_and(|o| o.script.owner().is_some()))
    }

    /// Loads each side-read and rejects reads spent well before `fetched`.
    async fn load_refs(self: &Arc<Self>, fetched: &FetchedTransaction, payload: &Payload) -> Result<Vec<JigId>, JigError> {
        let window = self.config.freshness_millis();
        let mut out = Vec::with_capacity(payload.refs.len());
        for token in &payload.refs {
            let location: Location = token.parse()?;
            let (txid, vout) = location
                .outpoint()
                .ok_or_else(|| JigError::validation(format!("ref {token} is not a ledger location")))?;

            let origin_tx = self.ledger.fetch(&txid).await?;
            if let SpendStatus::Spent(spender) = origin_tx.spend(vout) {
                if spender != fetched.txid {
                    let spent_at = self.ledger.fetch(&spender).await?.time;
                    if fetched.time.saturating_sub(spent_at) > window {
                        return Err(JigError::conflict(format!(
                            "stale read: {location} was spent by {spender} {} ms before this transaction",
                            fetched.time - spent_at
                        )));
                    }
                }
            }

            let id = self
                .load_inner(location)
                .await?
                .as_jig()
                .ok_or_else(|| JigError::validation(format!("ref {token} is not a jig")))?;
            out.push(id);
        }
        Ok(out)
    }
}

/// Absolute reference tokens anywhere in the payload.
fn payload_tokens(payload: &Payload) -> Vec<String> {
    let mut tokens = Vec::new();
    for entry in &payload.code {
        tokens.extend(entry.deps.values().cloned());
        wire_tokens(&entry.props, &mut tokens);
    }
    for action in &payload.actions {
        tokens.push(action.target.clone());
        wire_tokens(&action.args, &mut tokens);
    }
    tokens
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payload::{ActionEntry, CodeEntry};
    use std::collections::BTreeMap;

    #[test]
    fn test_payload_tokens_cover_targets_deps_and_args() {
        let payload = Payload {
            code: vec![CodeEntry {
                text: "class B".to_string(),
                deps: BTreeMap::from([("A".to_string(), "aa_o1".to_string())]),
                props: serde_json::json!({ "peer": { "$ref": "bb_o1" } }),
                owner: "alice".to_string(),
            }],
            actions: vec![ActionEntry {
                target: "_i0".to_string(),
                method: "give".to_string(),
                args: serde_json::json!([{ "$ref": "_r0" }, 3]),
                creator: None,
            }],
            jigs: 1,
            refs: vec![],
        };
        assert_eq!(payload_tokens(&payload), vec!["aa_o1", "bb_o1", "_i0", "_r0"]);
    }
}
