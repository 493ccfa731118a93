//! Fast-forward: follow the spend chain of a jig's output, importing each
//! spending transaction, until an unspent output is reached. Then do the
//! same for every jig it references, once per origin.

use super::Inner;
use crate::domain::ledger_tx::SpendStatus;
use crate::domain::value_objects::{Handle, JigId, Location};
use crate::errors::{JigError, LedgerError};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

impl Inner {
    /// Must run under the load queue.
    pub(super) fn forward_inner<'a>(
        self: &'a Arc<Self>,
        jig: JigId,
        visited: &'a mut HashSet<Location>,
    ) -> BoxFuture<'a, Result<(), JigError>> {
        async move {
            let origin = self.kernel.lock().arena.jig(jig)?.origin.clone();
            if !visited.insert(origin.clone()) {
                return Ok(());
            }

            let mut hops = 0usize;
            loop {
                let (location, owner) = {
                    let kernel = self.kernel.lock();
                    let state = kernel.arena.jig(jig)?;
                    (state.location.clone(), state.owner.clone())
                };
                let (txid, vout) = location
                    .outpoint()
                    .ok_or_else(|| JigError::validation(format!("{origin} is not on the ledger ({location})")))?;

                let fetched = self.ledger.fetch(&txid).await?;
                let spender = match fetched.spend(vout) {
                    SpendStatus::Unspent => break,
                    SpendStatus::Spent(next) => next,
                    SpendStatus::Unknown => {
                        let utxos = self.ledger.utxos(&owner).await?;
                        if utxos.iter().any(|u| u.location() == location) {
                            break;
                        }
                        return Err(LedgerError::NotFound(format!(
                            "spend status of {location} is unknown and it is not unspent"
                        ))
                        .into());
                    }
                };

                let next = self.ledger.fetch(&spender).await?;
                self.import_fetched(&next).await?;
                hops += 1;

                let moved = self.kernel.lock().arena.jig(jig)?.location.clone();
                if moved == location {
                    return Err(JigError::validation(format!(
                        "{spender} spends {location} without updating {origin}"
                    )));
                }
                debug!(origin = %origin, from = %location, to = %moved, "fast-forwarded one spend");
            }

            if hops > 0 {
                info!(origin = %origin, hops, "jig fast-forwarded");
            }

            let referenced: Vec<JigId> = self
                .kernel
                .lock()
                .arena
                .jig(jig)?
                .references()
                .into_iter()
                .filter_map(Handle::as_jig)
                .collect();
            for next in referenced {
                self.forward_inner(next, visited).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
