//! # Pending Transaction
//!
//! Accumulates code deployments and actions until they are published as one
//! ledger transaction.
//!
//! Inputs and outputs are deduplicated by jig identity and receive
//! positional placeholders the first time they appear: code `i` lives at
//! `_d<i>`, output slot `s` at `_o<s>`. `begin`/`end` brackets let several
//! calls coalesce; once nesting returns to zero with content present, the
//! transaction is ready to publish.

use crate::domain::arena::Arena;
use crate::domain::entities::{Action, JigState};
use crate::domain::recorder::Recorded;
use crate::domain::state::{capture_code, capture_jig, CachedState};
use crate::domain::value_objects::{CodeId, Handle, JigId, Location, Txid};
use crate::errors::JigError;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

/// A code or jig version ready for the state cache.
pub type CacheWrite = (Location, CachedState);

/// Code and actions not yet broadcast.
#[derive(Clone, Debug, Default)]
pub struct PendingTransaction {
    code: Vec<CodeId>,
    actions: Vec<Action>,
    inputs: IndexSet<JigId>,
    outputs: IndexSet<JigId>,
    creates: IndexSet<JigId>,
    state_before: IndexMap<JigId, JigState>,
    state_after: IndexMap<JigId, JigState>,
    read_locs: IndexMap<JigId, Location>,
    nesting: u32,
}

impl PendingTransaction {
    /// Empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when there is nothing to publish.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.actions.is_empty()
    }

    /// True when nesting is closed and there is content.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.nesting == 0 && !self.is_empty()
    }

    /// Current `begin` depth.
    #[must_use]
    pub fn nesting(&self) -> u32 {
        self.nesting
    }

    /// Opens a bracket.
    pub fn begin(&mut self) {
        self.nesting += 1;
    }

    /// Drops all recorded content, keeping the open `begin` depth.
    pub fn clear(&mut self) {
        *self = Self {
            nesting: self.nesting,
            ..Self::default()
        };
    }

    /// Closes a bracket. Returns true if the transaction became ready.
    pub fn end(&mut self) -> Result<bool, JigError> {
        if self.nesting == 0 {
            return Err(JigError::validation("end called without begin"));
        }
        self.nesting -= 1;
        Ok(self.is_ready())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Code deployed, in order.
    #[must_use]
    pub fn code(&self) -> &[CodeId] {
        &self.code
    }

    /// Actions, in order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Consumed jigs, in input order.
    #[must_use]
    pub fn inputs(&self) -> &IndexSet<JigId> {
        &self.inputs
    }

    /// Produced jigs, in slot order.
    #[must_use]
    pub fn outputs(&self) -> &IndexSet<JigId> {
        &self.outputs
    }

    /// Jigs created here.
    #[must_use]
    pub fn creates(&self) -> &IndexSet<JigId> {
        &self.creates
    }

    /// State of each input before this transaction.
    #[must_use]
    pub fn state_before(&self) -> &IndexMap<JigId, JigState> {
        &self.state_before
    }

    /// State of each output after this transaction.
    #[must_use]
    pub fn state_after(&self) -> &IndexMap<JigId, JigState> {
        &self.state_after
    }

    /// Location of each referenced jig that is not an output, at record time.
    #[must_use]
    pub fn read_locs(&self) -> &IndexMap<JigId, Location> {
        &self.read_locs
    }

    /// True if this transaction produces a version of `id`.
    #[must_use]
    pub fn touches(&self, id: JigId) -> bool {
        self.outputs.contains(&id)
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Appends deployed code and gives it its `_d` placeholder.
    pub fn store_code(&mut self, arena: &mut Arena, id: CodeId) -> Result<(), JigError> {
        let index = slot(self.code.len())?;
        arena.relocate_code(id, Location::Deploy(index))?;
        self.code.push(id);
        Ok(())
    }

    /// Appends a recorded action.
    ///
    /// Fails with `StateConflict`, leaving the transaction untouched, if two
    /// inputs share an origin but disagree on location.
    pub fn store_action(&mut self, arena: &mut Arena, recorded: Recorded) -> Result<(), JigError> {
        let Recorded {
            action,
            before,
            creates,
        } = recorded;
        self.check_inputs(&before)?;

        for (id, state) in &before {
            if !self.creates.contains(id) && !self.inputs.contains(id) {
                self.inputs.insert(*id);
                self.state_before.insert(*id, state.clone());
            }
        }
        self.creates.extend(creates.iter().copied());

        for id in &action.outputs {
            let (index, fresh) = self.outputs.insert_full(*id);
            if fresh {
                let placeholder = Location::Output(slot(index)?);
                let origin = if creates.contains(id) {
                    placeholder.clone()
                } else {
                    arena.jig(*id)?.origin.clone()
                };
                arena.relocate_jig(*id, origin, placeholder)?;
            }
            self.state_after.insert(*id, arena.jig(*id)?.clone());
        }

        let mut observed: Vec<JigId> = action.reads.iter().copied().collect();
        observed.extend(action.referenced().into_iter().filter_map(Handle::as_jig));
        for id in observed {
            if !self.outputs.contains(&id) && !self.read_locs.contains_key(&id) {
                self.read_locs.insert(id, arena.jig(id)?.location.clone());
            }
        }

        debug!(
            method = %action.method,
            inputs = action.inputs.len(),
            outputs = action.outputs.len(),
            reads = action.reads.len(),
            "action stored"
        );
        self.actions.push(action);
        Ok(())
    }

    fn check_inputs(&self, before: &IndexMap<JigId, JigState>) -> Result<(), JigError> {
        let known = self.state_before.iter().chain(before.iter());
        let seen: Vec<(&JigId, &JigState)> = known.collect();
        for (id, state) in before {
            if !state.origin.is_ledger() {
                continue;
            }
            for (other, other_state) in &seen {
                if *other != id
                    && other_state.origin == state.origin
                    && other_state.location != state.location
                {
                    return Err(JigError::conflict(format!(
                        "inputs {id} and {other} share origin {} at {} and {}",
                        state.origin, state.location, other_state.location
                    )));
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Rollback
    // -------------------------------------------------------------------------

    /// Undoes this transaction's effect on the arena.
    ///
    /// Attended: inputs return to their pre-transaction state. Unattended:
    /// inputs keep their state but their origin and location become
    /// permanently invalid. Created jigs and deployed code are invalidated
    /// either way.
    pub fn rollback(&self, arena: &mut Arena, attended: bool) {
        for (id, before) in &self.state_before {
            if !arena.has_jig(*id) {
                continue;
            }
            if attended {
                arena.put_jig(*id, before.clone());
            } else {
                Self::invalidate_jig(arena, *id);
            }
        }
        for id in &self.creates {
            Self::invalidate_jig(arena, *id);
        }
        for id in &self.code {
            let invalid = match arena.code(*id) {
                Ok(record) => record.origin.invalidate(),
                Err(e) => {
                    warn!(code = %id, error = %e, "rollback skipped missing code");
                    continue;
                }
            };
            if let Err(e) = arena.relocate_code(*id, invalid) {
                warn!(code = %id, error = %e, "rollback could not invalidate code");
            }
        }
        warn!(
            attended,
            inputs = self.state_before.len(),
            created = self.creates.len(),
            code = self.code.len(),
            "pending transaction rolled back"
        );
    }

    fn invalidate_jig(arena: &mut Arena, id: JigId) {
        let (origin, location) = match arena.jig(id) {
            Ok(state) => (state.origin.invalidate(), state.location.invalidate()),
            Err(e) => {
                warn!(jig = %id, error = %e, "rollback skipped missing jig");
                return;
            }
        };
        if let Err(e) = arena.relocate_jig(id, origin, location) {
            warn!(jig = %id, error = %e, "rollback could not invalidate jig");
        }
    }

    // -------------------------------------------------------------------------
    // Finalization
    // -------------------------------------------------------------------------

    /// Ledger location of output slot `index` in transaction `txid`.
    pub fn output_location(&self, txid: Txid, index: usize) -> Result<Location, JigError> {
        Ok(Location::ledger(txid, slot(1 + self.code.len() + index)?))
    }

    /// Assigns final locations after `txid` was accepted.
    ///
    /// `later` are the pending transactions recorded after this one, oldest
    /// first. A jig they also produce keeps its live placeholder; the first
    /// of them to consume it is rebased onto the final location instead.
    /// Returns the versions to write to the state cache.
    pub fn finalize(
        &mut self,
        txid: Txid,
        arena: &mut Arena,
        later: &mut [&mut PendingTransaction],
    ) -> Result<Vec<CacheWrite>, JigError> {
        for (index, id) in self.code.iter().enumerate() {
            arena.relocate_code(*id, Location::ledger(txid, slot(1 + index)?))?;
        }

        for (index, id) in self.outputs.clone().iter().enumerate() {
            let id = *id;
            let location = self.output_location(txid, index)?;
            let created = self.creates.contains(&id);
            let origin = if created {
                location.clone()
            } else {
                arena.jig(id)?.origin.clone()
            };

            if let Some(after) = self.state_after.get_mut(&id) {
                after.origin = origin.clone();
                after.location = location.clone();
            }

            let consumed_later = later.iter().any(|p| p.touches(id));
            let live = arena.jig(id)?.location.clone();
            let live = if consumed_later { live } else { location.clone() };
            arena.relocate_jig(id, origin.clone(), live)?;

            let mut rebased = false;
            for next in later.iter_mut() {
                next.rebase(id, created.then_some(&origin), &location, &mut rebased);
            }
        }

        Ok(self.cache_writes(arena, later))
    }

    fn rebase(
        &mut self,
        id: JigId,
        origin: Option<&Location>,
        location: &Location,
        rebased: &mut bool,
    ) {
        if let Some(origin) = origin {
            for map in [&mut self.state_before, &mut self.state_after] {
                if let Some(state) = map.get_mut(&id) {
                    state.origin = origin.clone();
                }
            }
        }
        if *rebased {
            return;
        }
        if let Some(read) = self.read_locs.get_mut(&id) {
            *read = location.clone();
        }
        if let Some(state) = self.state_before.get_mut(&id) {
            state.location = location.clone();
            *rebased = true;
        }
    }

    fn cache_writes(&self, arena: &Arena, later: &[&mut PendingTransaction]) -> Vec<CacheWrite> {
        // References resolve to where each object stood as of this
        // transaction, not where it stands now.
        let mut locate = |handle: Handle| -> Result<Location, JigError> {
            let location = match handle {
                Handle::Code(id) => arena.code(id)?.location.clone(),
                Handle::Jig(id) => match self.state_after.get(&id) {
                    Some(state) => state.location.clone(),
                    None => match later.iter().find_map(|p| p.state_before.get(&id)) {
                        Some(state) => state.location.clone(),
                        None => arena.jig(id)?.location.clone(),
                    },
                },
            };
            if location.is_ledger() {
                Ok(location)
            } else {
                Err(JigError::conflict(format!("{handle} has no ledger location")))
            }
        };

        let mut writes = Vec::new();
        for id in &self.code {
            match arena
                .code(*id)
                .map(|r| r.location.clone())
                .and_then(|loc| Ok((loc, capture_code(arena, *id, &mut locate)?)))
            {
                Ok(write) => writes.push(write),
                Err(e) => warn!(code = %id, error = %e, "code not cached"),
            }
        }
        for (id, state) in &self.state_after {
            match capture_jig(state, &mut locate) {
                Ok(cached) => writes.push((state.location.clone(), cached)),
                Err(e) => warn!(jig = %id, error = %e, "jig state not cached"),
            }
        }
        writes
    }
}

fn slot(n: usize) -> Result<u32, JigError> {
    u32::try_from(n).map_err(|_| JigError::Internal(format!("slot {n} out of range")))
}

// =============================================================================
// TESTS
// =============================================================================
