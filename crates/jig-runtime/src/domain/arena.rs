//! # Object Arena
//!
//! Owns every jig and code object known to the runtime, keyed by stable
//! integer ids. Two lookup tables map confirmed origins and confirmed
//! locations back to handles, so loading the same origin twice yields the
//! same handle and no two handles can report different locations for one
//! jig.

use crate::domain::class::MethodDef;
use crate::domain::entities::{CodeRecord, JigState};
use crate::domain::value_objects::{CodeId, Handle, JigId, Location};
use crate::errors::JigError;
use std::collections::{BTreeMap, HashMap};

/// Arena of jigs and code.
#[derive(Debug, Default)]
pub struct Arena {
    jigs: BTreeMap<JigId, JigState>,
    codes: BTreeMap<CodeId, CodeRecord>,
    next_jig: u32,
    next_code: u32,
    by_origin: HashMap<Location, Handle>,
    by_location: HashMap<Location, Handle>,
}

impl Arena {
    /// Empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Jigs
    // -------------------------------------------------------------------------

    /// Reserves a jig id without inserting state.
    pub fn alloc_jig(&mut self) -> JigId {
        let id = JigId(self.next_jig);
        self.next_jig += 1;
        id
    }

    /// Inserts or replaces a jig's state and refreshes the indices.
    pub fn put_jig(&mut self, id: JigId, state: JigState) {
        if let Some(old) = self.jigs.get(&id) {
            let (origin, location) = (old.origin.clone(), old.location.clone());
            self.unindex(Handle::Jig(id), &origin, &location);
        }
        self.index(Handle::Jig(id), &state.origin, &state.location);
        self.jigs.insert(id, state);
    }

    /// Removes a jig entirely.
    pub fn remove_jig(&mut self, id: JigId) -> Option<JigState> {
        let state = self.jigs.remove(&id)?;
        self.unindex(Handle::Jig(id), &state.origin, &state.location);
        Some(state)
    }

    /// Jig state.
    pub fn jig(&self, id: JigId) -> Result<&JigState, JigError> {
        self.jigs
            .get(&id)
            .ok_or_else(|| JigError::UnknownObject(id.to_string()))
    }

    /// Mutable jig state. Callers must not change origin or location here;
    /// use [`Arena::relocate_jig`] so the indices stay consistent.
    pub fn jig_mut(&mut self, id: JigId) -> Result<&mut JigState, JigError> {
        self.jigs
            .get_mut(&id)
            .ok_or_else(|| JigError::UnknownObject(id.to_string()))
    }

    /// True if the jig exists.
    #[must_use]
    pub fn has_jig(&self, id: JigId) -> bool {
        self.jigs.contains_key(&id)
    }

    /// Moves a jig to a new origin and location.
    pub fn relocate_jig(
        &mut self,
        id: JigId,
        origin: Location,
        location: Location,
    ) -> Result<(), JigError> {
        let mut state = self.jig(id)?.clone();
        state.origin = origin;
        state.location = location;
        self.put_jig(id, state);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Code
    // -------------------------------------------------------------------------

    /// Reserves a code id without inserting a record.
    pub fn alloc_code(&mut self) -> CodeId {
        let id = CodeId(self.next_code);
        self.next_code += 1;
        id
    }

    /// Inserts or replaces a code record and refreshes the indices.
    pub fn put_code(&mut self, id: CodeId, record: CodeRecord) {
        if let Some(old) = self.codes.get(&id) {
            let (origin, location) = (old.origin.clone(), old.location.clone());
            self.unindex(Handle::Code(id), &origin, &location);
        }
        self.index(Handle::Code(id), &record.origin, &record.location);
        self.codes.insert(id, record);
    }

    /// Code record.
    pub fn code(&self, id: CodeId) -> Result<&CodeRecord, JigError> {
        self.codes
            .get(&id)
            .ok_or_else(|| JigError::UnknownObject(id.to_string()))
    }

    /// Moves code to its published location. Origin and location move together.
    pub fn relocate_code(&mut self, id: CodeId, location: Location) -> Result<(), JigError> {
        let mut record = self.code(id)?.clone();
        record.origin = location.clone();
        record.location = location;
        self.put_code(id, record);
        Ok(())
    }

    /// Current location of either kind of object.
    pub fn location_of(&self, handle: Handle) -> Result<Location, JigError> {
        Ok(match handle {
            Handle::Jig(id) => self.jig(id)?.location.clone(),
            Handle::Code(id) => self.code(id)?.location.clone(),
        })
    }

    // -------------------------------------------------------------------------
    // Indices
    // -------------------------------------------------------------------------

    /// Handle currently at a confirmed location.
    #[must_use]
    pub fn lookup_location(&self, location: &Location) -> Option<Handle> {
        self.by_location.get(location).copied()
    }

    /// Handle with a confirmed origin.
    #[must_use]
    pub fn lookup_origin(&self, origin: &Location) -> Option<Handle> {
        self.by_origin.get(origin).copied()
    }

    /// Claims a confirmed location for an object still being loaded, so that
    /// cyclic references resolve to it.
    pub fn reserve_location(&mut self, location: Location, handle: Handle) {
        self.by_location.insert(location, handle);
    }

    /// Drops a reservation made by [`Arena::reserve_location`].
    pub fn release_location(&mut self, location: &Location, handle: Handle) {
        if self.by_location.get(location) == Some(&handle) {
            self.by_location.remove(location);
        }
    }

    fn index(&mut self, handle: Handle, origin: &Location, location: &Location) {
        if origin.is_ledger() {
            self.by_origin.insert(origin.clone(), handle);
        }
        if location.is_ledger() {
            self.by_location.insert(location.clone(), handle);
        }
    }

    fn unindex(&mut self, handle: Handle, origin: &Location, location: &Location) {
        if self.by_origin.get(origin) == Some(&handle) {
            self.by_origin.remove(origin);
        }
        if self.by_location.get(location) == Some(&handle) {
            self.by_location.remove(location);
        }
    }

    // -------------------------------------------------------------------------
    // Type lineage
    // -------------------------------------------------------------------------

    /// The class followed by its ancestors.
    #[must_use]
    pub fn lineage(&self, class: CodeId) -> Vec<CodeId> {
        let mut out = Vec::new();
        let mut next = Some(class);
        while let Some(id) = next {
            if out.contains(&id) {
                break;
            }
            out.push(id);
            next = self.codes.get(&id).and_then(|c| c.parent);
        }
        out
    }

    /// True if either class is an ancestor-or-self of the other.
    #[must_use]
    pub fn same_lineage(&self, a: CodeId, b: CodeId) -> bool {
        self.lineage(a).contains(&b) || self.lineage(b).contains(&a)
    }

    /// Resolves a method along the parent chain.
    #[must_use]
    pub fn find_method(&self, class: CodeId, name: &str) -> Option<(CodeId, MethodDef)> {
        self.lineage(class).into_iter().find_map(|id| {
            let def = self.codes.get(&id)?.class.own_method(name)?;
            Some((id, def.clone()))
        })
    }

    /// True if any class in the lineage tags `field` private.
    #[must_use]
    pub fn is_private_field(&self, class: CodeId, field: &str) -> bool {
        self.lineage(class).into_iter().any(|id| {
            self.codes
                .get(&id)
                .is_some_and(|c| c.class.declares_private(field))
        })
    }

    /// Class name for messages.
    #[must_use]
    pub fn class_name(&self, class: CodeId) -> String {
        self.codes
            .get(&class)
            .map_or_else(|| class.to_string(), |c| c.name().to_string())
    }

    /// Every jig id, ascending.
    pub fn jig_ids(&self) -> impl Iterator<Item = JigId> + '_ {
        self.jigs.keys().copied()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::class::ClassDef;
    use crate::domain::value::Value;
    use crate::domain::value_objects::Txid;
    use std::sync::Arc;

    fn record(class: ClassDef, parent: Option<CodeId>) -> CodeRecord {
        CodeRecord {
            class: Arc::new(class),
            parent,
            deps: BTreeMap::new(),
            props: BTreeMap::new(),
            origin: Location::Deploy(0),
            location: Location::Deploy(0),
            owner: "owner".to_string(),
        }
    }

    fn ledger(n: u8, vout: u32) -> Location {
        Location::ledger(Txid::new([n; 32]), vout)
    }

    #[test]
    fn test_lineage_and_dispatch() {
        let mut arena = Arena::new();
        let base = arena.alloc_code();
        arena.put_code(
            base,
            record(
                ClassDef::new("Base", "base")
                    .method("hello", |_, _| Ok(Value::from("base")))
                    .private_field("secret"),
                None,
            ),
        );
        let child = arena.alloc_code();
        arena.put_code(child, record(ClassDef::new("Child", "child").extends("Base"), Some(base)));
        let other = arena.alloc_code();
        arena.put_code(other, record(ClassDef::new("Other", "other"), None));

        assert_eq!(arena.lineage(child), vec![child, base]);
        assert!(arena.same_lineage(base, child));
        assert!(!arena.same_lineage(child, other));
        assert_eq!(arena.find_method(child, "hello").map(|(id, _)| id), Some(base));
        assert!(arena.is_private_field(child, "secret"));
        assert!(!arena.is_private_field(other, "secret"));
    }

    #[test]
    fn test_relocation_keeps_indices_consistent() {
        let mut arena = Arena::new();
        let id = arena.alloc_jig();
        let mut state = JigState::new(CodeId(0), "owner".to_string());
        state.origin = ledger(1, 1);
        state.location = ledger(1, 1);
        arena.put_jig(id, state);

        arena.relocate_jig(id, ledger(1, 1), ledger(2, 1)).unwrap();
        assert_eq!(arena.lookup_location(&ledger(2, 1)), Some(Handle::Jig(id)));
        assert_eq!(arena.lookup_location(&ledger(1, 1)), None);
        assert_eq!(arena.lookup_origin(&ledger(1, 1)), Some(Handle::Jig(id)));
    }

    #[test]
    fn test_unknown_jig() {
        let arena = Arena::new();
        assert!(matches!(arena.jig(JigId(7)), Err(JigError::UnknownObject(_))));
    }
}
