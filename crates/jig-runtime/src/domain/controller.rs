//! # Object Graph Controller
//!
//! Bookkeeping for one top-level call: the active call stack, which jigs
//! were read, created or snapshotted, who called whom, and the sticky error.
//!
//! A fresh `Controller` is built for every top-level call and threaded
//! explicitly through the accessor layer; nothing is global.

use crate::domain::entities::JigState;
use crate::domain::value_objects::{CodeId, JigId};
use crate::errors::JigError;
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;

/// One active method invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Receiver.
    pub jig: JigId,
    /// Class whose method body is running. May be an ancestor of the jig's class.
    pub class: CodeId,
}

/// Per-call execution context.
#[derive(Debug)]
pub struct Controller {
    stack: Vec<Frame>,
    touched: IndexSet<JigId>,
    creates: IndexSet<JigId>,
    reads: IndexSet<JigId>,
    saves: IndexMap<JigId, JigState>,
    callers: BTreeMap<JigId, IndexSet<JigId>>,
    enforce: bool,
    error: Option<JigError>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    /// Empty context with enforcement on.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            touched: IndexSet::new(),
            creates: IndexSet::new(),
            reads: IndexSet::new(),
            saves: IndexMap::new(),
            callers: BTreeMap::new(),
            enforce: true,
            error: None,
        }
    }

    /// Clears all bookkeeping.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True when no bookkeeping is left over.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stack.is_empty()
            && self.touched.is_empty()
            && self.creates.is_empty()
            && self.reads.is_empty()
            && self.saves.is_empty()
            && self.callers.is_empty()
            && self.enforce
            && self.error.is_none()
    }

    // -------------------------------------------------------------------------
    // Stack
    // -------------------------------------------------------------------------

    /// Enters a method body.
    pub fn push(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    /// Leaves the innermost method body.
    pub fn pop(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    /// Innermost frame, if any code is running.
    #[must_use]
    pub fn current(&self) -> Option<Frame> {
        self.stack.last().copied()
    }

    /// The jig whose method invoked the current one.
    #[must_use]
    pub fn caller(&self) -> Option<JigId> {
        let len = self.stack.len();
        (len >= 2).then(|| self.stack[len - 2].jig)
    }

    /// Current depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    // -------------------------------------------------------------------------
    // Sets
    // -------------------------------------------------------------------------

    /// Captures the pre-call snapshot on first touch.
    pub fn snapshot(&mut self, id: JigId, state: &JigState) {
        self.touched.insert(id);
        if !self.creates.contains(&id) && !self.saves.contains_key(&id) {
            self.saves.insert(id, state.clone());
        }
    }

    /// Records an observation.
    pub fn record_read(&mut self, id: JigId) {
        self.touched.insert(id);
        self.reads.insert(id);
    }

    /// Records a jig created during this call.
    pub fn record_create(&mut self, id: JigId) {
        self.touched.insert(id);
        self.creates.insert(id);
    }

    /// Records that `caller` invoked a method of `callee`.
    pub fn record_caller(&mut self, callee: JigId, caller: JigId) {
        if callee != caller {
            self.callers.entry(callee).or_default().insert(caller);
        }
    }

    /// Every jig touched, in first-touch order.
    #[must_use]
    pub fn touched(&self) -> &IndexSet<JigId> {
        &self.touched
    }

    /// Jigs created.
    #[must_use]
    pub fn creates(&self) -> &IndexSet<JigId> {
        &self.creates
    }

    /// Jigs read.
    #[must_use]
    pub fn reads(&self) -> &IndexSet<JigId> {
        &self.reads
    }

    /// Pre-call snapshots.
    #[must_use]
    pub fn saves(&self) -> &IndexMap<JigId, JigState> {
        &self.saves
    }

    /// Jigs that invoked `callee`.
    #[must_use]
    pub fn callers_of(&self, callee: JigId) -> Option<&IndexSet<JigId>> {
        self.callers.get(&callee)
    }

    // -------------------------------------------------------------------------
    // Enforcement and errors
    // -------------------------------------------------------------------------

    /// True while capability checks apply.
    #[must_use]
    pub fn enforcing(&self) -> bool {
        self.enforce
    }

    /// Runs `f` with capability checks off. Enforcement is back on when this
    /// returns, whatever `f` returned.
    pub fn unenforced<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.enforce;
        self.enforce = false;
        let result = f(self);
        self.enforce = previous;
        result
    }

    /// Records the first error raised anywhere in the stack.
    pub fn fail(&mut self, error: &JigError) {
        if self.error.is_none() {
            self.error = Some(error.clone());
        }
    }

    /// The sticky error, if one was raised.
    #[must_use]
    pub fn error(&self) -> Option<&JigError> {
        self.error.as_ref()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> JigState {
        JigState::new(CodeId(0), "owner".to_string())
    }

    #[test]
    fn test_snapshot_taken_once() {
        let mut ctx = Controller::new();
        let mut first = state();
        first.satoshis = 1;
        ctx.snapshot(JigId(1), &first);

        let mut second = state();
        second.satoshis = 2;
        ctx.snapshot(JigId(1), &second);

        assert_eq!(ctx.saves().get(&JigId(1)).map(|s| s.satoshis), Some(1));
    }

    #[test]
    fn test_created_jigs_are_not_snapshotted() {
        let mut ctx = Controller::new();
        ctx.record_create(JigId(2));
        ctx.snapshot(JigId(2), &state());
        assert!(ctx.saves().is_empty());
        assert!(ctx.touched().contains(&JigId(2)));
    }

    #[test]
    fn test_stack_and_caller() {
        let mut ctx = Controller::new();
        ctx.push(Frame { jig: JigId(1), class: CodeId(0) });
        assert_eq!(ctx.caller(), None);
        ctx.push(Frame { jig: JigId(2), class: CodeId(0) });
        assert_eq!(ctx.caller(), Some(JigId(1)));
        assert_eq!(ctx.current().map(|f| f.jig), Some(JigId(2)));
        ctx.pop();
        ctx.pop();
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_sticky_error_keeps_first() {
        let mut ctx = Controller::new();
        ctx.fail(&JigError::revert("first"));
        ctx.fail(&JigError::revert("second"));
        assert_eq!(ctx.error(), Some(&JigError::revert("first")));
    }

    #[test]
    fn test_unenforced_restores_flag() {
        let mut ctx = Controller::new();
        let result: Result<(), JigError> = ctx.unenforced(|ctx| {
            assert!(!ctx.enforcing());
            Err(JigError::revert("boom"))
        });
        assert!(result.is_err());
        assert!(ctx.enforcing());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = Controller::new();
        ctx.push(Frame { jig: JigId(1), class: CodeId(0) });
        ctx.record_read(JigId(1));
        ctx.record_caller(JigId(2), JigId(1));
        ctx.fail(&JigError::revert("x"));
        assert!(!ctx.is_clean());
        ctx.reset();
        assert!(ctx.is_clean());
    }
}
