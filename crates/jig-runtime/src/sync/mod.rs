//! # Synchronizer
//!
//! FIFO queue of pending transactions awaiting publish. At most one entry is
//! in flight at a time. A failure anywhere in the publish pipeline rolls
//! back every queued entry, newest first, because later entries may build
//! on outputs of the failing one.
//!
//! | Failure while | Effect on touched jigs |
//! |---------------|------------------------|
//! | attended (a `sync` caller is waiting) | restored to their pre-queue state |
//! | unattended | origin and location become `!`-invalid |
//!
//! The async pipeline lives in [`crate::service`]; this type holds the
//! queue state behind the kernel lock.

use crate::domain::arena::Arena;
use crate::domain::pending::{CacheWrite, PendingTransaction};
use crate::domain::value_objects::Txid;
use crate::errors::JigError;
use std::collections::VecDeque;
use tracing::{error, info};

/// Publish queue state.
#[derive(Debug, Default)]
pub struct Synchronizer {
    queue: VecDeque<PendingTransaction>,
    in_flight: bool,
    waiters: usize,
    last_error: Option<JigError>,
}

impl Synchronizer {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued entries, including the one in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// True while the head is being published.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// True when nothing is queued or in flight.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && !self.in_flight
    }

    /// Appends a ready transaction.
    pub fn enqueue(&mut self, pending: PendingTransaction) {
        self.queue.push_back(pending);
    }

    /// Every queued entry, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingTransaction> {
        self.queue.iter()
    }

    /// Claims the head for publishing. Returns `None` if the queue is empty
    /// or another task already holds it.
    pub fn start(&mut self) -> Option<&PendingTransaction> {
        if self.in_flight || self.queue.is_empty() {
            return None;
        }
        self.in_flight = true;
        self.queue.front()
    }

    /// Finalizes the head after `txid` was accepted and pops it.
    ///
    /// `open` is the kernel's still-open pending transaction, rebased along
    /// with the rest of the queue.
    pub fn complete(
        &mut self,
        txid: Txid,
        arena: &mut Arena,
        open: &mut PendingTransaction,
    ) -> Result<Vec<CacheWrite>, JigError> {
        self.in_flight = false;
        let mut head = self
            .queue
            .pop_front()
            .ok_or_else(|| JigError::Internal("publish completed with empty queue".to_string()))?;
        let mut later: Vec<&mut PendingTransaction> = self.queue.iter_mut().collect();
        later.push(open);
        let writes = head.finalize(txid, arena, &mut later)?;
        info!(txid = %txid, remaining = self.queue.len(), "transaction published");
        Ok(writes)
    }

    /// Rolls back the whole queue after a publish failure.
    ///
    /// `open` is the kernel's still-open pending transaction. It was recorded
    /// on top of the queued outputs, so it goes first and is emptied, keeping
    /// its `begin` depth. Returns how many transactions were discarded.
    pub fn fail(&mut self, error: JigError, arena: &mut Arena, open: &mut PendingTransaction) -> usize {
        let attended = self.waiters > 0;
        error!(
            error = %error,
            attended,
            queued = self.queue.len(),
            open = !open.is_empty(),
            "publish failed, rolling back queue"
        );
        let mut discarded = 0;
        if !open.is_empty() {
            open.rollback(arena, attended);
            open.clear();
            discarded += 1;
        }
        while let Some(pending) = self.queue.pop_back() {
            pending.rollback(arena, attended);
            discarded += 1;
        }
        self.in_flight = false;
        self.last_error = Some(error);
        discarded
    }

    // -------------------------------------------------------------------------
    // Waiters
    // -------------------------------------------------------------------------

    /// Registers a caller awaiting completion.
    pub fn attend(&mut self) {
        self.waiters += 1;
    }

    /// Unregisters a caller.
    pub fn leave(&mut self) {
        self.waiters = self.waiters.saturating_sub(1);
    }

    /// True while any caller awaits completion.
    #[must_use]
    pub fn attended(&self) -> bool {
        self.waiters > 0
    }

    /// Takes the failure that last drained the queue.
    pub fn take_error(&mut self) -> Option<JigError> {
        self.last_error.take()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::class::ClassDef;
    use crate::domain::entities::CodeRecord;
    use crate::domain::value_objects::{CodeId, Location};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn deploy(arena: &mut Arena) -> (PendingTransaction, CodeId) {
        let id = arena.alloc_code();
        arena.put_code(
            id,
            CodeRecord {
                class: Arc::new(ClassDef::new("A", "a")),
                parent: None,
                deps: BTreeMap::new(),
                props: BTreeMap::new(),
                origin: Location::Pending,
                location: Location::Pending,
                owner: "alice".to_string(),
            },
        );
        let mut pending = PendingTransaction::new();
        pending.store_code(arena, id).unwrap();
        (pending, id)
    }

    #[test]
    fn test_single_flight() {
        let mut arena = Arena::new();
        let mut sync = Synchronizer::new();
        sync.enqueue(deploy(&mut arena).0);
        assert!(sync.start().is_some());
        assert!(sync.start().is_none());
        assert!(!sync.is_drained());
    }

    #[test]
    fn test_complete_pops_head_once() {
        let mut arena = Arena::new();
        let mut sync = Synchronizer::new();
        let (pending, code) = deploy(&mut arena);
        sync.enqueue(pending);
        sync.start();

        let txid = Txid::new([3; 32]);
        let mut open = PendingTransaction::new();
        let writes = sync.complete(txid, &mut arena, &mut open).unwrap();
        assert_eq!(writes.len(), 1);
        assert!(sync.is_drained());
        assert_eq!(arena.code(code).unwrap().location, Location::ledger(txid, 1));
        assert!(sync.complete(txid, &mut arena, &mut open).is_err());
    }

    #[test]
    fn test_fail_rolls_back_every_entry() {
        let mut arena = Arena::new();
        let mut sync = Synchronizer::new();
        let (first, a) = deploy(&mut arena);
        let (second, b) = deploy(&mut arena);
        sync.enqueue(first);
        sync.enqueue(second);
        sync.start();

        let mut open = PendingTransaction::new();
        let discarded = sync.fail(JigError::conflict("boom"), &mut arena, &mut open);
        assert_eq!(discarded, 2);
        assert!(sync.is_drained());
        assert!(arena.code(a).unwrap().is_invalid());
        assert!(arena.code(b).unwrap().is_invalid());
        assert_eq!(sync.take_error(), Some(JigError::conflict("boom")));
        assert_eq!(sync.take_error(), None);
    }

    #[test]
    fn test_fail_discards_open_transaction_first() {
        let mut arena = Arena::new();
        let mut sync = Synchronizer::new();
        let (queued, a) = deploy(&mut arena);
        sync.enqueue(queued);
        sync.start();

        let (mut open, b) = deploy(&mut arena);
        open.begin();
        let discarded = sync.fail(JigError::conflict("boom"), &mut arena, &mut open);

        assert_eq!(discarded, 2);
        assert!(open.is_empty());
        assert_eq!(open.nesting(), 1);
        assert!(arena.code(a).unwrap().is_invalid());
        assert!(arena.code(b).unwrap().is_invalid());
    }
}
