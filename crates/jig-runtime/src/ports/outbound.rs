//! # Driven Ports (SPI - Outbound)
//!
//! Collaborators the runtime depends on but does not implement:
//! - Ledger network access (fetch, broadcast, utxo lookup)
//! - State cache keyed by location
//! - Purse funding and owner signing
//! - The sandboxed evaluator that turns source text into a class
//!
//! Adapters implement these traits; in-memory versions live in
//! [`crate::adapters`].

use crate::domain::class::ClassDef;
use crate::domain::ledger_tx::{FetchedTransaction, Transaction, Utxo};
use crate::domain::state::CachedState;
use crate::domain::value_objects::{Location, Txid};
use crate::errors::{CacheError, EvalError, LedgerError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// LEDGER
// =============================================================================

/// Access to the ledger network.
///
/// Timeouts are the client's concern; a timed-out request reports
/// [`LedgerError::Timeout`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch a transaction with per-output spend status.
    async fn fetch(&self, txid: &Txid) -> Result<FetchedTransaction, LedgerError>;

    /// Broadcast a signed transaction. Fails if the network rejects it.
    async fn broadcast(&self, tx: &Transaction) -> Result<(), LedgerError>;

    /// Unspent outputs locked to `address`.
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, LedgerError>;
}

// =============================================================================
// STATE CACHE
// =============================================================================

/// Location-keyed store of serialized object versions.
///
/// Content-stable: setting a different state for a location that already
/// has one is a [`CacheError::Conflict`].
#[async_trait]
pub trait StateCache: Send + Sync {
    /// Cached state at `location`, if any.
    async fn get(&self, location: &Location) -> Result<Option<CachedState>, CacheError>;

    /// Stores the state at `location`.
    async fn set(&self, location: &Location, state: CachedState) -> Result<(), CacheError>;
}

// =============================================================================
// PURSE / OWNER
// =============================================================================

/// Funds transactions.
#[async_trait]
pub trait Purse: Send + Sync {
    /// Adds funding inputs and change outputs after the existing ones.
    async fn pay(&self, tx: Transaction) -> Result<Transaction, LedgerError>;
}

/// Holds the owner key that unlocks jig inputs.
#[async_trait]
pub trait OwnerSigner: Send + Sync {
    /// Public key new jigs are locked to.
    fn pubkey(&self) -> String;

    /// Signs every input this owner can unlock.
    async fn sign(&self, tx: Transaction) -> Result<Transaction, LedgerError>;
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Deterministic sandboxed evaluation of deployed source.
pub trait Evaluator: Send + Sync {
    /// Evaluates `source` with the named dependencies in scope.
    ///
    /// Identical inputs must produce an identical class.
    fn evaluate(&self, source: &str, env: &BTreeSet<String>) -> Result<Arc<ClassDef>, EvalError>;
}
