//! # Jig Runtime - Transactional Object Model
//!
//! Mutable objects ("jigs") manipulated through ordinary method calls, with
//! every state-changing call captured, diffed and committed as a ledger
//! transaction. Any party can re-derive jig state from the ledger alone by
//! replaying those transactions.
//!
//! ## Call Lifecycle
//!
//! | Step | Component | Location |
//! |------|-----------|----------|
//! | accessor dispatch, privacy, immutability | membrane / scope | `domain/membrane.rs`, `domain/scope.rs` |
//! | per-call stack, snapshots, caller graph | controller | `domain/controller.rs` |
//! | diff, input/output/read inference | recorder | `domain/recorder.rs` |
//! | accumulate into one transaction | pending | `domain/pending.rs` |
//! | payload and ledger transaction | builder | `domain/builder.rs` |
//! | pay, sign, broadcast, finalize | synchronizer | `sync/mod.rs`, `service/publish.rs` |
//! | inverse: replay a ledger transaction | replay | `domain/replay.rs`, `service/import.rs` |
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | A failed call leaves no partial mutation | `domain/kernel.rs` - `abort()` |
//! | A pure read records no action | `domain/recorder.rs` - `record()` |
//! | Two handles never report different locations for one origin | `domain/arena.rs` indices, `service/load.rs` |
//! | One pending transaction in flight | `sync/mod.rs` - `start()` |
//! | A pending transaction publishes at most once | `sync/mod.rs` - `complete()` |
//! | Publish failure rolls back the whole queue | `sync/mod.rs` - `fail()` |
//!
//! ## Outbound Dependencies
//!
//! | Trait | Purpose | In-memory adapter |
//! |-------|---------|-------------------|
//! | `LedgerClient` | fetch, broadcast, utxos | `MockLedger` |
//! | `StateCache` | location-keyed states | `MemoryCache` |
//! | `Purse` | fund transactions | `MockPurse` |
//! | `OwnerSigner` | sign jig inputs | `MockOwner` |
//! | `Evaluator` | source text to class | `ClassRegistry` |
//!
//! ## Usage Example
//!
//! ```ignore
//! use jig_runtime::prelude::*;
//!
//! registry.register(ClassDef::new("Counter", "class Counter").method("inc", |scope, _| {
//!     let this = scope.this();
//!     let n = scope.get(this, "n")?.as_int().unwrap_or(0);
//!     scope.set(this, "n", n + 1)?;
//!     Ok(Value::Null)
//! }));
//!
//! let class = runtime.deploy("class Counter", BTreeMap::new())?;
//! let counter = runtime.create(class, vec![])?;
//! runtime.call(counter, "inc", vec![])?;
//! runtime.sync().await?;
//! ```

// Crate-level lints
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]

// =============================================================================
// MODULES
// =============================================================================

pub mod adapters;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod service;
pub mod sync;
pub mod telemetry;

// =============================================================================
// PRELUDE
// =============================================================================

/// Convenient re-exports for common usage.
pub mod prelude {
    // Domain
    pub use crate::domain::class::{ClassDef, Visibility};
    pub use crate::domain::entities::JigState;
    pub use crate::domain::kernel::Kernel;
    pub use crate::domain::scope::Scope;
    pub use crate::domain::value::Value;
    pub use crate::domain::value_objects::{CodeId, Handle, JigId, Location, Txid};

    // Ports
    pub use crate::ports::outbound::{Evaluator, LedgerClient, OwnerSigner, Purse, StateCache};

    // Adapters
    pub use crate::adapters::{ClassRegistry, MemoryCache, MockLedger, MockOwner, MockPurse};

    // Service
    pub use crate::config::RuntimeConfig;
    pub use crate::service::{Collaborators, JigRuntime, ServiceStats};

    // Errors
    pub use crate::errors::{CacheError, EvalError, JigError, LedgerError};
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
