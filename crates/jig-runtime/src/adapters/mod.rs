//! # Adapters Layer (Outer Hexagon)
//!
//! In-memory implementations of the outbound ports, used by tests and by
//! embedders that want a self-contained runtime.
//!
//! | Port | Adapter |
//! |------|---------|
//! | `LedgerClient` | [`MockLedger`] |
//! | `StateCache` | [`MemoryCache`] |
//! | `Purse` | [`MockPurse`] |
//! | `OwnerSigner` | [`MockOwner`] |
//! | `Evaluator` | [`ClassRegistry`] |

pub mod cache;
pub mod evaluator;
pub mod ledger;
pub mod wallet;

pub use cache::MemoryCache;
pub use evaluator::ClassRegistry;
pub use ledger::MockLedger;
pub use wallet::{MockOwner, MockPurse};
