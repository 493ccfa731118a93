//! Ports (hexagonal architecture boundaries).

pub mod outbound;

pub use outbound::{Evaluator, LedgerClient, OwnerSigner, Purse, StateCache};
