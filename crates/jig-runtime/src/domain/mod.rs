//! # Domain Layer (Inner Hexagon)
//!
//! The object model and its transaction bookkeeping.
//! NO I/O, NO async. Everything here runs under the kernel lock.
//!
//! ## Layering
//!
//! - `controller` / `membrane` / `scope`: per-call bookkeeping and accessor dispatch
//! - `recorder`: turns a finished call into an action
//! - `pending` / `builder` / `replay`: the pending transaction, its ledger
//!   form, and the inverse
//! - `kernel`: runs top-level calls and owns the arena

pub mod arena;
pub mod builder;
pub mod class;
pub mod controller;
pub mod entities;
pub mod kernel;
pub mod ledger_tx;
pub mod membrane;
pub mod payload;
pub mod pending;
pub mod recorder;
pub mod replay;
pub mod scope;
pub mod state;
pub mod value;
pub mod value_objects;

pub use arena::Arena;
pub use class::{ClassDef, MethodBody, MethodDef, Visibility};
pub use entities::{Action, CodeRecord, JigState, Target};
pub use kernel::Kernel;
pub use ledger_tx::{FetchedTransaction, Script, SpendStatus, Transaction, TxInput, TxOutput, Utxo};
pub use payload::Payload;
pub use pending::PendingTransaction;
pub use scope::Scope;
pub use state::CachedState;
pub use value::Value;
pub use value_objects::*;
