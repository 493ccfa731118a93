//! # Ledger Transaction Model
//!
//! The minimal transaction shape the runtime builds, signs and replays.
//! Script construction beyond these three output kinds belongs to the
//! ledger client.

use crate::domain::value_objects::{Location, Timestamp, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Locking script of an output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Script {
    /// Unspendable data output carrying protocol chunks.
    Payload {
        /// Raw chunks.
        chunks: Vec<Vec<u8>>,
    },
    /// Spendable by the holder of this public key.
    Owner {
        /// Owner public key.
        pubkey: String,
    },
    /// Change returned to a purse.
    Change {
        /// Purse address.
        address: String,
    },
}

impl Script {
    /// Owner key, if this is an owner lock.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Owner { pubkey } => Some(pubkey),
            _ => None,
        }
    }

    /// True if `address` can spend this output.
    #[must_use]
    pub fn pays_to(&self, address: &str) -> bool {
        match self {
            Self::Owner { pubkey } => pubkey == address,
            Self::Change { address: a } => a == address,
            Self::Payload { .. } => false,
        }
    }
}

/// A spent output reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Output being spent.
    pub prev: Location,
    /// Unlocking data added by the signer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unlock: Option<String>,
}

/// A created output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Locking script.
    pub script: Script,
    /// Attached value.
    pub satoshis: u64,
}

/// A ledger transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Inputs, in order.
    pub inputs: Vec<TxInput>,
    /// Outputs, in order.
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Double SHA-256 over the canonical JSON encoding.
    #[must_use]
    pub fn txid(&self) -> Txid {
        // Serializing plain structs into a Vec cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let first = Sha256::digest(&bytes);
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        Txid::new(out)
    }
}

/// Spend status of one output as reported by the ledger client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendStatus {
    /// Not spent.
    Unspent,
    /// Spent by this transaction.
    Spent(Txid),
    /// The client could not tell.
    Unknown,
}

/// A transaction as returned by `fetch`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedTransaction {
    /// Transaction id.
    pub txid: Txid,
    /// Transaction body.
    pub tx: Transaction,
    /// Time the ledger accepted it.
    pub time: Timestamp,
    /// Spend status per output, same length as `tx.outputs`.
    pub spends: Vec<SpendStatus>,
}

impl FetchedTransaction {
    /// Spend status of `vout`; out-of-range outputs report unknown.
    #[must_use]
    pub fn spend(&self, vout: u32) -> SpendStatus {
        usize::try_from(vout)
            .ok()
            .and_then(|v| self.spends.get(v))
            .copied()
            .unwrap_or(SpendStatus::Unknown)
    }
}

/// An unspent output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// Transaction id.
    pub txid: Txid,
    /// Output index.
    pub vout: u32,
    /// Locking script.
    pub script: Script,
    /// Value.
    pub satoshis: u64,
}

impl Utxo {
    /// Location of this output.
    #[must_use]
    pub fn location(&self) -> Location {
        Location::ledger(self.txid, self.vout)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            inputs: vec![TxInput {
                prev: Location::ledger(Txid::new([1; 32]), 2),
                unlock: None,
            }],
            outputs: vec![TxOutput {
                script: Script::Owner {
                    pubkey: "alice".to_string(),
                },
                satoshis: 546,
            }],
        }
    }

    #[test]
    fn test_txid_is_deterministic() {
        assert_eq!(sample().txid(), sample().txid());
    }

    #[test]
    fn test_txid_covers_unlock() {
        let mut signed = sample();
        signed.inputs[0].unlock = Some("sig".to_string());
        assert_ne!(signed.txid(), sample().txid());
    }

    #[test]
    fn test_spend_out_of_range_is_unknown() {
        let fetched = FetchedTransaction {
            txid: sample().txid(),
            tx: sample(),
            time: 0,
            spends: vec![SpendStatus::Unspent],
        };
        assert_eq!(fetched.spend(0), SpendStatus::Unspent);
        assert_eq!(fetched.spend(5), SpendStatus::Unknown);
    }
}
