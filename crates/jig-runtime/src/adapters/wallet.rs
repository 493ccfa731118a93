//! # Mock Wallet
//!
//! Purse and owner key for the [`MockLedger`]. Fees are zero: the purse adds
//! just enough of its own outputs to cover what the transaction creates.

use crate::adapters::ledger::{signature, MockLedger};
use crate::domain::ledger_tx::{Script, Transaction, TxInput, TxOutput};
use crate::errors::LedgerError;
use crate::ports::outbound::{LedgerClient, OwnerSigner, Purse};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// PURSE
// =============================================================================

/// Funds transactions from change outputs on the mock ledger.
#[derive(Debug, Clone)]
pub struct MockPurse {
    ledger: Arc<MockLedger>,
    address: String,
}

impl MockPurse {
    /// Purse spending outputs paid to `address`.
    pub fn new(ledger: Arc<MockLedger>, address: impl Into<String>) -> Self {
        Self {
            ledger,
            address: address.into(),
        }
    }

    /// Purse address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Purse for MockPurse {
    async fn pay(&self, mut tx: Transaction) -> Result<Transaction, LedgerError> {
        let spent: u64 = tx
            .inputs
            .iter()
            .filter_map(|i| self.ledger.output(&i.prev))
            .map(|o| o.satoshis)
            .sum();
        let created: u64 = tx.outputs.iter().map(|o| o.satoshis).sum();
        let need = created.saturating_sub(spent);

        let mut gathered = 0u64;
        let mut funded = 0usize;
        for utxo in self.ledger.utxos(&self.address).await? {
            let location = utxo.location();
            if tx.inputs.iter().any(|i| i.prev == location) {
                continue;
            }
            tx.inputs.push(TxInput {
                prev: location,
                unlock: Some(signature(&self.address)),
            });
            gathered += utxo.satoshis;
            funded += 1;
            if gathered >= need {
                break;
            }
        }
        if funded == 0 || gathered < need {
            return Err(LedgerError::Payment(format!(
                "insufficient funds: need {need}, have {gathered}"
            )));
        }
        let change = gathered - need;
        if change > 0 {
            tx.outputs.push(TxOutput {
                script: Script::Change {
                    address: self.address.clone(),
                },
                satoshis: change,
            });
        }
        debug!(inputs = funded, need, change, "purse funded transaction");
        Ok(tx)
    }
}

// =============================================================================
// OWNER
// =============================================================================

/// Owner key that signs every unsigned input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockOwner {
    pubkey: String,
}

impl MockOwner {
    /// Owner with `pubkey`.
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
        }
    }
}

#[async_trait]
impl OwnerSigner for MockOwner {
    fn pubkey(&self) -> String {
        self.pubkey.clone()
    }

    async fn sign(&self, mut tx: Transaction) -> Result<Transaction, LedgerError> {
        for input in tx.inputs.iter_mut().filter(|i| i.unlock.is_none()) {
            input.unlock = Some(signature(&self.pubkey));
        }
        Ok(tx)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_output(satoshis: u64) -> TxOutput {
        TxOutput {
            script: Script::Owner {
                pubkey: "alice".to_string(),
            },
            satoshis,
        }
    }

    #[tokio::test]
    async fn test_pay_adds_input_and_change() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fund("purse", 10_000);
        let purse = MockPurse::new(Arc::clone(&ledger), "purse");

        let tx = Transaction {
            inputs: vec![],
            outputs: vec![owner_output(546)],
        };
        let paid = purse.pay(tx).await.unwrap();
        assert_eq!(paid.inputs.len(), 1);
        assert_eq!(paid.outputs.len(), 2);
        assert_eq!(paid.outputs[1].satoshis, 10_000 - 546);
        ledger.broadcast(&paid).await.unwrap();
    }

    #[tokio::test]
    async fn test_pay_insufficient() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fund("purse", 100);
        let purse = MockPurse::new(Arc::clone(&ledger), "purse");
        let tx = Transaction {
            inputs: vec![],
            outputs: vec![owner_output(546)],
        };
        assert!(matches!(purse.pay(tx).await, Err(LedgerError::Payment(_))));
    }

    #[tokio::test]
    async fn test_owner_signs_unsigned_only() {
        let owner = MockOwner::new("alice");
        let ledger = MockLedger::new();
        let coin = ledger.fund("purse", 1);
        let tx = Transaction {
            inputs: vec![
                TxInput {
                    prev: coin.clone(),
                    unlock: None,
                },
                TxInput {
                    prev: coin,
                    unlock: Some(signature("purse")),
                },
            ],
            outputs: vec![],
        };
        let signed = owner.sign(tx).await.unwrap();
        assert_eq!(signed.inputs[0].unlock, Some(signature("alice")));
        assert_eq!(signed.inputs[1].unlock, Some(signature("purse")));
    }
}
