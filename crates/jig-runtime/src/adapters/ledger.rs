//! # Mock Ledger
//!
//! In-memory ledger for testing. Accepts a broadcast only if every input
//! exists, is unspent and carries the signature of the key its output is
//! locked to. Timestamps advance one second per accepted transaction.

use crate::domain::ledger_tx::{FetchedTransaction, Script, SpendStatus, Transaction, TxInput, TxOutput, Utxo};
use crate::domain::value_objects::{Location, Timestamp, Txid};
use crate::errors::LedgerError;
use crate::ports::outbound::LedgerClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Ledger clock at creation, in milliseconds.
pub const GENESIS_TIME: Timestamp = 1_700_000_000_000;

/// Clock step per accepted transaction.
const BLOCK_INTERVAL_MS: Timestamp = 1_000;

/// Unlock data the mock ledger expects for outputs locked to `key`.
#[must_use]
pub fn signature(key: &str) -> String {
    format!("sig:{key}")
}

#[derive(Debug)]
struct Entry {
    tx: Transaction,
    time: Timestamp,
    spends: Vec<SpendStatus>,
}

#[derive(Debug)]
struct LedgerState {
    txs: HashMap<Txid, Entry>,
    clock: Timestamp,
    mints: u32,
    fetches: usize,
    fail_next: Option<LedgerError>,
    hide_spends: bool,
}

/// In-memory ledger.
#[derive(Debug)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                txs: HashMap::new(),
                clock: GENESIS_TIME,
                mints: 0,
                fetches: 0,
                fail_next: None,
                hide_spends: false,
            }),
        }
    }

    /// Mints a change output of `satoshis` to `address`.
    pub fn fund(&self, address: &str, satoshis: u64) -> Location {
        let mut state = self.state.lock();
        state.mints += 1;
        // Each mint spends a distinct null outpoint so txids never collide.
        let tx = Transaction {
            inputs: vec![TxInput {
                prev: Location::ledger(Txid::new([0; 32]), state.mints),
                unlock: None,
            }],
            outputs: vec![TxOutput {
                script: Script::Change {
                    address: address.to_string(),
                },
                satoshis,
            }],
        };
        let txid = tx.txid();
        let time = state.clock;
        state.txs.insert(
            txid,
            Entry {
                tx,
                time,
                spends: vec![SpendStatus::Unspent],
            },
        );
        Location::ledger(txid, 0)
    }

    /// Inserts a transaction without validating it. Inputs it spends are
    /// marked spent if known.
    pub fn insert_raw(&self, tx: Transaction) -> Txid {
        let mut state = self.state.lock();
        Self::accept(&mut state, tx)
    }

    /// Makes the next broadcast fail with `error`.
    pub fn fail_next_broadcast(&self, error: LedgerError) {
        self.state.lock().fail_next = Some(error);
    }

    /// Reports every spent output as `Unknown`, like a client without a
    /// spend index.
    pub fn hide_spends(&self, hide: bool) {
        self.state.lock().hide_spends = hide;
    }

    /// Moves the clock forward.
    pub fn advance_time(&self, millis: Timestamp) {
        self.state.lock().clock += millis;
    }

    /// Current ledger time.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.state.lock().clock
    }

    /// Number of `fetch` calls served.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    /// Number of transactions on the ledger, mints included.
    #[must_use]
    pub fn tx_count(&self) -> usize {
        self.state.lock().txs.len()
    }

    /// Output at `location`, if it exists.
    #[must_use]
    pub fn output(&self, location: &Location) -> Option<TxOutput> {
        let (txid, vout) = location.outpoint()?;
        let state = self.state.lock();
        state
            .txs
            .get(&txid)?
            .tx
            .outputs
            .get(usize::try_from(vout).ok()?)
            .cloned()
    }

    fn accept(state: &mut LedgerState, tx: Transaction) -> Txid {
        let txid = tx.txid();
        for input in &tx.inputs {
            if let Some((prev, vout)) = input.prev.outpoint() {
                let slot = state
                    .txs
                    .get_mut(&prev)
                    .and_then(|e| e.spends.get_mut(vout as usize));
                if let Some(slot) = slot {
                    *slot = SpendStatus::Spent(txid);
                }
            }
        }
        state.clock += BLOCK_INTERVAL_MS;
        let spends = vec![SpendStatus::Unspent; tx.outputs.len()];
        let time = state.clock;
        state.txs.insert(txid, Entry { tx, time, spends });
        txid
    }

    fn check_input(state: &LedgerState, input: &TxInput) -> Result<(), LedgerError> {
        let reject = |why: &str| Err(LedgerError::Rejected(format!("input {}: {why}", input.prev)));
        let Some((txid, vout)) = input.prev.outpoint() else {
            return reject("not a ledger location");
        };
        let Some(entry) = state.txs.get(&txid) else {
            return reject("unknown transaction");
        };
        let index = vout as usize;
        let Some(output) = entry.tx.outputs.get(index) else {
            return reject("no such output");
        };
        if entry.spends.get(index) != Some(&SpendStatus::Unspent) {
            return reject("already spent");
        }
        let key = match &output.script {
            Script::Owner { pubkey } => pubkey,
            Script::Change { address } => address,
            Script::Payload { .. } => return reject("output is unspendable"),
        };
        if input.unlock.as_deref() != Some(signature(key).as_str()) {
            return reject("missing or wrong signature");
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn fetch(&self, txid: &Txid) -> Result<FetchedTransaction, LedgerError> {
        let mut state = self.state.lock();
        state.fetches += 1;
        let hide = state.hide_spends;
        let entry = state
            .txs
            .get(txid)
            .ok_or_else(|| LedgerError::NotFound(txid.to_string()))?;
        let spends = entry
            .spends
            .iter()
            .map(|s| match s {
                SpendStatus::Spent(_) if hide => SpendStatus::Unknown,
                other => *other,
            })
            .collect();
        Ok(FetchedTransaction {
            txid: *txid,
            tx: entry.tx.clone(),
            time: entry.time,
            spends,
        })
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        for input in &tx.inputs {
            Self::check_input(&state, input)?;
        }
        if state.txs.contains_key(&tx.txid()) {
            return Err(LedgerError::Rejected("duplicate transaction".to_string()));
        }
        let txid = Self::accept(&mut state, tx.clone());
        debug!(txid = %txid, inputs = tx.inputs.len(), outputs = tx.outputs.len(), "mock ledger accepted");
        Ok(())
    }

    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, LedgerError> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (txid, entry) in &state.txs {
            for (vout, output) in entry.tx.outputs.iter().enumerate() {
                if output.script.pays_to(address)
                    && entry.spends.get(vout) == Some(&SpendStatus::Unspent)
                {
                    out.push(Utxo {
                        txid: *txid,
                        vout: u32::try_from(vout)
                            .map_err(|_| LedgerError::Unavailable("output index overflow".to_string()))?,
                        script: output.script.clone(),
                        satoshis: output.satoshis,
                    });
                }
            }
        }
        out.sort_by(|a, b| (a.txid, a.vout).cmp(&(b.txid, b.vout)));
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================
