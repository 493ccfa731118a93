//! # Jig Runtime Service
//!
//! The async shell around the synchronous [`Kernel`]. Method calls run
//! under a short-held `parking_lot` lock and never await; network work
//! (publish, load, import, fast-forward) happens only here, between calls.
//!
//! ## Concurrency
//!
//! - kernel: one `parking_lot::Mutex`, never held across an `.await`
//! - loads and imports: serialized through one async mutex (the load queue)
//! - publishes: single-flight through the queue's `start`/`complete`
//!
//! ## Submodules
//!
//! - `publish`: pay, sign, broadcast, finalize; `sync`
//! - `load`: location to handle via arena, cache or import
//! - `import`: replay of a ledger transaction
//! - `forward`: follow spends to the latest state

mod forward;
mod import;
mod load;
mod publish;

use crate::config::RuntimeConfig;
use crate::domain::entities::JigState;
use crate::domain::kernel::Kernel;
use crate::domain::value::Value;
use crate::domain::value_objects::{CodeId, Handle, JigId, Location, Txid};
use crate::errors::JigError;
use crate::ports::outbound::{Evaluator, LedgerClient, OwnerSigner, Purse, StateCache};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Counters maintained by the runtime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    /// Transactions broadcast and finalized.
    pub published: u64,
    /// Publish attempts that failed.
    pub failed: u64,
    /// Ledger transactions replayed by import.
    pub imported: u64,
    /// Pending transactions discarded by queue rollbacks.
    pub rolled_back: u64,
}

/// External collaborators the runtime is wired to.
#[derive(Clone)]
pub struct Collaborators {
    /// Ledger network access.
    pub ledger: Arc<dyn LedgerClient>,
    /// Location-keyed state cache.
    pub cache: Arc<dyn StateCache>,
    /// Funds published transactions.
    pub purse: Arc<dyn Purse>,
    /// Owner key; its public key owns jigs created at top level.
    pub owner: Arc<dyn OwnerSigner>,
    /// Turns deployed source into classes.
    pub evaluator: Arc<dyn Evaluator>,
}

pub(crate) struct Inner {
    config: RuntimeConfig,
    kernel: Mutex<Kernel>,
    drained: Notify,
    load_queue: tokio::sync::Mutex<()>,
    seen: Mutex<HashSet<Txid>>,
    ledger: Arc<dyn LedgerClient>,
    cache: Arc<dyn StateCache>,
    purse: Arc<dyn Purse>,
    signer: Arc<dyn OwnerSigner>,
    evaluator: Arc<dyn Evaluator>,
    stats: Mutex<ServiceStats>,
}

/// Handle to a running jig runtime. Cheap to clone.
#[derive(Clone)]
pub struct JigRuntime {
    inner: Arc<Inner>,
}

impl JigRuntime {
    /// Creates a runtime acting for `collaborators.owner`.
    pub fn new(config: RuntimeConfig, collaborators: Collaborators) -> Result<Self, JigError> {
        config.validate()?;
        let kernel = Kernel::new(collaborators.owner.pubkey())?;
        info!(
            owner = %kernel.owner(),
            network = %config.network,
            auto_publish = config.auto_publish,
            "jig runtime started"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                kernel: Mutex::new(kernel),
                drained: Notify::new(),
                load_queue: tokio::sync::Mutex::new(()),
                seen: Mutex::new(HashSet::new()),
                ledger: collaborators.ledger,
                cache: collaborators.cache,
                purse: collaborators.purse,
                signer: collaborators.owner,
                evaluator: collaborators.evaluator,
                stats: Mutex::new(ServiceStats::default()),
            }),
        })
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Owner of jigs created at top level.
    #[must_use]
    pub fn owner(&self) -> String {
        self.inner.kernel.lock().owner().to_string()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        self.inner.stats.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Object API
    // -------------------------------------------------------------------------

    /// Evaluates `source` and deploys it with the given dependencies.
    pub fn deploy(&self, source: &str, deps: BTreeMap<String, CodeId>) -> Result<CodeId, JigError> {
        let env: BTreeSet<String> = deps.keys().cloned().collect();
        let class = self.inner.evaluator.evaluate(source, &env)?;
        let (id, queued) = self.inner.kernel.lock().deploy(class, deps)?;
        self.after_commit(queued);
        Ok(id)
    }

    /// Constructs a jig of `class`.
    pub fn create(&self, class: CodeId, args: Vec<Value>) -> Result<JigId, JigError> {
        let (id, queued) = self.inner.kernel.lock().create(class, args)?;
        self.after_commit(queued);
        Ok(id)
    }

    /// Calls `method` on `jig`.
    pub fn call(&self, jig: JigId, method: &str, args: Vec<Value>) -> Result<Value, JigError> {
        let (value, queued) = self.inner.kernel.lock().call(jig, method, args)?;
        self.after_commit(queued);
        Ok(value)
    }

    /// Reads a member of `jig`.
    pub fn get(&self, jig: JigId, key: &str) -> Result<Value, JigError> {
        self.inner.kernel.lock().get(jig, key)
    }

    /// Snapshot of a jig's full state.
    pub fn jig(&self, jig: JigId) -> Result<JigState, JigError> {
        self.inner.kernel.lock().jig(jig).cloned()
    }

    /// Current location of a jig or code.
    pub fn location(&self, handle: Handle) -> Result<Location, JigError> {
        self.inner.kernel.lock().arena().location_of(handle)
    }

    /// Origin of a jig or code.
    pub fn origin(&self, handle: Handle) -> Result<Location, JigError> {
        let kernel = self.inner.kernel.lock();
        Ok(match handle {
            Handle::Jig(id) => kernel.arena().jig(id)?.origin.clone(),
            Handle::Code(id) => kernel.arena().code(id)?.origin.clone(),
        })
    }

    /// Runs `f` with read access to the kernel.
    pub fn inspect<R>(&self, f: impl FnOnce(&Kernel) -> R) -> R {
        f(&self.inner.kernel.lock())
    }

    /// Opens a `begin`/`end` bracket.
    pub fn begin(&self) {
        self.inner.kernel.lock().begin();
    }

    /// Closes a bracket, queueing the transaction once nesting reaches zero.
    pub fn end(&self) -> Result<(), JigError> {
        let queued = self.inner.kernel.lock().end()?;
        self.after_commit(queued);
        Ok(())
    }

    /// Pending transactions waiting to publish.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.kernel.lock().queue().len()
    }

    fn after_commit(&self, queued: bool) {
        if queued {
            debug!(queued = self.queue_len(), "transaction ready to publish");
            self.inner.schedule();
        }
    }

    // -------------------------------------------------------------------------
    // Network API
    // -------------------------------------------------------------------------

    /// Publishes everything queued and waits until the queue drains.
    ///
    /// The caller counts as attended while waiting, so a failure restores
    /// touched jigs instead of invalidating them. Returns that failure.
    pub async fn sync(&self) -> Result<(), JigError> {
        self.inner.sync().await
    }

    /// Loads the object at a ledger location.
    pub async fn load(&self, location: &Location) -> Result<Handle, JigError> {
        let _queue = self.inner.load_queue.lock().await;
        self.inner.load_inner(location.clone()).await
    }

    /// Fetches and replays a ledger transaction.
    pub async fn import(&self, txid: &Txid) -> Result<(), JigError> {
        let _queue = self.inner.load_queue.lock().await;
        let fetched = self.inner.ledger.fetch(txid).await?;
        self.inner.import_fetched(&fetched).await
    }

    /// Brings `jig` and every jig it references to their latest ledger state.
    pub async fn fast_forward(&self, jig: JigId) -> Result<(), JigError> {
        let _queue = self.inner.load_queue.lock().await;
        let mut visited = HashSet::new();
        self.inner.forward_inner(jig, &mut visited).await
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ClassRegistry, MemoryCache, MockLedger, MockOwner, MockPurse};
    use crate::domain::class::ClassDef;

    fn runtime(auto_publish: bool) -> (JigRuntime, Arc<ClassRegistry>) {
        let ledger = Arc::new(MockLedger::new());
        ledger.fund("purse", 1_000_000);
        let registry = Arc::new(ClassRegistry::new());
        let config = RuntimeConfig {
            auto_publish,
            ..RuntimeConfig::default()
        };
        let rt = JigRuntime::new(
            config,
            Collaborators {
                ledger: Arc::clone(&ledger) as Arc<dyn LedgerClient>,
                cache: Arc::new(MemoryCache::new()),
                purse: Arc::new(MockPurse::new(ledger, "purse")),
                owner: Arc::new(MockOwner::new("alice")),
                evaluator: Arc::clone(&registry) as Arc<dyn Evaluator>,
            },
        )
        .unwrap();
        (rt, registry)
    }

    fn counter() -> ClassDef {
        ClassDef::new("Counter", "class Counter").method("inc", |scope, _| {
            let this = scope.this();
            let n = scope.get(this, "n")?.as_int().unwrap_or(0);
            scope.set(this, "n", n + 1)?;
            Ok(Value::Null)
        })
    }

    #[test]
    fn test_calls_queue_without_runtime() {
        let (rt, registry) = runtime(true);
        registry.register(counter());
        let class = rt.deploy("class Counter", BTreeMap::new()).unwrap();
        let jig = rt.create(class, vec![]).unwrap();
        rt.call(jig, "inc", vec![]).unwrap();
        assert_eq!(rt.queue_len(), 3);
        assert_eq!(rt.get(jig, "n").unwrap(), Value::Int(1));
        assert_eq!(rt.owner(), "alice");
    }

    #[tokio::test]
    async fn test_sync_publishes_queue() {
        let (rt, registry) = runtime(false);
        registry.register(counter());
        let class = rt.deploy("class Counter", BTreeMap::new()).unwrap();
        let jig = rt.create(class, vec![]).unwrap();
        rt.sync().await.unwrap();

        assert_eq!(rt.queue_len(), 0);
        assert_eq!(rt.stats().published, 2);
        assert!(rt.location(Handle::Jig(jig)).unwrap().is_ledger());
        assert_eq!(
            rt.origin(Handle::Code(class)).unwrap(),
            rt.location(Handle::Code(class)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let (rt, _) = runtime(false);
        assert!(matches!(
            rt.deploy("missing", BTreeMap::new()),
            Err(JigError::Eval(_))
        ));
    }
}
