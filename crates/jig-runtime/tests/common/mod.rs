//! Shared fixtures: one mock ledger and class registry, any number of
//! runtimes attached to it.

#![allow(dead_code)]

use jig_runtime::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const COUNTER: &str = "class Counter { init(count) inc() peek() crash() }";
pub const SPY: &str = "class Spy { observe(target) }";
pub const POKER: &str = "class Poker { poke(target) }";
pub const CATCHER: &str = "class Catcher { swallow(target) }";

pub fn counter() -> ClassDef {
    ClassDef::new("Counter", COUNTER)
        .method("init", |scope, args| {
            let this = scope.this();
            scope.set(this, "count", args.first().cloned().unwrap_or(Value::Int(0)))?;
            Ok(Value::Null)
        })
        .method("inc", |scope, _| {
            let this = scope.this();
            let n = scope.get(this, "count")?.as_int().unwrap_or(0);
            scope.set(this, "count", n + 1)?;
            Ok(Value::Int(n + 1))
        })
        .method("peek", |scope, _| {
            let this = scope.this();
            scope.get(this, "count")
        })
        .method("crash", |scope, _| {
            let this = scope.this();
            scope.set(this, "count", -1)?;
            Err(JigError::revert("crashed after writing"))
        })
}

pub fn spy() -> ClassDef {
    ClassDef::new("Spy", SPY).method("observe", |scope, args| {
        let target = args
            .first()
            .and_then(Value::as_jig)
            .ok_or_else(|| JigError::validation("observe needs a jig"))?;
        let seen = scope.get(target, "count")?;
        let this = scope.this();
        scope.set(this, "seen", seen)?;
        Ok(Value::Null)
    })
}

pub fn poker() -> ClassDef {
    ClassDef::new("Poker", POKER).method("poke", |scope, args| {
        let target = args
            .first()
            .and_then(Value::as_jig)
            .ok_or_else(|| JigError::validation("poke needs a jig"))?;
        scope.call(target, "inc", vec![])
    })
}

/// Ignores the failure of a nested call and carries on writing.
pub fn catcher() -> ClassDef {
    ClassDef::new("Catcher", CATCHER).method("swallow", |scope, args| {
        let target = args
            .first()
            .and_then(Value::as_jig)
            .ok_or_else(|| JigError::validation("swallow needs a jig"))?;
        let _ = scope.call(target, "crash", vec![]);
        let this = scope.this();
        scope.set(this, "done", true)?;
        Ok(Value::Null)
    })
}

/// One ledger shared by every runtime built from it.
pub struct Network {
    pub ledger: Arc<MockLedger>,
    pub registry: Arc<ClassRegistry>,
}

impl Network {
    pub fn new() -> Self {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(counter());
        registry.register(spy());
        registry.register(poker());
        registry.register(catcher());
        Self {
            ledger: Arc::new(MockLedger::new()),
            registry,
        }
    }

    /// Runtime for `owner` with its own funded purse and an empty cache.
    pub fn runtime(&self, owner: &str, config: RuntimeConfig) -> JigRuntime {
        self.runtime_with_cache(owner, config, Arc::new(MemoryCache::new()))
    }

    /// Runtime for `owner` backed by `cache`.
    pub fn runtime_with_cache(&self, owner: &str, config: RuntimeConfig, cache: Arc<MemoryCache>) -> JigRuntime {
        let address = format!("{owner}-purse");
        self.ledger.fund(&address, 10_000_000);
        JigRuntime::new(
            config,
            Collaborators {
                ledger: Arc::clone(&self.ledger) as Arc<dyn LedgerClient>,
                cache: cache as Arc<dyn StateCache>,
                purse: Arc::new(MockPurse::new(Arc::clone(&self.ledger), address)),
                owner: Arc::new(MockOwner::new(owner)),
                evaluator: Arc::clone(&self.registry) as Arc<dyn Evaluator>,
            },
        )
        .expect("runtime")
    }
}

/// Publishing waits for `sync`.
pub fn manual() -> RuntimeConfig {
    RuntimeConfig {
        auto_publish: false,
        ..RuntimeConfig::default()
    }
}

/// Deploys Counter and creates one with `start`, both published.
pub async fn published_counter(rt: &JigRuntime, start: i64) -> (CodeId, JigId) {
    let class = rt.deploy(COUNTER, BTreeMap::new()).expect("deploy");
    let jig = rt.create(class, vec![Value::Int(start)]).expect("create");
    rt.sync().await.expect("sync");
    (class, jig)
}

pub fn txid_of(location: &Location) -> Txid {
    location.outpoint().expect("ledger location").0
}
