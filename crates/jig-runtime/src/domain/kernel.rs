//! # Kernel
//!
//! The synchronous heart of the runtime. Owns the arena, the open pending
//! transaction and the publish queue, and runs every top-level call:
//!
//! 1. build a fresh [`Controller`],
//! 2. run the method through the accessor layer,
//! 3. on error restore every snapshot and discard created jigs,
//! 4. on success diff and store the action,
//! 5. queue the pending transaction once it is ready.
//!
//! Method bodies never await, so a call is atomic with respect to every
//! other caller holding the kernel lock.

use crate::domain::arena::Arena;
use crate::domain::class::{ClassDef, Visibility};
use crate::domain::controller::Controller;
use crate::domain::entities::{CodeRecord, JigState, Target};
use crate::domain::membrane;
use crate::domain::pending::PendingTransaction;
use crate::domain::recorder;
use crate::domain::scope;
use crate::domain::value::Value;
use crate::domain::value_objects::{validate_owner, CodeId, Handle, JigId, Location, CONSTRUCTOR};
use crate::errors::JigError;
use crate::sync::Synchronizer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runtime state guarded by one lock.
#[derive(Debug)]
pub struct Kernel {
    pub(crate) arena: Arena,
    pub(crate) pending: PendingTransaction,
    pub(crate) queue: Synchronizer,
    owner: String,
}

impl Kernel {
    /// Kernel acting for `owner`.
    pub fn new(owner: impl Into<String>) -> Result<Self, JigError> {
        let owner = owner.into();
        validate_owner(&owner)?;
        Ok(Self {
            arena: Arena::new(),
            pending: PendingTransaction::new(),
            queue: Synchronizer::new(),
            owner,
        })
    }

    /// Owner of jigs created at top level.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Object arena.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// The open pending transaction.
    #[must_use]
    pub fn pending(&self) -> &PendingTransaction {
        &self.pending
    }

    /// The publish queue.
    #[must_use]
    pub fn queue(&self) -> &Synchronizer {
        &self.queue
    }

    // -------------------------------------------------------------------------
    // Brackets
    // -------------------------------------------------------------------------

    /// Opens a `begin`/`end` bracket.
    pub fn begin(&mut self) {
        self.pending.begin();
    }

    /// Closes a bracket. Returns true if a transaction was queued.
    pub fn end(&mut self) -> Result<bool, JigError> {
        if self.pending.end()? {
            return Ok(self.flush());
        }
        Ok(false)
    }

    /// Moves a ready pending transaction onto the publish queue.
    fn flush(&mut self) -> bool {
        if !self.pending.is_ready() {
            return false;
        }
        let ready = std::mem::take(&mut self.pending);
        debug!(
            code = ready.code().len(),
            actions = ready.actions().len(),
            "pending transaction queued"
        );
        self.queue.enqueue(ready);
        true
    }

    // -------------------------------------------------------------------------
    // Deploy
    // -------------------------------------------------------------------------

    /// Deploys `class`, owned by the runtime owner.
    pub fn deploy(
        &mut self,
        class: Arc<ClassDef>,
        deps: BTreeMap<String, CodeId>,
    ) -> Result<(CodeId, bool), JigError> {
        let owner = self.owner.clone();
        self.deploy_as(class, deps, owner)
    }

    /// Deploys `class` for `owner`. Returns the code id and whether a
    /// transaction was queued.
    pub fn deploy_as(
        &mut self,
        class: Arc<ClassDef>,
        deps: BTreeMap<String, CodeId>,
        owner: String,
    ) -> Result<(CodeId, bool), JigError> {
        validate_owner(&owner)?;
        for name in class.deps() {
            if !deps.contains_key(name) {
                return Err(JigError::validation(format!(
                    "{} depends on {name}, which was not provided",
                    class.name()
                )));
            }
        }
        for (name, dep) in &deps {
            if self.arena.code(*dep)?.is_invalid() {
                return Err(JigError::validation(format!("dependency {name} is invalid")));
            }
        }
        for (key, value) in class.props() {
            value.validate()?;
            let mut jig_ref = false;
            value.visit_refs(&mut |h| jig_ref |= matches!(h, Handle::Jig(_)));
            if jig_ref {
                return Err(JigError::validation(format!(
                    "static property {key} may only reference code"
                )));
            }
        }
        let parent = class
            .parent()
            .map(|name| {
                deps.get(name)
                    .copied()
                    .ok_or_else(|| JigError::validation(format!("parent {name} not provided")))
            })
            .transpose()?;

        let id = self.arena.alloc_code();
        self.arena.put_code(
            id,
            CodeRecord {
                props: class.props().clone(),
                class,
                parent,
                deps,
                origin: Location::Pending,
                location: Location::Pending,
                owner,
            },
        );
        self.pending.store_code(&mut self.arena, id)?;
        debug!(code = %id, name = %self.arena.class_name(id), "code deployed");
        Ok((id, self.flush()))
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    /// Constructs a jig owned by the runtime owner.
    pub fn create(&mut self, class: CodeId, args: Vec<Value>) -> Result<(JigId, bool), JigError> {
        let owner = self.owner.clone();
        self.create_as(class, args, owner)
    }

    /// Constructs a jig owned by `creator`.
    pub fn create_as(
        &mut self,
        class: CodeId,
        args: Vec<Value>,
        creator: String,
    ) -> Result<(JigId, bool), JigError> {
        validate_owner(&creator)?;
        self.check_args(&args)?;

        let mut ctx = Controller::new();
        let created = scope::instantiate(&mut self.arena, &mut ctx, &creator, class, &args);
        let id = match created {
            Ok(id) => id,
            Err(e) => return Err(self.abort(&mut ctx, e)),
        };
        self.commit(
            &mut ctx,
            Target::Code(class),
            CONSTRUCTOR,
            args,
            Some(creator),
            Visibility::Public,
        )?;
        Ok((id, self.flush()))
    }

    /// Calls `method` on `jig` from outside any jig.
    pub fn call(
        &mut self,
        jig: JigId,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(Value, bool), JigError> {
        if method == CONSTRUCTOR {
            return Err(JigError::validation("init may only run on construction"));
        }
        self.check_args(&args)?;
        let class = self.arena.jig(jig)?.class;
        let visibility = self
            .arena
            .find_method(class, method)
            .map_or(Visibility::Public, |(_, def)| def.visibility);

        let mut ctx = Controller::new();
        let owner = self.owner.clone();
        let result = scope::invoke(&mut self.arena, &mut ctx, &owner, jig, method, &args);
        let value = match result {
            Ok(value) => value,
            Err(e) => return Err(self.abort(&mut ctx, e)),
        };
        self.commit(&mut ctx, Target::Jig(jig), method, args, None, visibility)?;
        Ok((value, self.flush()))
    }

    /// Reads a member from outside any jig.
    pub fn get(&self, jig: JigId, key: &str) -> Result<Value, JigError> {
        let mut ctx = Controller::new();
        membrane::get(&self.arena, &mut ctx, jig, key)
    }

    /// Current state of a jig.
    pub fn jig(&self, jig: JigId) -> Result<&JigState, JigError> {
        self.arena.jig(jig)
    }

    fn check_args(&self, args: &[Value]) -> Result<(), JigError> {
        for arg in args {
            arg.validate()?;
            let mut missing = None;
            arg.visit_refs(&mut |h| {
                let live = match h {
                    Handle::Jig(id) => self.arena.jig(id).map(|s| !s.is_invalid()),
                    Handle::Code(id) => self.arena.code(id).map(|c| !c.is_invalid()),
                };
                if !matches!(live, Ok(true)) && missing.is_none() {
                    missing = Some(h);
                }
            });
            if let Some(h) = missing {
                return Err(JigError::validation(format!(
                    "argument references unusable object {h}"
                )));
            }
        }
        Ok(())
    }

    /// Records the finished call, rolling it back if it cannot be stored.
    fn commit(
        &mut self,
        ctx: &mut Controller,
        target: Target,
        method: &str,
        args: Vec<Value>,
        creator: Option<String>,
        visibility: Visibility,
    ) -> Result<(), JigError> {
        let recorded = match recorder::record(&self.arena, ctx, target, method, args, creator) {
            Ok(recorded) => recorded,
            Err(e) => return Err(self.abort(ctx, e)),
        };
        let Some(recorded) = recorded else {
            ctx.reset();
            return Ok(());
        };
        if visibility == Visibility::Internal {
            let e = JigError::InternalMethodMisuse {
                method: method.to_string(),
            };
            return Err(self.abort(ctx, e));
        }
        if let Err(e) = self.pending.store_action(&mut self.arena, recorded) {
            return Err(self.abort(ctx, e));
        }
        ctx.reset();
        Ok(())
    }

    /// Restores every snapshot, discards created jigs and clears `ctx`.
    fn abort(&mut self, ctx: &mut Controller, error: JigError) -> JigError {
        let saves: Vec<(JigId, JigState)> = ctx
            .saves()
            .iter()
            .map(|(id, state)| (*id, state.clone()))
            .collect();
        let arena = &mut self.arena;
        let restored = ctx.unenforced(|ctx| {
            saves
                .into_iter()
                .try_for_each(|(id, state)| membrane::overwrite(arena, ctx, id, state))
        });
        for id in ctx.creates() {
            self.arena.remove_jig(*id);
        }
        ctx.reset();
        warn!(error = %error, "call rolled back");
        match restored {
            Ok(()) => error,
            Err(internal) => internal,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> ClassDef {
        ClassDef::new("Counter", "class Counter")
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
            .method("fail", |scope, _| {
                let this = scope.this();
                scope.set(this, "count", 99)?;
                Err(JigError::revert("nope"))
            })
            .internal_method("bump", |scope, _| {
                let this = scope.this();
                scope.set(this, "count", 1000)?;
                Ok(Value::Null)
            })
    }

    fn kernel_with_counter() -> (Kernel, CodeId, JigId) {
        let mut kernel = Kernel::new("alice").unwrap();
        kernel.begin();
        let (class, _) = kernel.deploy(Arc::new(counter()), BTreeMap::new()).unwrap();
        let (jig, _) = kernel.create(class, vec![Value::Int(5)]).unwrap();
        (kernel, class, jig)
    }

    #[test]
    fn test_pure_read_records_nothing() {
        let (mut kernel, _, jig) = kernel_with_counter();
        let before = kernel.pending().actions().len();
        let (value, _) = kernel.call(jig, "peek", vec![]).unwrap();
        assert_eq!(value, Value::Int(5));
        assert_eq!(kernel.pending().actions().len(), before);
    }

    #[test]
    fn test_failed_call_restores_fields() {
        let (mut kernel, _, jig) = kernel_with_counter();
        let err = kernel.call(jig, "fail", vec![]).unwrap_err();
        assert_eq!(err, JigError::revert("nope"));
        assert_eq!(kernel.get(jig, "count").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_internal_method_misuse_rolls_back() {
        let (mut kernel, _, jig) = kernel_with_counter();
        let err = kernel.call(jig, "bump", vec![]).unwrap_err();
        assert!(matches!(err, JigError::InternalMethodMisuse { .. }));
        assert_eq!(kernel.get(jig, "count").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_nested_calls_share_a_slot_and_queue_on_end() {
        let (mut kernel, _, jig) = kernel_with_counter();
        kernel.call(jig, "inc", vec![]).unwrap();
        kernel.call(jig, "inc", vec![]).unwrap();
        assert_eq!(kernel.pending().actions().len(), 3);
        assert_eq!(kernel.pending().outputs().len(), 1);
        assert_eq!(kernel.jig(jig).unwrap().location, Location::Output(0));

        assert!(kernel.end().unwrap());
        assert_eq!(kernel.queue().len(), 1);
        assert!(kernel.pending().is_empty());
    }

    #[test]
    fn test_failed_constructor_leaves_no_jig() {
        let mut kernel = Kernel::new("alice").unwrap();
        kernel.begin();
        let picky = ClassDef::new("Picky", "class Picky")
            .method("init", |_, _| Err(JigError::revert("refused")));
        let (class, _) = kernel.deploy(Arc::new(picky), BTreeMap::new()).unwrap();
        assert!(kernel.create(class, vec![]).is_err());
        assert_eq!(kernel.arena().jig_ids().count(), 0);
        assert!(kernel.pending().actions().is_empty());
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let mut kernel = Kernel::new("alice").unwrap();
        let child = ClassDef::new("Child", "class Child").extends("Base");
        let err = kernel.deploy(Arc::new(child), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, JigError::Validation(_)));
    }

    #[test]
    fn test_private_method_rejected_from_outside() {
        let mut kernel = Kernel::new("alice").unwrap();
        kernel.begin();
        let vault = ClassDef::new("Vault", "class Vault")
            .private_method("open", |_, _| Ok(Value::Null));
        let (class, _) = kernel.deploy(Arc::new(vault), BTreeMap::new()).unwrap();
        let (jig, _) = kernel.create(class, vec![]).unwrap();
        assert!(matches!(
            kernel.call(jig, "open", vec![]),
            Err(JigError::PrivacyViolation { .. })
        ));
    }
}
