//! # Method Scope
//!
//! The capability a method body receives. It is the only way for running
//! code to reach other jigs: every access goes through the accessor layer,
//! and every nested call is bracketed by controller bookkeeping on the same
//! explicit stack.

use crate::domain::arena::Arena;
use crate::domain::class::Visibility;
use crate::domain::controller::{Controller, Frame};
use crate::domain::entities::JigState;
use crate::domain::membrane;
use crate::domain::value::Value;
use crate::domain::value_objects::{CodeId, JigId, CONSTRUCTOR};
use crate::errors::JigError;

/// Execution scope of one method invocation.
pub struct Scope<'k> {
    arena: &'k mut Arena,
    ctx: &'k mut Controller,
    owner: &'k str,
    this: JigId,
}

impl<'k> Scope<'k> {
    /// The receiver of the running method.
    #[must_use]
    pub fn this(&self) -> JigId {
        self.this
    }

    /// The jig whose method invoked this one, if any.
    #[must_use]
    pub fn caller(&self) -> Option<JigId> {
        self.ctx.caller()
    }

    /// Reads a member.
    pub fn get(&mut self, jig: JigId, key: &str) -> Result<Value, JigError> {
        membrane::get(self.arena, self.ctx, jig, key)
    }

    /// Writes a member.
    pub fn set(&mut self, jig: JigId, key: &str, value: impl Into<Value>) -> Result<(), JigError> {
        membrane::set(self.arena, self.ctx, jig, key, value.into())
    }

    /// Removes a field.
    pub fn delete(&mut self, jig: JigId, key: &str) -> Result<(), JigError> {
        membrane::delete(self.arena, self.ctx, jig, key)
    }

    /// Class of a jig.
    pub fn class_of(&mut self, jig: JigId) -> Result<CodeId, JigError> {
        let state = self.arena.jig(jig)?;
        self.ctx.snapshot(jig, state);
        self.ctx.record_read(jig);
        Ok(state.class)
    }

    /// Static property of deployed code.
    pub fn prop(&self, code: CodeId, key: &str) -> Result<Value, JigError> {
        Ok(self
            .arena
            .code(code)?
            .props
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    /// Calls a method on another jig (or this one).
    pub fn call(&mut self, jig: JigId, method: &str, args: Vec<Value>) -> Result<Value, JigError> {
        if method == CONSTRUCTOR {
            return Err(JigError::validation("init may only run on construction"));
        }
        invoke(self.arena, self.ctx, self.owner, jig, method, &args)
    }

    /// Constructs a new jig. It inherits the owner of the running jig.
    pub fn create(&mut self, class: CodeId, args: Vec<Value>) -> Result<JigId, JigError> {
        instantiate(self.arena, self.ctx, self.owner, class, &args)
    }
}

/// Invokes `method` on `target`, pushing a frame on the shared stack.
///
/// A method that returns normally while an error is pending anywhere below
/// it re-raises that error.
pub(crate) fn invoke(
    arena: &mut Arena,
    ctx: &mut Controller,
    owner: &str,
    target: JigId,
    method: &str,
    args: &[Value],
) -> Result<Value, JigError> {
    let result = dispatch(arena, ctx, owner, target, method, args);
    match result {
        Ok(value) => match ctx.error() {
            Some(error) => Err(error.clone()),
            None => Ok(value),
        },
        Err(error) => {
            ctx.fail(&error);
            Err(error)
        }
    }
}

fn dispatch(
    arena: &mut Arena,
    ctx: &mut Controller,
    owner: &str,
    target: JigId,
    method: &str,
    args: &[Value],
) -> Result<Value, JigError> {
    for arg in args {
        arg.validate()?;
    }

    let state = arena.jig(target)?;
    if state.is_invalid() {
        return Err(JigError::validation(format!(
            "{target} is permanently invalid ({})",
            state.origin
        )));
    }
    let class = state.class;
    let (def_class, def) = arena.find_method(class, method).ok_or_else(|| {
        JigError::validation(format!(
            "{} has no method {method}",
            arena.class_name(class)
        ))
    })?;

    if def.visibility == Visibility::Private && !membrane::can_access_private(arena, ctx, class) {
        return Err(JigError::PrivacyViolation {
            class: arena.class_name(class),
            member: method.to_string(),
        });
    }

    if let Some(frame) = ctx.current() {
        ctx.record_caller(target, frame.jig);
    }
    let state = arena.jig(target)?;
    ctx.snapshot(target, state);
    ctx.record_read(target);

    ctx.push(Frame {
        jig: target,
        class: def_class,
    });
    let result = {
        let mut scope = Scope {
            arena: &mut *arena,
            ctx: &mut *ctx,
            owner,
            this: target,
        };
        (def.body)(&mut scope, args)
    };
    ctx.pop();
    result
}

/// Allocates a jig of `class` and runs its constructor, if it has one.
pub(crate) fn instantiate(
    arena: &mut Arena,
    ctx: &mut Controller,
    creator: &str,
    class: CodeId,
    args: &[Value],
) -> Result<JigId, JigError> {
    let code = arena.code(class)?;
    if code.is_invalid() {
        return Err(JigError::validation(format!(
            "{} is permanently invalid",
            code.name()
        )));
    }

    let owner = match ctx.current() {
        Some(frame) => arena.jig(frame.jig)?.owner.clone(),
        None => creator.to_string(),
    };

    let id = arena.alloc_jig();
    arena.put_jig(id, JigState::new(class, owner));
    ctx.record_create(id);
    if let Some(frame) = ctx.current() {
        ctx.record_caller(id, frame.jig);
    }

    if arena.find_method(class, CONSTRUCTOR).is_some() {
        invoke(arena, ctx, creator, id, CONSTRUCTOR, args)?;
    } else if !args.is_empty() {
        let error = JigError::validation(format!(
            "{} takes no constructor arguments",
            arena.class_name(class)
        ));
        ctx.fail(&error);
        return Err(error);
    }
    Ok(id)
}
