//! # Accessor Dispatch
//!
//! Every read and write of a jig member goes through this module. Each
//! access consults the [`Controller`]: it enforces privacy and immutability
//! while `enforce` is on, snapshots the jig on first touch, and records reads.
//!
//! Values handed out are clones, so internal data reachable from a jig can
//! never be mutated except through these accessors.
//!
//! | Member | Read | Write |
//! |--------|------|-------|
//! | `origin`, `location` | anyone | never |
//! | `owner`, `satoshis` | anyone | own method body, validated |
//! | private field | same lineage | own method body |
//! | other field | anyone | own method body |
//! | method name | - | never |

use crate::domain::arena::Arena;
use crate::domain::controller::Controller;
use crate::domain::entities::JigState;
use crate::domain::value::Value;
use crate::domain::value_objects::{validate_owner, validate_satoshis, CodeId, JigId};
use crate::errors::JigError;

/// Read-only system member.
pub const ORIGIN: &str = "origin";
/// Read-only system member.
pub const LOCATION: &str = "location";
/// Writable system member.
pub const OWNER: &str = "owner";
/// Writable system member.
pub const SATOSHIS: &str = "satoshis";

/// True if code currently running may see private members of `class`.
#[must_use]
pub fn can_access_private(arena: &Arena, ctx: &Controller, class: CodeId) -> bool {
    ctx.current()
        .is_some_and(|frame| arena.same_lineage(frame.class, class))
}

/// Reads a member of `jig`.
pub fn get(arena: &Arena, ctx: &mut Controller, jig: JigId, key: &str) -> Result<Value, JigError> {
    let state = arena.jig(jig)?;

    if ctx.enforcing()
        && arena.is_private_field(state.class, key)
        && !can_access_private(arena, ctx, state.class)
    {
        return Err(JigError::PrivacyViolation {
            class: arena.class_name(state.class),
            member: key.to_string(),
        });
    }

    if ctx.depth() > 0 {
        ctx.snapshot(jig, state);
        ctx.record_read(jig);
    }

    Ok(match key {
        ORIGIN => Value::Str(state.origin.to_string()),
        LOCATION => Value::Str(state.location.to_string()),
        OWNER => Value::Str(state.owner.clone()),
        SATOSHIS => Value::Int(i64::try_from(state.satoshis).unwrap_or(i64::MAX)),
        _ => state.fields.get(key).cloned().unwrap_or_default(),
    })
}

/// Writes a member of `jig`.
pub fn set(
    arena: &mut Arena,
    ctx: &mut Controller,
    jig: JigId,
    key: &str,
    value: Value,
) -> Result<(), JigError> {
    value.validate()?;
    check_write(arena, ctx, jig, key)?;

    let state = arena.jig(jig)?;
    ctx.snapshot(jig, state);

    let state = arena.jig_mut(jig)?;
    match key {
        OWNER => {
            let owner = value
                .as_str()
                .ok_or_else(|| JigError::validation("owner must be a string"))?;
            validate_owner(owner)?;
            state.owner = owner.to_string();
        }
        SATOSHIS => {
            let amount = value
                .as_int()
                .ok_or_else(|| JigError::validation("satoshis must be an integer"))?;
            state.satoshis = validate_satoshis(amount)?;
        }
        _ => {
            state.fields.insert(key.to_string(), value);
        }
    }
    Ok(())
}

/// Removes a field of `jig`.
pub fn delete(
    arena: &mut Arena,
    ctx: &mut Controller,
    jig: JigId,
    key: &str,
) -> Result<(), JigError> {
    if matches!(key, OWNER | SATOSHIS) {
        return Err(JigError::ImmutabilityViolation {
            member: key.to_string(),
            reason: "system members cannot be deleted".to_string(),
        });
    }
    check_write(arena, ctx, jig, key)?;

    let state = arena.jig(jig)?;
    ctx.snapshot(jig, state);
    arena.jig_mut(jig)?.fields.remove(key);
    Ok(())
}

/// Replaces a jig's whole state. Bookkeeping only; requires enforcement off.
pub fn overwrite(
    arena: &mut Arena,
    ctx: &Controller,
    jig: JigId,
    state: JigState,
) -> Result<(), JigError> {
    if ctx.enforcing() {
        return Err(JigError::Internal(format!(
            "overwrite of {jig} attempted while enforcing"
        )));
    }
    arena.put_jig(jig, state);
    Ok(())
}

fn check_write(arena: &Arena, ctx: &Controller, jig: JigId, key: &str) -> Result<(), JigError> {
    if !ctx.enforcing() {
        return Ok(());
    }

    let state = arena.jig(jig)?;
    let refuse = |reason: &str| {
        Err(JigError::ImmutabilityViolation {
            member: key.to_string(),
            reason: reason.to_string(),
        })
    };

    if matches!(key, ORIGIN | LOCATION) {
        return refuse("assigned by the ledger");
    }
    if arena.find_method(state.class, key).is_some() {
        return refuse("methods cannot be replaced");
    }
    if ctx.current().map(|f| f.jig) != Some(jig) {
        return refuse("jigs may only be changed by their own methods");
    }
    if state.is_invalid() {
        return refuse("jig is permanently invalid");
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::class::ClassDef;
    use crate::domain::controller::Frame;
    use crate::domain::entities::CodeRecord;
    use crate::domain::value_objects::Location;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn setup() -> (Arena, JigId, JigId, CodeId) {
        let mut arena = Arena::new();
        let class = arena.alloc_code();
        arena.put_code(
            class,
            CodeRecord {
                class: Arc::new(
                    ClassDef::new("Vault", "vault")
                        .private_field("pin")
                        .method("open", |_, _| Ok(Value::Null)),
                ),
                parent: None,
                deps: BTreeMap::new(),
                props: BTreeMap::new(),
                origin: Location::Deploy(0),
                location: Location::Deploy(0),
                owner: "owner".to_string(),
            },
        );
        let a = arena.alloc_jig();
        arena.put_jig(a, JigState::new(class, "owner".to_string()));
        let b = arena.alloc_jig();
        arena.put_jig(b, JigState::new(class, "owner".to_string()));
        (arena, a, b, class)
    }

    #[test]
    fn test_write_outside_own_method_refused() {
        let (mut arena, a, b, class) = setup();
        let mut ctx = Controller::new();
        ctx.push(Frame { jig: b, class });
        let err = set(&mut arena, &mut ctx, a, "name", Value::from("x")).unwrap_err();
        assert!(matches!(err, JigError::ImmutabilityViolation { .. }));
    }

    #[test]
    fn test_system_members() {
        let (mut arena, a, _, class) = setup();
        let mut ctx = Controller::new();
        ctx.push(Frame { jig: a, class });

        assert!(set(&mut arena, &mut ctx, a, "location", Value::from("x")).is_err());
        assert!(set(&mut arena, &mut ctx, a, "open", Value::Null).is_err());
        assert!(set(&mut arena, &mut ctx, a, "satoshis", Value::Int(-5)).is_err());
        set(&mut arena, &mut ctx, a, "satoshis", Value::Int(1000)).unwrap();
        set(&mut arena, &mut ctx, a, "owner", Value::from("newowner")).unwrap();

        let state = arena.jig(a).unwrap();
        assert_eq!(state.satoshis, 1000);
        assert_eq!(state.owner, "newowner");
        assert_eq!(ctx.saves().get(&a).map(|s| s.satoshis), Some(0));
    }

    #[test]
    fn test_private_field_needs_lineage() {
        let (arena, a, _, class) = setup();
        let mut outside = Controller::new();
        assert!(matches!(
            get(&arena, &mut outside, a, "pin"),
            Err(JigError::PrivacyViolation { .. })
        ));

        let mut inside = Controller::new();
        inside.push(Frame { jig: a, class });
        assert_eq!(get(&arena, &mut inside, a, "pin").unwrap(), Value::Null);
        assert!(inside.reads().contains(&a));
    }

    #[test]
    fn test_overwrite_requires_unenforced() {
        let (mut arena, a, _, class) = setup();
        let mut ctx = Controller::new();
        let state = JigState::new(class, "other".to_string());
        assert!(overwrite(&mut arena, &ctx, a, state.clone()).is_err());
        ctx.unenforced(|ctx| overwrite(&mut arena, ctx, a, state)).unwrap();
        assert_eq!(arena.jig(a).unwrap().owner, "other");
    }
}
