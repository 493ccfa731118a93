//! # Class Definitions
//!
//! A jig type is a `ClassDef`: a method table plus an explicit base-type
//! reference. Dispatch walks the parent chain recorded on the deployed code
//! instead of any language-level inheritance.
//!
//! ```ignore
//! let dragon = ClassDef::new("Dragon", "class Dragon extends Jig { ... }")
//!     .private_field("secret")
//!     .method("init", |scope, args| {
//!         let this = scope.this();
//!         scope.set(this, "name", args[0].clone())?;
//!         Ok(Value::Null)
//!     });
//! ```

use crate::domain::scope::Scope;
use crate::domain::value::Value;
use crate::errors::JigError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Body of a jig method. Runs synchronously inside a [`Scope`].
pub type MethodBody = Arc<dyn Fn(&mut Scope<'_>, &[Value]) -> Result<Value, JigError> + Send + Sync>;

/// Who may invoke a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Anyone.
    Public,
    /// Code in the same type lineage only.
    Private,
    /// Anyone, but callers outside a jig may not change state through it.
    Internal,
}

/// One entry in a method table.
#[derive(Clone)]
pub struct MethodDef {
    /// Access rule.
    pub visibility: Visibility,
    /// Implementation.
    pub body: MethodBody,
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// A deployable jig type.
#[derive(Clone, Debug)]
pub struct ClassDef {
    name: String,
    source: String,
    parent: Option<String>,
    deps: BTreeSet<String>,
    props: BTreeMap<String, Value>,
    methods: BTreeMap<String, MethodDef>,
    private_fields: BTreeSet<String>,
}

impl ClassDef {
    /// New class with no parent and no methods.
    ///
    /// `source` is the text written to the ledger; the evaluator maps it
    /// back to this definition on replay, so it must be unique per class.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            parent: None,
            deps: BTreeSet::new(),
            props: BTreeMap::new(),
            methods: BTreeMap::new(),
            private_fields: BTreeSet::new(),
        }
    }

    /// Declares the base type, resolved through the dependency `dep`.
    #[must_use]
    pub fn extends(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        self.deps.insert(dep.clone());
        self.parent = Some(dep);
        self
    }

    /// Declares a named dependency on other code.
    #[must_use]
    pub fn dep(mut self, name: impl Into<String>) -> Self {
        self.deps.insert(name.into());
        self
    }

    /// Adds a static property.
    #[must_use]
    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Adds a public method.
    #[must_use]
    pub fn method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Scope<'_>, &[Value]) -> Result<Value, JigError> + Send + Sync + 'static,
    {
        self.method_with(name, Visibility::Public, body)
    }

    /// Adds a method callable only from the same type lineage.
    #[must_use]
    pub fn private_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Scope<'_>, &[Value]) -> Result<Value, JigError> + Send + Sync + 'static,
    {
        self.method_with(name, Visibility::Private, body)
    }

    /// Adds a method that must stay read-only when called from outside a jig.
    #[must_use]
    pub fn internal_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Scope<'_>, &[Value]) -> Result<Value, JigError> + Send + Sync + 'static,
    {
        self.method_with(name, Visibility::Internal, body)
    }

    fn method_with<F>(mut self, name: impl Into<String>, visibility: Visibility, body: F) -> Self
    where
        F: Fn(&mut Scope<'_>, &[Value]) -> Result<Value, JigError> + Send + Sync + 'static,
    {
        self.methods.insert(
            name.into(),
            MethodDef {
                visibility,
                body: Arc::new(body),
            },
        );
        self
    }

    /// Tags a field private.
    #[must_use]
    pub fn private_field(mut self, name: impl Into<String>) -> Self {
        self.private_fields.insert(name.into());
        self
    }

    /// Class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Dependency naming the base type.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Declared dependency names.
    #[must_use]
    pub fn deps(&self) -> &BTreeSet<String> {
        &self.deps
    }

    /// Static properties.
    #[must_use]
    pub fn props(&self) -> &BTreeMap<String, Value> {
        &self.props
    }

    /// Method declared directly on this class.
    #[must_use]
    pub fn own_method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.get(name)
    }

    /// True if this class itself tags `field` private.
    #[must_use]
    pub fn declares_private(&self, field: &str) -> bool {
        self.private_fields.contains(field)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_members() {
        let class = ClassDef::new("Dragon", "class Dragon {}")
            .extends("Creature")
            .dep("Egg")
            .prop("legs", 4)
            .method("roar", |_, _| Ok(Value::Null))
            .private_method("digest", |_, _| Ok(Value::Null))
            .private_field("hoard");

        assert_eq!(class.parent(), Some("Creature"));
        assert!(class.deps().contains("Creature"));
        assert!(class.deps().contains("Egg"));
        assert_eq!(class.props().get("legs"), Some(&Value::Int(4)));
        assert_eq!(
            class.own_method("digest").map(|m| m.visibility),
            Some(Visibility::Private)
        );
        assert!(class.declares_private("hoard"));
        assert!(class.own_method("fly").is_none());
    }
}
