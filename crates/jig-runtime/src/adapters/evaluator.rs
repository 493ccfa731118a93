//! # Class Registry
//!
//! Deterministic evaluator backed by a table of known classes keyed by their
//! source text. Stands in for a sandbox: evaluating the same source always
//! yields the same `Arc<ClassDef>`.

use crate::domain::class::ClassDef;
use crate::errors::EvalError;
use crate::ports::outbound::Evaluator;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Source-keyed class table.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Arc<ClassDef>>>,
}

impl ClassRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `class` evaluable. Returns the shared definition.
    pub fn register(&self, class: ClassDef) -> Arc<ClassDef> {
        let class = Arc::new(class);
        self.classes
            .write()
            .insert(class.source().to_string(), Arc::clone(&class));
        class
    }

    /// Number of registered classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl Evaluator for ClassRegistry {
    fn evaluate(&self, source: &str, env: &BTreeSet<String>) -> Result<Arc<ClassDef>, EvalError> {
        let class = self
            .classes
            .read()
            .get(source)
            .cloned()
            .ok_or_else(|| EvalError::UnknownSource(source.chars().take(64).collect()))?;
        if let Some(missing) = class.deps().iter().find(|d| !env.contains(*d)) {
            return Err(EvalError::MissingDependency(missing.clone()));
        }
        Ok(class)
    }
}

// =============================================================================
// TESTS
// =============================================================================
