//! Event Predicates
//!
//! Pure boolean gates over a [`ChangeEvent`] deciding whether a change is
//! significant enough to turn into convergence work. Predicates must never
//! block: everything they inspect is already on the event's object pair.
//!
//! Hooks follow the usual "funcs" convention: a predicate built for one
//! event shape (update, delete) lets every other shape through.

use crate::controller::events::{ChangeEvent, WatchedObject};
use std::fmt;
use std::sync::Arc;

type PredicateFn = dyn Fn(&ChangeEvent) -> bool + Send + Sync;

// =============================================================================
// Predicate
// =============================================================================

/// A named, cloneable, side-effect-free event filter
#[derive(Clone)]
pub struct Predicate {
    name: Arc<str>,
    func: Arc<PredicateFn>,
}

impl Predicate {
    /// Wrap a closure as a predicate
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// Accepts every event
    pub fn always() -> Self {
        Self::new("always", |_| true)
    }

    /// Only inspects updates; creates and deletes pass
    pub fn on_update<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&WatchedObject, &WatchedObject) -> bool + Send + Sync + 'static,
    {
        Self::new(name, move |event| match event {
            ChangeEvent::Updated { old, new } => func(old, new),
            _ => true,
        })
    }

    /// Only inspects deletes; creates and updates pass
    pub fn on_delete<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&WatchedObject, bool) -> bool + Send + Sync + 'static,
    {
        Self::new(name, move |event| match event {
            ChangeEvent::Deleted { object, confirmed } => func(object, *confirmed),
            _ => true,
        })
    }

    /// Inspects the object of every event
    pub fn on_object<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&WatchedObject) -> bool + Send + Sync + 'static,
    {
        Self::new(name, move |event| func(event.object()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn evaluate(&self, event: &ChangeEvent) -> bool {
        (self.func)(event)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.name).finish()
    }
}

// =============================================================================
// Composition
// =============================================================================

/// OR of all predicates: the event matters if any constituent says so.
/// An empty list never matches.
pub fn compose(predicates: Vec<Predicate>) -> Predicate {
    let name = format!(
        "any({})",
        predicates.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );
    Predicate::new(name, move |event| predicates.iter().any(|p| p.evaluate(event)))
}

/// AND of all predicates. An empty list always matches.
pub fn all(predicates: Vec<Predicate>) -> Predicate {
    let name = format!(
        "all({})",
        predicates.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );
    Predicate::new(name, move |event| predicates.iter().all(|p| p.evaluate(event)))
}

// =============================================================================
// Built-in Predicates
// =============================================================================

/// Spec revision counter moved between old and new
pub fn generation_changed() -> Predicate {
    Predicate::on_update("generation_changed", |old, new| old.generation != new.generation)
}

/// Labels or annotations differ between old and new
pub fn metadata_changed() -> Predicate {
    Predicate::on_update("metadata_changed", |old, new| {
        old.labels != new.labels || old.annotations != new.annotations
    })
}

// =============================================================================
// Change-Significance Filters
// =============================================================================

/// Drops deletions the runtime could not confirm
pub fn confirmed_deletion() -> Predicate {
    Predicate::on_delete("confirmed_deletion", |_, confirmed| confirmed)
}

/// Only the singleton object with the given name is relevant
pub fn named(expected: impl Into<String>) -> Predicate {
    let expected: String = expected.into();
    Predicate::on_object(format!("named({})", expected), move |obj| obj.name == expected)
}

/// Updates only matter when the nested field at `path` changed value.
/// An absent field compares equal to another absent field.
pub fn field_changed(path: impl Into<String>) -> Predicate {
    let path: String = path.into();
    Predicate::on_update(format!("field_changed({})", path), move |old, new| {
        old.field(&path) != new.field(&path)
    })
}
