#![forbid(unsafe_code)]

//! Two-way accessors that write by dispatching actions.
//!
//! A [`Binding`] reads through its container and writes by sending an action.
//! It never touches state directly, so every change observed by the UI has
//! round-tripped through the dispatcher. Sets carry
//! [`WriteOrigin::Binding`] so the interpreter can tag the resulting write.

use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::container::Container;
use crate::registrar::{Field, WriteOrigin};
use crate::state::ObservableState;

/// Get/set pair over a projection of a container.
///
/// Cloning shares the same accessor closures.
pub struct Binding<V> {
    get: Rc<dyn Fn() -> V>,
    set: Rc<dyn Fn(V) -> bool>,
}

impl<V> Clone for Binding<V> {
    fn clone(&self) -> Self {
        Self {
            get: Rc::clone(&self.get),
            set: Rc::clone(&self.set),
        }
    }
}

impl<V: 'static> Binding<V> {
    pub(crate) fn new<S, A>(
        container: Container<S, A>,
        field: Field,
        from_state: impl Fn(&S) -> V + 'static,
        to_action: impl Fn(V) -> Option<A> + 'static,
    ) -> Self
    where
        S: ObservableState,
        A: 'static,
    {
        let reader = container.clone();
        let get = move || reader.read_field(field, &from_state);
        let set = move |value: V| match to_action(value) {
            Some(action) => {
                container.send_with_origin(action, WriteOrigin::Binding);
                true
            }
            None => {
                debug!(container = container.label(), %field, "binding set produced no action; dropped");
                false
            }
        };
        Self {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    /// Build a binding from raw closures.
    ///
    /// Useful for tests and for adapting values that do not live in a
    /// container.
    #[must_use]
    pub fn from_fns(get: impl Fn() -> V + 'static, set: impl Fn(V) -> bool + 'static) -> Self {
        Self {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    /// Current value, read through the container (tracked).
    #[must_use]
    pub fn get(&self) -> V {
        (self.get)()
    }

    /// Request a change. Returns whether an action was dispatched.
    pub fn set(&self, value: V) -> bool {
        (self.set)(value)
    }
}

impl<V> fmt::Debug for Binding<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
