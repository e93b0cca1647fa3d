#![forbid(unsafe_code)]

//! Field-level observation bookkeeping.
//!
//! An [`ObservationRegistrar`] belongs to exactly one container. It maps
//! [`Field`] names to the [`Observer`]s that read them, and replays
//! notifications to those observers when the fields are mutated.
//!
//! # Tracking
//!
//! Reads are attributed to the observer installed by [`Observer::track`] on
//! the current thread. There is no reflection: every tracked read passes the
//! stable name of the field it touches to [`ObservationRegistrar::access`].
//!
//! # Mutation brackets
//!
//! [`will_set`](ObservationRegistrar::will_set) opens a bracket for a field and
//! [`did_set`](ObservationRegistrar::did_set) closes it. Nested brackets for
//! the same field coalesce: observers fire once, when the outermost bracket
//! closes. Brackets for distinct fields fire independently, in closing order.
//!
//! # Invariants
//!
//! 1. Observers are notified synchronously, in registration order.
//! 2. Internal tables are never borrowed while a callback runs, so callbacks
//!    may read, subscribe, or open new brackets.
//! 3. Registrations hold `Weak` references. Dropping every clone of an
//!    [`Observer`] unsubscribes it before the next notification.
//! 4. Notifying a field nobody accessed is a silent no-op.
//!
//! # Failure Modes
//!
//! - **Unbalanced close**: `did_set` for a field with no open bracket returns
//!   [`RuntimeError::UnbalancedMutation`] and notifies nobody.
//! - **Panicking body**: a bracket opened by `with_mutation` stays open. Later
//!   brackets for that field nest inside it and never fire.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use arbor_core::identity::IdentityToken;
use tracing::{trace, warn};

use crate::error::{Result, RuntimeError};

// ─── Field ───────────────────────────────────────────────────────────────────

/// Stable name of an observable field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field(&'static str);

impl Field {
    /// The container's whole value.
    pub const STATE: Self = Self("state");

    /// A named field.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The field's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.0)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ─── Change ──────────────────────────────────────────────────────────────────

/// Where a write came from.
///
/// Threaded explicitly from [`Binding::set`](crate::binding::Binding::set)
/// through the dispatcher into the write, so observers can tell UI echoes
/// apart from programmatic changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteOrigin {
    /// Programmatic write.
    #[default]
    Direct,
    /// Write caused by a two-way binding set.
    Binding,
}

/// Notification delivered to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// Identity of the registrar that fired.
    pub registrar: IdentityToken,
    /// The field whose bracket closed.
    pub field: Field,
    /// Origin of the outermost bracket for `field`.
    pub origin: WriteOrigin,
}

// ─── Observer ────────────────────────────────────────────────────────────────

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

struct ObserverInner {
    id: u64,
    on_change: Box<dyn Fn(&Change)>,
    notifications: Cell<u64>,
}

/// A change callback that can be registered against fields.
///
/// Cloning shares the same registration. Once every clone is dropped the
/// observer stops receiving notifications.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    /// Create an observer that calls `on_change` for every notification.
    #[must_use]
    pub fn new(on_change: impl Fn(&Change) + 'static) -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
                on_change: Box::new(on_change),
                notifications: Cell::new(0),
            }),
        }
    }

    /// Run `body` with this observer as the current tracking context.
    ///
    /// Every [`ObservationRegistrar::access`] inside `body` on this thread
    /// subscribes this observer to the accessed field. Contexts nest; the
    /// innermost one wins.
    pub fn track<R>(&self, body: impl FnOnce() -> R) -> R {
        TRACKING.with(|stack| stack.borrow_mut().push(Some(Rc::downgrade(&self.inner))));
        let _guard = TrackingGuard;
        body()
    }

    /// Process-unique observer id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of notifications delivered so far.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.inner.notifications.get()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.inner.id)
            .field("notifications", &self.inner.notifications.get())
            .finish()
    }
}

/// Run `body` with tracking suspended: reads inside it subscribe nobody.
pub fn untracked<R>(body: impl FnOnce() -> R) -> R {
    TRACKING.with(|stack| stack.borrow_mut().push(None));
    let _guard = TrackingGuard;
    body()
}

thread_local! {
    static TRACKING: RefCell<Vec<Option<Weak<ObserverInner>>>> = const { RefCell::new(Vec::new()) };
}

struct TrackingGuard;

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        TRACKING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn current_observer() -> Option<Weak<ObserverInner>> {
    TRACKING.with(|stack| stack.borrow().last().cloned().flatten())
}

// ─── Registrar ───────────────────────────────────────────────────────────────

/// Observable lifecycle of a registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrarPhase {
    /// No bracket open, no tracking context on this thread.
    Idle,
    /// A tracking context is active on this thread.
    Tracking,
    /// At least one mutation bracket is open.
    Mutating,
}

#[derive(Debug, Clone, Copy)]
struct OpenBracket {
    depth: usize,
    origin: WriteOrigin,
}

#[derive(Default)]
struct RegistrarInner {
    observers: AHashMap<Field, Vec<Weak<ObserverInner>>>,
    open: AHashMap<Field, OpenBracket>,
}

/// Per-container dependency tracker.
pub struct ObservationRegistrar {
    id: IdentityToken,
    inner: RefCell<RegistrarInner>,
}

impl ObservationRegistrar {
    /// Create an empty registrar with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: IdentityToken::new(),
            inner: RefCell::new(RegistrarInner::default()),
        }
    }

    /// Identity of this registrar (and of the container that owns it).
    #[must_use]
    pub fn id(&self) -> IdentityToken {
        self.id
    }

    /// Record a read of `field` by the current tracking context, if any.
    pub fn access(&self, field: Field) {
        if let Some(observer) = current_observer() {
            self.register(field, observer);
        }
    }

    /// Subscribe `observer` to `field` explicitly.
    pub fn subscribe(&self, field: Field, observer: &Observer) {
        self.register(field, Rc::downgrade(&observer.inner));
    }

    fn register(&self, field: Field, observer: Weak<ObserverInner>) {
        let mut inner = self.inner.borrow_mut();
        let list = inner.observers.entry(field).or_default();
        list.retain(|w| w.strong_count() > 0);
        if !list.iter().any(|w| w.ptr_eq(&observer)) {
            list.push(observer);
        }
    }

    /// Open a mutation bracket for `field`.
    ///
    /// The origin of the outermost bracket is reported when it closes.
    pub fn will_set(&self, field: Field, origin: WriteOrigin) {
        let mut inner = self.inner.borrow_mut();
        inner
            .open
            .entry(field)
            .or_insert(OpenBracket { depth: 0, origin })
            .depth += 1;
    }

    /// Close a mutation bracket for `field`, notifying observers if it was the
    /// outermost one.
    pub fn did_set(&self, field: Field) -> Result<()> {
        let origin = {
            let mut inner = self.inner.borrow_mut();
            let Some(open) = inner.open.get_mut(&field) else {
                return Err(RuntimeError::UnbalancedMutation { field });
            };
            open.depth -= 1;
            if open.depth > 0 {
                return Ok(());
            }
            let origin = open.origin;
            inner.open.remove(&field);
            origin
        };
        self.notify(field, origin);
        Ok(())
    }

    /// Run `body` inside a mutation bracket for `field`.
    pub fn with_mutation<R>(&self, field: Field, origin: WriteOrigin, body: impl FnOnce() -> R) -> R {
        self.will_set(field, origin);
        let result = body();
        if let Err(err) = self.did_set(field) {
            warn!(registrar = ?self.id, %field, %err, "mutation bracket closed twice");
        }
        result
    }

    fn notify(&self, field: Field, origin: WriteOrigin) {
        let targets: Vec<Rc<ObserverInner>> = {
            let mut inner = self.inner.borrow_mut();
            match inner.observers.get_mut(&field) {
                Some(list) => {
                    list.retain(|w| w.strong_count() > 0);
                    list.iter().filter_map(Weak::upgrade).collect()
                }
                None => Vec::new(),
            }
        };
        if targets.is_empty() {
            return;
        }

        trace!(registrar = ?self.id, %field, ?origin, observers = targets.len(), "notify");
        let change = Change {
            registrar: self.id,
            field,
            origin,
        };
        for observer in targets {
            observer.notifications.set(observer.notifications.get() + 1);
            (observer.on_change)(&change);
        }
    }

    /// Current phase, as seen from this thread.
    #[must_use]
    pub fn phase(&self) -> RegistrarPhase {
        if !self.inner.borrow().open.is_empty() {
            RegistrarPhase::Mutating
        } else if current_observer().is_some() {
            RegistrarPhase::Tracking
        } else {
            RegistrarPhase::Idle
        }
    }

    /// Number of live observers subscribed to `field`.
    #[must_use]
    pub fn observer_count(&self, field: Field) -> usize {
        self.inner
            .borrow()
            .observers
            .get(&field)
            .map_or(0, |list| list.iter().filter(|w| w.strong_count() > 0).count())
    }
}

impl Default for ObservationRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservationRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ObservationRegistrar")
            .field("id", &self.id)
            .field("fields", &inner.observers.len())
            .field("open", &inner.open.len())
            .finish()
    }
}

// The registrar serializes as a placeholder. Decoding always yields a fresh
// registrar with no subscriptions.
#[cfg(feature = "serde")]
impl serde::Serialize for ObservationRegistrar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ObservationRegistrar {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(Self::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT: Field = Field::new("count");
    const NAME: Field = Field::new("name");

    fn recording_observer() -> (Observer, Rc<RefCell<Vec<Change>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let observer = Observer::new(move |change| sink.borrow_mut().push(*change));
        (observer, log)
    }

    fn fields(log: &Rc<RefCell<Vec<Change>>>) -> Vec<Field> {
        log.borrow().iter().map(|c| c.field).collect()
    }

    #[test]
    fn tracked_access_subscribes() {
        let registrar = ObservationRegistrar::new();
        let (observer, log) = recording_observer();

        observer.track(|| registrar.access(COUNT));
        assert_eq!(registrar.observer_count(COUNT), 1);
        assert_eq!(registrar.observer_count(NAME), 0);

        registrar.with_mutation(COUNT, WriteOrigin::Direct, || {});
        registrar.with_mutation(NAME, WriteOrigin::Direct, || {});
        assert_eq!(fields(&log), vec![COUNT]);
        assert_eq!(log.borrow()[0].registrar, registrar.id());
    }

    #[test]
    fn untracked_access_is_ignored() {
        let registrar = ObservationRegistrar::new();
        registrar.access(COUNT);
        assert_eq!(registrar.observer_count(COUNT), 0);

        let (observer, _log) = recording_observer();
        observer.track(|| untracked(|| registrar.access(COUNT)));
        assert_eq!(registrar.observer_count(COUNT), 0);
    }

    #[test]
    fn repeated_access_registers_once() {
        let registrar = ObservationRegistrar::new();
        let (observer, log) = recording_observer();
        observer.track(|| {
            registrar.access(COUNT);
            registrar.access(COUNT);
        });
        assert_eq!(registrar.observer_count(COUNT), 1);

        registrar.with_mutation(COUNT, WriteOrigin::Direct, || {});
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn nested_same_field_coalesces() {
        let registrar = ObservationRegistrar::new();
        let (observer, log) = recording_observer();
        registrar.subscribe(COUNT, &observer);

        registrar.with_mutation(COUNT, WriteOrigin::Direct, || {
            registrar.with_mutation(COUNT, WriteOrigin::Binding, || {});
            assert!(log.borrow().is_empty());
        });
        assert_eq!(log.borrow().len(), 1);
        // The outermost bracket's origin wins.
        assert_eq!(log.borrow()[0].origin, WriteOrigin::Direct);
    }

    #[test]
    fn distinct_fields_fire_in_closing_order() {
        let registrar = ObservationRegistrar::new();
        let (observer, log) = recording_observer();
        registrar.subscribe(COUNT, &observer);
        registrar.subscribe(NAME, &observer);

        registrar.with_mutation(COUNT, WriteOrigin::Direct, || {
            registrar.with_mutation(NAME, WriteOrigin::Direct, || {});
        });
        assert_eq!(fields(&log), vec![NAME, COUNT]);
    }

    #[test]
    fn dropped_observer_is_pruned() {
        let registrar = ObservationRegistrar::new();
        let (observer, log) = recording_observer();
        registrar.subscribe(COUNT, &observer);
        drop(observer);

        assert_eq!(registrar.observer_count(COUNT), 0);
        registrar.with_mutation(COUNT, WriteOrigin::Direct, || {});
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn unbalanced_close_is_an_error() {
        let registrar = ObservationRegistrar::new();
        assert_eq!(
            registrar.did_set(COUNT),
            Err(RuntimeError::UnbalancedMutation { field: COUNT })
        );
    }

    #[test]
    fn phases() {
        let registrar = ObservationRegistrar::new();
        assert_eq!(registrar.phase(), RegistrarPhase::Idle);

        let (observer, _log) = recording_observer();
        observer.track(|| assert_eq!(registrar.phase(), RegistrarPhase::Tracking));

        registrar.will_set(COUNT, WriteOrigin::Direct);
        assert_eq!(registrar.phase(), RegistrarPhase::Mutating);
        registrar.did_set(COUNT).unwrap();
        assert_eq!(registrar.phase(), RegistrarPhase::Idle);
    }

    #[test]
    fn callbacks_may_reenter() {
        let registrar = Rc::new(ObservationRegistrar::new());
        let hits = Rc::new(Cell::new(0));

        let reg = Rc::clone(&registrar);
        let hits_in = Rc::clone(&hits);
        let observer = Observer::new(move |change| {
            hits_in.set(hits_in.get() + 1);
            // Re-entrant bracket for another field from inside a callback.
            if change.field == COUNT {
                reg.with_mutation(NAME, WriteOrigin::Direct, || {});
            }
        });
        registrar.subscribe(COUNT, &observer);
        registrar.subscribe(NAME, &observer);

        registrar.with_mutation(COUNT, WriteOrigin::Direct, || {});
        assert_eq!(hits.get(), 2);
        assert_eq!(observer.notifications(), 2);
    }

    #[test]
    fn notifying_unobserved_field_is_noop() {
        let registrar = ObservationRegistrar::new();
        registrar.with_mutation(NAME, WriteOrigin::Direct, || {});
        assert_eq!(registrar.phase(), RegistrarPhase::Idle);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_placeholder_yields_fresh_registrar() {
        let registrar = ObservationRegistrar::new();
        let json = serde_json::to_string(&registrar).unwrap();
        let decoded: ObservationRegistrar = serde_json::from_str(&json).unwrap();
        assert_ne!(decoded.id(), registrar.id());
    }
}
