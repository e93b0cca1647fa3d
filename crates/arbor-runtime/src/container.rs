#![forbid(unsafe_code)]

//! Containers: observable state holders and the scopes derived from them.
//!
//! # Design
//!
//! A root container owns one state value and one dispatcher. The only way to
//! change the value is through the [`Writer`] handed out next to the root
//! handle, mirroring the `Cx` / `CxController` split: readers get a cheap
//! cloneable handle, and the action interpreter gets the write capability.
//!
//! [`Container::scope`] derives a child container. The child stores no state
//! of its own. Every read re-projects the parent's current value, and every
//! action is embedded and forwarded to the parent. The child holds only a
//! `Weak` reference to its parent; the parent caches children by [`ScopeKey`],
//! so scoping twice with the same key yields the same instance.
//!
//! Children observe the parent's [`Field::STATE`]. When it fires, the child
//! re-projects, compares the result with the last projection by identity, and
//! fires its own notifications. For child types that carry an identity this
//! keeps scoped observers quiet when an unrelated part of the parent changed.
//! Opaque projections (integers, strings, ...) never compare equal and fire
//! on every parent change.
//!
//! The parent caches children weakly. A child lives as long as some handle to
//! it does; once the last handle drops, its parent subscription goes with it.
//!
//! # Invariants
//!
//! 1. A child read always reflects the parent's latest completed write.
//! 2. A write whose value is identity-equal to the current one fires nothing.
//! 3. Otherwise `Field::STATE` fires after every changed named field.
//! 4. Equality and hashing of containers use identity, never content.
//!
//! # Failure Modes
//!
//! - **Projection disappears**: a presented scope keeps answering reads with
//!   the last value it observed while present, until the projection
//!   reappears.
//!   [`Container::scope_presented`] itself returns `None` from then on.
//! - **Parent dropped**: reads return the last known value. Sends are
//!   discarded with a warning ([`Container::try_send`] reports
//!   [`RuntimeError::Detached`]).
//! - **Runaway feedback**: writes nested past
//!   [`ContainerConfig::reentrancy_limit`] inside notification dispatch are
//!   rejected.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use arbor_core::identity::IdentityToken;
use arbor_core::identity_eq::is_identity_equal;
use arbor_core::navigation::{NavigationId, Presentable, StackDiff, diff_stacks};
use tracing::{debug, error, trace, warn};

use crate::config::ContainerConfig;
use crate::error::{Result, RuntimeError};
use crate::registrar::{Change, Field, ObservationRegistrar, Observer, WriteOrigin};
use crate::state::ObservableState;

// ─── ScopeKey ────────────────────────────────────────────────────────────────

/// Key under which a parent caches a scoped child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Child projecting a named field.
    Field(Field),
    /// Child for a presented destination.
    Presented(NavigationId),
}

impl From<Field> for ScopeKey {
    fn from(field: Field) -> Self {
        Self::Field(field)
    }
}

impl From<&'static str> for ScopeKey {
    fn from(name: &'static str) -> Self {
        Self::Field(Field::new(name))
    }
}

impl From<NavigationId> for ScopeKey {
    fn from(id: NavigationId) -> Self {
        Self::Presented(id)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(field) => write!(f, "{field}"),
            Self::Presented(id) => match id.presented() {
                Some(component) => {
                    let name = component.type_name();
                    let short = name.rsplit("::").next().unwrap_or(name);
                    write!(f, "{short}@{}", id.depth())
                }
                None => f.write_str("root"),
            },
        }
    }
}

// ─── Write outcome ───────────────────────────────────────────────────────────

/// What a write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The replacement was identity-equal; stored silently.
    IdentityPreserved,
    /// The replacement was a real change; `fields` fired, then `Field::STATE`.
    Changed { fields: Vec<Field> },
    /// The write was refused and the state left untouched.
    Rejected,
}

impl WriteOutcome {
    /// Whether observers were notified.
    #[must_use]
    pub fn notified(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Store `next` into `slot`, bracketing the replacement when it changes
/// identity.
fn replace_and_notify<S: ObservableState>(
    registrar: &ObservationRegistrar,
    slot: &RefCell<S>,
    next: S,
    origin: WriteOrigin,
    label: &str,
) -> WriteOutcome {
    if is_identity_equal(&*slot.borrow(), &next) {
        *slot.borrow_mut() = next;
        trace!(container = label, "identity preserved; replaced silently");
        return WriteOutcome::IdentityPreserved;
    }

    let fields = slot.borrow().changed_fields(&next);
    trace!(container = label, ?fields, ?origin, "replacing state");
    registrar.with_mutation(Field::STATE, origin, || {
        *slot.borrow_mut() = next;
        for &field in &fields {
            registrar.with_mutation(field, origin, || ());
        }
    });
    WriteOutcome::Changed { fields }
}

// ─── Node plumbing ───────────────────────────────────────────────────────────

trait Node<S, A> {
    /// Untracked snapshot of the current value.
    fn peek(&self) -> S;
    /// Call `f` with the current value without cloning it.
    fn visit(&self, f: &mut dyn FnMut(&S));
    fn dispatch(&self, action: A, origin: WriteOrigin) -> Result<()>;
    fn registrar(&self) -> &ObservationRegistrar;
    fn children(&self) -> &ChildCache;
    fn config(&self) -> &ContainerConfig;
}

/// Children derived from a container, keyed by scope.
///
/// Entries are weak: dead ones are pruned on the next lookup.
#[derive(Default)]
struct ChildCache {
    entries: RefCell<AHashMap<ScopeKey, Weak<dyn Any>>>,
}

impl ChildCache {
    fn get(&self, key: &ScopeKey) -> Option<Rc<dyn Any>> {
        let mut entries = self.entries.borrow_mut();
        let live = entries.get(key)?.upgrade();
        if live.is_none() {
            entries.remove(key);
        }
        live
    }

    fn insert(&self, key: ScopeKey, child: &Rc<dyn Any>) {
        self.entries.borrow_mut().insert(key, Rc::downgrade(child));
    }

    /// Evict `key`. Returns whether a live child was cached under it.
    fn remove(&self, key: &ScopeKey) -> bool {
        self.entries
            .borrow_mut()
            .remove(key)
            .is_some_and(|child| child.strong_count() > 0)
    }

    fn prune(&self) {
        self.entries.borrow_mut().retain(|_, child| child.strong_count() > 0);
    }

    fn len(&self) -> usize {
        self.prune();
        self.entries.borrow().len()
    }

    /// Live presented keys exactly one link below `base`.
    fn presented_under(&self, base: &NavigationId) -> Vec<NavigationId> {
        self.prune();
        self.entries
            .borrow()
            .keys()
            .filter_map(|key| match key {
                ScopeKey::Presented(id) if id.presenter() == Some(base) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

// ─── Root node ───────────────────────────────────────────────────────────────

struct RootNode<S, A> {
    state: RefCell<S>,
    send: Box<dyn Fn(A, WriteOrigin)>,
    registrar: ObservationRegistrar,
    children: ChildCache,
    config: ContainerConfig,
    write_depth: Cell<usize>,
}

impl<S: ObservableState, A> Node<S, A> for RootNode<S, A> {
    fn peek(&self) -> S {
        self.state.borrow().clone()
    }

    fn visit(&self, f: &mut dyn FnMut(&S)) {
        f(&*self.state.borrow());
    }

    fn dispatch(&self, action: A, origin: WriteOrigin) -> Result<()> {
        trace!(container = %self.config.label, ?origin, "dispatch");
        (self.send)(action, origin);
        Ok(())
    }

    fn registrar(&self) -> &ObservationRegistrar {
        &self.registrar
    }

    fn children(&self) -> &ChildCache {
        &self.children
    }

    fn config(&self) -> &ContainerConfig {
        &self.config
    }
}

// ─── Scoped node ─────────────────────────────────────────────────────────────

struct ScopedNode<P, PA, C, CA> {
    key: ScopeKey,
    parent: Weak<dyn Node<P, PA>>,
    project: Box<dyn Fn(&P) -> Option<C>>,
    embed: Box<dyn Fn(CA) -> PA>,
    /// Projection seen at the last parent notification; the baseline for
    /// change detection.
    last: RefCell<C>,
    /// Most recent present projection, from any read or notification. The
    /// answer while the projection is absent.
    retained: RefCell<C>,
    present: Cell<bool>,
    registrar: ObservationRegistrar,
    children: ChildCache,
    config: ContainerConfig,
    /// Keeps the subscription on the parent's `Field::STATE` alive.
    _parent_observer: Observer,
}

impl<P, PA, C, CA> ScopedNode<P, PA, C, CA>
where
    P: ObservableState,
    C: ObservableState,
{
    fn project_current(&self) -> Option<C> {
        let parent = self.parent.upgrade()?;
        let mut projected = None;
        parent.visit(&mut |state| projected = (self.project)(state));
        projected
    }

    /// Project and remember the result if present.
    fn refresh(&self) -> Option<C> {
        let current = self.project_current()?;
        *self.retained.borrow_mut() = current.clone();
        Some(current)
    }

    fn on_parent_change(&self, change: &Change) {
        let Some(next) = self.refresh() else {
            if self.present.replace(false) {
                debug!(container = %self.config.label, "projection absent; retaining last known value");
            }
            return;
        };
        self.present.set(true);
        replace_and_notify(
            &self.registrar,
            &self.last,
            next,
            change.origin,
            &self.config.label,
        );
    }
}

impl<P, PA, C, CA> Node<C, CA> for ScopedNode<P, PA, C, CA>
where
    P: ObservableState,
    C: ObservableState,
{
    fn peek(&self) -> C {
        self.refresh()
            .unwrap_or_else(|| self.retained.borrow().clone())
    }

    fn visit(&self, f: &mut dyn FnMut(&C)) {
        match self.refresh() {
            Some(current) => f(&current),
            None => f(&*self.retained.borrow()),
        }
    }

    fn dispatch(&self, action: CA, origin: WriteOrigin) -> Result<()> {
        let Some(parent) = self.parent.upgrade() else {
            return Err(RuntimeError::Detached {
                scope: self.key.clone(),
            });
        };
        parent.dispatch((self.embed)(action), origin)
    }

    fn registrar(&self) -> &ObservationRegistrar {
        &self.registrar
    }

    fn children(&self) -> &ChildCache {
        &self.children
    }

    fn config(&self) -> &ContainerConfig {
        &self.config
    }
}

// ─── Container ───────────────────────────────────────────────────────────────

/// Handle to a root or scoped container.
///
/// Cloning yields another handle to the **same** container.
pub struct Container<S, A> {
    node: Rc<dyn Node<S, A>>,
}

impl<S, A> Clone for Container<S, A> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<S, A> Container<S, A> {
    /// Identity of this container.
    #[must_use]
    pub fn id(&self) -> IdentityToken {
        self.node.registrar().id()
    }

    /// Label used in tracing events.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.node.config().label
    }

    /// The container's observation registrar.
    #[must_use]
    pub fn registrar(&self) -> &ObservationRegistrar {
        self.node.registrar()
    }

    /// Number of live scoped children. Children whose handles were all
    /// dropped are not counted.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.node.children().len()
    }

    /// Evict the cached child under `key`. Existing handles keep working.
    /// Returns whether a live child was cached.
    pub fn release_scope(&self, key: &ScopeKey) -> bool {
        self.node.children().remove(key)
    }

    /// Send an action to the dispatcher.
    pub fn send(&self, action: A) {
        self.send_with_origin(action, WriteOrigin::Direct);
    }

    /// Send an action, tagging the resulting write with `origin`.
    pub fn send_with_origin(&self, action: A, origin: WriteOrigin) {
        if let Err(err) = self.node.dispatch(action, origin) {
            warn!(container = self.label(), %err, "action discarded");
        }
    }

    /// Send an action, reporting a detached scope as an error.
    pub fn try_send(&self, action: A) -> Result<()> {
        self.node.dispatch(action, WriteOrigin::Direct)
    }
}

impl<S: ObservableState, A: 'static> Container<S, A> {
    /// Create a root container.
    ///
    /// `send` receives every action sent through this container or any scope
    /// derived from it. The returned [`Writer`] is the only way to change the
    /// state.
    #[must_use]
    pub fn root(initial: S, send: impl Fn(A) + 'static) -> (Self, Writer<S, A>) {
        Self::root_with_origin(initial, move |action, _origin| send(action))
    }

    /// Create a root container whose dispatcher also receives the
    /// [`WriteOrigin`] of each action.
    #[must_use]
    pub fn root_with_origin(
        initial: S,
        send: impl Fn(A, WriteOrigin) + 'static,
    ) -> (Self, Writer<S, A>) {
        Self::root_with_config(initial, ContainerConfig::default(), send)
    }

    /// Create a root container with explicit configuration.
    #[must_use]
    pub fn root_with_config(
        initial: S,
        config: ContainerConfig,
        send: impl Fn(A, WriteOrigin) + 'static,
    ) -> (Self, Writer<S, A>) {
        Self::root_cyclic(initial, config, move |_writer| send)
    }

    /// Create a root container whose dispatcher can write back.
    ///
    /// `make_send` receives a [`WeakWriter`] for the container being built,
    /// so an in-process interpreter can apply actions without creating a
    /// reference cycle.
    #[must_use]
    pub fn root_cyclic<F>(
        initial: S,
        config: ContainerConfig,
        make_send: impl FnOnce(WeakWriter<S, A>) -> F,
    ) -> (Self, Writer<S, A>)
    where
        F: Fn(A, WriteOrigin) + 'static,
    {
        let root = Rc::new_cyclic(|weak: &Weak<RootNode<S, A>>| {
            let send = make_send(WeakWriter { node: weak.clone() });
            RootNode {
                state: RefCell::new(initial),
                send: Box::new(send),
                registrar: ObservationRegistrar::new(),
                children: ChildCache::default(),
                config,
                write_depth: Cell::new(0),
            }
        });
        debug!(container = %root.config.label, id = ?root.registrar.id(), "root container created");
        let node: Rc<dyn Node<S, A>> = root.clone();
        (Self { node }, Writer { node: root })
    }

    /// Current value, recording a read of [`Field::STATE`].
    #[must_use]
    pub fn read(&self) -> S {
        self.node.registrar().access(Field::STATE);
        self.node.peek()
    }

    /// Tracked accessor for one named field.
    ///
    /// Records a read of `field` only, so the caller is notified when that
    /// field changes rather than on every write.
    pub fn read_field<V>(&self, field: Field, map: impl Fn(&S) -> V) -> V {
        self.node.registrar().access(field);
        let mut out = None;
        self.node.visit(&mut |state| out = Some(map(state)));
        out.unwrap_or_else(|| map(&self.node.peek()))
    }

    /// Current value without recording a dependency.
    #[must_use]
    pub fn peek(&self) -> S {
        self.node.peek()
    }

    /// Derive a child container projecting part of this one.
    ///
    /// Scoping again with the same `key` and types returns the cached child.
    pub fn scope<C, CA>(
        &self,
        key: impl Into<ScopeKey>,
        to_child: impl Fn(&S) -> C + 'static,
        embed: impl Fn(CA) -> A + 'static,
    ) -> Container<C, CA>
    where
        C: ObservableState,
        CA: 'static,
    {
        let key = key.into();
        if let Some(existing) = self.cached_child(&key) {
            return existing;
        }
        let initial = to_child(&self.node.peek());
        self.build_child(
            key,
            Box::new(move |state| Some(to_child(state))),
            initial,
            Box::new(embed),
        )
    }

    /// Derive a child for an optional (presented) projection.
    ///
    /// Returns `None` while the projection is absent and evicts any cached
    /// child. Handles obtained while it was present keep reading the last
    /// known value.
    pub fn scope_presented<C, CA>(
        &self,
        key: impl Into<ScopeKey>,
        to_child: impl Fn(&S) -> Option<C> + 'static,
        embed: impl Fn(CA) -> A + 'static,
    ) -> Option<Container<C, CA>>
    where
        C: ObservableState,
        CA: 'static,
    {
        let key = key.into();
        let Some(initial) = to_child(&self.node.peek()) else {
            if self.node.children().remove(&key) {
                debug!(container = self.label(), scope = %key, "presented scope dismissed");
            }
            return None;
        };
        if let Some(existing) = self.cached_child(&key) {
            return Some(existing);
        }
        Some(self.build_child(key, Box::new(to_child), initial, Box::new(embed)))
    }

    /// Scope every element of a presented stack.
    ///
    /// Each element is keyed by `base.append(element)`. Cached children whose
    /// ids are no longer in the stack are released. The returned diff lists
    /// them in `removed`, in unspecified order. Elements that share a
    /// [`NavigationId`] share one child.
    pub fn scope_stack<C, CA>(
        &self,
        base: &NavigationId,
        to_elements: impl Fn(&S) -> Vec<C> + 'static,
        embed: impl Fn(NavigationId, CA) -> A + 'static,
    ) -> (Vec<(NavigationId, Container<C, CA>)>, StackDiff)
    where
        C: ObservableState + Presentable,
        CA: 'static,
    {
        let to_elements = Rc::new(to_elements);
        let embed = Rc::new(embed);

        let elements = to_elements(&self.node.peek());
        let ids: Vec<NavigationId> = elements.iter().map(|e| base.append(e)).collect();
        let previous = self.node.children().presented_under(base);
        let diff = diff_stacks(&previous, &ids);
        for id in &diff.removed {
            self.node.children().remove(&ScopeKey::Presented(id.clone()));
        }

        let mut children = Vec::with_capacity(ids.len());
        for (id, element) in ids.into_iter().zip(elements) {
            let key = ScopeKey::Presented(id.clone());
            let child = match self.cached_child(&key) {
                Some(existing) => existing,
                None => {
                    let project = {
                        let to_elements = Rc::clone(&to_elements);
                        let base = base.clone();
                        let id = id.clone();
                        move |state: &S| to_elements(state).into_iter().find(|e| base.append(e) == id)
                    };
                    let embed = {
                        let embed = Rc::clone(&embed);
                        let id = id.clone();
                        move |action: CA| embed(id.clone(), action)
                    };
                    self.build_child(key, Box::new(project), element, Box::new(embed))
                }
            };
            children.push((id, child));
        }
        if !diff.is_unchanged() {
            debug!(
                container = self.label(),
                inserted = diff.inserted.len(),
                removed = diff.removed.len(),
                "stack reconciled"
            );
        }
        (children, diff)
    }

    /// Two-way accessor over a projection of this container.
    ///
    /// See [`Binding`](crate::binding::Binding).
    pub fn binding<V>(
        &self,
        from_state: impl Fn(&S) -> V + 'static,
        to_action: impl Fn(V) -> Option<A> + 'static,
    ) -> crate::binding::Binding<V>
    where
        V: 'static,
    {
        crate::binding::Binding::new(self.clone(), Field::STATE, from_state, to_action)
    }

    /// Two-way accessor that only tracks `field`.
    pub fn binding_field<V>(
        &self,
        field: Field,
        from_state: impl Fn(&S) -> V + 'static,
        to_action: impl Fn(V) -> Option<A> + 'static,
    ) -> crate::binding::Binding<V>
    where
        V: 'static,
    {
        crate::binding::Binding::new(self.clone(), field, from_state, to_action)
    }

    fn cached_child<C, CA>(&self, key: &ScopeKey) -> Option<Container<C, CA>>
    where
        C: ObservableState,
        CA: 'static,
    {
        let entry = self.node.children().get(key)?;
        let node = entry.downcast::<ScopedNode<S, A, C, CA>>().ok()?;
        Some(Container { node })
    }

    fn build_child<C, CA>(
        &self,
        key: ScopeKey,
        project: Box<dyn Fn(&S) -> Option<C>>,
        initial: C,
        embed: Box<dyn Fn(CA) -> A>,
    ) -> Container<C, CA>
    where
        C: ObservableState,
        CA: 'static,
    {
        let parent: Weak<dyn Node<S, A>> = Rc::downgrade(&self.node);
        let config = self.node.config().child(&key);
        let parent_registrar = self.node.registrar();

        let child = Rc::new_cyclic(|weak: &Weak<ScopedNode<S, A, C, CA>>| {
            let weak = weak.clone();
            let observer = Observer::new(move |change| {
                if let Some(node) = weak.upgrade() {
                    node.on_parent_change(change);
                }
            });
            parent_registrar.subscribe(Field::STATE, &observer);
            ScopedNode {
                key: key.clone(),
                parent,
                project,
                embed,
                retained: RefCell::new(initial.clone()),
                last: RefCell::new(initial),
                present: Cell::new(true),
                registrar: ObservationRegistrar::new(),
                children: ChildCache::default(),
                config,
                _parent_observer: observer,
            }
        });
        debug!(container = %child.config.label, id = ?child.registrar.id(), "scope created");

        let cached: Rc<dyn Any> = child.clone();
        self.node.children().insert(key, &cached);
        let node: Rc<dyn Node<C, CA>> = child;
        Container { node }
    }
}

impl<S, A> PartialEq for Container<S, A> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<S, A> Eq for Container<S, A> {}

impl<S, A> Hash for Container<S, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<S, A> fmt::Debug for Container<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("label", &self.label())
            .field("id", &self.id())
            .field("children", &self.child_count())
            .finish()
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Write capability for a root container.
///
/// Held by whatever interprets actions. Cloning shares the capability.
pub struct Writer<S, A> {
    node: Rc<RootNode<S, A>>,
}

impl<S, A> Clone for Writer<S, A> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<S: ObservableState, A: 'static> Writer<S, A> {
    /// Replace the state.
    pub fn write(&self, next: S) -> WriteOutcome {
        self.write_with_origin(next, WriteOrigin::Direct)
    }

    /// Replace the state, tagging notifications with `origin`.
    ///
    /// Logs and returns [`WriteOutcome::Rejected`] when the reentrancy limit
    /// is exceeded.
    pub fn write_with_origin(&self, next: S, origin: WriteOrigin) -> WriteOutcome {
        match self.try_write_with_origin(next, origin) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(container = %self.node.config.label, %err, "write rejected");
                WriteOutcome::Rejected
            }
        }
    }

    /// Replace the state, reporting a rejected write as an error.
    pub fn try_write(&self, next: S) -> Result<WriteOutcome> {
        self.try_write_with_origin(next, WriteOrigin::Direct)
    }

    /// Replace the state with an explicit origin, reporting a rejected write
    /// as an error.
    pub fn try_write_with_origin(&self, next: S, origin: WriteOrigin) -> Result<WriteOutcome> {
        let _depth = self.enter()?;
        Ok(replace_and_notify(
            &self.node.registrar,
            &self.node.state,
            next,
            origin,
            &self.node.config.label,
        ))
    }

    /// Edit a copy of the state and write it back.
    pub fn update(&self, edit: impl FnOnce(&mut S)) -> WriteOutcome {
        let mut next = self.current();
        edit(&mut next);
        self.write(next)
    }

    /// Mutate one named field in place.
    ///
    /// Always notifies `field` and then [`Field::STATE`]; no identity check is
    /// made.
    pub fn mutate_field(&self, field: Field, edit: impl FnOnce(&mut S)) -> WriteOutcome {
        let _depth = match self.enter() {
            Ok(guard) => guard,
            Err(err) => {
                error!(container = %self.node.config.label, %field, %err, "mutation rejected");
                return WriteOutcome::Rejected;
            }
        };
        let registrar = &self.node.registrar;
        registrar.with_mutation(Field::STATE, WriteOrigin::Direct, || {
            registrar.with_mutation(field, WriteOrigin::Direct, || {
                edit(&mut *self.node.state.borrow_mut());
            });
        });
        WriteOutcome::Changed {
            fields: vec![field],
        }
    }

    /// Untracked snapshot of the state.
    #[must_use]
    pub fn current(&self) -> S {
        self.node.state.borrow().clone()
    }

    /// Reader handle for the same root.
    #[must_use]
    pub fn container(&self) -> Container<S, A> {
        let node: Rc<dyn Node<S, A>> = self.node.clone();
        Container { node }
    }

    /// Non-owning form of this writer.
    #[must_use]
    pub fn downgrade(&self) -> WeakWriter<S, A> {
        WeakWriter {
            node: Rc::downgrade(&self.node),
        }
    }

    fn enter(&self) -> Result<DepthGuard<'_>> {
        let depth = self.node.write_depth.get();
        let limit = self.node.config.reentrancy_limit;
        if depth >= limit {
            return Err(RuntimeError::ReentrancyLimit { depth, limit });
        }
        self.node.write_depth.set(depth + 1);
        Ok(DepthGuard {
            depth: &self.node.write_depth,
        })
    }
}

impl<S, A> fmt::Debug for Writer<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("label", &self.node.config.label)
            .field("id", &self.node.registrar.id())
            .finish()
    }
}

struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Non-owning [`Writer`].
pub struct WeakWriter<S, A> {
    node: Weak<RootNode<S, A>>,
}

impl<S, A> Clone for WeakWriter<S, A> {
    fn clone(&self) -> Self {
        Self {
            node: Weak::clone(&self.node),
        }
    }
}

impl<S, A> WeakWriter<S, A> {
    /// Upgrade to a [`Writer`] if the root is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Writer<S, A>> {
        self.node.upgrade().map(|node| Writer { node })
    }
}

impl<S, A> fmt::Debug for WeakWriter<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakWriter")
            .field("alive", &(self.node.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::identity::{HasIdentity, IdentityToken};

    #[derive(Clone, Debug, PartialEq)]
    struct Profile {
        id: IdentityToken,
        name: String,
        age: u32,
    }

    impl HasIdentity for Profile {
        fn identity(&self) -> IdentityToken {
            self.id
        }
    }

    impl ObservableState for Profile {
        fn changed_fields(&self, next: &Self) -> Vec<Field> {
            crate::changed_fields!(self, next; name, age)
        }
    }

    fn profile() -> Profile {
        Profile {
            id: IdentityToken::new(),
            name: "ada".into(),
            age: 36,
        }
    }

    fn counting(container_registrar: &ObservationRegistrar, field: Field) -> (Observer, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        let observer = Observer::new(move |_| sink.set(sink.get() + 1));
        container_registrar.subscribe(field, &observer);
        (observer, hits)
    }

    #[test]
    fn identity_preserving_write_is_silent() {
        let original = profile();
        let (store, writer) = Container::<Profile, ()>::root(original.clone(), |_| {});
        let (_obs, hits) = counting(store.registrar(), Field::STATE);

        let rebuilt = Profile {
            name: "grace".into(),
            ..original
        };
        assert_eq!(writer.write(rebuilt), WriteOutcome::IdentityPreserved);
        assert_eq!(hits.get(), 0);
        // Content still changed.
        assert_eq!(store.peek().name, "grace");
    }

    #[test]
    fn identity_change_notifies_changed_fields_then_state() {
        let (store, writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let observer = Observer::new(move |change| sink.borrow_mut().push(change.field));
        for field in [Field::STATE, Field::new("name"), Field::new("age")] {
            store.registrar().subscribe(field, &observer);
        }

        let next = Profile {
            age: 37,
            ..profile()
        };
        let outcome = writer.write(next);
        assert_eq!(
            outcome,
            WriteOutcome::Changed {
                fields: vec![Field::new("age")]
            }
        );
        assert_eq!(*log.borrow(), vec![Field::new("age"), Field::STATE]);
    }

    #[test]
    fn opaque_state_always_notifies() {
        let (store, writer) = Container::<i32, ()>::root(5, |_| {});
        let (_obs, hits) = counting(store.registrar(), Field::STATE);
        assert!(writer.write(5).notified());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn send_forwards_without_mutation() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&sent);
        let (store, _writer) = Container::root(1_u8, move |a: &'static str| sink.borrow_mut().push(a));

        store.send("tap");
        assert_eq!(*sent.borrow(), vec!["tap"]);
        assert_eq!(store.peek(), 1);
    }

    #[test]
    fn scope_is_cached_by_key() {
        let (store, _writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let a = store.scope("name", |p: &Profile| p.name.clone(), |_: ()| ());
        let b = store.scope("name", |p: &Profile| p.name.clone(), |_: ()| ());
        let c = store.scope("age", |p: &Profile| p.age, |_: ()| ());

        assert_eq!(a, b);
        assert_ne!(a.id(), c.id());
        assert_eq!(store.child_count(), 2);
        assert_eq!(a.label(), "root.name");
    }

    #[test]
    fn scope_with_different_types_replaces_cache_entry() {
        let (store, _writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let a = store.scope("x", |p: &Profile| p.age, |_: ()| ());
        let b = store.scope("x", |p: &Profile| p.name.clone(), |_: ()| ());
        assert_eq!(a.peek(), 36);
        assert_eq!(b.peek(), "ada");
        assert_eq!(store.child_count(), 1);
    }

    #[test]
    fn release_scope_evicts_but_handle_survives() {
        let (store, writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let age = store.scope("age", |p: &Profile| p.age, |_: ()| ());
        assert!(store.release_scope(&ScopeKey::from("age")));
        assert_eq!(store.child_count(), 0);

        writer.update(|p| p.age = 40);
        assert_eq!(age.peek(), 40);
    }

    #[test]
    fn parent_drop_detaches_child() {
        let (store, writer) = Container::<Profile, u8>::root(profile(), |_| {});
        let age = store.scope("age", |p: &Profile| p.age, |a: u8| a);
        drop(store);
        drop(writer);

        assert_eq!(age.peek(), 36);
        assert_eq!(
            age.try_send(1),
            Err(RuntimeError::Detached {
                scope: ScopeKey::from("age")
            })
        );
        // The infallible form only logs.
        age.send(2);
    }

    #[test]
    fn reentrancy_limit_rejects_feedback_writes() {
        let config = ContainerConfig::new().with_reentrancy_limit(1);
        let (store, writer) = Container::<i32, ()>::root_with_config(0, config, |_, _| {});

        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        let weak = writer.downgrade();
        let observer = Observer::new(move |_| {
            if let Some(writer) = weak.upgrade() {
                sink.borrow_mut().push(writer.try_write(99));
            }
        });
        store.registrar().subscribe(Field::STATE, &observer);

        assert!(writer.write(1).notified());
        assert_eq!(
            *outcomes.borrow(),
            vec![Err(RuntimeError::ReentrancyLimit { depth: 1, limit: 1 })]
        );
        assert_eq!(store.peek(), 1);
    }

    #[test]
    fn mutate_field_notifies_field_and_state() {
        let (store, writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let (_name_obs, name_hits) = counting(store.registrar(), Field::new("name"));
        let (_age_obs, age_hits) = counting(store.registrar(), Field::new("age"));
        let (_state_obs, state_hits) = counting(store.registrar(), Field::STATE);

        writer.mutate_field(Field::new("name"), |p| p.name.push('!'));
        assert_eq!(store.peek().name, "ada!");
        assert_eq!(name_hits.get(), 1);
        assert_eq!(age_hits.get(), 0);
        assert_eq!(state_hits.get(), 1);
    }

    #[test]
    fn containers_compare_by_identity() {
        let (a, _wa) = Container::<i32, ()>::root(1, |_| {});
        let (b, _wb) = Container::<i32, ()>::root(1, |_| {});
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let mut set = std::collections::HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dropped_scopes_release_parent_subscriptions() {
        let (store, writer) = Container::<Profile, ()>::root(profile(), |_| {});
        for _ in 0..100 {
            let age = store.scope("age", |p: &Profile| p.age, |_: ()| ());
            assert_eq!(age.peek(), 36);
        }
        assert_eq!(store.child_count(), 0);
        assert_eq!(store.registrar().observer_count(Field::STATE), 0);

        let kept = store.scope("name", |p: &Profile| p.name.clone(), |_: ()| ());
        assert_eq!(store.child_count(), 1);
        assert_eq!(store.registrar().observer_count(Field::STATE), 1);
        drop(kept);
        assert_eq!(store.child_count(), 0);
        assert!(!store.release_scope(&ScopeKey::from("name")));

        // Writes after the drop reach no one.
        assert!(writer.write(Profile { age: 1, ..profile() }).notified());
    }

    #[test]
    fn rescoping_after_drop_builds_a_fresh_child() {
        let (store, _writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let first = store.scope("age", |p: &Profile| p.age, |_: ()| ()).id();
        let second = store.scope("age", |p: &Profile| p.age, |_: ()| ());
        assert_ne!(first, second.id());
        assert_eq!(store.child_count(), 1);
    }

    #[test]
    fn read_field_maps_live_projection() {
        let (store, writer) = Container::<Profile, ()>::root(profile(), |_| {});
        let name = store.scope("name", |p: &Profile| p.name.clone(), |_: ()| ());
        writer.update(|p| p.name = "grace".into());
        assert_eq!(name.read_field(Field::new("len"), |n: &String| n.len()), 5);
        assert_eq!(store.read_field(Field::new("age"), |p: &Profile| p.age), 36);
    }

    #[test]
    fn scope_key_display() {
        assert_eq!(ScopeKey::from("todos").to_string(), "todos");
        assert_eq!(ScopeKey::from(NavigationId::root()).to_string(), "root");
    }
}
