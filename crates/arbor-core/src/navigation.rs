#![forbid(unsafe_code)]

//! Navigation identity: stable keys for chains of presented components.
//!
//! A [`NavigationId`] names a presented component by the full chain of
//! presenters leading back to the root:
//!
//! ```text
//! Root ─▶ Destination(presenter: Root, presented: List)
//!      ─▶ Destination(presenter: …List, presented: Detail#"42")
//! ```
//!
//! Each link records a [`ComponentId`] fingerprint (type, variant tag, stable
//! id) computed once from the presented value. Equality and hashing are
//! structural over the whole chain, so two stacks receive equal ids iff every
//! link matches. Appending the same kind of value from the same presenter
//! yields the same id, which is how a reconciler recognizes "still the same
//! screen" across state updates.
//!
//! # Known limitation
//!
//! Values with no stable id that share type and variant tag collide. Two such
//! values presented simultaneously from one presenter receive equal ids.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::identity::IdentityToken;

// ─── Presentable ─────────────────────────────────────────────────────────────

/// Application-declared identity of a value that may be presented.
pub trait Presentable: 'static {
    /// Active variant index for sum types.
    fn variant_tag(&self) -> Option<u32> {
        None
    }

    /// Stable application-defined identifier, if the value has one.
    fn stable_id(&self) -> Option<StableId> {
        None
    }
}

/// Application-defined stable identifier recorded in a [`ComponentId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StableId {
    /// An identity token carried by the value.
    Token(IdentityToken),
    /// Numeric identifier (database row, index, ...).
    Index(u64),
    /// String key.
    Key(String),
}

impl From<IdentityToken> for StableId {
    fn from(token: IdentityToken) -> Self {
        Self::Token(token)
    }
}

impl From<u64> for StableId {
    fn from(id: u64) -> Self {
        Self::Index(id)
    }
}

impl From<String> for StableId {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<&str> for StableId {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

// ─── ComponentId ─────────────────────────────────────────────────────────────

/// Type + variant + stable-id fingerprint of one presented value.
#[derive(Clone)]
pub struct ComponentId {
    type_id: TypeId,
    type_name: &'static str,
    variant_tag: Option<u32>,
    stable_id: Option<StableId>,
}

impl ComponentId {
    /// Fingerprint `value`.
    #[must_use]
    pub fn of<V: Presentable>(value: &V) -> Self {
        Self {
            type_id: TypeId::of::<V>(),
            type_name: type_name::<V>(),
            variant_tag: value.variant_tag(),
            stable_id: value.stable_id(),
        }
    }

    /// Type identity of the presented value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name (diagnostics only; not part of equality).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Active variant tag, if the value is a sum type.
    #[must_use]
    pub fn variant_tag(&self) -> Option<u32> {
        self.variant_tag
    }

    /// Stable identifier, if the value declared one.
    #[must_use]
    pub fn stable_id(&self) -> Option<&StableId> {
        self.stable_id.as_ref()
    }

    /// Whether this fingerprint describes a value of type `V`.
    #[must_use]
    pub fn is<V: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<V>()
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
            && self.variant_tag == other.variant_tag
            && self.stable_id == other.stable_id
    }
}

impl Eq for ComponentId {}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.variant_tag.hash(state);
        self.stable_id.hash(state);
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentId")
            .field("type", &self.type_name)
            .field("variant_tag", &self.variant_tag)
            .field("stable_id", &self.stable_id)
            .finish()
    }
}

// ─── NavigationId ────────────────────────────────────────────────────────────

/// Path naming a presented component by its chain of presenters.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub enum NavigationId {
    /// The root of every chain.
    #[default]
    Root,
    /// `presenter` presents a component fingerprinted by `presented`.
    Destination {
        presenter: Arc<NavigationId>,
        presented: ComponentId,
    },
}

impl NavigationId {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self::Root
    }

    /// Path for `value` presented by `self`.
    #[must_use]
    pub fn append<V: Presentable>(&self, value: &V) -> Self {
        self.append_component(ComponentId::of(value))
    }

    /// Path for an already-computed fingerprint presented by `self`.
    #[must_use]
    pub fn append_component(&self, presented: ComponentId) -> Self {
        Self::Destination {
            presenter: Arc::new(self.clone()),
            presented,
        }
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    /// Number of presentation links back to the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self;
        while let Self::Destination { presenter, .. } = cursor {
            depth += 1;
            cursor = presenter;
        }
        depth
    }

    /// The presenting path, or `None` at the root.
    #[must_use]
    pub fn presenter(&self) -> Option<&NavigationId> {
        match self {
            Self::Root => None,
            Self::Destination { presenter, .. } => Some(presenter),
        }
    }

    /// The fingerprint of the last presented component, or `None` at the root.
    #[must_use]
    pub fn presented(&self) -> Option<&ComponentId> {
        match self {
            Self::Root => None,
            Self::Destination { presented, .. } => Some(presented),
        }
    }

    /// Presented fingerprints ordered from the root outward.
    #[must_use]
    pub fn links(&self) -> Vec<&ComponentId> {
        let mut links = Vec::with_capacity(self.depth());
        let mut cursor = self;
        while let Self::Destination {
            presenter,
            presented,
        } = cursor
        {
            links.push(presented);
            cursor = presenter;
        }
        links.reverse();
        links
    }

    /// Whether `self` is `ancestor` or lies beneath it.
    #[must_use]
    pub fn descends_from(&self, ancestor: &NavigationId) -> bool {
        let mut cursor = self;
        loop {
            if cursor == ancestor {
                return true;
            }
            match cursor {
                Self::Root => return false,
                Self::Destination { presenter, .. } => cursor = presenter,
            }
        }
    }
}

impl fmt::Debug for NavigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NavigationId(root")?;
        for link in self.links() {
            write!(f, " > {}", short_type_name(link.type_name))?;
            if let Some(tag) = link.variant_tag {
                write!(f, "#{tag}")?;
            }
            if let Some(id) = &link.stable_id {
                write!(f, "[{id:?}]")?;
            }
        }
        f.write_str(")")
    }
}

fn short_type_name(name: &'static str) -> &'static str {
    name.rsplit("::").next().unwrap_or(name)
}

// ─── Stack reconciliation ────────────────────────────────────────────────────

/// Result of reconciling two ordered lists of navigation ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDiff {
    /// Ids present in both lists, in new-list order.
    pub retained: Vec<NavigationId>,
    /// Ids only in the new list, in new-list order.
    pub inserted: Vec<NavigationId>,
    /// Ids only in the old list, in old-list order.
    pub removed: Vec<NavigationId>,
}

impl StackDiff {
    /// Whether the two lists held the same set of ids.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Reconcile `old` against `new` by id.
#[must_use]
pub fn diff_stacks(old: &[NavigationId], new: &[NavigationId]) -> StackDiff {
    let mut diff = StackDiff::default();
    for id in new {
        if old.contains(id) {
            diff.retained.push(id.clone());
        } else {
            diff.inserted.push(id.clone());
        }
    }
    diff.removed = old.iter().filter(|id| !new.contains(id)).cloned().collect();
    diff
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
