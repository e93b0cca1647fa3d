#![forbid(unsafe_code)]

//! Identity tokens marking state values as "the same logical entity".
//!
//! An [`IdentityToken`] is an opaque, process-unique value with an optional
//! variant tag. Two state values carrying equal tokens are treated as the same
//! entity regardless of their field contents; this is what lets a container
//! skip notifications when a value is rebuilt without changing identity.
//!
//! # Invariants
//!
//! 1. Tokens are immutable. [`IdentityToken::tagged`] returns a copy.
//! 2. Two tokens are equal iff both the unique value and the tag match.
//! 3. [`IdentityToken::INERT`] is never returned by [`IdentityToken::new`].
//!
//! # Serialization
//!
//! With the `serde` feature, a token encodes as a unit placeholder and decodes
//! to a freshly allocated token. Identity is process-local and is not meant to
//! survive persistence.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::identity_eq::IdentityEq;

// ─── Token allocation ────────────────────────────────────────────────────────

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

// ─── IdentityToken ───────────────────────────────────────────────────────────

/// Opaque, process-unique identity with an optional variant tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityToken {
    unique: u64,
    tag: Option<u32>,
}

impl IdentityToken {
    /// Token shared by every value that carries no identity of its own.
    pub const INERT: Self = Self {
        unique: 0,
        tag: None,
    };

    /// Allocate a new, never-before-seen token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            unique: next_identity(),
            tag: None,
        }
    }

    /// The inert token. Equivalent to [`IdentityToken::INERT`].
    #[must_use]
    pub const fn inert() -> Self {
        Self::INERT
    }

    /// Copy of this token with the variant tag replaced.
    ///
    /// Sum types use this to distinguish variants that share one underlying
    /// identity.
    #[must_use]
    pub const fn tagged(self, tag: u32) -> Self {
        Self {
            unique: self.unique,
            tag: Some(tag),
        }
    }

    /// Copy of this token with the variant tag cleared.
    #[must_use]
    pub const fn untagged(self) -> Self {
        Self {
            unique: self.unique,
            tag: None,
        }
    }

    /// Variant tag, if any.
    #[must_use]
    pub const fn tag(&self) -> Option<u32> {
        self.tag
    }

    /// Raw unique value (for diagnostics).
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.unique
    }

    /// Whether this is the inert token (ignoring the tag).
    #[must_use]
    pub const fn is_inert(&self) -> bool {
        self.unique == 0
    }
}

impl Default for IdentityToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_inert(), self.tag) {
            (true, None) => f.write_str("IdentityToken(inert)"),
            (true, Some(tag)) => write!(f, "IdentityToken(inert#{tag})"),
            (false, None) => write!(f, "IdentityToken({})", self.unique),
            (false, Some(tag)) => write!(f, "IdentityToken({}#{tag})", self.unique),
        }
    }
}

// ─── HasIdentity ─────────────────────────────────────────────────────────────

/// Capability for state types that carry their own [`IdentityToken`].
///
/// Implementing this trait makes the type [`IdentityEq`] by token comparison.
/// Sum types should tag the token with the active variant:
///
/// ```
/// use arbor_core::identity::{HasIdentity, IdentityToken};
///
/// enum Destination {
///     Detail(IdentityToken),
///     Settings(IdentityToken),
/// }
///
/// impl HasIdentity for Destination {
///     fn identity(&self) -> IdentityToken {
///         match self {
///             Self::Detail(id) => id.tagged(0),
///             Self::Settings(id) => id.tagged(1),
///         }
///     }
/// }
/// ```
pub trait HasIdentity {
    /// The value's identity token.
    fn identity(&self) -> IdentityToken;
}

/// Identity of `value`: its own token when it has one, otherwise
/// [`IdentityToken::INERT`].
#[must_use]
pub fn identity_of<T: IdentityEq + ?Sized>(value: &T) -> IdentityToken {
    value.identity_token()
}

// ─── Serialization placeholder ───────────────────────────────────────────────

#[cfg(feature = "serde")]
impl serde::Serialize for IdentityToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for IdentityToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(Self::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
