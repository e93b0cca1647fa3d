#![forbid(unsafe_code)]

//! Identity equality: deciding whether two state values are the same entity.
//!
//! This is **not** value equality. The algorithm is:
//!
//! 1. If the type carries an identity ([`HasIdentity`]), compare tokens and
//!    return the result, regardless of any other field content.
//! 2. If the type is an ordered or keyed collection ([`IdentityCollection`]),
//!    require equal length and identity-equal elements pairwise, in order.
//! 3. Otherwise return `false`. Two structurally identical values without an
//!    identity are *not* proven to be the same entity.
//!
//! Callers must treat `false` as "changed". The check is conservative and
//! never errors.
//!
//! # Capabilities
//!
//! Rust has no runtime type tests, so each state type opts into one of the
//! three behaviours explicitly:
//!
//! - implement [`HasIdentity`] (blanket `IdentityEq` by token),
//! - be a collection covered below (`Vec`, slices, arrays, `VecDeque`,
//!   `Option`, `BTreeMap`),
//! - or use [`impl_opaque_identity!`](crate::impl_opaque_identity) to declare
//!   the type identity-less.

use std::collections::{BTreeMap, VecDeque};

use crate::identity::{HasIdentity, IdentityToken};

/// Capability queried by identity comparison.
pub trait IdentityEq {
    /// Token reported by [`identity_of`](crate::identity::identity_of).
    fn identity_token(&self) -> IdentityToken {
        IdentityToken::INERT
    }

    /// Whether `self` and `other` are the same logical entity.
    fn identity_eq(&self, other: &Self) -> bool;
}

impl<T: HasIdentity> IdentityEq for T {
    fn identity_token(&self) -> IdentityToken {
        self.identity()
    }

    fn identity_eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

/// Free-function form of [`IdentityEq::identity_eq`].
#[must_use]
pub fn is_identity_equal<T: IdentityEq + ?Sized>(lhs: &T, rhs: &T) -> bool {
    lhs.identity_eq(rhs)
}

// ─── Collections ─────────────────────────────────────────────────────────────

/// Ordered collection compared element-wise by identity.
pub trait IdentityCollection {
    /// Element type; compared with [`IdentityEq`].
    type Element: IdentityEq;

    /// Number of elements.
    fn identity_len(&self) -> usize;

    /// Elements in comparison order.
    fn identity_elements(&self) -> impl Iterator<Item = &Self::Element>;
}

/// Equal length and pairwise identity-equal elements.
#[must_use]
pub fn collection_identity_eq<C: IdentityCollection + ?Sized>(lhs: &C, rhs: &C) -> bool {
    lhs.identity_len() == rhs.identity_len()
        && lhs
            .identity_elements()
            .zip(rhs.identity_elements())
            .all(|(a, b)| a.identity_eq(b))
}

impl<T: IdentityEq> IdentityCollection for [T] {
    type Element = T;

    fn identity_len(&self) -> usize {
        self.len()
    }

    fn identity_elements(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }
}

impl<T: IdentityEq> IdentityCollection for Vec<T> {
    type Element = T;

    fn identity_len(&self) -> usize {
        self.len()
    }

    fn identity_elements(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }
}

impl<T: IdentityEq, const N: usize> IdentityCollection for [T; N] {
    type Element = T;

    fn identity_len(&self) -> usize {
        N
    }

    fn identity_elements(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }
}

impl<T: IdentityEq> IdentityCollection for VecDeque<T> {
    type Element = T;

    fn identity_len(&self) -> usize {
        self.len()
    }

    fn identity_elements(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }
}

/// `Option` behaves as a collection of length zero or one: two `None`s are
/// identity-equal, `Some` vs `None` is not.
impl<T: IdentityEq> IdentityCollection for Option<T> {
    type Element = T;

    fn identity_len(&self) -> usize {
        usize::from(self.is_some())
    }

    fn identity_elements(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }
}

impl<T: IdentityEq> IdentityEq for [T] {
    fn identity_eq(&self, other: &Self) -> bool {
        collection_identity_eq(self, other)
    }
}

impl<T: IdentityEq> IdentityEq for Vec<T> {
    fn identity_eq(&self, other: &Self) -> bool {
        collection_identity_eq(self, other)
    }
}

impl<T: IdentityEq, const N: usize> IdentityEq for [T; N] {
    fn identity_eq(&self, other: &Self) -> bool {
        collection_identity_eq(self, other)
    }
}

impl<T: IdentityEq> IdentityEq for VecDeque<T> {
    fn identity_eq(&self, other: &Self) -> bool {
        collection_identity_eq(self, other)
    }
}

impl<T: IdentityEq> IdentityEq for Option<T> {
    fn identity_eq(&self, other: &Self) -> bool {
        collection_identity_eq(self, other)
    }
}

/// Keyed collections compare in key order: keys by `Eq`, values by identity.
impl<K: Eq, V: IdentityEq> IdentityEq for BTreeMap<K, V> {
    fn identity_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.identity_eq(vb))
    }
}

// ─── Opaque values ───────────────────────────────────────────────────────────

/// Declare types that carry no identity. Identity comparison between two
/// values of such a type is always `false`.
///
/// ```
/// use arbor_core::identity_eq::is_identity_equal;
///
/// #[derive(Clone, PartialEq)]
/// struct Point { x: i32, y: i32 }
/// arbor_core::impl_opaque_identity!(Point);
///
/// let p = Point { x: 1, y: 2 };
/// assert!(!is_identity_equal(&p, &p.clone()));
/// ```
#[macro_export]
macro_rules! impl_opaque_identity {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::identity_eq::IdentityEq for $ty {
                fn identity_eq(&self, _other: &Self) -> bool {
                    false
                }
            }
        )+
    };
}

impl_opaque_identity!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identity_of;

    #[derive(Clone, Debug)]
    struct Todo {
        id: IdentityToken,
        title: String,
    }

    impl HasIdentity for Todo {
        fn identity(&self) -> IdentityToken {
            self.id
        }
    }

    fn todo(title: &str) -> Todo {
        Todo {
            id: IdentityToken::new(),
            title: title.to_string(),
        }
    }

    #[test]
    fn identity_short_circuits_field_differences() {
        let a = todo("milk");
        let mut b = a.clone();
        b.title = "eggs".to_string();
        assert_ne!(a.title, b.title);
        assert!(is_identity_equal(&a, &b));
    }

    #[test]
    fn distinct_identities_are_not_equal() {
        let a = todo("milk");
        let b = Todo {
            id: IdentityToken::new(),
            title: a.title.clone(),
        };
        assert!(!is_identity_equal(&a, &b));
    }

    #[test]
    fn opaque_values_never_equal() {
        assert!(!is_identity_equal(&5, &5));
        assert!(!is_identity_equal(&String::from("x"), &String::from("x")));
        assert_eq!(identity_of(&5_i32), IdentityToken::INERT);
    }

    #[test]
    fn identity_of_uses_own_token() {
        let t = todo("a");
        assert_eq!(identity_of(&t), t.id);
    }

    #[test]
    fn vec_pairwise() {
        let a = todo("a");
        let b = todo("b");
        let left = vec![a.clone(), b.clone()];
        let same = vec![a.clone(), b.clone()];
        let swapped = vec![b.clone(), a.clone()];
        let shorter = vec![a.clone()];

        assert!(is_identity_equal(&left, &same));
        assert!(!is_identity_equal(&left, &swapped));
        assert!(!is_identity_equal(&left, &shorter));
    }

    #[test]
    fn empty_collections_are_equal() {
        let a: Vec<Todo> = Vec::new();
        let b: Vec<Todo> = Vec::new();
        assert!(is_identity_equal(&a, &b));
        // Even for element types without identity.
        assert!(is_identity_equal(&Vec::<i32>::new(), &Vec::<i32>::new()));
    }

    #[test]
    fn collections_of_opaque_values_are_not_equal() {
        assert!(!is_identity_equal(&vec![1, 2], &vec![1, 2]));
    }

    #[test]
    fn option_is_zero_or_one_element() {
        let a = todo("a");
        assert!(is_identity_equal(&None::<Todo>, &None));
        assert!(is_identity_equal(&Some(a.clone()), &Some(a.clone())));
        assert!(!is_identity_equal(&Some(a), &None));
    }

    #[test]
    fn nested_collections_recurse() {
        let a = todo("a");
        let b = todo("b");
        let left = vec![vec![a.clone()], vec![b.clone()]];
        let right = vec![vec![a.clone()], vec![b.clone()]];
        assert!(is_identity_equal(&left, &right));

        let right = vec![vec![a.clone()], vec![]];
        assert!(!is_identity_equal(&left, &right));
    }

    #[test]
    fn keyed_collections_compare_keys_and_values() {
        let a = todo("a");
        let b = todo("b");
        let mut left = BTreeMap::new();
        left.insert("x", a.clone());
        left.insert("y", b.clone());

        let right = left.clone();
        assert!(is_identity_equal(&left, &right));

        let mut renamed = BTreeMap::new();
        renamed.insert("x", a.clone());
        renamed.insert("z", b.clone());
        assert!(!is_identity_equal(&left, &renamed));
    }

    #[test]
    fn deque_and_array() {
        let a = todo("a");
        let left: VecDeque<Todo> = [a.clone()].into_iter().collect();
        let right: VecDeque<Todo> = [a.clone()].into_iter().collect();
        assert!(is_identity_equal(&left, &right));
        assert!(is_identity_equal(&[a.clone(), a.clone()], &[a.clone(), a]));
    }

    #[test]
    fn tagged_variants_differ() {
        #[derive(Clone)]
        enum Screen {
            List(IdentityToken),
            Detail(IdentityToken),
        }
        impl HasIdentity for Screen {
            fn identity(&self) -> IdentityToken {
                match self {
                    Self::List(id) => id.tagged(0),
                    Self::Detail(id) => id.tagged(1),
                }
            }
        }

        let shared = IdentityToken::new();
        assert!(!is_identity_equal(&Screen::List(shared), &Screen::Detail(shared)));
        assert!(is_identity_equal(&Screen::Detail(shared), &Screen::Detail(shared)));
    }
}
