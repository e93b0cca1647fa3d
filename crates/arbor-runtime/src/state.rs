#![forbid(unsafe_code)]

//! State values that can live inside a container.

use std::collections::{BTreeMap, VecDeque};

use arbor_core::identity_eq::IdentityEq;

use crate::registrar::Field;

/// A value a [`Container`](crate::container::Container) can hold.
///
/// Beyond identity comparison, a state type reports which of its named fields
/// differ from a replacement value. Each reported field gets its own mutation
/// bracket, so observers of untouched fields stay quiet. The default reports
/// none, and only [`Field::STATE`] fires.
pub trait ObservableState: IdentityEq + Clone + 'static {
    /// Fields whose value differs between `self` and `next`, in notification
    /// order.
    fn changed_fields(&self, next: &Self) -> Vec<Field> {
        let _ = next;
        Vec::new()
    }
}

/// Build a `changed_fields` result by comparing the listed fields with `!=`.
///
/// ```
/// use arbor_core::identity::{HasIdentity, IdentityToken};
/// use arbor_runtime::registrar::Field;
/// use arbor_runtime::state::ObservableState;
///
/// #[derive(Clone)]
/// struct Counter {
///     id: IdentityToken,
///     count: i64,
///     label: String,
/// }
///
/// impl HasIdentity for Counter {
///     fn identity(&self) -> IdentityToken {
///         self.id
///     }
/// }
///
/// impl ObservableState for Counter {
///     fn changed_fields(&self, next: &Self) -> Vec<Field> {
///         arbor_runtime::changed_fields!(self, next; count, label)
///     }
/// }
///
/// let a = Counter { id: IdentityToken::new(), count: 1, label: "a".into() };
/// let b = Counter { count: 2, ..a.clone() };
/// assert_eq!(a.changed_fields(&b), vec![Field::new("count")]);
/// ```
#[macro_export]
macro_rules! changed_fields {
    ($prev:expr, $next:expr; $($field:ident),+ $(,)?) => {{
        let mut changed = ::std::vec::Vec::new();
        $(
            if $prev.$field != $next.$field {
                changed.push($crate::registrar::Field::new(stringify!($field)));
            }
        )+
        changed
    }};
}

macro_rules! leaf_state {
    ($($ty:ty),+ $(,)?) => {
        $( impl ObservableState for $ty {} )+
    };
}

leaf_state!(
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

impl<T: ObservableState> ObservableState for Vec<T> {}

impl<T: ObservableState> ObservableState for VecDeque<T> {}

impl<T: ObservableState> ObservableState for Option<T> {}

impl<K: Ord + Clone + 'static, V: ObservableState> ObservableState for BTreeMap<K, V> {}
