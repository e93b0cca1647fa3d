#![forbid(unsafe_code)]

//! Core: identity tokens, identity equality, and navigation identity.

pub mod identity;
pub mod identity_eq;
pub mod navigation;

pub use identity::{HasIdentity, IdentityToken, identity_of};
pub use identity_eq::{IdentityCollection, IdentityEq, collection_identity_eq, is_identity_equal};
pub use navigation::{ComponentId, NavigationId, Presentable, StableId, StackDiff, diff_stacks};
