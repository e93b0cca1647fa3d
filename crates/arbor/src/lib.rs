#![forbid(unsafe_code)]

//! Arbor public facade crate.
//!
//! Observable state trees: identity-aware equality, containers that notify
//! only on real change, and scoped children keyed by navigation identity.

pub use arbor_core as core;
#[cfg(feature = "runtime")]
pub use arbor_runtime as runtime;

pub mod prelude {
    pub use arbor_core as core;
    pub use arbor_core::{
        HasIdentity, IdentityEq, IdentityToken, NavigationId, Presentable, StableId,
        is_identity_equal,
    };

    #[cfg(feature = "runtime")]
    pub use arbor_runtime as runtime;
    #[cfg(feature = "runtime")]
    pub use arbor_runtime::{
        Binding, Container, ContainerConfig, Field, ObservableState, Observer, WriteOrigin,
        Writer,
    };
}
