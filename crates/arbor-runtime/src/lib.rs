#![forbid(unsafe_code)]

//! Runtime: observation registrar, containers, scoping, and bindings.
//!
//! # Architecture
//!
//! - [`registrar`]: field-level dependency tracking and mutation brackets.
//! - [`container`]: root containers, their [`Writer`](container::Writer), and
//!   scoped children projecting part of a parent's state.
//! - [`binding`]: two-way accessors that write by dispatching actions.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`): a container tree is
//! confined to the thread that created it, and notifications fire
//! synchronously on that thread.

pub mod binding;
pub mod config;
pub mod container;
pub mod error;
pub mod registrar;
pub mod state;

pub use binding::Binding;
pub use config::ContainerConfig;
pub use container::{Container, ScopeKey, WeakWriter, WriteOutcome, Writer};
pub use error::{Result, RuntimeError};
pub use registrar::{
    Change, Field, ObservationRegistrar, Observer, RegistrarPhase, WriteOrigin, untracked,
};
pub use state::ObservableState;
