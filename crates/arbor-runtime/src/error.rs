#![forbid(unsafe_code)]

//! Runtime errors.
//!
//! Container operations are total; these errors only surface from the
//! `try_*` entry points and the low-level bracket API. The infallible
//! counterparts log the error and degrade gracefully.

use thiserror::Error;

use crate::container::ScopeKey;
use crate::registrar::Field;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("mutation bracket for `{field}` closed without a matching open")]
    UnbalancedMutation { field: Field },

    #[error("write nested {depth} levels deep inside notification dispatch (limit {limit})")]
    ReentrancyLimit { depth: usize, limit: usize },

    #[error("scope `{scope}` outlived its parent container")]
    Detached { scope: ScopeKey },
}
