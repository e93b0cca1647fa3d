#![forbid(unsafe_code)]

//! Container configuration.

use std::borrow::Cow;

use crate::container::ScopeKey;

/// Default bound on writes nested inside notification dispatch.
pub const DEFAULT_REENTRANCY_LIMIT: usize = 32;

/// Configuration shared by a root container and the scopes derived from it.
///
/// Scoped children inherit their parent's configuration, with the label
/// extended by the scope key (`root.todos.detail`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Label reported in tracing events.
    pub label: Cow<'static, str>,
    /// Maximum depth of writes issued from inside observer callbacks.
    /// A write at this depth is rejected.
    pub reentrancy_limit: usize,
}

impl ContainerConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            label: Cow::Borrowed("root"),
            reentrancy_limit: DEFAULT_REENTRANCY_LIMIT,
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the reentrancy limit.
    #[must_use]
    pub fn with_reentrancy_limit(mut self, limit: usize) -> Self {
        self.reentrancy_limit = limit;
        self
    }

    /// Configuration for a child scoped under `key`.
    #[must_use]
    pub fn child(&self, key: &ScopeKey) -> Self {
        Self {
            label: Cow::Owned(format!("{}.{key}", self.label)),
            reentrancy_limit: self.reentrancy_limit,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::new()
    }
}
