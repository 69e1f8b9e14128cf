//! Error types for compositor domain validation.

use thiserror::Error;

/// Errors returned while constructing compositor domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompositorDomainError {
    /// The mount prefix is empty.
    #[error("mount prefix must not be empty")]
    EmptyPrefix,

    /// The mount prefix does not match `^[a-z][a-z0-9_]*$`.
    #[error(
        "mount prefix '{0}' is invalid (must start with a lowercase letter and contain only lowercase alphanumerics and underscores)"
    )]
    InvalidPrefix(String),

    /// The mount prefix exceeds the 64-character limit.
    #[error("mount prefix exceeds 64 character limit: {0}")]
    PrefixTooLong(String),

    /// A process command is empty after trimming.
    #[error("process command must not be empty")]
    EmptyCommand,
}
