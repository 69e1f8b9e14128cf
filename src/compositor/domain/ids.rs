//! Identifier and validated-prefix types for mounts.

use super::CompositorDomainError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Maximum length for a mount prefix.
const MAX_PREFIX_LENGTH: usize = 64;

/// Prefix of the pinned resources aggregator.
pub const RESOURCES_PREFIX: &str = "resources";

/// Prefix of the pinned introspection server.
pub const META_PREFIX: &str = "compositor_meta";

/// Prefix of the optional pinned administration server.
pub const ADMIN_PREFIX: &str = "compositor_admin";

/// Unique identifier for one mount instance.
///
/// Two mounts registered under the same prefix at different times carry
/// different identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountId(Uuid);

impl MountId {
    /// Creates a new random mount identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for MountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Validated mount prefix.
///
/// Prefixes namespace a child server's operations as `{prefix}_{operation}`.
/// They must match `^[a-z][a-z0-9_]*$` and fit in 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MountPrefix(String);

impl MountPrefix {
    /// Creates a validated mount prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorDomainError`] when the value is empty, too long,
    /// or contains characters outside `[a-z0-9_]` (or starts with anything
    /// but a lowercase letter).
    pub fn new(value: impl Into<String>) -> Result<Self, CompositorDomainError> {
        let candidate = value.into();

        let mut characters = candidate.chars();
        let Some(first) = characters.next() else {
            return Err(CompositorDomainError::EmptyPrefix);
        };

        let is_valid = first.is_ascii_lowercase()
            && characters.all(|character| {
                character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
            });
        if !is_valid {
            return Err(CompositorDomainError::InvalidPrefix(candidate));
        }

        if candidate.len() > MAX_PREFIX_LENGTH {
            return Err(CompositorDomainError::PrefixTooLong(candidate));
        }

        Ok(Self(candidate))
    }

    /// Returns the prefix as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether the prefix belongs to a pinned server.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        matches!(self.as_str(), RESOURCES_PREFIX | META_PREFIX | ADMIN_PREFIX)
    }
}

impl TryFrom<String> for MountPrefix {
    type Error = CompositorDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MountPrefix> for String {
    fn from(value: MountPrefix) -> Self {
        value.0
    }
}

impl AsRef<str> for MountPrefix {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for MountPrefix {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for MountPrefix {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
