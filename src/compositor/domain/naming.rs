//! Tool name qualification for the unified namespace.

use super::MountPrefix;
use serde::{Deserialize, Serialize};

/// Separator between a mount prefix and an operation name.
pub const NAME_SEPARATOR: char = '_';

/// Builds the qualified name `{prefix}_{tool}`.
#[must_use]
pub fn qualify(prefix: &MountPrefix, tool: &str) -> String {
    format!("{prefix}{NAME_SEPARATOR}{tool}")
}

/// A tool exposed through the unified namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedTool {
    /// Qualified name, `{prefix}_{tool}`.
    pub name: String,
    /// Owning mount prefix.
    pub prefix: MountPrefix,
    /// Unprefixed tool name.
    pub tool: String,
    /// Tool description reported by the child.
    pub description: String,
}

/// Splits `qualified` into a prefix and operation when it starts with
/// `{prefix}_`.
///
/// Returns `None` when the prefix does not match or the operation part is
/// empty.
#[must_use]
pub fn strip_prefix<'a>(qualified: &'a str, prefix: &MountPrefix) -> Option<&'a str> {
    qualified
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_prefix(NAME_SEPARATOR))
        .filter(|operation| !operation.is_empty())
}
