//! Handshake metadata and resource value objects reported by child servers.

use serde::{Deserialize, Serialize};

/// Resource features a child server advertises during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCapabilities {
    /// The server accepts per-resource subscriptions.
    pub subscribe: bool,
    /// The server reports resource list changes.
    pub list_changed: bool,
}

/// Metadata for one operation a child server exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unprefixed operation name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

impl ToolDescriptor {
    /// Creates a tool descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Result of a successful child handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server-reported name.
    pub name: String,
    /// Server-reported version.
    pub version: String,
    /// Optional usage instructions.
    pub instructions: Option<String>,
    /// Operations the server exposes.
    pub tools: Vec<ToolDescriptor>,
    /// Resource capabilities, or `None` when the server exposes no
    /// resources.
    pub resources: Option<ResourceCapabilities>,
}

impl ServerInfo {
    /// Creates handshake metadata without tools or resources.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
            tools: Vec::new(),
            resources: None,
        }
    }

    /// Sets usage instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Replaces the tool list.
    #[must_use]
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        self.tools = tools.into_iter().collect();
        self
    }

    /// Advertises resource capabilities.
    #[must_use]
    pub const fn with_resources(mut self, capabilities: ResourceCapabilities) -> Self {
        self.resources = Some(capabilities);
        self
    }
}

/// A resource listed by a child server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Unprefixed resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Optional MIME type.
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    /// Creates a resource descriptor without a MIME type.
    #[must_use]
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            mime_type: None,
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A parameterised resource family listed by a child server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// RFC 6570 URI template.
    pub uri_template: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional MIME type of matching resources.
    pub mime_type: Option<String>,
}

impl ResourceTemplate {
    /// Creates a template without description or MIME type.
    #[must_use]
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One content part returned when reading a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceContents {
    /// UTF-8 text content.
    Text {
        /// Resource URI.
        uri: String,
        /// Optional MIME type.
        mime_type: Option<String>,
        /// Text body.
        text: String,
    },
    /// Binary content, base64 encoded.
    Blob {
        /// Resource URI.
        uri: String,
        /// Optional MIME type.
        mime_type: Option<String>,
        /// Base64 body.
        blob: String,
    },
}

impl ResourceContents {
    /// Creates a text part without a MIME type.
    #[must_use]
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            uri: uri.into(),
            mime_type: None,
            text: text.into(),
        }
    }

    /// Returns the part's URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Text { uri, .. } | Self::Blob { uri, .. } => uri,
        }
    }

    /// Returns the part's MIME type.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Text { mime_type, .. } | Self::Blob { mime_type, .. } => mime_type.as_deref(),
        }
    }

    /// Returns the bytes windowing operates on: UTF-8 for text, the base64
    /// string for blobs.
    #[must_use]
    pub fn window_bytes(&self) -> &[u8] {
        match self {
            Self::Text { text, .. } => text.as_bytes(),
            Self::Blob { blob, .. } => blob.as_bytes(),
        }
    }

    /// Returns whether the part is text.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}
