//! `compositor_meta`: read-only introspection of the mount set.

use super::{parse_args, to_json, upgrade};
use crate::compositor::domain::{META_PREFIX, ServerInfo, ToolDescriptor};
use crate::compositor::ports::{SessionError, SessionResult, ToolServer};
use crate::compositor::services::WeakCompositor;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrefixArgs {
    prefix: String,
}

/// Introspection server mounted under `compositor_meta`.
///
/// Operations: `list_mounts`, `mount_state`, `list_tools`,
/// `teardown_failures`.
#[derive(Debug)]
pub struct MetaServer {
    compositor: WeakCompositor,
}

impl MetaServer {
    /// Creates the server.
    #[must_use]
    pub const fn new(compositor: WeakCompositor) -> Self {
        Self { compositor }
    }
}

#[async_trait]
impl ToolServer for MetaServer {
    fn info(&self) -> ServerInfo {
        ServerInfo::new(META_PREFIX, env!("CARGO_PKG_VERSION"))
            .with_instructions("Inspect mounted servers, their states, and their tools.")
            .with_tools([
                ToolDescriptor::new("list_mounts", "Snapshot every registered mount"),
                ToolDescriptor::new("mount_state", "State of one mount"),
                ToolDescriptor::new("list_tools", "Qualified tools of active mounts"),
                ToolDescriptor::new("teardown_failures", "Teardown failures observed so far"),
            ])
    }

    async fn call_tool(&self, name: &str, payload: Value) -> SessionResult<Value> {
        let compositor = upgrade(&self.compositor)?;
        match name {
            "list_mounts" => to_json(&compositor.list()),
            "mount_state" => {
                let args: PrefixArgs = parse_args(payload)?;
                let state = compositor.mount_state(&args.prefix).ok_or_else(|| {
                    SessionError::tool(format!("unknown mount: {}", args.prefix))
                })?;
                Ok(json!({ "prefix": args.prefix, "state": state }))
            }
            "list_tools" => to_json(&compositor.tools()),
            "teardown_failures" => to_json(&compositor.teardown_failures()),
            other => Err(SessionError::UnknownOperation(other.to_owned())),
        }
    }
}
