//! `compositor_admin`: optional mutation surface for callers.

use super::{parse_args, to_json, tool_error, upgrade};
use crate::compositor::domain::{ADMIN_PREFIX, MountSnapshot, MountState, ServerInfo, ToolDescriptor};
use crate::compositor::ports::{SessionError, SessionResult, ToolServer};
use crate::compositor::services::WeakCompositor;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnmountArgs {
    prefix: String,
}

/// Administration server mounted under `compositor_admin` when enabled.
///
/// Operations: `unmount` (pinned prefixes are rejected) and `list_failed`.
#[derive(Debug)]
pub struct AdminServer {
    compositor: WeakCompositor,
}

impl AdminServer {
    /// Creates the server.
    #[must_use]
    pub const fn new(compositor: WeakCompositor) -> Self {
        Self { compositor }
    }
}

#[async_trait]
impl ToolServer for AdminServer {
    fn info(&self) -> ServerInfo {
        ServerInfo::new(ADMIN_PREFIX, env!("CARGO_PKG_VERSION"))
            .with_instructions("Unmount servers and inspect failed mounts.")
            .with_tools([
                ToolDescriptor::new("unmount", "Unmount a non-pinned server"),
                ToolDescriptor::new("list_failed", "Mounts whose handshake failed"),
            ])
    }

    async fn call_tool(&self, name: &str, payload: Value) -> SessionResult<Value> {
        let compositor = upgrade(&self.compositor)?;
        match name {
            "unmount" => {
                let args: UnmountArgs = parse_args(payload)?;
                compositor
                    .unmount(&args.prefix)
                    .await
                    .map_err(|err| tool_error(&err))?;
                Ok(json!({ "ok": true }))
            }
            "list_failed" => {
                let failed: Vec<MountSnapshot> = compositor
                    .list()
                    .into_iter()
                    .filter(|snapshot| snapshot.state == MountState::Failed)
                    .collect();
                to_json(&failed)
            }
            other => Err(SessionError::UnknownOperation(other.to_owned())),
        }
    }
}
