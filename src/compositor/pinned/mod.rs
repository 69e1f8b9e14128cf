//! Pinned servers mounted by every compositor.
//!
//! They are ordinary in-process tool servers mounted through the normal
//! mount path under reserved prefixes, and call back into the compositor
//! through a weak reference.

mod admin;
mod meta;
mod resources;

pub use admin::AdminServer;
pub use meta::MetaServer;
pub use resources::{
    BlockContent, DEFAULT_MAX_BYTES, ListSubscriptionSummary, ReadBlocksResult, ResourceEntry,
    ResourceReadResult, ResourceTemplateEntry, ResourcesConnector, ResourcesServer,
    SUBSCRIPTIONS_URI, SubscriptionSummary, SubscriptionsIndex, TruncatedBlock, WindowInfo,
    WindowedPart, window_blocks, window_parts,
};

use crate::compositor::ports::{SessionError, SessionResult};
use crate::compositor::services::{Compositor, CompositorError, WeakCompositor};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

fn parse_args<T>(payload: Value) -> SessionResult<T>
where
    T: DeserializeOwned,
{
    let normalised = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(normalised).map_err(|err| SessionError::InvalidPayload(err.to_string()))
}

fn to_json<T>(value: &T) -> SessionResult<Value>
where
    T: Serialize,
{
    serde_json::to_value(value).map_err(SessionError::runtime)
}

fn upgrade(compositor: &WeakCompositor) -> SessionResult<Compositor> {
    compositor.upgrade().ok_or(SessionError::Closed)
}

fn tool_error(err: &CompositorError) -> SessionError {
    SessionError::tool(err.to_string())
}
