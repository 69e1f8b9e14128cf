//! `resources`: aggregated view over the resources of every mounted server.
//!
//! The server lists resources and resource templates across mounts, reads
//! them either as one byte window or block by block, and keeps a book of
//! per-resource and list-change subscriptions. The book is published as the `resources://subscriptions`
//! resource and re-announced whenever it changes.

use super::{parse_args, to_json, upgrade};
use crate::compositor::adapters::TaskResource;
use crate::compositor::adapters::memory::InProcessConnector;
use crate::compositor::domain::{
    ChangeEvent, MountChange, MountState, Notification, RESOURCES_PREFIX, ResourceCapabilities,
    ResourceContents, ResourceDescriptor, ResourceTemplate, ServerInfo, ToolDescriptor,
};
use crate::compositor::ports::{
    ChangeNotifier, ChildConnector, ChildSession, ConnectedChild, SessionError, SessionResult,
    ToolServer,
};
use crate::compositor::services::{Compositor, ResourceScope, WeakCompositor};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// URI of the subscription index resource.
pub const SUBSCRIPTIONS_URI: &str = "resources://subscriptions";

/// Default `max_bytes` for `read` and `read_blocks` when the caller omits
/// it.
pub const DEFAULT_MAX_BYTES: usize = 8 * 1024;

/// One resource in an aggregated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Prefix of the mount exposing the resource.
    pub server: String,
    /// Unprefixed resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Optional MIME type.
    pub mime_type: Option<String>,
}

/// One resource template in an aggregated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTemplateEntry {
    /// Prefix of the mount exposing the template.
    pub server: String,
    /// The template as the child reported it.
    pub template: ResourceTemplate,
}

/// A block returned only in part by `read_blocks`.
///
/// Offsets are bytes within the block: UTF-8 bytes for text, base64
/// characters for blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "truncated")]
pub struct TruncatedBlock {
    /// Index of the block among the parts the child returned.
    pub block_index: usize,
    /// Offset where the returned slice starts.
    pub started_at: usize,
    /// Offset where the returned slice ends, exclusive.
    pub ended_at: usize,
    /// Size of the whole block.
    pub full_size: usize,
    /// The returned slice, with the block's URI and MIME type.
    pub content: ResourceContents,
}

/// One entry of a `read_blocks` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockContent {
    /// A block cut by the start offset or the byte budget.
    Truncated(TruncatedBlock),
    /// A block returned whole.
    Full(ResourceContents),
}

/// Result of `read_blocks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBlocksResult {
    /// Blocks in order, starting at the requested block.
    pub blocks: Vec<BlockContent>,
}

/// Requested window of a windowed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    /// Byte offset across all parts.
    pub start_offset: usize,
    /// Byte budget; `0` means unbounded.
    pub max_bytes: usize,
}

/// One content part trimmed to the requested window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowedPart {
    /// Slice of a text part.
    Text {
        /// Resource URI.
        uri: String,
        /// Optional MIME type.
        mime_type: Option<String>,
        /// Returned text, lossily decoded when the window splits a
        /// character.
        text: String,
        /// Size of the whole part in bytes.
        total_bytes: usize,
        /// Bytes returned from this part.
        bytes_returned: usize,
    },
    /// Slice of a blob part's base64 string.
    Blob {
        /// Resource URI.
        uri: String,
        /// Optional MIME type.
        mime_type: Option<String>,
        /// Returned base64 characters.
        blob: String,
        /// Size of the whole base64 string.
        total_bytes: usize,
        /// Bytes returned from this part.
        bytes_returned: usize,
    },
}

impl WindowedPart {
    /// Bytes returned from this part.
    #[must_use]
    pub const fn bytes_returned(&self) -> usize {
        match self {
            Self::Text { bytes_returned, .. } | Self::Blob { bytes_returned, .. } => {
                *bytes_returned
            }
        }
    }
}

/// Result of a windowed `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReadResult {
    /// Prefix of the mount the resource was read from.
    pub server: String,
    /// Unprefixed resource URI.
    pub uri: String,
    /// Requested window.
    pub window: WindowInfo,
    /// Parts that intersect the window.
    pub parts: Vec<WindowedPart>,
    /// Number of parts the child returned.
    pub total_parts: usize,
}

/// One per-resource subscription in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    /// Mount prefix.
    pub server: String,
    /// Unprefixed resource URI.
    pub uri: String,
    /// Whether the server is currently mounted.
    pub present: bool,
    /// Whether the child accepted the subscription and the server is
    /// mounted.
    pub active: bool,
    /// Last subscription error, if any.
    pub last_error: Option<String>,
}

/// One list-change subscription in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSubscriptionSummary {
    /// Mount prefix.
    pub server: String,
    /// Whether the server is currently mounted.
    pub present: bool,
}

/// Body of the `resources://subscriptions` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsIndex {
    /// Per-resource subscriptions.
    pub subscriptions: Vec<SubscriptionSummary>,
    /// Servers whose list changes are followed.
    pub list_subscriptions: Vec<ListSubscriptionSummary>,
}

/// Trims `contents` to `max_bytes` bytes starting at `start_offset`.
///
/// The offset is global: a cursor advances over every part in order, and a
/// part contributes only the bytes that fall inside the window. Text is
/// sliced on bytes and decoded lossily; blobs are sliced on their base64
/// string. A `max_bytes` of `0` returns everything after the offset.
#[must_use]
pub fn window_parts(
    contents: &[ResourceContents],
    start_offset: usize,
    max_bytes: usize,
) -> Vec<WindowedPart> {
    let mut remaining = (max_bytes > 0).then_some(max_bytes);
    let mut cursor = 0_usize;
    let mut parts = Vec::new();
    for part in contents {
        if remaining == Some(0) {
            break;
        }
        let bytes = part.window_bytes();
        let total = bytes.len();
        let start = start_offset.saturating_sub(cursor).min(total);
        let available = total.saturating_sub(start);
        let take = remaining.map_or(available, |budget| budget.min(available));
        cursor = cursor.saturating_add(total);
        if take == 0 {
            continue;
        }
        let chunk = bytes
            .get(start..start.saturating_add(take))
            .unwrap_or_default();
        let body = String::from_utf8_lossy(chunk).into_owned();
        let uri = part.uri().to_owned();
        let mime_type = part.mime_type().map(str::to_owned);
        parts.push(if part.is_text() {
            WindowedPart::Text {
                uri,
                mime_type,
                text: body,
                total_bytes: total,
                bytes_returned: take,
            }
        } else {
            WindowedPart::Blob {
                uri,
                mime_type,
                blob: body,
                total_bytes: total,
                bytes_returned: take,
            }
        });
        if let Some(budget) = remaining.as_mut() {
            *budget = budget.saturating_sub(take);
        }
    }
    parts
}

/// Returns blocks of `contents` from `start_block` on, up to `max_bytes`.
///
/// Reading starts `start_offset` bytes into `start_block` and continues
/// with whole blocks until the budget runs out. A block that is returned
/// only in part, at either end, is wrapped in a [`TruncatedBlock`] so the
/// caller can resume from `block_index` and `ended_at`. Blocks before
/// `start_block` and a start offset past the end of its block are skipped.
/// A `max_bytes` of `0` returns everything from the start position.
#[must_use]
pub fn window_blocks(
    contents: &[ResourceContents],
    start_block: usize,
    start_offset: usize,
    max_bytes: usize,
) -> Vec<BlockContent> {
    let budget = (max_bytes > 0).then_some(max_bytes);
    let mut taken = 0_usize;
    let mut blocks = Vec::new();
    for (index, part) in contents.iter().enumerate().skip(start_block) {
        let bytes = part.window_bytes();
        let size = bytes.len();
        let started_at = if index == start_block { start_offset } else { 0 };
        if started_at >= size {
            continue;
        }
        let available = size.saturating_sub(started_at);
        let take = budget.map_or(available, |limit| {
            available.min(limit.saturating_sub(taken))
        });
        if take == available && started_at == 0 {
            blocks.push(BlockContent::Full(part.clone()));
        } else {
            let ended_at = started_at.saturating_add(take);
            let slice = bytes.get(started_at..ended_at).unwrap_or_default();
            blocks.push(BlockContent::Truncated(TruncatedBlock {
                block_index: index,
                started_at,
                ended_at,
                full_size: size,
                content: with_body(part, String::from_utf8_lossy(slice).into_owned()),
            }));
        }
        taken = taken.saturating_add(take);
        if budget.is_some_and(|limit| taken >= limit) {
            break;
        }
    }
    blocks
}

fn with_body(part: &ResourceContents, body: String) -> ResourceContents {
    match part {
        ResourceContents::Text { uri, mime_type, .. } => ResourceContents::Text {
            uri: uri.clone(),
            mime_type: mime_type.clone(),
            text: body,
        },
        ResourceContents::Blob { uri, mime_type, .. } => ResourceContents::Blob {
            uri: uri.clone(),
            mime_type: mime_type.clone(),
            blob: body,
        },
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    uri_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadArgs {
    server: String,
    uri: String,
    #[serde(default)]
    start_offset: usize,
    #[serde(default = "default_max_bytes")]
    max_bytes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadBlocksArgs {
    server: String,
    uri: String,
    #[serde(default)]
    start_block: usize,
    #[serde(default)]
    start_offset: usize,
    #[serde(default = "default_max_bytes")]
    max_bytes: usize,
}

const fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceArgs {
    server: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerArgs {
    server: String,
}

#[derive(Debug, Clone, Copy)]
enum Feature {
    Subscribe,
    ListChanged,
}

impl Feature {
    const fn supported_by(self, capabilities: ResourceCapabilities) -> bool {
        match self {
            Self::Subscribe => capabilities.subscribe,
            Self::ListChanged => capabilities.list_changed,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "resource subscriptions",
            Self::ListChanged => "resource list change notifications",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SubscriptionRecord {
    active: bool,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Book {
    notifier: Option<ChangeNotifier>,
    subscriptions: IndexMap<(String, String), SubscriptionRecord>,
    list_subscriptions: BTreeSet<String>,
}

/// Aggregating resource server mounted under `resources`.
///
/// Operations: `list`, `list_resource_templates`, `read`, `read_blocks`,
/// `subscribe`, `unsubscribe`, `list_subscriptions`,
/// `subscribe_list_changes`, `unsubscribe_list_changes`.
#[derive(Debug)]
pub struct ResourcesServer {
    compositor: WeakCompositor,
    book: Mutex<Book>,
}

impl ResourcesServer {
    /// Creates the server.
    #[must_use]
    pub fn new(compositor: WeakCompositor) -> Self {
        Self {
            compositor,
            book: Mutex::new(Book::default()),
        }
    }

    fn lock_book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the subscription book, joined with the live mount set.
    #[must_use]
    pub fn index(&self) -> SubscriptionsIndex {
        let present: HashSet<String> = self
            .compositor
            .upgrade()
            .map(|compositor| {
                compositor
                    .prefixes()
                    .into_iter()
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let book = self.lock_book();
        SubscriptionsIndex {
            subscriptions: book
                .subscriptions
                .iter()
                .map(|((server, uri), record)| {
                    let is_present = present.contains(server);
                    SubscriptionSummary {
                        server: server.clone(),
                        uri: uri.clone(),
                        present: is_present,
                        active: record.active && is_present,
                        last_error: record.last_error.clone(),
                    }
                })
                .collect(),
            list_subscriptions: book
                .list_subscriptions
                .iter()
                .map(|server| ListSubscriptionSummary {
                    server: server.clone(),
                    present: present.contains(server),
                })
                .collect(),
        }
    }

    /// Applies one compositor notification to the subscription book.
    ///
    /// An unmounted server loses its subscriptions. A change from a
    /// followed resource or list re-announces the index.
    pub fn observe(&self, notification: &Notification) {
        let changed = {
            let mut book = self.lock_book();
            match notification {
                Notification::MountSetChanged {
                    prefix,
                    change: MountChange::Unmounted,
                } => {
                    let before = book.subscriptions.len();
                    book.subscriptions
                        .retain(|(server, _), _| server != prefix.as_str());
                    let dropped_list = book.list_subscriptions.remove(prefix.as_str());
                    before != book.subscriptions.len() || dropped_list
                }
                Notification::MountSetChanged { .. } => false,
                Notification::Resource {
                    prefix,
                    event: ChangeEvent::ResourceListChanged,
                } => book.list_subscriptions.contains(prefix.as_str()),
                Notification::Resource {
                    prefix,
                    event: ChangeEvent::ResourceUpdated { uri },
                } => book
                    .subscriptions
                    .get(&(prefix.as_str().to_owned(), uri.clone()))
                    .is_some_and(|record| record.active),
            }
        };
        if changed {
            debug!(prefix = %notification.prefix(), "subscription index changed");
            self.announce();
        }
    }

    fn announce(&self) {
        let notifier = self.lock_book().notifier.clone();
        if let Some(sender) = notifier {
            sender.notify(ChangeEvent::updated(SUBSCRIPTIONS_URI));
        }
    }

    fn require(&self, server: &str, feature: Feature) -> SessionResult<Arc<dyn ChildSession>> {
        let compositor = upgrade(&self.compositor)?;
        let handle = compositor
            .handle(server)
            .ok_or_else(|| SessionError::tool(format!("unknown server '{server}'")))?;
        let state = handle.state();
        if state != MountState::Active {
            return Err(SessionError::tool(format!(
                "server '{server}' is not running (state: {state})"
            )));
        }
        let capabilities = handle
            .server_info()
            .and_then(|info| info.resources)
            .unwrap_or_default();
        if !feature.supported_by(capabilities) {
            return Err(SessionError::tool(format!(
                "server '{server}' does not support {}",
                feature.as_str()
            )));
        }
        compositor
            .session_for(server)
            .map_err(|err| SessionError::tool(err.to_string()))
    }

    async fn list(&self, args: ListArgs) -> SessionResult<Value> {
        let compositor = upgrade(&self.compositor)?;
        if let Some(server) = args
            .server
            .as_deref()
            .filter(|server| compositor.handle(server).is_none())
        {
            return Err(SessionError::tool(format!("unknown server '{server}'")));
        }
        let mut entries = Vec::new();
        for server in resource_servers(&compositor, args.server.as_deref()) {
            let listed = match compositor.session_for(&server) {
                Ok(session) => session.list_resources().await,
                Err(err) => Err(SessionError::tool(err.to_string())),
            };
            match listed {
                Ok(resources) => entries.extend(
                    resources
                        .into_iter()
                        .filter(|resource| {
                            args.uri_prefix
                                .as_deref()
                                .is_none_or(|wanted| resource.uri.starts_with(wanted))
                        })
                        .map(|resource| ResourceEntry {
                            server: server.clone(),
                            uri: resource.uri,
                            name: resource.name,
                            mime_type: resource.mime_type,
                        }),
                ),
                Err(err) if args.server.is_some() => return Err(err),
                Err(err) => warn!(server = %server, error = %err, "skipping resource listing"),
            }
        }
        Ok(json!({ "resources": to_json(&entries)? }))
    }

    async fn list_resource_templates(&self) -> SessionResult<Value> {
        let compositor = upgrade(&self.compositor)?;
        let mut entries = Vec::new();
        for server in resource_servers(&compositor, None) {
            let listed = match compositor.session_for(&server) {
                Ok(session) => session.list_resource_templates().await,
                Err(err) => Err(SessionError::tool(err.to_string())),
            };
            match listed {
                Ok(templates) => {
                    entries.extend(templates.into_iter().map(|template| ResourceTemplateEntry {
                        server: server.clone(),
                        template,
                    }));
                }
                Err(SessionError::Unsupported(_)) => {}
                Err(err) => warn!(server = %server, error = %err, "skipping template listing"),
            }
        }
        Ok(json!({ "templates": to_json(&entries)? }))
    }

    async fn read(&self, args: ReadArgs) -> SessionResult<Value> {
        let compositor = upgrade(&self.compositor)?;
        let session = compositor
            .session_for(&args.server)
            .map_err(|err| SessionError::tool(err.to_string()))?;
        drop(compositor);
        let contents = session.read_resource(&args.uri).await?;
        let result = ResourceReadResult {
            parts: window_parts(&contents, args.start_offset, args.max_bytes),
            total_parts: contents.len(),
            window: WindowInfo {
                start_offset: args.start_offset,
                max_bytes: args.max_bytes,
            },
            server: args.server,
            uri: args.uri,
        };
        to_json(&result)
    }

    async fn read_blocks(&self, args: ReadBlocksArgs) -> SessionResult<Value> {
        let session = upgrade(&self.compositor)?
            .session_for(&args.server)
            .map_err(|err| SessionError::tool(err.to_string()))?;
        let contents = session
            .read_resource(&args.uri)
            .await
            .map_err(|err| unreadable(&args.server, &args.uri, &err))?;
        to_json(&ReadBlocksResult {
            blocks: window_blocks(&contents, args.start_block, args.start_offset, args.max_bytes),
        })
    }

    async fn subscribe(&self, args: ResourceArgs) -> SessionResult<Value> {
        let session = self.require(&args.server, Feature::Subscribe)?;
        let outcome = session.subscribe_resource(&args.uri).await;
        {
            let mut book = self.lock_book();
            let record = book
                .subscriptions
                .entry((args.server.clone(), args.uri.clone()))
                .or_default();
            match &outcome {
                Ok(()) => {
                    record.active = true;
                    record.last_error = None;
                }
                Err(err) => {
                    record.active = false;
                    record.last_error = Some(err.to_string());
                }
            }
        }
        self.announce();
        outcome?;
        Ok(json!({ "ok": true, "server": args.server, "uri": args.uri }))
    }

    async fn unsubscribe(&self, args: ResourceArgs) -> SessionResult<Value> {
        let session = self.require(&args.server, Feature::Subscribe)?;
        let outcome = session.unsubscribe_resource(&args.uri).await;
        {
            let mut book = self.lock_book();
            let key = (args.server.clone(), args.uri.clone());
            match &outcome {
                Ok(()) => {
                    book.subscriptions.shift_remove(&key);
                }
                Err(err) => {
                    if let Some(record) = book.subscriptions.get_mut(&key) {
                        record.active = false;
                        record.last_error = Some(err.to_string());
                    }
                }
            }
        }
        self.announce();
        outcome?;
        Ok(json!({ "ok": true, "server": args.server, "uri": args.uri }))
    }

    fn subscribe_list_changes(&self, args: &ServerArgs) -> SessionResult<Value> {
        self.require(&args.server, Feature::ListChanged)?;
        let inserted = self.lock_book().list_subscriptions.insert(args.server.clone());
        if inserted {
            self.announce();
        }
        Ok(json!({ "ok": true, "server": args.server }))
    }

    fn unsubscribe_list_changes(&self, args: &ServerArgs) -> Value {
        let removed = self.lock_book().list_subscriptions.remove(&args.server);
        if removed {
            self.announce();
        }
        json!({ "ok": true, "server": args.server, "removed": removed })
    }
}

#[async_trait]
impl ToolServer for ResourcesServer {
    fn info(&self) -> ServerInfo {
        ServerInfo::new(RESOURCES_PREFIX, env!("CARGO_PKG_VERSION"))
            .with_instructions(
                "List, read, and subscribe to resources exposed by mounted servers. \
                 Large reads are windowed with start_offset and max_bytes; read_blocks \
                 resumes from start_block.",
            )
            .with_tools([
                ToolDescriptor::new("list", "List resources across mounted servers"),
                ToolDescriptor::new(
                    "list_resource_templates",
                    "List resource URI templates across mounted servers",
                ),
                ToolDescriptor::new("read", "Read a resource window from one server"),
                ToolDescriptor::new(
                    "read_blocks",
                    "Read a resource block by block, resuming from a block and offset",
                ),
                ToolDescriptor::new("subscribe", "Subscribe to updates of one resource"),
                ToolDescriptor::new("unsubscribe", "Cancel a resource subscription"),
                ToolDescriptor::new("list_subscriptions", "Current subscription index"),
                ToolDescriptor::new(
                    "subscribe_list_changes",
                    "Follow resource list changes of one server",
                ),
                ToolDescriptor::new(
                    "unsubscribe_list_changes",
                    "Stop following resource list changes of one server",
                ),
            ])
            .with_resources(ResourceCapabilities::default())
    }

    fn attach(&self, notifier: ChangeNotifier) {
        self.lock_book().notifier = Some(notifier);
    }

    async fn call_tool(&self, name: &str, payload: Value) -> SessionResult<Value> {
        match name {
            "list" => self.list(parse_args(payload)?).await,
            "list_resource_templates" => self.list_resource_templates().await,
            "read" => self.read(parse_args(payload)?).await,
            "read_blocks" => self.read_blocks(parse_args(payload)?).await,
            "subscribe" => self.subscribe(parse_args(payload)?).await,
            "unsubscribe" => self.unsubscribe(parse_args(payload)?).await,
            "list_subscriptions" => to_json(&self.index()),
            "subscribe_list_changes" => self.subscribe_list_changes(&parse_args(payload)?),
            "unsubscribe_list_changes" => Ok(self.unsubscribe_list_changes(&parse_args(payload)?)),
            other => Err(SessionError::UnknownOperation(other.to_owned())),
        }
    }

    async fn list_resources(&self) -> SessionResult<Vec<ResourceDescriptor>> {
        Ok(vec![
            ResourceDescriptor::new(SUBSCRIPTIONS_URI, "Resource subscriptions")
                .with_mime_type("application/json"),
        ])
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContents>> {
        if uri != SUBSCRIPTIONS_URI {
            return Err(SessionError::UnknownResource(uri.to_owned()));
        }
        let body = serde_json::to_string(&self.index()).map_err(SessionError::runtime)?;
        Ok(vec![ResourceContents::Text {
            uri: SUBSCRIPTIONS_URI.to_owned(),
            mime_type: Some("application/json".to_owned()),
            text: body,
        }])
    }
}

/// Active mounts that advertise resources, optionally narrowed to one.
fn resource_servers(compositor: &Compositor, wanted: Option<&str>) -> Vec<String> {
    compositor
        .list()
        .into_iter()
        .filter(|snapshot| snapshot.state == MountState::Active)
        .filter(|snapshot| {
            snapshot
                .server
                .as_ref()
                .is_some_and(|info| info.resources.is_some())
        })
        .map(|snapshot| String::from(snapshot.prefix))
        .filter(|prefix| wanted.is_none_or(|name| name == prefix))
        .collect()
}

fn unreadable(server: &str, uri: &str, err: &SessionError) -> SessionError {
    SessionError::tool(format!(
        "server '{server}' does not provide the resource '{uri}': {err}"
    ))
}

/// Connects the [`ResourcesServer`] and keeps its book in step with the
/// compositor's notifications.
///
/// The listener task is registered in the mount's scope, so it stops when
/// the `resources` mount is torn down.
#[derive(Debug, Clone)]
pub struct ResourcesConnector {
    server: Arc<ResourcesServer>,
    compositor: WeakCompositor,
}

impl ResourcesConnector {
    /// Creates a connector with a fresh server.
    #[must_use]
    pub fn new(compositor: WeakCompositor) -> Self {
        Self {
            server: Arc::new(ResourcesServer::new(compositor.clone())),
            compositor,
        }
    }

    /// Returns the server.
    #[must_use]
    pub fn server(&self) -> Arc<ResourcesServer> {
        Arc::clone(&self.server)
    }
}

#[async_trait]
impl ChildConnector for ResourcesConnector {
    async fn connect(&self, scope: &mut ResourceScope) -> SessionResult<ConnectedChild> {
        let mut notifications = upgrade(&self.compositor)?.subscribe();
        let server = Arc::clone(&self.server);
        let listener = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                server.observe(&notification);
            }
        });
        scope.register(TaskResource::new("resources-listener", listener));
        InProcessConnector::new(Arc::clone(&self.server))
            .connect(scope)
            .await
    }
}
