//! Echo server for tests and local wiring.

use crate::compositor::domain::{
    ChangeEvent, ResourceCapabilities, ResourceContents, ResourceDescriptor, ResourceTemplate,
    ServerInfo, ToolDescriptor,
};
use crate::compositor::ports::{ChangeNotifier, SessionError, SessionResult, ToolServer};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct EchoState {
    notifier: Option<ChangeNotifier>,
    resources: IndexMap<String, String>,
    templates: Vec<ResourceTemplate>,
    subscriptions: Vec<String>,
}

/// In-process server whose `echo` operation returns its payload.
///
/// Operations:
/// - `echo` returns the payload unchanged.
/// - `fail` returns a tool error carrying `payload.message`.
/// - `sleep` waits `payload.ms` milliseconds, then returns the payload.
pub struct EchoServer {
    name: String,
    capabilities: Option<ResourceCapabilities>,
    calls: AtomicUsize,
    state: Mutex<EchoState>,
}

impl EchoServer {
    /// Creates an echo server without resources.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: None,
            calls: AtomicUsize::new(0),
            state: Mutex::new(EchoState::default()),
        }
    }

    /// Adds a text resource and advertises resource support.
    #[must_use]
    pub fn with_text_resource(mut self, uri: impl Into<String>, text: impl Into<String>) -> Self {
        self.lock_state().resources.insert(uri.into(), text.into());
        if self.capabilities.is_none() {
            self.capabilities = Some(ResourceCapabilities::default());
        }
        self
    }

    /// Adds a resource template and advertises resource support.
    #[must_use]
    pub fn with_resource_template(mut self, template: ResourceTemplate) -> Self {
        self.lock_state().templates.push(template);
        if self.capabilities.is_none() {
            self.capabilities = Some(ResourceCapabilities::default());
        }
        self
    }

    /// Sets the advertised resource capabilities.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: ResourceCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Emits a change event through the current session.
    ///
    /// Returns `false` when no session is attached or it has gone away.
    pub fn emit(&self, event: ChangeEvent) -> bool {
        self.lock_state()
            .notifier
            .as_ref()
            .is_some_and(|notifier| notifier.notify(event))
    }

    /// Number of operations invoked so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URIs currently subscribed through this server.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock_state().subscriptions.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, EchoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_resources(&self, operation: &str) -> SessionResult<ResourceCapabilities> {
        self.capabilities
            .ok_or_else(|| SessionError::Unsupported(operation.to_owned()))
    }
}

#[async_trait]
impl ToolServer for EchoServer {
    fn info(&self) -> ServerInfo {
        let info = ServerInfo::new(self.name.clone(), env!("CARGO_PKG_VERSION")).with_tools([
            ToolDescriptor::new("echo", "Return the payload unchanged"),
            ToolDescriptor::new("fail", "Return a tool error"),
            ToolDescriptor::new("sleep", "Wait, then return the payload"),
        ]);
        match self.capabilities {
            Some(capabilities) => info.with_resources(capabilities),
            None => info,
        }
    }

    fn attach(&self, notifier: ChangeNotifier) {
        self.lock_state().notifier = Some(notifier);
    }

    async fn call_tool(&self, name: &str, payload: Value) -> SessionResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match name {
            "echo" => Ok(payload),
            "fail" => {
                let message = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                Err(SessionError::tool(message))
            }
            "sleep" => {
                let millis = payload.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(payload)
            }
            other => Err(SessionError::UnknownOperation(other.to_owned())),
        }
    }

    async fn list_resources(&self) -> SessionResult<Vec<ResourceDescriptor>> {
        self.require_resources("list_resources")?;
        Ok(self
            .lock_state()
            .resources
            .keys()
            .map(|uri| ResourceDescriptor::new(uri.clone(), uri.clone()).with_mime_type("text/plain"))
            .collect())
    }

    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplate>> {
        self.require_resources("list_resource_templates")?;
        Ok(self.lock_state().templates.clone())
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContents>> {
        self.require_resources("read_resource")?;
        self.lock_state()
            .resources
            .get(uri)
            .map(|text| {
                vec![ResourceContents::Text {
                    uri: uri.to_owned(),
                    mime_type: Some("text/plain".to_owned()),
                    text: text.clone(),
                }]
            })
            .ok_or_else(|| SessionError::UnknownResource(uri.to_owned()))
    }

    async fn subscribe_resource(&self, uri: &str) -> SessionResult<()> {
        if !self.require_resources("subscribe_resource")?.subscribe {
            return Err(SessionError::Unsupported("subscribe_resource".to_owned()));
        }
        let mut state = self.lock_state();
        if !state.resources.contains_key(uri) {
            return Err(SessionError::UnknownResource(uri.to_owned()));
        }
        if !state.subscriptions.iter().any(|existing| existing == uri) {
            state.subscriptions.push(uri.to_owned());
        }
        Ok(())
    }

    async fn unsubscribe_resource(&self, uri: &str) -> SessionResult<()> {
        self.require_resources("unsubscribe_resource")?;
        let mut state = self.lock_state();
        if !state.resources.contains_key(uri) {
            return Err(SessionError::UnknownResource(uri.to_owned()));
        }
        state.subscriptions.retain(|existing| existing != uri);
        Ok(())
    }
}
