// src/workspace/memory.rs
//! In-memory collaborators
//!
//! A complete workspace, override project, binding registry, target list
//! and interception channel kept in process memory. Used by the command line
//! tool and by tests; an embedding application supplies its own.

use crate::binding::{Binding, BindingRegistry};
use crate::headers::HeaderEntry;
use crate::interception::request::{
    InterceptedRequest, InterceptionChannel, InterceptionHandler, InterceptionOutcome,
    InterceptionPattern, ResponseBody,
};
use crate::interception::resource_type::ResourceType;
use crate::utils::errors::{EngineError, Result};
use crate::workspace::events::{EventBus, ProjectEvent, ResourceEvent};
use crate::workspace::project::{NetworkTargets, OverrideProject, Workspace};
use crate::workspace::resource::{Resource, ResourceContent, ResourceId, ResourceKind};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Project id shared by all in-memory network resources
pub const NETWORK_PROJECT_ID: &str = "network";

/// Resource whose content lives in memory
#[derive(Debug)]
pub struct MemoryResource {
    id: ResourceId,
    url: RwLock<String>,
    kind: ResourceKind,
    project_id: String,
    content: RwLock<ResourceContent>,
    disposed: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryResource {
    fn new(kind: ResourceKind, project_id: &str, url: &str, content: ResourceContent) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::generate(),
            url: RwLock::new(url.to_string()),
            kind,
            project_id: project_id.to_string(),
            content: RwLock::new(content),
            disposed: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        })
    }

    pub fn network(url: &str, content: &str) -> Arc<Self> {
        Self::new(
            ResourceKind::Network,
            NETWORK_PROJECT_ID,
            url,
            ResourceContent::text(content),
        )
    }

    pub fn file(project_id: &str, url: &str, content: &str) -> Arc<Self> {
        Self::new(
            ResourceKind::FileSystem,
            project_id,
            url,
            ResourceContent::text(content),
        )
    }

    pub fn set_content(&self, content: ResourceContent) {
        *self.content.write() = content;
    }

    pub fn set_url(&self, url: &str) {
        *self.url.write() = url.to_string();
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Make every content read fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn bytes(&self) -> Result<Bytes> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EngineError::ContentUnavailable(self.url()));
        }
        let content = self.content.read();
        let text = content.text.clone().unwrap_or_default();
        if content.encoded {
            STANDARD
                .decode(text.as_bytes())
                .map(Bytes::from)
                .map_err(|e| EngineError::ContentUnavailable(format!("{}: {}", self.url(), e)))
        } else {
            Ok(Bytes::from(text))
        }
    }
}

#[async_trait]
impl Resource for MemoryResource {
    fn id(&self) -> ResourceId {
        self.id.clone()
    }

    fn url(&self) -> String {
        self.url.read().clone()
    }

    fn name(&self) -> String {
        let url = self.url.read();
        url.rsplit('/').next().unwrap_or_default().to_string()
    }

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn project_id(&self) -> String {
        self.project_id.clone()
    }

    fn mime_type(&self) -> String {
        mime_type_for_path(&self.url.read()).to_string()
    }

    async fn request_content(&self) -> Result<ResourceContent> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EngineError::ContentUnavailable(self.url()));
        }
        Ok(self.content.read().clone())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Override project backed by a map of file URLs
pub struct MemoryProject {
    id: String,
    root: String,
    files: RwLock<IndexMap<String, Arc<MemoryResource>>>,
    events: Option<Arc<EventBus<ResourceEvent>>>,
    removed: AtomicBool,
}

impl MemoryProject {
    /// Detached project: file changes are not published anywhere
    pub fn new(id: &str, root: &str) -> Arc<Self> {
        Self::with_events(id, root, None)
    }

    fn with_events(id: &str, root: &str, events: Option<Arc<EventBus<ResourceEvent>>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            root: root.trim_end_matches('/').to_string(),
            files: RwLock::new(IndexMap::new()),
            events,
            removed: AtomicBool::new(false),
        })
    }

    /// Add or replace a file at an encoded path relative to the root
    pub fn add_file(&self, relative_path: &str, content: &str) -> Arc<MemoryResource> {
        let url = format!("{}/{}", self.root, relative_path);
        let resource = MemoryResource::file(&self.id, &url, content);
        self.insert(resource.clone());
        resource
    }

    fn insert(&self, resource: Arc<MemoryResource>) {
        let previous = self.files.write().insert(resource.url(), resource.clone());
        if let Some(previous) = previous {
            previous.dispose();
            self.publish(ResourceEvent::Removed(previous));
        }
        self.publish(ResourceEvent::Added(resource));
    }

    pub fn remove_file(&self, relative_path: &str) -> Option<Arc<MemoryResource>> {
        let url = format!("{}/{}", self.root, relative_path);
        let removed = self.files.write().shift_remove(&url)?;
        removed.dispose();
        self.publish(ResourceEvent::Removed(removed.clone()));
        Some(removed)
    }

    pub fn file(&self, relative_path: &str) -> Option<Arc<MemoryResource>> {
        let url = format!("{}/{}", self.root, relative_path);
        self.files.read().get(&url).cloned()
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    fn publish(&self, event: ResourceEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[async_trait]
impl OverrideProject for MemoryProject {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn file_system_path(&self) -> String {
        self.root.clone()
    }

    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        self.files
            .read()
            .values()
            .map(|file| file.clone() as Arc<dyn Resource>)
            .collect()
    }

    fn resource_for_url(&self, url: &str) -> Option<Arc<dyn Resource>> {
        self.files
            .read()
            .get(url)
            .map(|file| file.clone() as Arc<dyn Resource>)
    }

    async fn create_file(
        &self,
        path: &str,
        name: &str,
        content: &str,
        encoded: bool,
    ) -> Result<Option<Arc<dyn Resource>>> {
        let relative = if path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", path, name)
        };
        let url = format!("{}/{}", self.root, relative);
        let resource = MemoryResource::new(
            ResourceKind::FileSystem,
            &self.id,
            &url,
            ResourceContent {
                text: Some(content.to_string()),
                encoded,
            },
        );
        self.insert(resource.clone());
        Ok(Some(resource))
    }

    async fn request_file_bytes(&self, resource: &dyn Resource) -> Result<Option<Bytes>> {
        let file = self.files.read().get(&resource.url()).cloned();
        match file {
            Some(file) => file.bytes().map(Some),
            None => Ok(None),
        }
    }

    fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

/// Workspace holding network resources and publishing lifecycle events
pub struct MemoryWorkspace {
    network: RwLock<IndexMap<String, Arc<MemoryResource>>>,
    resource_events: Arc<EventBus<ResourceEvent>>,
    project_events: EventBus<ProjectEvent>,
}

impl MemoryWorkspace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            network: RwLock::new(IndexMap::new()),
            resource_events: Arc::new(EventBus::new()),
            project_events: EventBus::new(),
        })
    }

    /// Create an override project whose file changes are published here
    pub fn create_project(&self, id: &str, root: &str) -> Arc<MemoryProject> {
        MemoryProject::with_events(id, root, Some(Arc::clone(&self.resource_events)))
    }

    pub fn add_project(&self, project: Arc<MemoryProject>) {
        self.project_events.publish(ProjectEvent::Added(project));
    }

    pub fn remove_project(&self, project_id: &str) {
        self.project_events.publish(ProjectEvent::Removed {
            project_id: project_id.to_string(),
        });
    }

    pub fn add_network_resource(&self, url: &str, content: &str) -> Arc<MemoryResource> {
        let resource = MemoryResource::network(url, content);
        self.network.write().insert(url.to_string(), resource.clone());
        self.resource_events.publish(ResourceEvent::Added(resource.clone()));
        resource
    }

    pub fn remove_network_resource(&self, url: &str) -> Option<Arc<MemoryResource>> {
        let removed = self.network.write().shift_remove(url)?;
        removed.dispose();
        self.resource_events.publish(ResourceEvent::Removed(removed.clone()));
        Some(removed)
    }

    pub fn rename_network_resource(&self, old_url: &str, new_url: &str) -> Option<Arc<MemoryResource>> {
        let resource = {
            let mut network = self.network.write();
            let resource = network.shift_remove(old_url)?;
            resource.set_url(new_url);
            network.insert(new_url.to_string(), resource.clone());
            resource
        };
        self.resource_events.publish(ResourceEvent::Renamed {
            resource: resource.clone(),
            old_url: old_url.to_string(),
        });
        Some(resource)
    }

    pub fn commit_working_copy(&self, resource: Arc<MemoryResource>) {
        self.resource_events
            .publish(ResourceEvent::WorkingCopyCommitted(resource));
    }
}

impl Workspace for MemoryWorkspace {
    fn network_resources(&self) -> Vec<Arc<dyn Resource>> {
        self.network
            .read()
            .values()
            .map(|resource| resource.clone() as Arc<dyn Resource>)
            .collect()
    }

    fn resource_events(&self) -> &EventBus<ResourceEvent> {
        &self.resource_events
    }

    fn project_events(&self) -> &EventBus<ProjectEvent> {
        &self.project_events
    }
}

/// Records binding transitions and content syncs
#[derive(Default)]
pub struct MemoryRegistry {
    added: AtomicUsize,
    removed: AtomicUsize,
    active: Mutex<HashSet<(ResourceId, ResourceId)>>,
    synced: Mutex<Vec<(String, String, bool)>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn active_bindings(&self) -> usize {
        self.active.lock().len()
    }

    /// `(source url, content, encoded)` for every sync, oldest first
    pub fn synced(&self) -> Vec<(String, String, bool)> {
        self.synced.lock().clone()
    }
}

#[async_trait]
impl BindingRegistry for MemoryRegistry {
    async fn add_binding(&self, binding: &Binding) {
        self.added.fetch_add(1, Ordering::SeqCst);
        self.active
            .lock()
            .insert((binding.network.id(), binding.file_system.id()));
    }

    async fn remove_binding(&self, binding: &Binding) {
        self.removed.fetch_add(1, Ordering::SeqCst);
        self.active
            .lock()
            .remove(&(binding.network.id(), binding.file_system.id()));
    }

    fn sync_content(&self, source: &dyn Resource, content: &str, encoded: bool) {
        self.synced
            .lock()
            .push((source.url(), content.to_string(), encoded));
    }
}

/// Target list reduced to "is there a main target"
#[derive(Debug, Default)]
pub struct MemoryTargets {
    main_target: AtomicBool,
}

impl MemoryTargets {
    pub fn new(main_target: bool) -> Self {
        Self {
            main_target: AtomicBool::new(main_target),
        }
    }

    pub fn set_main_target(&self, present: bool) {
        self.main_target.store(present, Ordering::SeqCst);
    }
}

impl NetworkTargets for MemoryTargets {
    fn has_main_target(&self) -> bool {
        self.main_target.load(Ordering::SeqCst)
    }
}

/// Interception channel that remembers the last registration
#[derive(Default)]
pub struct MemoryChannel {
    patterns: Mutex<Vec<InterceptionPattern>>,
    handler: Mutex<Option<Arc<dyn InterceptionHandler>>>,
    registrations: AtomicUsize,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered URL patterns, sorted
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .patterns
            .lock()
            .iter()
            .map(|pattern| pattern.url_pattern.clone())
            .collect();
        patterns.sort();
        patterns
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Route a request to the registered handler
    pub async fn dispatch(&self, request: Arc<dyn InterceptedRequest>) -> InterceptionOutcome {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler.handle_intercepted_request(request).await,
            None => InterceptionOutcome::PassThrough,
        }
    }
}

#[async_trait]
impl InterceptionChannel for MemoryChannel {
    async fn set_interception_handler_for_patterns(
        &self,
        patterns: Vec<InterceptionPattern>,
        handler: Arc<dyn InterceptionHandler>,
    ) -> Result<()> {
        *self.patterns.lock() = patterns;
        *self.handler.lock() = Some(handler);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Response the engine asked the channel to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuedResponse {
    pub body: Bytes,
    pub mime_type: String,
    pub encoded: bool,
    pub headers: Vec<HeaderEntry>,
}

/// Paused request with a canned response
pub struct MemoryRequest {
    method: String,
    url: String,
    response_headers: Option<Vec<HeaderEntry>>,
    resource_type: ResourceType,
    body: Option<ResponseBody>,
    continued: Mutex<Option<ContinuedResponse>>,
}

impl MemoryRequest {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            response_headers: None,
            resource_type: ResourceType::Other,
            body: None,
            continued: Mutex::new(None),
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    pub fn with_headers(mut self, headers: Vec<HeaderEntry>) -> Self {
        self.response_headers = Some(headers);
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    /// Original response body; without one, body reads fail
    pub fn with_body(mut self, content: &str, encoded: bool) -> Self {
        self.body = Some(ResponseBody {
            content: Some(content.to_string()),
            encoded,
        });
        self
    }

    pub fn continued(&self) -> Option<ContinuedResponse> {
        self.continued.lock().clone()
    }
}

#[async_trait]
impl InterceptedRequest for MemoryRequest {
    fn method(&self) -> String {
        self.method.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn response_headers(&self) -> Option<Vec<HeaderEntry>> {
        self.response_headers.clone()
    }

    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn response_body(&self) -> Result<ResponseBody> {
        self.body
            .clone()
            .ok_or_else(|| EngineError::ContentUnavailable(format!("no body for {}", self.url)))
    }

    async fn continue_request_with_content(
        &self,
        body: Bytes,
        mime_type: &str,
        encoded: bool,
        headers: Vec<HeaderEntry>,
    ) -> Result<()> {
        *self.continued.lock() = Some(ContinuedResponse {
            body,
            mime_type: mime_type.to_string(),
            encoded,
            headers,
        });
        Ok(())
    }
}

/// MIME type for a file name, by extension
fn mime_type_for_path(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let extension = match name.rfind('.') {
        Some(index) => name[index + 1..].to_ascii_lowercase(),
        None => return "text/plain",
    };
    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "webmanifest" => "application/manifest+json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        _ => "text/plain",
    }
}
