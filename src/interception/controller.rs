// src/interception/controller.rs
//! Override controller
//!
//! Owns the activation state machine and reacts to workspace events:
//!
//! ```text
//! enabled && main target && project  ──►  active
//!        any input drops             ──►  inactive
//! ```
//!
//! While active, network resources are indexed by their encoded override
//! path and bound to the override file at that path, the interception
//! channel is kept subscribed to one glob per override file, and matching
//! responses are rewritten from the override tree.

use crate::binding::{BindingEngine, BindingRegistry, OriginalContent};
use crate::codec::uri::url_without_hash;
use crate::codec::{local_path_to_url_path, raw_path_to_encoded_path, PathCodec, LONG_URLS_DIR};
use crate::headers::{
    compile_descriptor_content, extract_directory_index, CompiledDescriptor, HeaderEntry,
    HeaderMerge, HeaderOverrideStore, HEADERS_FILENAME,
};
use crate::interception::request::{
    InterceptedRequest, InterceptionChannel, InterceptionHandler, InterceptionOutcome,
    InterceptionPattern, ResponseBody,
};
use crate::interception::resource_type::ResourceType;
use crate::interception::throttler::Throttler;
use crate::utils::config::OverridesConfig;
use crate::utils::errors::{EngineError, Result};
use crate::workspace::events::{ProjectEvent, ResourceEvent};
use crate::workspace::project::{NetworkTargets, OverrideProject, Workspace};
use crate::workspace::resource::{Resource, ResourceId, ResourceKind};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pseudo-scheme of devtools snippets, never overridden
const SNIPPET_SCHEME: &str = "snippet://";

#[derive(Default)]
struct ActivationState {
    enabled: bool,
    active: bool,
    project: Option<Arc<dyn OverrideProject>>,
}

/// Builder wiring the controller to its collaborators
pub struct InterceptionControllerBuilder {
    config: OverridesConfig,
    workspace: Option<Arc<dyn Workspace>>,
    targets: Option<Arc<dyn NetworkTargets>>,
    channel: Option<Arc<dyn InterceptionChannel>>,
    registry: Option<Arc<dyn BindingRegistry>>,
}

impl InterceptionControllerBuilder {
    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn targets(mut self, targets: Arc<dyn NetworkTargets>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn InterceptionChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn BindingRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Construct the controller and subscribe it to the workspace.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn build(self) -> Result<Arc<InterceptionController>> {
        let workspace = self
            .workspace
            .ok_or(EngineError::MissingCollaborator("workspace"))?;
        let targets = self
            .targets
            .ok_or(EngineError::MissingCollaborator("network targets"))?;
        let channel = self
            .channel
            .ok_or(EngineError::MissingCollaborator("interception channel"))?;
        let registry = self
            .registry
            .ok_or(EngineError::MissingCollaborator("binding registry"))?;
        self.config.validate()?;

        let config = self.config;
        let controller = Arc::new_cyclic(|weak: &Weak<InterceptionController>| {
            let job_target = weak.clone();
            let throttler = Throttler::new(
                config.rebuild_throttle(),
                Box::new(move || {
                    let target = job_target.clone();
                    async move {
                        match target.upgrade() {
                            Some(controller) => {
                                controller.update_interception_patterns_now().await;
                                true
                            }
                            None => false,
                        }
                    }
                    .boxed()
                }),
            );

            InterceptionController {
                weak_self: weak.clone(),
                codec: PathCodec::new(config.file_name_policy(), config.long_path_budget),
                header_overrides_enabled: config.header_overrides_enabled,
                state: RwLock::new(ActivationState::default()),
                workspace,
                targets,
                channel,
                bindings: BindingEngine::new(registry),
                header_overrides: HeaderOverrideStore::new(),
                network_for_encoded_path: DashMap::new(),
                throttler,
                project_changes: watch::channel(None).0,
                resource_pump: Mutex::new(None),
                project_pump: Mutex::new(None),
            }
        });

        *controller.project_pump.lock() = Some(controller.spawn_project_pump());
        controller.set_enabled(config.enabled).await;
        info!(
            "Override controller ready (enabled: {}, header overrides: {})",
            config.enabled, config.header_overrides_enabled
        );
        Ok(controller)
    }
}

/// Local override controller
pub struct InterceptionController {
    weak_self: Weak<InterceptionController>,
    codec: PathCodec,
    header_overrides_enabled: bool,
    state: RwLock<ActivationState>,

    workspace: Arc<dyn Workspace>,
    targets: Arc<dyn NetworkTargets>,
    channel: Arc<dyn InterceptionChannel>,

    bindings: BindingEngine,
    header_overrides: HeaderOverrideStore,
    /// Encoded override path -> network resource loaded from it
    network_for_encoded_path: DashMap<String, Arc<dyn Resource>>,
    throttler: Throttler,
    project_changes: watch::Sender<Option<String>>,

    resource_pump: Mutex<Option<CancellationToken>>,
    project_pump: Mutex<Option<CancellationToken>>,
}

impl InterceptionController {
    pub fn builder(config: OverridesConfig) -> InterceptionControllerBuilder {
        InterceptionControllerBuilder {
            config,
            workspace: None,
            targets: None,
            channel: None,
            registry: None,
        }
    }

    pub fn active(&self) -> bool {
        self.state.read().active
    }

    pub fn enabled(&self) -> bool {
        self.state.read().enabled
    }

    pub fn project(&self) -> Option<Arc<dyn OverrideProject>> {
        self.state.read().project.clone()
    }

    /// Observe the id of the current override project
    pub fn subscribe_project_changes(&self) -> watch::Receiver<Option<String>> {
        self.project_changes.subscribe()
    }

    pub fn bindings(&self) -> &BindingEngine {
        &self.bindings
    }

    pub fn header_overrides(&self) -> &HeaderOverrideStore {
        &self.header_overrides
    }

    /// Number of indexed network resources
    pub fn indexed_network_resources(&self) -> usize {
        self.network_for_encoded_path.len()
    }

    // ---- activation ----

    /// Flip the configuration toggle
    pub async fn set_enabled(&self, enabled: bool) {
        {
            let mut state = self.state.write();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
        }

        let previous = if enabled {
            self.resource_pump.lock().replace(self.spawn_resource_pump())
        } else {
            self.resource_pump.lock().take()
        };
        if let Some(token) = previous {
            token.cancel();
        }

        self.update_active_project().await;
    }

    pub async fn target_added(&self) {
        self.update_active_project().await;
    }

    pub async fn target_removed(&self) {
        self.update_active_project().await;
    }

    async fn update_active_project(&self) {
        let (was_active, now_active, project) = {
            let mut state = self.state.write();
            let was_active = state.active;
            state.active =
                state.enabled && self.targets.has_main_target() && state.project.is_some();
            (was_active, state.active, state.project.clone())
        };
        if was_active == now_active {
            return;
        }

        if now_active {
            info!("Local overrides activated");
            if let Some(project) = &project {
                join_all(
                    project
                        .resources()
                        .into_iter()
                        .map(|resource| self.filesystem_added(resource)),
                )
                .await;
            }
            join_all(
                self.workspace
                    .network_resources()
                    .into_iter()
                    .map(|resource| self.network_added(resource)),
            )
            .await;
        } else {
            info!("Local overrides deactivated");
            if let Some(project) = &project {
                join_all(
                    project
                        .resources()
                        .into_iter()
                        .map(|resource| self.filesystem_removed(resource)),
                )
                .await;
            }
            self.network_for_encoded_path.clear();
        }
        self.update_interception_patterns();
    }

    /// Replace the override project
    pub async fn set_project(&self, project: Option<Arc<dyn OverrideProject>>) {
        let current = self.project();
        let current_id = current.as_ref().map(|p| p.id());
        let new_id = project.as_ref().map(|p| p.id());
        if current_id == new_id {
            return;
        }

        if let Some(old) = &current {
            join_all(
                old.resources()
                    .into_iter()
                    .map(|resource| self.filesystem_removed(resource)),
            )
            .await;
        }

        self.state.write().project = project.clone();

        if let Some(new) = &project {
            join_all(
                new.resources()
                    .into_iter()
                    .map(|resource| self.filesystem_added(resource)),
            )
            .await;
        }

        self.update_active_project().await;
        self.update_interception_patterns_now().await;
        self.project_changes.send_replace(new_id.clone());
        info!("Override project set to {:?}", new_id);
    }

    pub async fn on_project_added(&self, project: Arc<dyn OverrideProject>) {
        if project.file_system_path().is_empty() {
            return;
        }
        if let Some(current) = self.project() {
            if current.id() == project.id() {
                return;
            }
            current.remove();
        }
        self.set_project(Some(project)).await;
    }

    pub async fn on_project_removed(&self, project_id: &str) {
        let is_current = self
            .project()
            .map(|current| current.id() == project_id)
            .unwrap_or(false);
        if is_current {
            self.set_project(None).await;
        }
    }

    pub async fn handle_project_event(&self, event: ProjectEvent) {
        match event {
            ProjectEvent::Added(project) => self.on_project_added(project).await,
            ProjectEvent::Removed { project_id } => self.on_project_removed(&project_id).await,
        }
    }

    // ---- path derivation ----

    /// Raw override path of a network URL; empty when there is nothing to
    /// derive it against.
    pub fn raw_path_from_url(&self, url: &str, ignore_inactive: bool) -> String {
        let (active, project) = {
            let state = self.state.read();
            (state.active, state.project.clone())
        };
        match project {
            Some(project) if active || ignore_inactive => {
                self.codec.raw_path(&project.file_system_path(), url)
            }
            _ => String::new(),
        }
    }

    pub fn encoded_path_from_url(&self, url: &str, ignore_inactive: bool) -> String {
        raw_path_to_encoded_path(&self.raw_path_from_url(url, ignore_inactive))
    }

    /// Override file URL for a network URL
    pub fn file_url_from_network_url(&self, url: &str, ignore_inactive: bool) -> String {
        match self.project() {
            Some(project) => format!(
                "{}/{}",
                project.file_system_path(),
                self.encoded_path_from_url(url, ignore_inactive)
            ),
            None => String::new(),
        }
    }

    /// The `.headers` descriptor of the directory a URL maps to
    pub fn headers_file_for_url(&self, url: &str) -> Option<Arc<dyn Resource>> {
        let project = self.project()?;
        let file_url = self.file_url_from_network_url(url, true);
        let directory = match file_url.rfind('/') {
            Some(index) => &file_url[..index],
            None => file_url.as_str(),
        };
        project.resource_for_url(&format!("{}/{}", directory, HEADERS_FILENAME))
    }

    /// Find the `.headers` descriptor for a URL, creating an empty one
    pub async fn get_or_create_headers_file(&self, url: &str) -> Result<Option<Arc<dyn Resource>>> {
        if let Some(existing) = self.headers_file_for_url(url) {
            return Ok(Some(existing));
        }
        let Some(project) = self.project() else {
            return Ok(None);
        };
        let encoded = self.encoded_path_from_url(url, true);
        let directory = match encoded.rfind('/') {
            Some(index) => &encoded[..index],
            None => "",
        };
        project
            .create_file(directory, HEADERS_FILENAME, "", false)
            .await
    }

    /// Interception glob covering an override file
    pub fn pattern_for_file_system_resource(
        &self,
        project: &dyn OverrideProject,
        resource: &dyn Resource,
    ) -> String {
        let parts = project.relative_path(resource);
        if parts.len() < 2 {
            return String::new();
        }
        if parts[1] == LONG_URLS_DIR && parts.len() != 2 {
            return format!("http?://{}/*", parts[0]);
        }
        format!("http?://{}", local_path_to_url_path(&parts.join("/")))
    }

    fn can_handle_network_resource(&self, resource: &dyn Resource) -> bool {
        self.active() && !resource.url().starts_with(SNIPPET_SCHEME)
    }

    // ---- resource lifecycle ----

    pub async fn handle_resource_event(&self, event: ResourceEvent) {
        if !self.enabled() {
            return;
        }
        match event {
            ResourceEvent::Added(resource) => self.resource_added(resource).await,
            ResourceEvent::Removed(resource) => {
                let url = resource.url();
                self.resource_removed(resource, &url).await;
            }
            ResourceEvent::Renamed { resource, old_url } => {
                self.resource_removed(Arc::clone(&resource), &old_url).await;
                self.resource_added(resource).await;
            }
            ResourceEvent::WorkingCopyCommitted(resource) => {
                if let Err(e) = self.save_for_overrides(resource).await {
                    warn!("Failed to save override: {}", e);
                }
            }
        }
    }

    async fn resource_added(&self, resource: Arc<dyn Resource>) {
        match resource.kind() {
            ResourceKind::Network => self.network_added(resource).await,
            ResourceKind::FileSystem => self.filesystem_added(resource).await,
        }
    }

    async fn resource_removed(&self, resource: Arc<dyn Resource>, url: &str) {
        match resource.kind() {
            ResourceKind::Network => self.network_removed(resource, url).await,
            ResourceKind::FileSystem => self.filesystem_removed(resource).await,
        }
    }

    async fn network_added(&self, resource: Arc<dyn Resource>) {
        if resource.kind() != ResourceKind::Network
            || !self.can_handle_network_resource(resource.as_ref())
        {
            return;
        }
        let url = url_without_hash(&resource.url()).to_string();
        self.network_for_encoded_path
            .insert(self.encoded_path_from_url(&url, false), Arc::clone(&resource));

        let Some(project) = self.project() else {
            return;
        };
        if let Some(file) = project.resource_for_url(&self.file_url_from_network_url(&url, false)) {
            self.bindings.bind(resource, file).await;
        }
    }

    async fn network_removed(&self, resource: Arc<dyn Resource>, url: &str) {
        if resource.kind() != ResourceKind::Network {
            return;
        }
        let id = resource.id();
        self.bindings.unbind(&id).await;
        self.bindings.forget_lock(&id);

        let key = self.encoded_path_from_url(url_without_hash(url), false);
        self.network_for_encoded_path
            .remove_if(&key, |_, indexed| indexed.id() == id);
    }

    async fn filesystem_added(&self, resource: Arc<dyn Resource>) {
        let project = {
            let state = self.state.read();
            if !state.active {
                return;
            }
            match &state.project {
                Some(project) => Arc::clone(project),
                None => return,
            }
        };
        if resource.project_id() != project.id() {
            return;
        }
        self.update_interception_patterns();

        let relative = project.relative_path(resource.as_ref()).join("/");
        let network = self
            .network_for_encoded_path
            .get(&relative)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(network) = network {
            self.bindings.bind(network, resource).await;
        }
    }

    async fn filesystem_removed(&self, resource: Arc<dyn Resource>) {
        let Some(project) = self.project() else {
            return;
        };
        if resource.project_id() != project.id() {
            return;
        }
        self.update_interception_patterns();
        let id = resource.id();
        self.bindings.forget_original_content(&id);
        self.bindings.unbind(&id).await;
    }

    // ---- save for overrides ----

    pub fn can_save_for_overrides(&self, resource: &dyn Resource) -> bool {
        let id = resource.id();
        self.active()
            && resource.kind() == ResourceKind::Network
            && !self.bindings.is_bound(&id)
            && !self.bindings.is_saving(&id)
    }

    /// Write a network resource's current content into the override tree.
    ///
    /// Returns the created override file, or `None` when the resource cannot
    /// be saved.
    pub async fn save_for_overrides(
        &self,
        resource: Arc<dyn Resource>,
    ) -> Result<Option<Arc<dyn Resource>>> {
        if !self.can_save_for_overrides(resource.as_ref()) {
            return Ok(None);
        }
        let id = resource.id();
        if !self.bindings.begin_saving(&id) {
            return Ok(None);
        }
        let result = self.write_override_file(resource.as_ref()).await;
        self.bindings.finish_saving(&id);
        result
    }

    async fn write_override_file(&self, resource: &dyn Resource) -> Result<Option<Arc<dyn Resource>>> {
        let Some(project) = self.project() else {
            return Ok(None);
        };
        let encoded = self.encoded_path_from_url(&resource.url(), false);
        let content = resource.request_content().await?;
        let (directory, name) = match encoded.rfind('/') {
            Some(index) => (&encoded[..index], &encoded[index + 1..]),
            None => ("", encoded.as_str()),
        };
        info!("Saving {} for overrides as {}", resource.url(), encoded);
        project
            .create_file(
                directory,
                name,
                content.text.as_deref().unwrap_or_default(),
                content.encoded,
            )
            .await
    }

    pub fn original_content_for(&self, id: &ResourceId) -> Option<OriginalContent> {
        self.bindings.original_content_for(id)
    }

    // ---- interception patterns ----

    /// Schedule a throttled pattern rebuild
    pub fn update_interception_patterns(&self) {
        self.throttler.schedule();
    }

    /// Rebuild and register the interception pattern set right away
    pub async fn update_interception_patterns_now(&self) {
        self.header_overrides.clear();
        let (active, project) = {
            let state = self.state.read();
            (state.active, state.project.clone())
        };
        let project = match project {
            Some(project) if active => project,
            _ => {
                self.register_patterns(Vec::new()).await;
                return;
            }
        };

        let mut patterns: IndexSet<String> = IndexSet::new();
        let mut overrides = HashMap::new();
        for resource in project.resources() {
            let pattern = self.pattern_for_file_system_resource(project.as_ref(), resource.as_ref());
            if self.header_overrides_enabled && resource.name() == HEADERS_FILENAME {
                let descriptor = self
                    .compile_headers_file(project.as_ref(), resource.as_ref())
                    .await;
                if !descriptor.overrides.is_empty() {
                    patterns.extend(descriptor.patterns);
                    overrides.insert(descriptor.path, descriptor.overrides);
                }
            } else if !pattern.is_empty() {
                patterns.insert(pattern.clone());
            }

            let index = extract_directory_index(&pattern);
            if index.tail.is_some() {
                patterns.insert(index.head);
            }
        }

        debug!(
            "Rebuilt {} interception pattern(s), {} header override directory(ies)",
            patterns.len(),
            overrides.len()
        );
        self.header_overrides.replace(overrides);
        self.register_patterns(patterns.into_iter().collect()).await;
    }

    async fn compile_headers_file(
        &self,
        project: &dyn OverrideProject,
        resource: &dyn Resource,
    ) -> CompiledDescriptor {
        let relative = project.relative_path(resource).join("/");
        match resource.request_content().await {
            Ok(content) => {
                let text = content.text.unwrap_or_default();
                let text = if text.trim().is_empty() { "[]" } else { text.as_str() };
                compile_descriptor_content(&relative, text)
            }
            Err(e) => {
                warn!("Failed to read {}: {}", relative, e);
                CompiledDescriptor::default()
            }
        }
    }

    async fn register_patterns(&self, patterns: Vec<String>) {
        let Some(handler) = self.weak_self.upgrade() else {
            return;
        };
        let patterns: Vec<InterceptionPattern> = patterns
            .into_iter()
            .map(InterceptionPattern::response)
            .collect();
        let count = patterns.len();
        match self
            .channel
            .set_interception_handler_for_patterns(patterns, handler)
            .await
        {
            Ok(()) => debug!("Registered {} interception pattern(s)", count),
            Err(e) => warn!("Failed to register interception patterns: {}", e),
        }
    }

    // ---- interception ----

    /// Merge the header overrides that apply to a request
    pub fn handle_header_interception(&self, request: &dyn InterceptedRequest) -> HeaderMerge {
        let url = request.url();
        let base = request.response_headers().unwrap_or_default();
        let raw_path = self.raw_path_from_url(&url, false);
        self.header_overrides.apply(&url, &raw_path, &base)
    }

    async fn intercept(&self, request: Arc<dyn InterceptedRequest>) -> InterceptionOutcome {
        let method = request.method();
        if !self.active() || (method != "GET" && method != "POST") {
            return InterceptionOutcome::PassThrough;
        }
        let Some(project) = self.project() else {
            return InterceptionOutcome::PassThrough;
        };

        let url = request.url();
        let file = project.resource_for_url(&self.file_url_from_network_url(&url, false));
        let original_headers = request.response_headers();
        let merged = if self.header_overrides_enabled {
            Some(self.handle_header_interception(request.as_ref())).filter(|merge| merge.matched > 0)
        } else {
            None
        };

        if file.is_none() && merged.is_none() {
            return InterceptionOutcome::PassThrough;
        }

        let headers: Vec<HeaderEntry> = match merged {
            Some(merge) => merge.headers,
            None => original_headers.clone().unwrap_or_default(),
        };
        let mime_type = effective_mime_type(
            original_headers.as_deref(),
            file.as_deref(),
            request.resource_type(),
        );

        match file {
            Some(file) => {
                self.capture_original_content(&file.id(), Arc::clone(&request));
                let bytes = match project.request_file_bytes(file.as_ref()).await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => return InterceptionOutcome::PassThrough,
                    Err(e) => {
                        warn!("Failed to read override {}: {}", file.url(), e);
                        return InterceptionOutcome::PassThrough;
                    }
                };
                match request
                    .continue_request_with_content(bytes, &mime_type, false, headers)
                    .await
                {
                    Ok(()) => InterceptionOutcome::ContentOverridden,
                    Err(e) => {
                        warn!("Failed to continue {}: {}", url, e);
                        InterceptionOutcome::PassThrough
                    }
                }
            }
            None => {
                let body = match request.response_body().await {
                    Ok(ResponseBody {
                        content: Some(content),
                        encoded,
                    }) if !content.is_empty() => {
                        if encoded {
                            content
                        } else {
                            STANDARD.encode(content.as_bytes())
                        }
                    }
                    Ok(_) => return InterceptionOutcome::PassThrough,
                    Err(e) => {
                        debug!("No response body for {}: {}", url, e);
                        return InterceptionOutcome::PassThrough;
                    }
                };
                match request
                    .continue_request_with_content(Bytes::from(body), &mime_type, true, headers)
                    .await
                {
                    Ok(()) => InterceptionOutcome::HeadersOverridden,
                    Err(e) => {
                        warn!("Failed to continue {}: {}", url, e);
                        InterceptionOutcome::PassThrough
                    }
                }
            }
        }
    }

    /// Remember the pre-override body of a request answered from `file`
    fn capture_original_content(&self, file: &ResourceId, request: Arc<dyn InterceptedRequest>) {
        let reader = tokio::spawn(async move {
            match request.response_body().await {
                Ok(ResponseBody {
                    content: Some(content),
                    encoded: true,
                }) => STANDARD
                    .decode(content.as_bytes())
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                Ok(body) => body.content,
                Err(_) => None,
            }
        });
        let original: OriginalContent = async move { reader.await.ok().flatten() }
            .boxed()
            .shared();
        self.bindings.record_original_content(file, original);
    }

    // ---- event pumps ----

    fn spawn_resource_pump(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let mut events = self.workspace.resource_events().subscribe();
        let controller = self.weak_self.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                let Some(controller) = controller.upgrade() else { break };
                controller.handle_resource_event(event).await;
            }
            debug!("Resource event pump stopped");
        });
        token
    }

    fn spawn_project_pump(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let mut events = self.workspace.project_events().subscribe();
        let controller = self.weak_self.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                let Some(controller) = controller.upgrade() else { break };
                controller.handle_project_event(event).await;
            }
        });
        token
    }
}

#[async_trait]
impl InterceptionHandler for InterceptionController {
    async fn handle_intercepted_request(
        &self,
        request: Arc<dyn InterceptedRequest>,
    ) -> InterceptionOutcome {
        let url = request.url();
        let outcome = self.intercept(request).await;
        debug!("Intercepted {}: {:?}", url, outcome);
        outcome
    }
}

impl Drop for InterceptionController {
    fn drop(&mut self) {
        for pump in [self.resource_pump.get_mut(), self.project_pump.get_mut()] {
            if let Some(token) = pump.take() {
                token.cancel();
            }
        }
    }
}

/// MIME type to answer an intercepted request with
fn effective_mime_type(
    headers: Option<&[HeaderEntry]>,
    file: Option<&dyn Resource>,
    expected: ResourceType,
) -> String {
    let declared = headers
        .unwrap_or_default()
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("content-type"))
        .map(|header| header.value.clone())
        .unwrap_or_default();
    if !declared.is_empty() {
        return declared;
    }

    let from_file = file.map(|file| file.mime_type()).unwrap_or_default();
    if ResourceType::from_mime_type(&from_file) == expected {
        from_file
    } else {
        expected.canonical_mime_type().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::FileNamePolicySetting;
    use std::time::Duration;
    use crate::workspace::memory::{
        MemoryChannel, MemoryProject, MemoryRegistry, MemoryRequest, MemoryResource,
        MemoryTargets, MemoryWorkspace,
    };

    const ROOT: &str = "file:///overrides";

    struct Fixture {
        workspace: Arc<MemoryWorkspace>,
        targets: Arc<MemoryTargets>,
        channel: Arc<MemoryChannel>,
        registry: Arc<MemoryRegistry>,
        controller: Arc<InterceptionController>,
    }

    fn config() -> OverridesConfig {
        OverridesConfig {
            filename_policy: FileNamePolicySetting::Posix,
            ..OverridesConfig::default()
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(config()).await
    }

    async fn fixture_with(config: OverridesConfig) -> Fixture {
        let workspace = MemoryWorkspace::new();
        let targets = Arc::new(MemoryTargets::new(true));
        let channel = Arc::new(MemoryChannel::new());
        let registry = Arc::new(MemoryRegistry::new());
        let controller = InterceptionController::builder(config)
            .workspace(workspace.clone())
            .targets(targets.clone())
            .channel(channel.clone())
            .registry(registry.clone())
            .build()
            .await
            .unwrap();
        Fixture {
            workspace,
            targets,
            channel,
            registry,
            controller,
        }
    }

    /// Fixture with a detached project already set
    async fn active_fixture(files: &[(&str, &str)]) -> (Fixture, Arc<MemoryProject>) {
        active_fixture_with(config(), files).await
    }

    async fn active_fixture_with(
        config: OverridesConfig,
        files: &[(&str, &str)],
    ) -> (Fixture, Arc<MemoryProject>) {
        let fixture = fixture_with(config).await;
        let project = MemoryProject::new("overrides", ROOT);
        for (path, content) in files {
            project.add_file(path, content);
        }
        fixture.controller.set_project(Some(project.clone())).await;
        (fixture, project)
    }

    async fn add_network(controller: &InterceptionController, url: &str, content: &str) -> Arc<MemoryResource> {
        let resource = MemoryResource::network(url, content);
        controller
            .handle_resource_event(ResourceEvent::Added(resource.clone()))
            .await;
        resource
    }

    #[tokio::test]
    async fn test_build_requires_collaborators() {
        let result = InterceptionController::builder(config())
            .workspace(MemoryWorkspace::new())
            .targets(Arc::new(MemoryTargets::new(true)))
            .build()
            .await;
        assert!(matches!(
            result,
            Err(EngineError::MissingCollaborator("interception channel"))
        ));
    }

    #[tokio::test]
    async fn test_activation_follows_inputs() {
        let fixture = fixture().await;
        let controller = &fixture.controller;
        assert!(controller.enabled());
        assert!(!controller.active());

        controller
            .set_project(Some(MemoryProject::new("overrides", ROOT)))
            .await;
        assert!(controller.active());

        fixture.targets.set_main_target(false);
        controller.target_removed().await;
        assert!(!controller.active());

        fixture.targets.set_main_target(true);
        controller.target_added().await;
        assert!(controller.active());

        controller.set_enabled(false).await;
        assert!(!controller.active());
        controller.set_enabled(true).await;
        assert!(controller.active());

        controller.set_project(None).await;
        assert!(!controller.active());
    }

    #[tokio::test]
    async fn test_paths_require_active_project() {
        let fixture = fixture().await;
        let controller = &fixture.controller;
        assert_eq!(controller.raw_path_from_url("http://example.com/", true), "");

        controller
            .set_project(Some(MemoryProject::new("overrides", ROOT)))
            .await;
        assert_eq!(
            controller.encoded_path_from_url("http://example.com/", false),
            "example.com/index.html"
        );
        assert_eq!(
            controller.file_url_from_network_url("https://example.com/a b.js", false),
            "file:///overrides/example.com/a%2520b.js"
        );

        controller.set_enabled(false).await;
        assert_eq!(controller.raw_path_from_url("http://example.com/", false), "");
        assert_eq!(
            controller.raw_path_from_url("http://example.com/", true),
            "example.com/index.html"
        );
    }

    #[tokio::test]
    async fn test_network_resource_binds_to_existing_file() {
        let (fixture, project) = active_fixture(&[("example.com/app.js", "local")]).await;
        let controller = &fixture.controller;

        let network = add_network(controller, "https://example.com/app.js#frag", "remote").await;
        let file = project.file("example.com/app.js").unwrap();
        assert!(controller.bindings().is_bound(&network.id()));
        assert!(controller.bindings().is_bound(&file.id()));
        assert_eq!(fixture.registry.synced()[0].1, "local");
        assert_eq!(controller.indexed_network_resources(), 1);

        controller
            .handle_resource_event(ResourceEvent::Removed(network.clone()))
            .await;
        assert!(!controller.bindings().is_bound(&file.id()));
        assert_eq!(controller.indexed_network_resources(), 0);
    }

    #[tokio::test]
    async fn test_file_added_later_binds_to_indexed_network_resource() {
        let (fixture, project) = active_fixture(&[]).await;
        let controller = &fixture.controller;
        let network = add_network(controller, "https://example.com/style.css", "remote").await;
        assert!(!controller.bindings().is_bound(&network.id()));

        let file = project.add_file("example.com/style.css", "local");
        controller
            .handle_resource_event(ResourceEvent::Added(file.clone()))
            .await;
        assert!(controller.bindings().is_bound(&network.id()));

        controller
            .handle_resource_event(ResourceEvent::Removed(file))
            .await;
        assert!(!controller.bindings().is_bound(&network.id()));
        assert_eq!(fixture.registry.active_bindings(), 0);
    }

    #[tokio::test]
    async fn test_snippets_are_never_indexed() {
        let (fixture, _project) = active_fixture(&[]).await;
        add_network(&fixture.controller, "snippet://my-snippet", "").await;
        assert_eq!(fixture.controller.indexed_network_resources(), 0);
    }

    #[tokio::test]
    async fn test_rename_rebinds_under_new_url() {
        let (fixture, project) = active_fixture(&[("example.com/new.js", "local")]).await;
        let controller = &fixture.controller;
        let network = add_network(controller, "https://example.com/old.js", "remote").await;
        assert!(!controller.bindings().is_bound(&network.id()));

        network.set_url("https://example.com/new.js");
        controller
            .handle_resource_event(ResourceEvent::Renamed {
                resource: network.clone(),
                old_url: "https://example.com/old.js".to_string(),
            })
            .await;
        let file = project.file("example.com/new.js").unwrap();
        assert!(controller.bindings().is_bound(&file.id()));
        assert_eq!(controller.indexed_network_resources(), 1);
    }

    #[tokio::test]
    async fn test_deactivation_unbinds_and_clears_index() {
        let (fixture, _project) = active_fixture(&[("example.com/app.js", "local")]).await;
        let controller = &fixture.controller;
        add_network(controller, "https://example.com/app.js", "remote").await;
        assert_eq!(controller.bindings().binding_count(), 1);

        fixture.targets.set_main_target(false);
        controller.target_removed().await;
        assert_eq!(controller.bindings().binding_count(), 0);
        assert_eq!(controller.indexed_network_resources(), 0);
    }

    #[tokio::test]
    async fn test_activation_binds_existing_pairs() {
        let fixture = fixture().await;
        let controller = &fixture.controller;
        fixture.targets.set_main_target(false);
        let network = fixture
            .workspace
            .add_network_resource("https://example.com/app.js", "remote");

        let project = MemoryProject::new("overrides", ROOT);
        project.add_file("example.com/app.js", "local");
        controller.set_project(Some(project)).await;
        assert!(!controller.active());

        fixture.targets.set_main_target(true);
        controller.target_added().await;
        assert!(controller.active());
        assert!(controller.bindings().is_bound(&network.id()));
    }

    #[tokio::test]
    async fn test_pattern_for_file_system_resource() {
        let (fixture, project) = active_fixture(&[
            ("readme", ""),
            ("example.com/path/app.js", ""),
            ("example.com/longurls/app-1a2b.js", ""),
            ("example.com%253A8080/a%2520b.js", ""),
        ])
        .await;
        let controller = &fixture.controller;
        let pattern = |path: &str| {
            let file = project.file(path).unwrap();
            controller.pattern_for_file_system_resource(project.as_ref(), file.as_ref())
        };

        assert_eq!(pattern("readme"), "");
        assert_eq!(pattern("example.com/path/app.js"), "http?://example.com/path/app.js");
        assert_eq!(pattern("example.com/longurls/app-1a2b.js"), "http?://example.com/*");
        assert_eq!(pattern("example.com%253A8080/a%2520b.js"), "http?://example.com:8080/a b.js");
    }

    #[tokio::test]
    async fn test_rebuild_registers_patterns() {
        let (fixture, _project) = active_fixture(&[
            ("www.example.com/index.html", "<html>"),
            ("www.example.com/app.js", ""),
            ("www.example.com/longurls/x-1a2b", ""),
            ("readme", ""),
            (
                "www.example.com/.headers",
                r#"[{"applyTo": "*.css", "headers": {"cache-control": "no-store"}}]"#,
            ),
        ])
        .await;

        assert_eq!(
            fixture.channel.patterns(),
            vec![
                "http?://www.example.com/",
                "http?://www.example.com/*",
                "http?://www.example.com/*.css",
                "http?://www.example.com/app.js",
                "http?://www.example.com/index.html",
            ]
        );
        assert_eq!(fixture.controller.header_overrides().len(), 1);
    }

    #[tokio::test]
    async fn test_broken_descriptor_contributes_nothing() {
        let (fixture, _project) = active_fixture(&[
            ("www.example.com/.headers", "{ not json"),
            ("www.example.com/app.js", ""),
        ])
        .await;
        assert_eq!(fixture.channel.patterns(), vec!["http?://www.example.com/app.js"]);
        assert!(fixture.controller.header_overrides().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_rebuild_registers_nothing() {
        let (fixture, _project) = active_fixture(&[("www.example.com/app.js", "")]).await;
        assert_eq!(fixture.channel.patterns().len(), 1);

        fixture.controller.set_enabled(false).await;
        fixture.controller.update_interception_patterns_now().await;
        assert!(fixture.channel.patterns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_events_trigger_throttled_rebuild() {
        let (fixture, project) = active_fixture(&[]).await;
        let registrations = fixture.channel.registrations();

        for name in ["a.js", "b.js", "c.js"] {
            let file = project.add_file(&format!("example.com/{}", name), "");
            fixture
                .controller
                .handle_resource_event(ResourceEvent::Added(file))
                .await;
        }
        assert_eq!(fixture.channel.registrations(), registrations);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fixture.channel.registrations(), registrations + 1);
        assert_eq!(fixture.channel.patterns().len(), 3);
    }

    #[tokio::test]
    async fn test_content_override() {
        let (fixture, _project) = active_fixture(&[("example.com/app.js", "local()")]).await;
        let controller = &fixture.controller;
        let network = add_network(controller, "https://example.com/app.js", "remote()").await;

        let request = Arc::new(
            MemoryRequest::get("https://example.com/app.js")
                .with_resource_type(ResourceType::Script)
                .with_headers(vec![HeaderEntry::new("age", "0")])
                .with_body(&STANDARD.encode("remote()"), true),
        );
        let outcome = fixture.channel.dispatch(request.clone()).await;
        assert_eq!(outcome, InterceptionOutcome::ContentOverridden);

        let continued = request.continued().unwrap();
        assert_eq!(continued.body.as_ref(), b"local()");
        assert_eq!(continued.mime_type, "text/javascript");
        assert!(!continued.encoded);
        assert_eq!(continued.headers, vec![HeaderEntry::new("age", "0")]);

        let original = controller.original_content_for(&network.id()).unwrap();
        assert_eq!(original.await.as_deref(), Some("remote()"));
    }

    #[tokio::test]
    async fn test_mime_falls_back_to_expected_type() {
        let (fixture, _project) = active_fixture(&[("example.com/data", "{}")]).await;
        let request = Arc::new(
            MemoryRequest::get("https://example.com/data").with_resource_type(ResourceType::Document),
        );
        fixture.controller.handle_intercepted_request(request.clone()).await;
        assert_eq!(request.continued().unwrap().mime_type, "text/html");

        let request = Arc::new(MemoryRequest::get("https://example.com/data").with_headers(vec![
            HeaderEntry::new("Content-Type", "application/json"),
        ]));
        fixture.controller.handle_intercepted_request(request.clone()).await;
        assert_eq!(request.continued().unwrap().mime_type, "application/json");
    }

    #[tokio::test]
    async fn test_header_only_override() {
        let (fixture, _project) = active_fixture(&[(
            "example.com/.headers",
            r#"[{"applyTo": "*.js", "headers": {"cache-control": "no-store"}}]"#,
        )])
        .await;

        let request = Arc::new(
            MemoryRequest::get("https://example.com/lib.js")
                .with_headers(vec![HeaderEntry::new("age", "0")])
                .with_body("console.log(1)", false),
        );
        let outcome = fixture.controller.handle_intercepted_request(request.clone()).await;
        assert_eq!(outcome, InterceptionOutcome::HeadersOverridden);

        let continued = request.continued().unwrap();
        assert!(continued.encoded);
        assert_eq!(continued.body.as_ref(), STANDARD.encode("console.log(1)").as_bytes());
        assert_eq!(
            continued.headers,
            vec![
                HeaderEntry::new("age", "0"),
                HeaderEntry::new("cache-control", "no-store"),
            ]
        );
    }

    fn without_header_overrides() -> OverridesConfig {
        OverridesConfig {
            header_overrides_enabled: false,
            ..config()
        }
    }

    #[tokio::test]
    async fn test_disabled_header_overrides_register_plain_glob() {
        let (fixture, _project) = active_fixture_with(
            without_header_overrides(),
            &[(
                "www.example.com/.headers",
                r#"[{"applyTo": "*.css", "headers": {"cache-control": "no-store"}}]"#,
            )],
        )
        .await;

        assert_eq!(fixture.channel.patterns(), vec!["http?://www.example.com/.headers"]);
        assert!(fixture.controller.header_overrides().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_header_overrides_pass_through() {
        let (fixture, _project) = active_fixture_with(
            without_header_overrides(),
            &[(
                "example.com/.headers",
                r#"[{"applyTo": "*.js", "headers": {"cache-control": "no-store"}}]"#,
            )],
        )
        .await;

        let request = Arc::new(
            MemoryRequest::get("https://example.com/lib.js")
                .with_headers(vec![HeaderEntry::new("age", "0")])
                .with_body("console.log(1)", false),
        );
        let outcome = fixture.controller.handle_intercepted_request(request.clone()).await;
        assert_eq!(outcome, InterceptionOutcome::PassThrough);
        assert!(request.continued().is_none());
    }

    #[tokio::test]
    async fn test_pass_through_cases() {
        let (fixture, _project) = active_fixture(&[("example.com/app.js", "local")]).await;
        let controller = &fixture.controller;

        let put = Arc::new(MemoryRequest::new("PUT", "https://example.com/app.js"));
        assert_eq!(
            controller.handle_intercepted_request(put.clone()).await,
            InterceptionOutcome::PassThrough
        );
        assert!(put.continued().is_none());

        let unmatched = Arc::new(MemoryRequest::get("https://example.com/other.js"));
        assert_eq!(
            controller.handle_intercepted_request(unmatched).await,
            InterceptionOutcome::PassThrough
        );

        controller.set_enabled(false).await;
        let inactive = Arc::new(MemoryRequest::get("https://example.com/app.js"));
        assert_eq!(
            controller.handle_intercepted_request(inactive).await,
            InterceptionOutcome::PassThrough
        );
    }

    #[tokio::test]
    async fn test_unreadable_override_passes_through() {
        let (fixture, project) = active_fixture(&[("example.com/app.js", "local")]).await;
        project.file("example.com/app.js").unwrap().fail_reads(true);

        let request = Arc::new(MemoryRequest::get("https://example.com/app.js"));
        assert_eq!(
            fixture.controller.handle_intercepted_request(request.clone()).await,
            InterceptionOutcome::PassThrough
        );
        assert!(request.continued().is_none());
    }

    #[tokio::test]
    async fn test_save_for_overrides() {
        let (fixture, project) = active_fixture(&[]).await;
        let controller = &fixture.controller;
        let network = add_network(controller, "https://example.com/js/app.js", "edited").await;
        assert!(controller.can_save_for_overrides(network.as_ref()));

        let created = controller
            .save_for_overrides(network.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.url(), "file:///overrides/example.com/js/app.js");
        assert_eq!(
            created.request_content().await.unwrap().text.as_deref(),
            Some("edited")
        );
        assert!(project.file("example.com/js/app.js").is_some());
        assert!(!controller.bindings().is_saving(&network.id()));

        controller
            .handle_resource_event(ResourceEvent::Added(created))
            .await;
        assert!(!controller.can_save_for_overrides(network.as_ref()));
        assert!(controller
            .save_for_overrides(network)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_headers_file_lookup_and_creation() {
        let (fixture, project) = active_fixture(&[]).await;
        let controller = &fixture.controller;
        assert!(controller.headers_file_for_url("https://example.com/js/app.js").is_none());

        let created = controller
            .get_or_create_headers_file("https://example.com/js/app.js")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.url(), "file:///overrides/example.com/js/.headers");
        assert!(project.file("example.com/js/.headers").is_some());

        let found = controller
            .headers_file_for_url("https://example.com/js/other.js")
            .unwrap();
        assert_eq!(found.id(), created.id());
    }

    #[tokio::test]
    async fn test_project_events_replace_current_project() {
        let fixture = fixture().await;
        let mut changes = fixture.controller.subscribe_project_changes();

        let first = fixture.workspace.create_project("first", "file:///first");
        fixture.workspace.add_project(first.clone());
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow_and_update().as_deref(), Some("first"));

        let second = fixture.workspace.create_project("second", "file:///second");
        fixture.workspace.add_project(second);
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow_and_update().as_deref(), Some("second"));
        assert!(first.is_removed());

        fixture.workspace.remove_project("second");
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow_and_update().as_deref(), None);
        assert!(!fixture.controller.active());
    }
}
