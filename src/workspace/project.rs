// src/workspace/project.rs
//! Project-level collaborator interfaces

use crate::utils::errors::Result;
use crate::workspace::events::{EventBus, ProjectEvent, ResourceEvent};
use crate::workspace::resource::Resource;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// A directory tree holding override files
#[async_trait]
pub trait OverrideProject: Send + Sync {
    fn id(&self) -> String;

    /// URL of the override root (e.g. `file:///home/me/overrides`)
    fn file_system_path(&self) -> String;

    fn resources(&self) -> Vec<Arc<dyn Resource>>;

    fn resource_for_url(&self, url: &str) -> Option<Arc<dyn Resource>>;

    /// Encoded path parts of a resource relative to the root
    fn relative_path(&self, resource: &dyn Resource) -> Vec<String> {
        let root = format!("{}/", self.file_system_path());
        resource
            .url()
            .strip_prefix(&root)
            .map(|relative| relative.split('/').map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Create a file `name` under directory `path`, both in encoded form and
    /// relative to the root. Parent directories are created as needed.
    async fn create_file(
        &self,
        path: &str,
        name: &str,
        content: &str,
        encoded: bool,
    ) -> Result<Option<Arc<dyn Resource>>>;

    /// Raw bytes of a file in this project
    async fn request_file_bytes(&self, resource: &dyn Resource) -> Result<Option<Bytes>>;

    /// Detach the project from the workspace
    fn remove(&self) {}
}

/// The workspace the engine observes
pub trait Workspace: Send + Sync {
    /// Resources of every network project
    fn network_resources(&self) -> Vec<Arc<dyn Resource>>;

    fn resource_events(&self) -> &EventBus<ResourceEvent>;

    fn project_events(&self) -> &EventBus<ProjectEvent>;
}

/// Knowledge about debugging targets
pub trait NetworkTargets: Send + Sync {
    /// Whether a primary page target is attached
    fn has_main_target(&self) -> bool;
}
