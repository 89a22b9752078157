// src/binding/engine.rs
//! Network <-> file-system binding engine
//!
//! Every resource takes part in at most one binding. Transitions affecting a
//! network resource are serialized by that resource's lock, so a rename
//! (remove + add) racing a file-system event cannot leave a torn or
//! duplicated binding behind.

use crate::binding::lock_map::LockMap;
use crate::workspace::resource::{Resource, ResourceId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pre-override response body captured at interception time
pub type OriginalContent = Shared<BoxFuture<'static, Option<String>>>;

/// A network resource paired with its override file
#[derive(Clone)]
pub struct Binding {
    pub network: Arc<dyn Resource>,
    pub file_system: Arc<dyn Resource>,
}

impl Binding {
    pub fn new(network: Arc<dyn Resource>, file_system: Arc<dyn Resource>) -> Self {
        Self {
            network,
            file_system,
        }
    }

    fn pairs(&self, network: &ResourceId, file_system: &ResourceId) -> bool {
        &self.network.id() == network && &self.file_system.id() == file_system
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("network", &self.network.url())
            .field("file_system", &self.file_system.url())
            .finish()
    }
}

/// Persistence layer that keeps bound resources' views in sync
#[async_trait]
pub trait BindingRegistry: Send + Sync {
    async fn add_binding(&self, binding: &Binding);

    async fn remove_binding(&self, binding: &Binding);

    /// Push the authoritative content of a freshly bound pair
    fn sync_content(&self, source: &dyn Resource, content: &str, encoded: bool);
}

/// Owner of all active bindings
pub struct BindingEngine {
    /// Both sides of every binding map to the same entry
    bindings: DashMap<ResourceId, Arc<Binding>>,
    locks: LockMap,
    saving_for_overrides: DashSet<ResourceId>,
    /// Keyed by the file-system resource
    original_contents: DashMap<ResourceId, OriginalContent>,
    registry: Arc<dyn BindingRegistry>,
}

impl BindingEngine {
    pub fn new(registry: Arc<dyn BindingRegistry>) -> Self {
        Self {
            bindings: DashMap::new(),
            locks: LockMap::new(),
            saving_for_overrides: DashSet::new(),
            original_contents: DashMap::new(),
            registry,
        }
    }

    pub fn binding_for(&self, id: &ResourceId) -> Option<Arc<Binding>> {
        self.bindings.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_bound(&self, id: &ResourceId) -> bool {
        self.bindings.contains_key(id)
    }

    /// Number of live bindings
    pub fn binding_count(&self) -> usize {
        self.bindings.len() / 2
    }

    /// Bind a network resource to an override file.
    ///
    /// Returns `true` when a new binding was created. Rebinding the same pair
    /// is a no-op; bindings either side already takes part in are torn down
    /// first.
    pub async fn bind(&self, network: Arc<dyn Resource>, file_system: Arc<dyn Resource>) -> bool {
        let network_id = network.id();
        let file_system_id = file_system.id();
        let _guard = self.locks.acquire(&network_id).await;

        // Teardown awaits, so both sides are re-checked until neither is bound.
        let binding = loop {
            if network.is_disposed() || file_system.is_disposed() {
                debug!("Skipping bind of disposed resource {}", network.url());
                return false;
            }
            if let Some(existing) = self.binding_for(&network_id) {
                if existing.pairs(&network_id, &file_system_id) {
                    return false;
                }
                self.unbind_unguarded(&network_id).await;
                continue;
            }
            if self.is_bound(&file_system_id) {
                self.unbind_unguarded(&file_system_id).await;
                continue;
            }

            let binding = Arc::new(Binding::new(Arc::clone(&network), Arc::clone(&file_system)));
            // The file side can be claimed under another network resource's lock
            match self.bindings.entry(file_system_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&binding));
                }
                Entry::Occupied(_) => continue,
            }
            self.bindings.insert(network_id.clone(), Arc::clone(&binding));
            break binding;
        };

        self.attach(binding).await;
        true
    }

    /// Remove the binding a resource takes part in, if any
    pub async fn unbind(&self, id: &ResourceId) -> bool {
        loop {
            let Some(binding) = self.binding_for(id) else {
                return false;
            };
            let locked = binding.network.id();
            let _guard = self.locks.acquire(&locked).await;
            // Rebound while waiting: retry under the new owner's lock
            match self.binding_for(id) {
                Some(current) if current.network.id() == locked => {
                    return self.unbind_unguarded(id).await;
                }
                Some(_) => continue,
                None => return false,
            }
        }
    }

    async fn unbind_unguarded(&self, id: &ResourceId) -> bool {
        let Some(binding) = self.binding_for(id) else {
            return false;
        };

        for side in [binding.network.id(), binding.file_system.id()] {
            self.bindings
                .remove_if(&side, |_, current| Arc::ptr_eq(current, &binding));
        }
        info!(
            "Unbound {} from {}",
            binding.network.url(),
            binding.file_system.url()
        );
        self.registry.remove_binding(&binding).await;
        true
    }

    async fn attach(&self, binding: Arc<Binding>) {
        let network = Arc::clone(&binding.network);
        let file_system = Arc::clone(&binding.file_system);
        info!("Bound {} to {}", network.url(), file_system.url());
        self.registry.add_binding(&binding).await;

        let source_of_truth = if self.is_saving(&network.id()) {
            network
        } else {
            file_system
        };
        match source_of_truth.request_content().await {
            Ok(content) => self.registry.sync_content(
                source_of_truth.as_ref(),
                content.text.as_deref().unwrap_or_default(),
                content.encoded,
            ),
            Err(e) => warn!(
                "Failed to read {} for initial sync: {}",
                source_of_truth.url(),
                e
            ),
        }
    }

    /// Drop the lock of a removed network resource
    pub fn forget_lock(&self, id: &ResourceId) {
        self.locks.remove(id);
    }

    /// Mark a network resource as being saved into the override tree.
    ///
    /// Returns `false` if a save was already in progress.
    pub fn begin_saving(&self, id: &ResourceId) -> bool {
        self.saving_for_overrides.insert(id.clone())
    }

    pub fn finish_saving(&self, id: &ResourceId) {
        self.saving_for_overrides.remove(id);
    }

    pub fn is_saving(&self, id: &ResourceId) -> bool {
        self.saving_for_overrides.contains(id)
    }

    pub fn record_original_content(&self, file_system: &ResourceId, content: OriginalContent) {
        self.original_contents.insert(file_system.clone(), content);
    }

    pub fn forget_original_content(&self, file_system: &ResourceId) {
        self.original_contents.remove(file_system);
    }

    /// Original (pre-override) response body of a bound resource
    pub fn original_content_for(&self, id: &ResourceId) -> Option<OriginalContent> {
        let binding = self.binding_for(id)?;
        self.original_contents
            .get(&binding.file_system.id())
            .map(|entry| entry.value().clone())
    }
}
