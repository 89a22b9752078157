// src/workspace/events.rs
//! Workspace lifecycle events and a small publish/subscribe bus

use crate::workspace::project::OverrideProject;
use crate::workspace::resource::Resource;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Resource lifecycle notifications
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Added(Arc<dyn Resource>),
    Removed(Arc<dyn Resource>),
    /// `resource` already carries its new URL
    Renamed {
        resource: Arc<dyn Resource>,
        old_url: String,
    },
    /// The user committed an edit to the resource's working copy
    WorkingCopyCommitted(Arc<dyn Resource>),
}

/// Override project lifecycle notifications
#[derive(Clone)]
pub enum ProjectEvent {
    Added(Arc<dyn OverrideProject>),
    Removed { project_id: String },
}

impl fmt::Debug for ProjectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectEvent::Added(project) => f.debug_tuple("Added").field(&project.id()).finish(),
            ProjectEvent::Removed { project_id } => {
                f.debug_struct("Removed").field("project_id", project_id).finish()
            }
        }
    }
}

type Subscribers<E> = DashMap<u64, mpsc::UnboundedSender<E>>;

/// Fan-out event bus. Every subscriber gets its own unbounded queue.
pub struct EventBus<E> {
    subscribers: Arc<Subscribers<E>>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        debug!("Event subscriber {} registered", id);

        Subscription {
            id,
            receiver: rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: E) {
        self.subscribers
            .retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
pub struct Subscription<E> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<E>,
    subscribers: Weak<Subscribers<E>>,
}

impl<E> Subscription<E> {
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.id);
            debug!("Event subscriber {} removed", self.id);
        }
    }
}
