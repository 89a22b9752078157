// src/workspace/mod.rs
//! Collaborators the engine observes
//!
//! The engine never touches disk or the network itself. Resources, override
//! projects and lifecycle events are supplied through these traits; the
//! `memory` module implements all of them in process.

pub mod events;
pub mod memory;
pub mod project;
pub mod resource;

pub use events::{EventBus, ProjectEvent, ResourceEvent, Subscription};
pub use project::{NetworkTargets, OverrideProject, Workspace};
pub use resource::{Resource, ResourceContent, ResourceId, ResourceKind};
