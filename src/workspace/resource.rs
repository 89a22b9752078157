// src/workspace/resource.rs
//! Resources supplied by the workspace
//!
//! The engine never owns resource content. It reads it through this trait
//! and reacts to lifecycle events published by the workspace.

use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a resource for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh unique identifier
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of a binding a resource lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Loaded by the inspected page
    Network,
    /// File inside an override project
    FileSystem,
}

/// Content snapshot of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceContent {
    /// Text, or base64 when `encoded` is set
    pub text: Option<String>,
    pub encoded: bool,
}

impl ResourceContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            encoded: false,
        }
    }
}

/// A network or file-system resource
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    fn id(&self) -> ResourceId;

    fn url(&self) -> String;

    /// Last path component of the URL
    fn name(&self) -> String;

    fn kind(&self) -> ResourceKind;

    /// Identifier of the owning project
    fn project_id(&self) -> String;

    fn mime_type(&self) -> String;

    async fn request_content(&self) -> Result<ResourceContent>;

    /// Whether the workspace already dropped this resource
    fn is_disposed(&self) -> bool {
        false
    }
}
