// src/headers/descriptor.rs
//! `.headers` descriptor files
//!
//! A descriptor is a JSON array of entries:
//!
//! ```json
//! [
//!   { "applyTo": "*.css", "headers": { "cache-control": "no-store" } }
//! ]
//! ```

use crate::utils::errors::{EngineError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Canonical file name of a header override descriptor
pub const HEADERS_FILENAME: &str = ".headers";

/// A single response header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One descriptor entry: a glob relative to the descriptor's directory and
/// the headers to set on matching responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderOverride {
    #[serde(rename = "applyTo")]
    pub apply_to: String,

    /// Header name -> value, in file order
    pub headers: IndexMap<String, String>,
}

impl HeaderOverride {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.apply_to.is_empty() {
            return Err("empty applyTo".to_string());
        }
        if self.headers.is_empty() {
            return Err(format!("no headers for applyTo {:?}", self.apply_to));
        }
        Ok(())
    }
}

/// Parse descriptor content. Empty content is an empty descriptor.
pub fn parse_descriptor(path: &str, content: &str) -> Result<Vec<HeaderOverride>> {
    let content = if content.trim().is_empty() { "[]" } else { content };

    let entries: Vec<HeaderOverride> =
        serde_json::from_str(content).map_err(|e| EngineError::DescriptorParse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    for entry in &entries {
        entry.validate().map_err(|reason| EngineError::DescriptorParse {
            path: path.to_string(),
            reason,
        })?;
    }

    Ok(entries)
}
