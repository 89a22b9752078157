// src/headers/store.rs
//! Compiled header overrides keyed by the directory they apply to
//!
//! Lookup walks a request's path from the override root down to the file,
//! so overrides in deeper directories are merged last and win:
//!
//! ```text
//! ""                          .headers            (every request)
//! "www.example.com/"          www.example.com/.headers
//! "www.example.com/path/"     www.example.com/path/.headers
//! ```

use crate::codec::decode_local_path;
use crate::headers::descriptor::{HeaderEntry, HeaderOverride, HEADERS_FILENAME};
use crate::headers::pattern::{escape_regex, extract_directory_index};
use crate::utils::errors::{EngineError, Result};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Header override with its `applyTo` glob compiled against full URLs
#[derive(Debug, Clone)]
pub struct CompiledHeaderOverride {
    pub apply_to_regex: Regex,
    pub headers: IndexMap<String, String>,
}

/// Result of compiling one descriptor
#[derive(Debug, Default)]
pub struct CompiledDescriptor {
    /// Interception globs to register
    pub patterns: IndexSet<String>,
    /// Directory key, singly decoded, with trailing `/` (empty at the root)
    pub path: String,
    pub overrides: Vec<CompiledHeaderOverride>,
}

/// Merge override headers into a base list.
///
/// Names match case-sensitively. Existing names keep their position and take
/// the new value; new names are appended in the order they first appear.
pub fn merge_headers(base: &[HeaderEntry], overrides: &IndexMap<String, String>) -> Vec<HeaderEntry> {
    let mut merged: IndexMap<&str, &str> = IndexMap::with_capacity(base.len() + overrides.len());
    for header in base {
        merged.insert(&header.name, &header.value);
    }
    for (name, value) in overrides {
        merged.insert(name, value);
    }
    merged
        .into_iter()
        .map(|(name, value)| HeaderEntry::new(name, value))
        .collect()
}

/// Compile the entries of a descriptor found at `relative_path` inside the
/// override project (encoded form, e.g. `www.example.com%253A443/.headers`).
pub fn compile_descriptor(relative_path: &str, entries: &[HeaderOverride]) -> Result<CompiledDescriptor> {
    let singly_decoded = decode_local_path(relative_path);
    let path = singly_decoded
        .strip_suffix(HEADERS_FILENAME)
        .unwrap_or(&singly_decoded)
        .to_string();
    let decoded_path = decode_local_path(&path);

    let mut compiled = CompiledDescriptor {
        patterns: IndexSet::new(),
        path,
        overrides: Vec::with_capacity(entries.len()),
    };

    for entry in entries {
        compiled
            .patterns
            .insert(format!("http?://{}{}", decoded_path, entry.apply_to));

        let index = extract_directory_index(&entry.apply_to);
        let source = match &index.tail {
            Some(tail) => {
                compiled
                    .patterns
                    .insert(format!("http?://{}{}", decoded_path, index.head));
                format!(
                    "^https?://{}({})?$",
                    escape_regex(&format!("{}{}", decoded_path, index.head)),
                    escape_regex(tail)
                )
            }
            None => format!(
                "^https?://{}$",
                escape_regex(&format!("{}{}", decoded_path, entry.apply_to))
            ),
        };

        let apply_to_regex = Regex::new(&source)
            .map_err(|e| EngineError::InvalidPattern(format!("{}: {}", source, e)))?;
        compiled.overrides.push(CompiledHeaderOverride {
            apply_to_regex,
            headers: entry.headers.clone(),
        });
    }

    Ok(compiled)
}

/// Outcome of applying header overrides to a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMerge {
    pub headers: Vec<HeaderEntry>,
    /// Number of overrides that matched the request
    pub matched: usize,
}

/// Directory path -> compiled overrides.
///
/// Rebuilt from scratch on every pattern rebuild, never patched.
#[derive(Debug, Default)]
pub struct HeaderOverrideStore {
    overrides: RwLock<HashMap<String, Vec<CompiledHeaderOverride>>>,
}

impl HeaderOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.overrides.write().clear();
    }

    /// Register (or replace) the overrides of one directory
    pub fn insert(&self, path: String, overrides: Vec<CompiledHeaderOverride>) {
        debug!("Registered {} header override(s) for {:?}", overrides.len(), path);
        self.overrides.write().insert(path, overrides);
    }

    /// Replace the whole map in one step
    pub fn replace(&self, overrides: HashMap<String, Vec<CompiledHeaderOverride>>) {
        *self.overrides.write() = overrides;
    }

    pub fn len(&self) -> usize {
        self.overrides.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.read().is_empty()
    }

    /// Apply overrides to `base` for a request.
    ///
    /// `raw_path` is the request's raw override path; its segments give the
    /// directory levels visited after the root.
    pub fn apply(&self, request_url: &str, raw_path: &str, base: &[HeaderEntry]) -> HeaderMerge {
        let overrides = self.overrides.read();
        let mut result = HeaderMerge {
            headers: base.to_vec(),
            matched: 0,
        };

        let merge_level = |path: &str, result: &mut HeaderMerge| {
            let Some(level) = overrides.get(path) else {
                return;
            };
            for header_override in level {
                if header_override.apply_to_regex.is_match(request_url) {
                    result.headers = merge_headers(&result.headers, &header_override.headers);
                    result.matched += 1;
                }
            }
        };

        let mut path = String::new();
        merge_level(&path, &mut result);
        for segment in raw_path.split('/') {
            path.push_str(segment);
            path.push('/');
            merge_level(&path, &mut result);
        }

        result
    }
}

/// Parse and compile descriptor content, logging instead of failing.
///
/// A broken descriptor contributes nothing.
pub fn compile_descriptor_content(relative_path: &str, content: &str) -> CompiledDescriptor {
    let compiled = crate::headers::descriptor::parse_descriptor(relative_path, content)
        .and_then(|entries| compile_descriptor(relative_path, &entries));
    match compiled {
        Ok(compiled) => compiled,
        Err(e) => {
            warn!("Failed to parse {} for locally overriding headers: {}", relative_path, e);
            CompiledDescriptor::default()
        }
    }
}
