// src/headers/mod.rs
//! Header overrides
//!
//! `.headers` descriptors placed anywhere in the override tree patch the
//! response headers of matching requests:
//!
//! - **descriptor**: JSON parsing and validation
//! - **pattern**: glob to regex translation, directory-index detection
//! - **store**: compiled overrides per directory and the merge algorithm

pub mod descriptor;
pub mod pattern;
pub mod store;

pub use descriptor::{parse_descriptor, HeaderEntry, HeaderOverride, HEADERS_FILENAME};
pub use pattern::{escape_regex, extract_directory_index, DirectoryIndex};
pub use store::{
    compile_descriptor, compile_descriptor_content, merge_headers, CompiledDescriptor,
    CompiledHeaderOverride, HeaderMerge, HeaderOverrideStore,
};
