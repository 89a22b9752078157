// src/codec/path_codec.rs
//! URL to override-path codec
//!
//! Maps a network URL onto a path inside the override tree:
//!
//! ```text
//! https://www.example.com/path/app.js?v=1#top
//!     │ strip scheme + fragment
//!     ▼
//! www.example.com/path/app.js?v=1
//!     │ split on '/', query stays on the last segment
//!     ▼
//! [www.example.com, path, app.js?v=1]
//!     │ escape each segment for the file system
//!     ▼
//! raw:     www.example.com/path/app.js?v=1
//! encoded: www.example.com/path/app.js%3Fv=1
//! ```
//!
//! The raw path names the file on disk. The encoded path is the same path
//! percent-encoded once more, which is how override project resources are
//! addressed by URL.

use crate::codec::uri::{
    encode_uri, escape_all, escape_chars, extract_extension, hash_code, prefix_chars,
    strip_http_scheme, unescape, url_without_hash,
};

/// Default resource served for directory-like URLs
pub const DIRECTORY_INDEX: &str = "index.html";

/// Directory that holds shortened file names for over-long URLs
pub const LONG_URLS_DIR: &str = "longurls";

/// Default combined root + path length limit
pub const DEFAULT_LONG_PATH_BUDGET: usize = 200;

/// Device names Windows refuses as file names, regardless of extension case
const RESERVED_FILENAMES: [&str; 22] = [
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// File name escaping policy of the file system holding the override tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNamePolicy {
    /// Restrictive: no `:`/`?`, no reserved device names, no trailing dot
    Windows,
    /// Permissive
    Posix,
}

impl FileNamePolicy {
    /// Policy of the file system the engine runs on
    pub fn host() -> Self {
        if cfg!(windows) {
            FileNamePolicy::Windows
        } else {
            FileNamePolicy::Posix
        }
    }
}

impl Default for FileNamePolicy {
    fn default() -> Self {
        Self::host()
    }
}

/// Stateless URL <-> local path translation
#[derive(Debug, Clone)]
pub struct PathCodec {
    policy: FileNamePolicy,
    long_path_budget: usize,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self::new(FileNamePolicy::host(), DEFAULT_LONG_PATH_BUDGET)
    }
}

impl PathCodec {
    pub fn new(policy: FileNamePolicy, long_path_budget: usize) -> Self {
        Self {
            policy,
            long_path_budget,
        }
    }

    pub fn policy(&self) -> FileNamePolicy {
        self.policy
    }

    /// File-system path (relative to `override_root`) for a network URL
    pub fn raw_path(&self, override_root: &str, url: &str) -> String {
        let mut initial = url_without_hash(strip_http_scheme(url)).to_string();
        if initial.is_empty() {
            return String::new();
        }
        if !initial.contains('?') {
            if initial.ends_with('/') {
                initial.push_str(DIRECTORY_INDEX);
            } else if !initial.contains('/') {
                // bare host: the request targets the site root
                initial.push('/');
                initial.push_str(DIRECTORY_INDEX);
            }
        }

        let mut parts: Vec<String> = file_name_parts(&initial)
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(|part| self.encode_part(&part))
            .collect();

        let joined = parts.join("/");
        let root_len = override_root.encode_utf16().count();
        if root_len + joined.len() > self.long_path_budget {
            let domain = parts.first().cloned().unwrap_or_default();
            let short_name = match parts.last() {
                Some(name) if !name.is_empty() => format!("{}-", prefix_chars(name, 10)),
                _ => String::new(),
            };
            let extension = extract_extension(&initial);
            let extension_part = if extension.is_empty() {
                String::new()
            } else {
                format!(".{}", prefix_chars(extension, 10))
            };
            parts = vec![
                domain,
                LONG_URLS_DIR.to_string(),
                format!("{}{:x}{}", short_name, hash_code(&joined), extension_part),
            ];
        }

        parts.join("/")
    }

    /// Override-project path (relative to `override_root`) for a network URL
    pub fn encoded_path(&self, override_root: &str, url: &str) -> String {
        raw_path_to_encoded_path(&self.raw_path(override_root, url))
    }

    /// Absolute override-project URL for a network URL
    pub fn file_url(&self, override_root: &str, url: &str) -> String {
        format!("{}/{}", override_root, self.encoded_path(override_root, url))
    }

    /// Escape a single path segment so it is a valid file name
    fn encode_part(&self, part: &str) -> String {
        // the generic pass leaves '/' and '*' alone
        let mut name = escape_chars(&encode_uri(part), &['/', '*']);

        if self.policy == FileNamePolicy::Windows {
            name = escape_chars(&name, &[':', '?']);
            if RESERVED_FILENAMES.contains(&name.to_lowercase().as_str()) {
                name = escape_all(&name);
            }
            if name.ends_with('.') {
                name.pop();
                name.push_str("%2E");
            }
        }

        name
    }
}

/// Split a path into file name parts, keeping any query string attached to
/// the final part.
fn file_name_parts(path: &str) -> Vec<String> {
    let path = url_without_hash(path);
    match path.find('?') {
        None => path.split('/').map(str::to_string).collect(),
        Some(0) => vec![path.to_string()],
        Some(index) => {
            let (head, query) = path.split_at(index);
            let mut parts: Vec<String> = head.split('/').map(str::to_string).collect();
            if let Some(last) = parts.last_mut() {
                last.push_str(query);
            }
            parts
        }
    }
}

/// Encode a raw file-system path into its project URL path form.
///
/// Pre-escapes the characters a file URL cannot carry literally, then
/// resolves `.` and `..` segments the way URL path parsing does.
pub fn raw_path_to_encoded_path(raw: &str) -> String {
    let escaped = escape_chars(raw, &['%', ';', '#', '?', ' ']);
    let segments: Vec<&str> = escaped.split('/').collect();
    let last_index = segments.len().saturating_sub(1);

    let mut output: Vec<&str> = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        match *segment {
            "." => {
                if index == last_index {
                    output.push("");
                }
            }
            ".." => {
                output.pop();
                if index == last_index {
                    output.push("");
                }
            }
            other => output.push(other),
        }
    }
    output.join("/")
}

/// Decode one layer of escaping from a local path
pub fn decode_local_path(path: &str) -> String {
    unescape(path)
}

/// Recover the URL path a project-relative path stands for.
///
/// Project paths are the encoded form of on-disk names that are themselves
/// escaped, so two decoding passes are needed.
pub fn local_path_to_url_path(relative_path: &str) -> String {
    unescape(&unescape(relative_path))
}
