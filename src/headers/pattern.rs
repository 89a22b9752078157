// src/headers/pattern.rs
//! Glob to regex translation for header override patterns

use regex::Regex;

/// File names a server may serve for a directory request
const DIRECTORY_INDEX_FILES: [&str; 3] = ["index.html", "index.htm", "index.php"];

/// Characters escaped before `*` is expanded
const REGEX_SPECIAL: &[char] = &['[', ']', '{', '}', '(', ')', '\\', '.', '^', '$', '+', '|', '?'];

/// Escape a glob so only `*` keeps a special meaning (any run of characters)
pub fn escape_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        if c == '*' {
            out.push_str(".*");
        } else {
            // '-' and ',' are literal outside character classes
            if REGEX_SPECIAL.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
    }
    out
}

/// Split of a pattern into directory head and index-file tail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIndex {
    /// Everything up to and including the last `/` (whole pattern if no tail)
    pub head: String,
    /// Final segment, present only when it can name a directory index
    pub tail: Option<String>,
}

/// Detect patterns whose final segment matches a directory index file.
///
/// `example.com/index.html` also answers requests for `example.com/`, so such
/// patterns get an additional variant without the tail.
pub fn extract_directory_index(pattern: &str) -> DirectoryIndex {
    let (head, tail) = match pattern.rfind('/') {
        Some(index) => (&pattern[..=index], &pattern[index + 1..]),
        None => ("", pattern),
    };

    let matches_index = Regex::new(&format!("^{}$", escape_regex(tail)))
        .map(|regex| DIRECTORY_INDEX_FILES.iter().any(|file| regex.is_match(file)))
        .unwrap_or(false);

    if matches_index {
        DirectoryIndex {
            head: head.to_string(),
            tail: Some(tail.to_string()),
        }
    } else {
        DirectoryIndex {
            head: pattern.to_string(),
            tail: None,
        }
    }
}
