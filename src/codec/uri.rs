// src/codec/uri.rs
//! Low-level URL string helpers used by the path codec

use std::borrow::Cow;

/// Characters that survive a generic URI escaping pass unchanged.
///
/// Unreserved characters plus the reserved set and `#`: everything that
/// may legitimately appear in a complete URI.
fn is_uri_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b';' | b','
                | b'/'
                | b'?'
                | b':'
                | b'@'
                | b'&'
                | b'='
                | b'+'
                | b'$'
                | b'-'
                | b'_'
                | b'.'
                | b'!'
                | b'~'
                | b'*'
                | b'\''
                | b'('
                | b')'
                | b'#'
        )
}

/// Percent-encode every byte outside the URI-safe set (uppercase hex)
pub fn encode_uri(input: &str) -> Cow<'_, str> {
    if input.bytes().all(is_uri_safe) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 8);
    for byte in input.bytes() {
        if is_uri_safe(byte) {
            out.push(byte as char);
        } else {
            push_escaped(&mut out, byte);
        }
    }
    Cow::Owned(out)
}

/// Replace each occurrence of the given ASCII characters with `%XX`
pub fn escape_chars(input: &str, chars: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if chars.contains(&c) {
            push_escaped(&mut out, c as u8);
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape every character of a segment, byte by byte
pub fn escape_all(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        push_escaped(&mut out, byte);
    }
    out
}

pub(crate) fn push_escaped(out: &mut String, byte: u8) {
    out.push_str(&format!("%{:02X}", byte));
}

/// Single lenient percent-decoding pass.
///
/// Malformed escapes are left untouched, so decoding never fails.
pub fn unescape(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    let decoded = urlencoding::decode_binary(input.as_bytes());
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Strip a `#fragment`
pub fn url_without_hash(url: &str) -> &str {
    match url.find('#') {
        Some(index) => &url[..index],
        None => url,
    }
}

/// Strip a leading `http://` or `https://`
pub fn strip_http_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

/// File extension of the last path component, ignoring query and fragment.
///
/// Anything from the first `%` of the extension on is dropped.
pub fn extract_extension(url: &str) -> &str {
    let mut rest = url_without_hash(url);
    if let Some(index) = rest.find('?') {
        rest = &rest[..index];
    }
    if let Some(index) = rest.rfind('/') {
        rest = &rest[index + 1..];
    }
    match rest.rfind('.') {
        Some(index) => {
            let extension = &rest[index + 1..];
            match extension.find('%') {
                Some(percent) => &extension[..percent],
                None => extension,
            }
        }
        None => "",
    }
}

/// Deterministic 32-bit string hash.
///
/// Polynomial hash over UTF-16 code units modulo 2^32 - 5. The arithmetic
/// is carried out in `f64` so that intermediate rounding matches the
/// double-precision reference and existing shortened file names stay
/// addressable.
pub fn hash_code(input: &str) -> u32 {
    if input.is_empty() {
        return 0;
    }
    const P: f64 = 4_294_967_291.0;
    const Z: f64 = 1_345_575_271.0;
    const Z2: f64 = 1_506_996_573.0;

    let mut s: f64 = 0.0;
    let mut zi: f64 = 1.0;
    for unit in input.encode_utf16() {
        let xi = unit as f64 * Z2;
        s = (s + zi * xi) % P;
        zi = (zi * Z) % P;
    }
    s = (s + zi * (P - 1.0)) % P;

    // ToInt32 followed by absolute value
    let as_i32 = (s as u64 as u32) as i32;
    as_i32.unsigned_abs()
}

/// Substring of at most `count` characters
pub fn prefix_chars(input: &str, count: usize) -> &str {
    match input.char_indices().nth(count) {
        Some((index, _)) => &input[..index],
        None => input,
    }
}
