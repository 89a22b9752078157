// src/interception/resource_type.rs
//! Resource types reported by the network layer and their MIME mapping

use serde::{Deserialize, Serialize};

/// Resource type hint attached to an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    #[serde(rename = "CSPViolationReport")]
    CspViolationReport,
    Preflight,
    #[default]
    Other,
}

impl ResourceType {
    /// Category a MIME type most plausibly belongs to
    pub fn from_mime_type(mime_type: &str) -> Self {
        if mime_type.is_empty() {
            return ResourceType::Other;
        }
        if mime_type.starts_with("text/html") {
            return ResourceType::Document;
        }
        if mime_type.starts_with("text/css") {
            return ResourceType::Stylesheet;
        }
        if mime_type.starts_with("image/") {
            return ResourceType::Image;
        }
        if mime_type.starts_with("text/") {
            return ResourceType::Script;
        }
        if mime_type.contains("font") {
            return ResourceType::Font;
        }
        if mime_type.contains("script") {
            return ResourceType::Script;
        }
        if mime_type.contains("octet") {
            return ResourceType::Other;
        }
        if mime_type.contains("application") {
            return ResourceType::Script;
        }
        ResourceType::Other
    }

    /// MIME type served for this type when nothing better is known
    pub fn canonical_mime_type(&self) -> &'static str {
        match self {
            ResourceType::Document => "text/html",
            ResourceType::Script => "text/javascript",
            ResourceType::Stylesheet => "text/css",
            ResourceType::Manifest => "application/manifest+json",
            _ => "",
        }
    }
}
