// src/interception/request.rs
//! Interface to the live request-interception channel

use crate::headers::HeaderEntry;
use crate::interception::resource_type::ResourceType;
use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stage at which a matching request is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStage {
    Request,
    Response,
}

/// URL glob registered with the channel (`*` matches any run of characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterceptionPattern {
    #[serde(rename = "urlPattern")]
    pub url_pattern: String,
    #[serde(rename = "requestStage")]
    pub request_stage: RequestStage,
}

impl InterceptionPattern {
    pub fn response(url_pattern: impl Into<String>) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            request_stage: RequestStage::Response,
        }
    }
}

/// Body of an intercepted response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseBody {
    /// Text, or base64 when `encoded` is set
    pub content: Option<String>,
    pub encoded: bool,
}

/// A request paused at the response stage
#[async_trait]
pub trait InterceptedRequest: Send + Sync {
    fn method(&self) -> String;

    fn url(&self) -> String;

    fn response_headers(&self) -> Option<Vec<HeaderEntry>>;

    fn resource_type(&self) -> ResourceType;

    /// Read the original response body
    async fn response_body(&self) -> Result<ResponseBody>;

    /// Resume the request with a substituted body and headers
    async fn continue_request_with_content(
        &self,
        body: Bytes,
        mime_type: &str,
        encoded: bool,
        headers: Vec<HeaderEntry>,
    ) -> Result<()>;
}

/// What the engine did with an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptionOutcome {
    /// Left untouched
    PassThrough,
    /// Body replaced by an override file
    ContentOverridden,
    /// Original body with patched headers
    HeadersOverridden,
}

/// Receives every request matching the registered patterns
#[async_trait]
pub trait InterceptionHandler: Send + Sync {
    async fn handle_intercepted_request(
        &self,
        request: Arc<dyn InterceptedRequest>,
    ) -> InterceptionOutcome;
}

/// The network layer's interception registry
#[async_trait]
pub trait InterceptionChannel: Send + Sync {
    /// Replace the registered pattern set and its handler
    async fn set_interception_handler_for_patterns(
        &self,
        patterns: Vec<InterceptionPattern>,
        handler: Arc<dyn InterceptionHandler>,
    ) -> Result<()>;
}
