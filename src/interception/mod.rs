// src/interception/mod.rs
//! Response interception
//!
//! Decides which requests the network layer pauses and what they are
//! answered with:
//!
//! - **InterceptionController**: activation state, resource bindings and
//!   the interception handler
//! - **Throttler**: trailing-edge coalescing of pattern rebuilds
//! - **request**: interfaces of the interception channel and paused requests
//! - **resource_type**: resource type hints and their MIME types
//!
//! # Architecture
//!
//! ```text
//! workspace events ──► controller ──► bindings (BindingEngine)
//!                          │
//!                          ├─ rebuild (throttled) ──► channel patterns
//!                          │
//! paused response ─────────┴─► override file? headers? ──► continue / pass through
//! ```

pub mod controller;
pub mod request;
pub mod resource_type;
pub mod throttler;

// Re-export commonly used types
pub use controller::{InterceptionController, InterceptionControllerBuilder};
pub use request::{
    InterceptedRequest, InterceptionChannel, InterceptionHandler, InterceptionOutcome,
    InterceptionPattern, RequestStage, ResponseBody,
};
pub use resource_type::ResourceType;
pub use throttler::{ThrottledJob, Throttler};
