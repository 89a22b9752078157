// src/lib.rs
//! Local Override Engine Library
//!
//! Maps network resources onto a local override directory tree and answers
//! intercepted responses from it.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **codec**: URL <-> override path translation
//! - **headers**: `.headers` descriptors and hierarchical header merging
//! - **binding**: network <-> override file bindings
//! - **interception**: activation state machine and the interception handler
//! - **workspace**: collaborator interfaces and in-memory implementations
//! - **observability**: tracing setup
//! - **utils**: configuration and errors

// Public module exports
pub mod binding;
pub mod codec;
pub mod headers;
pub mod interception;
pub mod observability;
pub mod utils;
pub mod workspace;

// Re-export commonly used types
pub use binding::{Binding, BindingEngine, BindingRegistry};
pub use codec::{FileNamePolicy, PathCodec};
pub use headers::{HeaderEntry, HeaderOverride, HeaderOverrideStore};
pub use interception::{InterceptionController, InterceptionOutcome};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
