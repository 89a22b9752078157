// src/binding/mod.rs
//! Network <-> override file bindings
//!
//! - **BindingEngine**: single-flight bind/unbind and initial content sync
//! - **LockMap**: per-network-resource async locks

pub mod engine;
pub mod lock_map;

pub use engine::{Binding, BindingEngine, BindingRegistry, OriginalContent};
pub use lock_map::LockMap;
