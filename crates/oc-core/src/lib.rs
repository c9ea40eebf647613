//! oc-core: response assembly, request lifecycle, rendering and the proxy
//! for ollachat.
//!
//! Exposed as a library for integration testing.

pub mod ask;
pub mod assembler;
pub mod config;
pub mod format;
pub mod proxy;
pub mod renderer;
pub mod session;
pub mod style;
