//! Workspace placeholder crate.
//!
//! This crate exposes the workspace crates behind feature flags so host
//! applications can depend on `ogg-convert-workspace` alone. The default
//! `desktop-shims` feature wires in the reqwest-based fetch client; enable
//! `core` instead to bring your own `HttpClient`.

pub use bridge_traits;

#[cfg(any(feature = "core", feature = "desktop-shims"))]
pub use core_convert;
#[cfg(any(feature = "core", feature = "desktop-shims"))]
pub use core_runtime;
