//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the OGG conversion core:
//! - Logging and tracing infrastructure
//! - Converter configuration (work directories, bitrate policy, injected bridges)
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the conversion crate depends on.
//! It establishes the logging conventions and the fail-fast configuration
//! builder used by host applications.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{AacBitrate, ConverterConfig, ConverterConfigBuilder};
pub use error::{Error, Result};
