//! # Host Bridge Traits
//!
//! Capability traits the conversion core needs from its host but does not
//! implement itself.
//!
//! ## Overview
//!
//! The conversion core only ever suspends to fetch source bytes. Everything
//! that touches the outside world at that point goes through a trait defined
//! here, so a host can plug in its own transport (or a test double) without
//! the core knowing about it.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Blocking-free HTTP GET used by the fetch step
//! - [`Clock`](time::Clock) - Time source used to stamp job file names
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Implementations
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert transport-specific failures into it with an actionable
//! message (URL, status code, I/O cause).
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`; conversion jobs share one client
//! across concurrently running tasks.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient;
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
