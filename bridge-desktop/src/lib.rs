//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with retry on 5xx/429 and exponential backoff
//!
//! The clock and console logger need nothing platform-specific and live in
//! `bridge-traits` itself.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use bridge_traits::{HttpClient, HttpRequest};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let response = http_client
//!         .execute(HttpRequest::get("https://example.com/sample.ogg"))
//!         .await?;
//!     println!("{} bytes", response.body.len());
//!     Ok(())
//! }
//! ```

mod http;

pub use http::ReqwestHttpClient;
