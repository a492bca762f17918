//! # Converter Configuration Module
//!
//! Provides configuration management for the OGG conversion core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `ConverterConfig` holding the two work directories, the AAC bitrate
//! policy and the injected host capabilities. It enforces fail-fast
//! validation so a misconfigured converter is rejected before any job runs.
//!
//! ## Directories
//!
//! - `scratch_dir` - intermediate OGG copies (`ogg_tmp` by default)
//! - `output_dir` - finished `.m4a` / `.wav` files (`converted` by default)
//!
//! Both are created on first use, never at build time.
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - fetches remote sources (desktop default: reqwest)
//! - `Clock` - stamps job file names (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{AacBitrate, ConverterConfig};
//!
//! let config = ConverterConfig::builder()
//!     .scratch_dir("/tmp/ogg_tmp")
//!     .output_dir("/tmp/converted")
//!     .aac_bitrate(AacBitrate::Cbr(128_000))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::ConverterConfig;
//!
//! // Output directory inside the scratch directory is rejected
//! let config = ConverterConfig::builder()
//!     .scratch_dir("/tmp/work")
//!     .output_dir("/tmp/work/converted")
//!     .build()
//!     .expect("Should fail - nested directories");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, RetryPolicy, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scratch directory name used by [`ConverterConfig::in_temp_dir`].
pub const DEFAULT_SCRATCH_DIR_NAME: &str = "ogg_tmp";

/// Output directory name used by [`ConverterConfig::in_temp_dir`].
pub const DEFAULT_OUTPUT_DIR_NAME: &str = "converted";

/// Lowest accepted constant bitrate, in bits per second.
pub const MIN_CBR_BITRATE: u32 = 8_000;

/// Highest accepted constant bitrate, in bits per second.
pub const MAX_CBR_BITRATE: u32 = 320_000;

/// Bitrate policy for the AAC encoder.
///
/// The VBR modes map onto the encoder's own quality presets; `Cbr` takes a
/// target in bits per second for the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacBitrate {
    Cbr(u32),
    VbrLow,
    VbrMedium,
    VbrHigh,
}

impl Default for AacBitrate {
    fn default() -> Self {
        Self::VbrHigh
    }
}

impl AacBitrate {
    /// Nominal bitrate advertised in the container, in bits per second.
    ///
    /// VBR modes report a typical stereo rate for the preset.
    pub fn nominal_bps(&self) -> u32 {
        match self {
            Self::Cbr(bps) => *bps,
            Self::VbrLow => 96_000,
            Self::VbrMedium => 128_000,
            Self::VbrHigh => 192_000,
        }
    }
}

/// Converter configuration.
///
/// Use [`ConverterConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct ConverterConfig {
    /// Directory holding intermediate OGG copies
    pub scratch_dir: PathBuf,

    /// Directory receiving finished output files
    pub output_dir: PathBuf,

    /// AAC bitrate policy for Opus → M4A jobs
    pub aac_bitrate: AacBitrate,

    /// HTTP client used for remote sources (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// Retry policy handed to the HTTP client for each fetch
    pub fetch_retry: RetryPolicy,

    /// Time source for job file names
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("scratch_dir", &self.scratch_dir)
            .field("output_dir", &self.output_dir)
            .field("aac_bitrate", &self.aac_bitrate)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("fetch_retry", &self.fetch_retry)
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl ConverterConfig {
    /// Creates a new builder for constructing a `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder::default()
    }

    /// Builder preset with both directories under the system temp directory
    /// (`<tmp>/ogg_tmp` and `<tmp>/converted`).
    pub fn in_temp_dir() -> ConverterConfigBuilder {
        let tmp = std::env::temp_dir();
        Self::builder()
            .scratch_dir(tmp.join(DEFAULT_SCRATCH_DIR_NAME))
            .output_dir(tmp.join(DEFAULT_OUTPUT_DIR_NAME))
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Neither directory path is empty
    /// - The directories are distinct and neither contains the other
    /// - A constant bitrate lies within the accepted range
    pub fn validate(&self) -> Result<()> {
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Scratch directory cannot be empty".to_string(),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("Output directory cannot be empty".to_string()));
        }

        if nested_or_equal(&self.scratch_dir, &self.output_dir) {
            return Err(Error::Config(format!(
                "Scratch directory {} and output directory {} must be distinct and not nested. \
                 Clearing one would otherwise delete files from the other.",
                self.scratch_dir.display(),
                self.output_dir.display()
            )));
        }

        if let AacBitrate::Cbr(bps) = self.aac_bitrate {
            if !(MIN_CBR_BITRATE..=MAX_CBR_BITRATE).contains(&bps) {
                return Err(Error::Config(format!(
                    "AAC bitrate {} bps is outside the supported range {}..={} bps",
                    bps, MIN_CBR_BITRATE, MAX_CBR_BITRATE
                )));
            }
        }

        Ok(())
    }
}

fn nested_or_equal(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Default reqwest client could not be created: {}", e),
    })?;

    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(Some(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    // Remote sources fail at fetch time with an actionable message instead.
    Ok(None)
}

/// Builder for constructing [`ConverterConfig`] instances.
#[derive(Default)]
pub struct ConverterConfigBuilder {
    scratch_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    aac_bitrate: Option<AacBitrate>,
    http_client: Option<Arc<dyn HttpClient>>,
    fetch_retry: Option<RetryPolicy>,
    clock: Option<Arc<dyn Clock>>,
}

impl ConverterConfigBuilder {
    /// Sets the scratch directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::ConverterConfig;
    ///
    /// let builder = ConverterConfig::builder()
    ///     .scratch_dir("/path/to/ogg_tmp");
    /// ```
    pub fn scratch_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.scratch_dir = Some(path.into());
        self
    }

    /// Sets the output directory.
    pub fn output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Sets the AAC bitrate policy.
    ///
    /// Default: [`AacBitrate::VbrHigh`]
    pub fn aac_bitrate(mut self, bitrate: AacBitrate) -> Self {
        self.aac_bitrate = Some(bitrate);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the retry policy used for remote fetches.
    pub fn fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = Some(policy);
        self
    }

    /// Sets the clock used to stamp job file names.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `ConverterConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A directory is missing or the two directories overlap
    /// - The bitrate is out of range
    /// - The default HTTP client cannot be created
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use core_runtime::config::ConverterConfig;
    /// let config = ConverterConfig::builder()
    ///     .scratch_dir("/path/to/ogg_tmp")
    ///     .output_dir("/path/to/converted")
    ///     .build()?;
    /// # Ok::<(), core_runtime::Error>(())
    /// ```
    pub fn build(self) -> Result<ConverterConfig> {
        let scratch_dir = self.scratch_dir.ok_or_else(|| {
            Error::Config(
                "Scratch directory is required. Use .scratch_dir() to set it.".to_string(),
            )
        })?;

        let output_dir = self.output_dir.ok_or_else(|| {
            Error::Config("Output directory is required. Use .output_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => Some(client),
            None => provide_default_http_client()?,
        };

        let config = ConverterConfig {
            scratch_dir,
            output_dir,
            aac_bitrate: self.aac_bitrate.unwrap_or_default(),
            http_client,
            fetch_retry: self.fetch_retry.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
