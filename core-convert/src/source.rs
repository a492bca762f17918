//! # Input Sources
//!
//! Where the OGG bytes of a job come from. Fetching is the only step of a
//! conversion that suspends; everything after it runs on a blocking task.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use bytes::Bytes;
use core_runtime::logging::{redact_url, strip_path};
use tracing::{debug, instrument};

use crate::error::{ConvertError, Result};
use crate::job::ConversionKind;

/// Source of one job's OGG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OggSource {
    /// HTTP GET through the configured [`HttpClient`].
    Remote {
        url: String,
        headers: HashMap<String, String>,
    },
    LocalFile {
        path: PathBuf,
    },
    InMemory {
        data: Bytes,
    },
}

impl OggSource {
    pub fn remote(url: impl Into<String>) -> Self {
        OggSource::Remote {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        OggSource::LocalFile { path: path.into() }
    }

    pub fn in_memory(data: impl Into<Bytes>) -> Self {
        OggSource::InMemory { data: data.into() }
    }

    /// Add a request header. No-op for non-remote sources.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let OggSource::Remote { headers, .. } = &mut self {
            headers.insert(key.into(), value.into());
        }
        self
    }

    /// Load the source bytes into memory.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Fetch`] when no client is configured for a remote
    /// source, the request fails or returns a non-2xx status, or a local
    /// file cannot be read.
    #[instrument(skip(self, client, retry), fields(source = %self))]
    pub async fn fetch(
        &self,
        client: Option<&Arc<dyn HttpClient>>,
        retry: &RetryPolicy,
    ) -> Result<Bytes> {
        let data = match self {
            OggSource::Remote { url, headers } => {
                let client = client.ok_or_else(|| {
                    ConvertError::Fetch(
                        "no HTTP client configured for remote sources".to_string(),
                    )
                })?;
                let request = HttpRequest::get(url.as_str()).headers(headers.clone());
                client
                    .execute_with_retry(request, retry.clone())
                    .await?
                    .into_success_body(&redact_url(url))?
            }
            OggSource::LocalFile { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    ConvertError::Fetch(format!(
                        "cannot read {}: {}",
                        strip_path(&path.to_string_lossy()),
                        e
                    ))
                })?;
                Bytes::from(bytes)
            }
            OggSource::InMemory { data } => data.clone(),
        };

        debug!(bytes = data.len(), "fetched source");
        Ok(data)
    }
}

impl fmt::Display for OggSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OggSource::Remote { url, .. } => write!(f, "remote {}", redact_url(url)),
            OggSource::LocalFile { path } => {
                write!(f, "file {}", strip_path(&path.to_string_lossy()))
            }
            OggSource::InMemory { data } => write!(f, "in-memory ({} bytes)", data.len()),
        }
    }
}

/// A named sample: where to get it and how to convert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub source: OggSource,
    pub kind: ConversionKind,
}

/// Lookup table from sample id to source, filled in by the host.
///
/// # Example
///
/// ```rust,ignore
/// let catalog = SampleCatalog::new()
///     .with_sample("sample_opus", OggSource::remote(opus_url), ConversionKind::OpusToM4a)
///     .with_sample("sample_vorbis", OggSource::remote(vorbis_url), ConversionKind::VorbisToWav);
///
/// let path = converter.convert_sample(&catalog, "sample_opus").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SampleCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl SampleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample(
        mut self,
        id: impl Into<String>,
        source: OggSource,
        kind: ConversionKind,
    ) -> Self {
        self.insert(id, source, kind);
        self
    }

    /// Add or replace a sample.
    pub fn insert(&mut self, id: impl Into<String>, source: OggSource, kind: ConversionKind) {
        self.entries.insert(id.into(), CatalogEntry { source, kind });
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// Look up a sample.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Fetch`] for an unknown id.
    pub fn resolve(&self, id: &str) -> Result<&CatalogEntry> {
        self.get(id)
            .ok_or_else(|| ConvertError::Fetch(format!("unknown sample '{}'", id)))
    }

    /// Sample ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
