//! # OGG Conversion Module
//!
//! Converts OGG-contained audio into formats a system media player can
//! open.
//!
//! ## Overview
//!
//! This module handles:
//! - OGG page parsing, checksum validation and packet reassembly
//! - Opus decoding (libopus) and Vorbis decoding (Symphonia)
//! - AAC-LC encoding (FDK-AAC) into an M4A container
//! - 16-bit PCM WAV writing
//! - Job orchestration with scratch copies and atomic output files
//!
//! ## Pipeline
//!
//! ```text
//! OggSource ─fetch→ bytes ─→ OggDemuxer ─packets→ PcmDecoder ─PCM→ PcmSink ─→ .m4a / .wav
//! ```

pub mod codec;
pub mod converter;
pub mod error;
pub mod job;
pub mod ogg;
pub mod output;
pub mod pcm;
pub mod source;
pub mod storage;

pub use codec::{open_decoder, PcmDecoder};
pub use converter::{transcode, OggConverter};
pub use error::{ConvertError, ErrorKind, Result};
pub use job::{ConversionJob, ConversionKind, JobState};
pub use ogg::{CodecKind, OggDemuxer};
pub use output::{OutputSink, PcmSink, StagedFile};
pub use pcm::{PcmBuffer, PcmSpec};
pub use source::{CatalogEntry, OggSource, SampleCatalog};
pub use storage::JobStorage;
