//! # Conversion Orchestrator
//!
//! [`OggConverter`] runs one job per call:
//!
//! 1. fetch the source bytes (the only `.await` that does I/O)
//! 2. store a scratch copy `tmp-<stamp>-<nonce>.ogg`
//! 3. demux, check the codec matches the requested conversion
//! 4. decode packet by packet into the encoder or WAV writer
//! 5. rename the staged output into the output directory
//!
//! Steps 2 to 5 run on a blocking task. Any failure removes the job's
//! scratch copy and staging file and surfaces as one [`ConvertError`].
//! Dropping the returned future cancels the blocking task at the next
//! packet boundary.
//!
//! ## Example
//!
//! ```rust,ignore
//! use core_convert::{OggConverter, OggSource};
//! use core_runtime::ConverterConfig;
//!
//! let converter = OggConverter::new(ConverterConfig::in_temp_dir().build()?);
//! let m4a = converter
//!     .convert_opus_to_m4a(OggSource::remote("https://cdn.example.com/sample.ogg"))
//!     .await?;
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use bytes::Bytes;
use core_runtime::logging::strip_path;
use core_runtime::{AacBitrate, ConverterConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::codec::{open_decoder, PcmDecoder};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, ConversionKind, JobState};
use crate::ogg::OggDemuxer;
use crate::output::{M4aWriter, OutputSink, PcmSink, StagedFile, WavWriter};
use crate::pcm::PcmSpec;
use crate::source::{OggSource, SampleCatalog};
use crate::storage::JobStorage;

/// Converts OGG Opus to M4A and OGG Vorbis to WAV.
///
/// Cheap to share behind an `Arc`; jobs are independent and may run
/// concurrently.
#[derive(Debug)]
pub struct OggConverter {
    config: ConverterConfig,
    storage: JobStorage,
}

impl OggConverter {
    pub fn new(config: ConverterConfig) -> Self {
        let storage = JobStorage::from_config(&config);
        Self { config, storage }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn storage(&self) -> &JobStorage {
        &self.storage
    }

    /// Convert an OGG Opus source to an AAC `.m4a` file.
    ///
    /// # Errors
    ///
    /// See [`OggConverter::convert`].
    pub async fn convert_opus_to_m4a(&self, source: OggSource) -> Result<PathBuf> {
        self.convert(ConversionKind::OpusToM4a, source).await
    }

    /// Convert an OGG Vorbis source to a 16-bit PCM `.wav` file.
    ///
    /// # Errors
    ///
    /// See [`OggConverter::convert`].
    pub async fn convert_vorbis_to_wav(&self, source: OggSource) -> Result<PathBuf> {
        self.convert(ConversionKind::VorbisToWav, source).await
    }

    /// Run one conversion job and return the output file path.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::Fetch`] if the source cannot be loaded
    /// - [`ConvertError::MalformedContainer`] for corrupt or truncated OGG
    /// - [`ConvertError::UnsupportedCodec`] if the stream's codec does not
    ///   match `kind`, or its configuration is not supported
    /// - [`ConvertError::Decode`] / [`ConvertError::Encode`] for codec failures
    /// - [`ConvertError::Filesystem`] for work directory failures
    /// - [`ConvertError::Cancelled`] if the job was abandoned
    #[instrument(skip_all, fields(kind = %kind, source = %source))]
    pub async fn convert(&self, kind: ConversionKind, source: OggSource) -> Result<PathBuf> {
        let name = self.storage.job_name();
        let created_at = self.config.clock.now();

        let data = source
            .fetch(self.config.http_client.as_ref(), &self.config.fetch_retry)
            .await
            .inspect_err(|e| warn!(job = %name, "fetch failed: {}", e))?;

        let job = ConversionJob::fetched(
            name.as_str(),
            source.to_string(),
            kind,
            self.storage.scratch_path(&name),
            self.storage.output_path(&name, kind.extension()),
            created_at,
        );
        self.run(job, data).await
    }

    /// Convert bytes already in memory.
    ///
    /// # Errors
    ///
    /// As [`OggConverter::convert`], minus fetch failures.
    pub async fn convert_bytes(
        &self,
        kind: ConversionKind,
        bytes: impl Into<Bytes>,
    ) -> Result<PathBuf> {
        self.convert(kind, OggSource::in_memory(bytes)).await
    }

    /// Convert a catalog sample with the conversion it is registered for.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Fetch`] for an unknown id, otherwise as
    /// [`OggConverter::convert`].
    pub async fn convert_sample(&self, catalog: &SampleCatalog, id: &str) -> Result<PathBuf> {
        let entry = catalog.resolve(id)?;
        self.convert(entry.kind, entry.source.clone()).await
    }

    /// Delete every scratch copy. Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if the directory cannot be cleared.
    #[instrument(skip(self))]
    pub async fn clear_scratch(&self) -> Result<usize> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.clear_scratch()).await?
    }

    /// Delete every converted output. Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if the directory cannot be cleared.
    #[instrument(skip(self))]
    pub async fn clear_converted_outputs(&self) -> Result<usize> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.clear_converted_outputs()).await?
    }

    async fn run(&self, job: ConversionJob, data: Bytes) -> Result<PathBuf> {
        let storage = self.storage.clone();
        let bitrate = self.config.aac_bitrate;
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        let task = tokio::task::spawn_blocking(move || {
            let mut job = job;
            let result = execute(&storage, &mut job, &data, bitrate, &cancel);
            if let Err(err) = &result {
                job.fail(err);
                storage.discard(&job.scratch_path);
            }
            (job, result)
        });

        let joined = task.await;
        let _ = guard.disarm();
        let (job, result) = joined?;

        match &result {
            Ok(path) => info!(
                job = %job.id,
                output = %strip_path(&path.to_string_lossy()),
                "conversion completed"
            ),
            Err(err) => warn!(
                job = %job.id,
                state = %job.state(),
                error_kind = %err.kind(),
                transient = err.is_transient(),
                input_error = err.is_input_error(),
                "conversion failed: {}", err
            ),
        }
        result
    }
}

/// Blocking part of a job: scratch copy through to the committed output.
fn execute(
    storage: &JobStorage,
    job: &mut ConversionJob,
    data: &[u8],
    bitrate: AacBitrate,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    storage.ensure_dirs()?;
    storage.write_scratch(&job.scratch_path, data)?;

    let file = File::open(&job.scratch_path).map_err(|e| ConvertError::fs(&job.scratch_path, e))?;
    let demuxer = OggDemuxer::new(BufReader::new(file))?;

    let expected = job.kind.source_codec();
    if demuxer.codec() != expected {
        return Err(ConvertError::UnsupportedCodec(format!(
            "{} requested but the stream carries {}",
            job.kind,
            demuxer.codec()
        )));
    }

    let mut decoder = open_decoder(demuxer)?;
    let spec = decoder.spec();
    job.advance(JobState::Parsed)?;
    debug!(
        job = %job.id,
        codec = %expected,
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        "parsed source"
    );

    let kind = job.kind;
    encode_output(job, decoder.as_mut(), cancel, |writer| {
        open_sink(kind, writer, spec, bitrate)
    })
}

/// Staged output sink for `kind`.
fn open_sink(
    kind: ConversionKind,
    writer: BufWriter<File>,
    spec: PcmSpec,
    bitrate: AacBitrate,
) -> Result<Box<dyn OutputSink>> {
    let sink: Box<dyn OutputSink> = match kind {
        ConversionKind::OpusToM4a => Box::new(M4aWriter::new(writer, spec, bitrate)?),
        ConversionKind::VorbisToWav => Box::new(WavWriter::new(writer, spec)?),
    };
    Ok(sink)
}

/// Decode into a sink over the job's staging file, then commit it to the
/// output path. On any error the staging file is dropped and removed.
fn encode_output<D, F>(
    job: &mut ConversionJob,
    decoder: &mut D,
    cancel: &CancellationToken,
    open: F,
) -> Result<PathBuf>
where
    D: PcmDecoder + ?Sized,
    F: FnOnce(BufWriter<File>) -> Result<Box<dyn OutputSink>>,
{
    let (staged, writer) = StagedFile::create(&job.output_path)?;
    let mut sink = open(writer)?;
    transcode(decoder, sink.as_mut(), cancel)?;
    job.advance(JobState::Decoded)?;

    let writer = sink.finish_output()?;
    job.advance(JobState::Encoded)?;

    let path = staged.commit(writer)?;
    job.advance(JobState::Completed)?;
    Ok(path)
}

/// Pump every buffer from `decoder` into `sink`, checking `cancel` before
/// each packet. Returns the number of frames transferred.
///
/// # Errors
///
/// [`ConvertError::Cancelled`] once `cancel` fires, otherwise the first
/// error from the decoder or the sink.
pub fn transcode<D, S>(decoder: &mut D, sink: &mut S, cancel: &CancellationToken) -> Result<u64>
where
    D: PcmDecoder + ?Sized,
    S: PcmSink + ?Sized,
{
    let mut buffers = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }
        match decoder.decode_next()? {
            Some(buffer) => {
                sink.write_pcm(&buffer)?;
                buffers += 1;
            }
            None => break,
        }
    }

    let frames = decoder.frames_emitted();
    debug!(buffers, frames, "transcode finished");
    Ok(frames)
}
