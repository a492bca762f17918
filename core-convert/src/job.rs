//! # Conversion Jobs
//!
//! One [`ConversionJob`] per conversion call, tracking where its files live
//! and how far it got. Jobs are never persisted.
//!
//! ```text
//! Fetched → Parsed → Decoded → Encoded → Completed
//!    └────────┴─────────┴─────────┴──→ Failed(kind)
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, ErrorKind, Result};
use crate::ogg::CodecKind;

/// Source/destination codec pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionKind {
    /// Opus in OGG → AAC in M4A.
    OpusToM4a,
    /// Vorbis in OGG → 16-bit PCM WAV.
    VorbisToWav,
}

impl ConversionKind {
    /// Codec the source stream must carry.
    pub fn source_codec(&self) -> CodecKind {
        match self {
            ConversionKind::OpusToM4a => CodecKind::Opus,
            ConversionKind::VorbisToWav => CodecKind::Vorbis,
        }
    }

    /// The conversion that accepts `codec`.
    pub fn for_codec(codec: CodecKind) -> Self {
        match codec {
            CodecKind::Opus => ConversionKind::OpusToM4a,
            CodecKind::Vorbis => ConversionKind::VorbisToWav,
        }
    }

    /// Output file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ConversionKind::OpusToM4a => "m4a",
            ConversionKind::VorbisToWav => "wav",
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionKind::OpusToM4a => write!(f, "opus→m4a"),
            ConversionKind::VorbisToWav => write!(f, "vorbis→wav"),
        }
    }
}

/// Progress of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Source bytes are in the scratch directory.
    Fetched,
    /// Container and codec headers were accepted.
    Parsed,
    /// Every packet was decoded.
    Decoded,
    /// The output file is fully written (still staged).
    Encoded,
    /// The output file is at its destination path.
    Completed,
    Failed(ErrorKind),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed(_))
    }

    fn can_advance_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Fetched, JobState::Parsed)
                | (JobState::Parsed, JobState::Decoded)
                | (JobState::Decoded, JobState::Encoded)
                | (JobState::Encoded, JobState::Completed)
        ) || (!self.is_terminal() && matches!(next, JobState::Failed(_)))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Fetched => write!(f, "fetched"),
            JobState::Parsed => write!(f, "parsed"),
            JobState::Decoded => write!(f, "decoded"),
            JobState::Encoded => write!(f, "encoded"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// A single conversion, from fetched bytes to output file.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: String,
    /// Human-readable source, safe to log.
    pub source: String,
    pub kind: ConversionKind,
    pub scratch_path: PathBuf,
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
    state: JobState,
}

impl ConversionJob {
    /// A job whose source bytes have just been fetched.
    pub fn fetched(
        id: impl Into<String>,
        source: impl Into<String>,
        kind: ConversionKind,
        scratch_path: PathBuf,
        output_path: PathBuf,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            kind,
            scratch_path,
            output_path,
            created_at,
            state: JobState::Fetched,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Internal`] for a transition the lifecycle does not
    /// allow; the state is left unchanged.
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(ConvertError::Internal(format!(
                "job {}: illegal transition {} -> {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record `err` as the reason this job failed.
    ///
    /// A job that already reached a terminal state keeps it.
    pub fn fail(&mut self, err: &ConvertError) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed(err.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ConversionJob {
        ConversionJob::fetched(
            "tmp-20240309-140507-000-0a1b2c3d",
            "in-memory (12 bytes)",
            ConversionKind::OpusToM4a,
            PathBuf::from("/tmp/ogg_tmp/tmp-1.ogg"),
            PathBuf::from("/tmp/converted/tmp-1.m4a"),
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        for next in [
            JobState::Parsed,
            JobState::Decoded,
            JobState::Encoded,
            JobState::Completed,
        ] {
            job.advance(next).unwrap();
        }
        assert_eq!(job.state(), JobState::Completed);
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_skipping_a_stage_is_internal_error() {
        let mut job = job();
        let err = job.advance(JobState::Encoded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(job.state(), JobState::Fetched);
    }

    #[test]
    fn test_failure_from_any_live_state() {
        let mut job = job();
        job.advance(JobState::Parsed).unwrap();
        job.fail(&ConvertError::Decode("bad packet".into()));
        assert_eq!(job.state(), JobState::Failed(ErrorKind::Decode));

        // terminal: no way out
        assert!(job.advance(JobState::Completed).is_err());
        assert!(job.advance(JobState::Failed(ErrorKind::Encode)).is_err());
    }

    #[test]
    fn test_completed_job_keeps_state_on_fail() {
        let mut job = job();
        job.advance(JobState::Parsed).unwrap();
        job.advance(JobState::Decoded).unwrap();
        job.advance(JobState::Encoded).unwrap();
        job.advance(JobState::Completed).unwrap();
        job.fail(&ConvertError::Cancelled);
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ConversionKind::OpusToM4a.source_codec(), CodecKind::Opus);
        assert_eq!(
            ConversionKind::for_codec(CodecKind::Vorbis),
            ConversionKind::VorbisToWav
        );
        assert_eq!(ConversionKind::VorbisToWav.extension(), "wav");
        assert_eq!(JobState::Failed(ErrorKind::Fetch).to_string(), "failed(fetch)");
    }
}
