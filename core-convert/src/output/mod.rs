//! # Output Writers
//!
//! Destination formats for decoded PCM:
//!
//! - [`WavWriter`]: 16-bit PCM in RIFF/WAVE
//! - [`AacEncoder`] feeding an [`M4aMuxer`]: AAC-LC in an MPEG-4 audio file
//!
//! Both write into a [`StagedFile`] so a destination path only ever holds a
//! complete file.

mod aac;
mod m4a;
mod wav;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use self::aac::{AacEncoder, AAC_FRAME_LEN, ENCODER_DELAY};
pub use self::m4a::{audio_specific_config, M4aMuxer, M4aTrack, M4aWriter};
pub use self::wav::{speaker_mask, WavHeader, WavReader, WavWriter, MAX_WAV_DATA_LEN};

use crate::error::{ConvertError, Result};
use crate::pcm::PcmBuffer;

/// Consumer of decoded PCM, one buffer at a time.
pub trait PcmSink {
    /// # Errors
    ///
    /// [`ConvertError::Encode`] when the buffer cannot be encoded or
    /// written.
    fn write_pcm(&mut self, buffer: &PcmBuffer) -> Result<()>;
}

/// A [`PcmSink`] writing a file format into a staged output file.
pub trait OutputSink: PcmSink {
    /// Write trailing data and size fields, and hand back the writer so the
    /// staged file can be committed.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if the trailer cannot be written.
    fn finish_output(self: Box<Self>) -> Result<BufWriter<File>>;
}

impl OutputSink for M4aWriter<BufWriter<File>> {
    fn finish_output(self: Box<Self>) -> Result<BufWriter<File>> {
        (*self).finish()
    }
}

impl OutputSink for WavWriter<BufWriter<File>> {
    fn finish_output(self: Box<Self>) -> Result<BufWriter<File>> {
        (*self).finish()
    }
}

/// A file written under a hidden name and renamed into place on commit.
///
/// The staging file lives next to its destination (`.<name>.part`) so the
/// final rename never crosses a filesystem. Dropping an uncommitted
/// `StagedFile` deletes the staging file.
#[derive(Debug)]
pub struct StagedFile {
    staging_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Create the staging file for `final_path` and open it for writing.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if the destination has no file name or
    /// the staging file cannot be created.
    pub fn create(final_path: impl Into<PathBuf>) -> Result<(Self, BufWriter<File>)> {
        let final_path = final_path.into();
        let staging_path = staging_path_for(&final_path)?;

        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(&staging_path)
            .map_err(|e| ConvertError::fs(&staging_path, e))?;

        debug!(staging = %staging_path.display(), "created staging file");

        Ok((
            Self {
                staging_path,
                final_path,
                committed: false,
            },
            BufWriter::new(file),
        ))
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flush, sync and rename the staging file to its destination.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if flushing, syncing or renaming fails;
    /// the staging file is removed in that case.
    pub fn commit(mut self, writer: BufWriter<File>) -> Result<PathBuf> {
        let file = writer
            .into_inner()
            .map_err(|e| ConvertError::fs(&self.staging_path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| ConvertError::fs(&self.staging_path, e))?;
        drop(file);

        fs::rename(&self.staging_path, &self.final_path)
            .map_err(|e| ConvertError::fs(&self.final_path, e))?;
        self.committed = true;

        Ok(self.final_path.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.staging_path) {
            Ok(()) => debug!(staging = %self.staging_path.display(), "discarded staging file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                staging = %self.staging_path.display(),
                "failed to remove staging file: {}", e
            ),
        }
    }
}

fn staging_path_for(final_path: &Path) -> Result<PathBuf> {
    let name = final_path.file_name().ok_or_else(|| {
        ConvertError::fs(
            final_path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "destination has no file name"),
        )
    })?;

    let mut staged = std::ffi::OsString::from(".");
    staged.push(name);
    staged.push(".part");
    Ok(final_path.with_file_name(staged))
}

/// Write `samples` as little-endian 16-bit values.
pub(crate) fn write_i16_le<W: Write>(writer: &mut W, samples: &[i16]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    writer.write_all(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("staged-file-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_staging_name_is_hidden_sibling() {
        let staged = staging_path_for(Path::new("/out/tmp-1.m4a")).unwrap();
        assert_eq!(staged, PathBuf::from("/out/.tmp-1.m4a.part"));
    }

    #[test]
    fn test_commit_renames_into_place() {
        let dir = temp_dir();
        let target = dir.join("out.wav");

        let (staged, mut writer) = StagedFile::create(&target).unwrap();
        let staging = staged.staging_path().to_path_buf();
        writer.write_all(b"RIFF").unwrap();
        assert!(!target.exists());

        let path = staged.commit(writer).unwrap();

        assert_eq!(path, target);
        assert_eq!(fs::read(&target).unwrap(), b"RIFF");
        assert!(!staging.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_drop_without_commit_removes_staging() {
        let dir = temp_dir();
        let target = dir.join("out.m4a");

        let (staged, mut writer) = StagedFile::create(&target).unwrap();
        let staging = staged.staging_path().to_path_buf();
        writer.write_all(b"partial").unwrap();
        drop(writer);
        assert!(staging.exists());

        drop(staged);

        assert!(!staging.exists());
        assert!(!target.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let target = std::env::temp_dir()
            .join(format!("missing-{}", Uuid::new_v4()))
            .join("out.wav");
        assert!(matches!(
            StagedFile::create(&target),
            Err(ConvertError::Filesystem { .. })
        ));
    }

    #[test]
    fn test_write_i16_le() {
        let mut out = Vec::new();
        write_i16_le(&mut out, &[1, -2]).unwrap();
        assert_eq!(out, vec![0x01, 0x00, 0xFE, 0xFF]);
    }
}
