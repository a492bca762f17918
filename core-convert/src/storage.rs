//! # Work Directories
//!
//! Job file naming and the two directories a converter owns:
//!
//! - **scratch**: fetched OGG copies, `tmp-<stamp>-<nonce>.ogg`
//! - **output**: finished files, `tmp-<stamp>-<nonce>.m4a|.wav`
//!
//! Directories are created on first use and only cleared on request.
//! All operations here are blocking and run inside the conversion task.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::time::Clock;
use core_runtime::logging::strip_path;
use core_runtime::ConverterConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConvertError, Result};

/// Prefix shared by every job file.
pub const JOB_FILE_PREFIX: &str = "tmp-";

/// Extension of scratch copies.
pub const SCRATCH_EXTENSION: &str = "ogg";

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Scratch and output directories plus the clock used to name jobs.
#[derive(Clone)]
pub struct JobStorage {
    scratch_dir: PathBuf,
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for JobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStorage")
            .field("scratch_dir", &self.scratch_dir)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl JobStorage {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            output_dir: output_dir.into(),
            clock,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(
            config.scratch_dir.clone(),
            config.output_dir.clone(),
            Arc::clone(&config.clock),
        )
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// New unique job name: `tmp-yyyyMMdd-HHmmss-SSS-<8 hex>`.
    ///
    /// The timestamp comes from the injected clock; the random suffix keeps
    /// jobs started within the same millisecond apart.
    pub fn job_name(&self) -> String {
        let stamp = self.clock.now().format(STAMP_FORMAT);
        let nonce = Uuid::new_v4().simple().to_string();
        format!("{}{}-{}", JOB_FILE_PREFIX, stamp, &nonce[..8])
    }

    pub fn scratch_path(&self, job_name: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("{}.{}", job_name, SCRATCH_EXTENSION))
    }

    pub fn output_path(&self, job_name: &str, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", job_name, extension))
    }

    /// Create both directories if missing.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] naming the directory that could not be
    /// created.
    pub fn ensure_dirs(&self) -> Result<()> {
        ensure_dir(&self.scratch_dir)?;
        ensure_dir(&self.output_dir)
    }

    /// Write the fetched bytes to a scratch copy.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if the directory or file cannot be
    /// written.
    pub fn write_scratch(&self, path: &Path, data: &[u8]) -> Result<()> {
        ensure_dir(&self.scratch_dir)?;
        fs::write(path, data).map_err(|e| ConvertError::fs(path, e))?;
        debug!(
            file = %strip_path(&path.to_string_lossy()),
            bytes = data.len(),
            "stored scratch copy"
        );
        Ok(())
    }

    /// Remove a job's file, ignoring a file that is already gone.
    pub fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(file = %strip_path(&path.to_string_lossy()), "discarded job file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                file = %strip_path(&path.to_string_lossy()),
                "failed to discard job file: {}", e
            ),
        }
    }

    /// Delete everything in the scratch directory. Returns the number of
    /// entries removed; a missing directory counts as empty.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if the directory cannot be listed or an
    /// entry cannot be removed.
    pub fn clear_scratch(&self) -> Result<usize> {
        let removed = clear_dir(&self.scratch_dir)?;
        info!(removed, "cleared scratch directory");
        Ok(removed)
    }

    /// Delete everything in the output directory. Returns the number of
    /// entries removed; a missing directory counts as empty.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Filesystem`] if the directory cannot be listed or an
    /// entry cannot be removed.
    pub fn clear_converted_outputs(&self) -> Result<usize> {
        let removed = clear_dir(&self.output_dir)?;
        info!(removed, "cleared converted outputs");
        Ok(removed)
    }
}

/// Create `dir` and its parents if missing.
///
/// # Errors
///
/// [`ConvertError::Filesystem`] if creation fails or `dir` is a file.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| ConvertError::fs(dir, e))
}

fn clear_dir(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ConvertError::fs(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| ConvertError::fs(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| ConvertError::fs(&path, e))?;

        let result = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConvertError::fs(&path, e)),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn storage() -> (JobStorage, PathBuf) {
        let root = std::env::temp_dir().join(format!("job-storage-test-{}", Uuid::new_v4()));
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap());
        (
            JobStorage::new(root.join("ogg_tmp"), root.join("converted"), Arc::new(clock)),
            root,
        )
    }

    #[test]
    fn test_job_name_format() {
        let (storage, _) = storage();
        let name = storage.job_name();

        assert!(name.starts_with("tmp-20240309-140507-000-"), "{}", name);
        let nonce = name.rsplit('-').next().unwrap();
        assert_eq!(nonce.len(), 8);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_names_unique_under_frozen_clock() {
        let (storage, _) = storage();
        let names: HashSet<String> = (0..64).map(|_| storage.job_name()).collect();
        assert_eq!(names.len(), 64);
    }

    #[test]
    fn test_paths() {
        let (storage, root) = storage();
        assert_eq!(
            storage.scratch_path("tmp-x"),
            root.join("ogg_tmp").join("tmp-x.ogg")
        );
        assert_eq!(
            storage.output_path("tmp-x", "wav"),
            root.join("converted").join("tmp-x.wav")
        );
    }

    #[test]
    fn test_clear_missing_directory_is_noop() {
        let (storage, _) = storage();
        assert_eq!(storage.clear_scratch().unwrap(), 0);
        assert_eq!(storage.clear_converted_outputs().unwrap(), 0);
    }

    #[test]
    fn test_clear_scratch_leaves_outputs() {
        let (storage, root) = storage();
        storage.ensure_dirs().unwrap();
        storage
            .write_scratch(&storage.scratch_path("tmp-a"), b"OggS")
            .unwrap();
        storage
            .write_scratch(&storage.scratch_path("tmp-b"), b"OggS")
            .unwrap();
        fs::write(storage.output_path("tmp-a", "wav"), b"RIFF").unwrap();

        assert_eq!(storage.clear_scratch().unwrap(), 2);
        assert!(storage.scratch_dir().exists());
        assert_eq!(fs::read_dir(storage.scratch_dir()).unwrap().count(), 0);
        assert!(storage.output_path("tmp-a", "wav").exists());

        assert_eq!(storage.clear_converted_outputs().unwrap(), 1);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_discard_missing_file_is_quiet() {
        let (storage, _) = storage();
        storage.discard(&storage.scratch_path("never-written"));
    }
}
