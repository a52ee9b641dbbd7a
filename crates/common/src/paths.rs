//! Output path generation for recordings.
//!
//! Recordings land under a single base directory as
//! `<prefix><MMdd-HHmmss>.<extension>`. The timestamp is wall-clock time
//! truncated to second resolution, so two calls at least one second apart
//! never collide. Two calls within the same second for the same prefix and
//! extension produce the same path; that collision is accepted and not
//! retried.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::TethercapResult;

/// Generates timestamped output paths under a fixed base directory.
///
/// Stateless apart from the base directory; safe to clone freely.
#[derive(Debug, Clone)]
pub struct PathGenerator {
    base_dir: PathBuf,
}

impl PathGenerator {
    /// Create a generator rooted at the given directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The base directory recordings are written under.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the base directory tree if it does not exist yet.
    ///
    /// Callers are expected to run this once before the first recording;
    /// generation itself never touches the filesystem.
    pub fn ensure_output_dir(&self) -> TethercapResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    /// Generate a timestamped path for the current wall-clock time.
    pub fn generate(&self, prefix: &str, extension: &str) -> PathBuf {
        self.generate_at(prefix, extension, Local::now())
    }

    /// Generate a path for an explicit timestamp.
    pub fn generate_at(&self, prefix: &str, extension: &str, at: DateTime<Local>) -> PathBuf {
        self.base_dir.join(format_filename(prefix, extension, at))
    }
}

/// Format a recording filename: `<prefix><MMdd-HHmmss>.<extension>`.
pub fn format_filename(prefix: &str, extension: &str, at: DateTime<Local>) -> String {
    format!("{prefix}{}.{extension}", at.format("%m%d-%H%M%S"))
}
