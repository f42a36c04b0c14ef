//! On-disk fallback for batches the collector never accepted.
//!
//! Batches are appended to `SpillConfig.file_path` as NDJSON. The file is
//! rotated at UTC midnight (suffix `.YYYY-MM-DD`) and once it reaches
//! `max_file_size_bytes` (suffix `.YYYY-MM-DD-HHMMSSmmm`). A rotated name that
//! is already taken gets a `.NNN` sequence so no earlier rotation is
//! overwritten. Only the newest `max_rotated_files` rotated files are kept.
//! Nothing reads these files back.

use crate::batch::Batch;
use chrono::{NaiveDate, Utc};
use siphon_core::config::SpillConfig;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Rotating NDJSON spill file. Safe to share between delivery tasks.
pub struct SpillWriter {
    config: SpillConfig,
    inner: Mutex<WriterState>,
}

struct WriterState {
    writer: BufWriter<File>,
    current_date: NaiveDate,
    current_size: u64,
}

impl SpillWriter {
    /// Open (or create) the spill file and any missing parent directories.
    pub fn open(config: SpillConfig) -> io::Result<Self> {
        if let Some(parent) = config.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = open_append(&config.file_path)?;
        let current_size = file.metadata()?.len();

        info!(path = %config.file_path.display(), "Spill file opened");

        Ok(Self {
            config,
            inner: Mutex::new(WriterState {
                writer: BufWriter::new(file),
                current_date: Utc::now().date_naive(),
                current_size,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.file_path
    }

    /// Append every entry of `batch`, one per line, and flush.
    pub fn write_batch(&self, batch: &Batch) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("spill writer lock poisoned"))?;

        self.rotate_if_needed(&mut state)?;

        let body = batch.body();
        state.writer.write_all(&body)?;
        state.writer.flush()?;
        state.current_size += body.len() as u64;

        debug!(records = batch.len(), bytes = body.len(), "Spilled batch");
        Ok(())
    }

    fn rotate_if_needed(&self, state: &mut WriterState) -> io::Result<()> {
        let today = Utc::now().date_naive();
        let date_rotate = today != state.current_date;
        let size_rotate = self.config.max_file_size_bytes > 0
            && state.current_size >= self.config.max_file_size_bytes;

        if !date_rotate && !size_rotate {
            return Ok(());
        }

        state.writer.flush()?;

        let suffix = if date_rotate {
            state.current_date.format("%Y-%m-%d").to_string()
        } else {
            Utc::now().format("%Y-%m-%d-%H%M%S%3f").to_string()
        };
        let rotated = unused_rotated_file_path(&self.config.file_path, &suffix);

        match fs::rename(&self.config.file_path, &rotated) {
            Ok(()) => info!(
                from = %self.config.file_path.display(),
                to = %rotated.display(),
                "Rotated spill file"
            ),
            Err(e) => error!(
                error = %e,
                from = %self.config.file_path.display(),
                to = %rotated.display(),
                "Failed to rotate spill file"
            ),
        }

        if self.config.max_rotated_files > 0 {
            if let Err(e) = prune_rotated_files(&self.config.file_path, self.config.max_rotated_files)
            {
                warn!(error = %e, "Failed to prune rotated spill files");
            }
        }

        state.writer = BufWriter::new(open_append(&self.config.file_path)?);
        state.current_date = today;
        state.current_size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `spill.ndjson` → `spill.ndjson.2025-01-15`.
fn rotated_file_path(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

/// First of `base.suffix`, `base.suffix.001`, `base.suffix.002`, ... that
/// does not exist yet.
fn unused_rotated_file_path(base: &Path, suffix: &str) -> PathBuf {
    let candidate = rotated_file_path(base, suffix);
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|seq| rotated_file_path(base, &format!("{suffix}.{seq:03}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Keep only the newest `keep` rotated files next to `base_path`.
fn prune_rotated_files(base_path: &Path, keep: usize) -> io::Result<()> {
    let parent = match base_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let base_name = base_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let prefix = format!("{base_name}.");

    let mut rotated: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            rotated.push(entry.path());
        }
    }

    // Suffixes are timestamps, so lexical order is chronological.
    rotated.sort();

    if rotated.len() > keep {
        let excess = rotated.len() - keep;
        for path in rotated.iter().take(excess) {
            debug!(path = %path.display(), "Pruning rotated spill file");
            fs::remove_file(path)?;
        }
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
