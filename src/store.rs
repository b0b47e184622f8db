//! Durable append-only log of location samples.
//!
//! The store is the only shared mutable resource in the pipeline: a single writer
//! (the location monitor) appends, any number of readers fetch snapshots. Every
//! implementation serializes append and fetch behind one lock so a reader never
//! observes a half-written record.
//!
//! Two implementations are provided:
//! - [`MemoryStore`] - volatile, for tests and previews
//! - [`JsonlStore`] - one JSON record per line, fsynced on every append

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{Bounds, GpsPoint, LocationSample};

/// Errors raised by a [`SampleStore`].
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error), uniffi(flat_error))]
pub enum StoreError {
    /// The record could not be committed to durable storage.
    #[error("failed to persist sample: {0}")]
    WriteFailure(#[source] io::Error),
    /// The log could not be opened or read.
    #[error("failed to read sample log: {0}")]
    ReadFailure(#[source] io::Error),
    /// A complete record in the log could not be decoded.
    #[error("corrupt record on line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    /// The store lock was poisoned by a panicking writer.
    #[error("sample store is unavailable")]
    Unavailable,
}

/// Append-only, insertion-ordered sample storage.
///
/// Samples are never reordered, updated or deleted. Ids are assigned by the store
/// and strictly increase in append order.
pub trait SampleStore: Send + Sync {
    /// Durably persist a new sample and return it with its assigned id.
    fn append(&self, point: GpsPoint, created: i64) -> Result<LocationSample, StoreError>;

    /// All persisted samples in insertion order.
    fn fetch_all(&self) -> Result<Vec<LocationSample>, StoreError>;

    /// Number of persisted samples.
    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.fetch_all()?.len())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Samples inside a bounding box, in insertion order.
    fn fetch_in_bounds(&self, bounds: &Bounds) -> Result<Vec<LocationSample>, StoreError> {
        Ok(self
            .fetch_all()?
            .into_iter()
            .filter(|s| bounds.contains(&s.coordinate()))
            .collect())
    }

    /// Samples created in `[start, end)` (Unix milliseconds), in insertion order.
    fn fetch_between(&self, start: i64, end: i64) -> Result<Vec<LocationSample>, StoreError> {
        Ok(self
            .fetch_all()?
            .into_iter()
            .filter(|s| s.created >= start && s.created < end)
            .collect())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: Mutex<Vec<LocationSample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<LocationSample>>, StoreError> {
        self.samples.lock().map_err(|_| StoreError::Unavailable)
    }
}

impl SampleStore for MemoryStore {
    fn append(&self, point: GpsPoint, created: i64) -> Result<LocationSample, StoreError> {
        let mut samples = self.lock()?;
        let sample = LocationSample {
            id: samples.last().map_or(1, |s| s.id + 1),
            latitude: point.latitude,
            longitude: point.longitude,
            created,
        };
        samples.push(sample);
        Ok(sample)
    }

    fn fetch_all(&self) -> Result<Vec<LocationSample>, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }
}

// ============================================================================
// JSON Lines store
// ============================================================================

struct LogState {
    file: File,
    /// Byte length of the log up to the last fully committed record
    committed_len: u64,
    samples: Vec<LocationSample>,
    next_id: u64,
}

/// Durable store writing one JSON record per line.
///
/// Records look like `{"id":1,"latitude":41.95,"longitude":-87.75,"created":1488240000000}`.
/// The whole log is replayed into memory on open; appends are flushed and synced
/// before returning. A torn final line left by an interrupted write is dropped on open.
pub struct JsonlStore {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl JsonlStore {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StoreError::ReadFailure)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(StoreError::ReadFailure)?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(StoreError::ReadFailure)?;

        let (samples, committed_len) = replay(&contents)?;

        if committed_len < contents.len() as u64 {
            warn!(
                "[SampleStore] Dropping {} bytes of torn record at end of {}",
                contents.len() as u64 - committed_len,
                path.display()
            );
            file.set_len(committed_len).map_err(StoreError::WriteFailure)?;
        }

        let next_id = samples.iter().map(|s| s.id).max().map_or(1, |id| id + 1);

        info!("[SampleStore] Opened {} with {} samples", path.display(), samples.len());

        Ok(Self {
            path,
            state: Mutex::new(LogState { file, committed_len, samples, next_id }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Unavailable)
    }
}

/// Decode the log contents, returning the samples and the byte length they occupy.
fn replay(contents: &str) -> Result<(Vec<LocationSample>, u64), StoreError> {
    let mut samples = Vec::new();
    let mut offset = 0u64;
    let mut committed = 0u64;

    for (index, line) in contents.split_inclusive('\n').enumerate() {
        offset += line.len() as u64;

        // Records are written together with their newline; no newline means the
        // write was interrupted. Only the final line can be in that state.
        if !line.ends_with('\n') {
            break;
        }

        let text = line.trim();
        if !text.is_empty() {
            let sample: LocationSample =
                serde_json::from_str(text).map_err(|e| StoreError::Corrupt {
                    line: index + 1,
                    reason: e.to_string(),
                })?;
            samples.push(sample);
        }
        committed = offset;
    }

    Ok((samples, committed))
}

impl SampleStore for JsonlStore {
    fn append(&self, point: GpsPoint, created: i64) -> Result<LocationSample, StoreError> {
        let mut state = self.lock()?;

        let sample = LocationSample {
            id: state.next_id,
            latitude: point.latitude,
            longitude: point.longitude,
            created,
        };

        let mut line = serde_json::to_string(&sample)
            .map_err(|e| StoreError::WriteFailure(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        line.push('\n');

        let written = {
            let file = &mut state.file;
            file.write_all(line.as_bytes()).and_then(|()| file.sync_data())
        };

        if let Err(e) = written {
            // Roll back a partial record so the next append doesn't land after garbage
            let committed_len = state.committed_len;
            if let Err(truncate_err) = state.file.set_len(committed_len) {
                warn!("[SampleStore] Could not roll back partial write: {}", truncate_err);
            }
            return Err(StoreError::WriteFailure(e));
        }

        state.committed_len += line.len() as u64;
        state.next_id += 1;
        state.samples.push(sample);

        debug!("[SampleStore] Appended {}", sample);
        Ok(sample)
    }

    fn fetch_all(&self) -> Result<Vec<LocationSample>, StoreError> {
        Ok(self.lock()?.samples.clone())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.samples.len())
    }
}
