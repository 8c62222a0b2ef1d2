//! Per-request temp file tracking.
//!
//! Every file a request creates on disk (the fetched original, resized
//! intermediates, codec candidates) is registered here before it is written,
//! and removed by [`TempTracker::cleanup`] once the response is done.
//!
//! File names are derived from the tracker id (a UUID v4), so concurrent
//! requests sharing one working directory never collide.
//!
//! # Example
//!
//! ```no_run
//! use imgsrv::temp_tracker::TempTracker;
//!
//! # async fn run() {
//! let tracker = TempTracker::new("/tmp/imgsrv");
//! let original = tracker.create("png");
//! // ... write to `original`, run codecs, register their outputs ...
//! let report = tracker.cleanup().await;
//! assert!(report.is_clean());
//! # }
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use parking_lot::Mutex;
use uuid::Uuid;

/// Outcome of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files that existed and were deleted
    pub removed: usize,
    /// Registered paths that were never written (or already gone)
    pub missing: usize,
    /// Paths whose removal failed for another reason
    pub failed: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the temp paths of exactly one request.
#[derive(Debug)]
pub struct TempTracker {
    id: String,
    dir: PathBuf,
    files: Mutex<Vec<PathBuf>>,
    created: Mutex<u32>,
}

impl TempTracker {
    /// Create a tracker with a fresh random id.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_id(dir, Uuid::new_v4().to_string())
    }

    /// Create a tracker reusing an existing correlation id.
    pub fn with_id(dir: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
            files: Mutex::new(Vec::new()),
            created: Mutex::new(0),
        }
    }

    /// The tracker id, doubling as the request correlation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate and register a fresh path `<dir>/<id>.<ext>`.
    ///
    /// A second allocation on the same tracker gets a numeric suffix
    /// (`<id>-1.<ext>`) so paths stay unique.
    pub fn create(&self, ext: &str) -> PathBuf {
        let seq = {
            let mut created = self.created.lock();
            let seq = *created;
            *created += 1;
            seq
        };

        let name = if seq == 0 {
            format!("{}.{}", self.id, ext)
        } else {
            format!("{}-{}.{}", self.id, seq, ext)
        };

        let path = self.dir.join(name);
        self.add(path.clone());
        path
    }

    /// Register a path produced by someone else (e.g. a codec output).
    pub fn add(&self, path: impl Into<PathBuf>) {
        self.files.lock().push(path.into());
    }

    /// Snapshot of every registered path, in registration order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().clone()
    }

    /// Remove every registered path.
    ///
    /// All removals are attempted even if some fail. A path that does not
    /// exist counts as `missing`, not as a failure. Consuming `self` makes
    /// this callable once per tracker.
    pub async fn cleanup(self) -> CleanupReport {
        let files = std::mem::take(&mut *self.files.lock());

        let results = join_all(files.into_iter().map(|path| async move {
            let result = tokio::fs::remove_file(&path).await;
            (path, result)
        }))
        .await;

        let mut report = CleanupReport::default();
        for (path, result) in results {
            match result {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    tracing::error!(
                        request_id = %self.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove temp file"
                    );
                    report.failed.push(path);
                }
            }
        }

        tracing::debug!(
            request_id = %self.id,
            removed = report.removed,
            missing = report.missing,
            failed = report.failed.len(),
            "Temp files cleaned up"
        );

        report
    }
}

impl Drop for TempTracker {
    // Reached with registered files only when the owning request future was
    // dropped before `cleanup` ran (client disconnect).
    fn drop(&mut self) {
        let files = std::mem::take(&mut *self.files.lock());
        if files.is_empty() {
            return;
        }

        tracing::warn!(
            request_id = %self.id,
            files = files.len(),
            "Request abandoned before cleanup, removing temp files synchronously"
        );

        for path in files {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::error!(
                        request_id = %self.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove temp file"
                    );
                }
            }
        }
    }
}
