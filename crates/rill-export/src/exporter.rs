//! Export trigger - writes a retained range to a sink

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use rill_core::{RillError, RillResult, SegmentId};
use rill_store::SegmentStore;

/// What an export wrote
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportReport {
    pub from: SegmentId,
    pub to: SegmentId,
    pub segments: usize,
    pub bytes: u64,
}

/// Export counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs currently writing
    pub active: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
    bytes_written: AtomicU64,
}

/// Scoped registration of one running export.
///
/// A job that is dropped without [`ExportJob::complete`] (an error, or the
/// export future being cancelled) counts as failed.
struct ExportJob {
    counters: Arc<Counters>,
    done: bool,
}

impl ExportJob {
    fn start(counters: &Arc<Counters>) -> Self {
        counters.started.fetch_add(1, Ordering::Relaxed);
        counters.active.fetch_add(1, Ordering::Relaxed);
        ExportJob {
            counters: counters.clone(),
            done: false,
        }
    }

    fn complete(mut self, bytes: u64) {
        self.done = true;
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }
}

impl Drop for ExportJob {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        if !self.done {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A `.partial` file that is deleted when dropped, unless kept
struct StagingFile {
    path: PathBuf,
    keep: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        StagingFile { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file was renamed into place
    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        // Sync removal: Drop also runs when the export future is cancelled.
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "no partial export to remove");
        }
    }
}

/// Materializes retained ranges into recordings
#[derive(Clone, Debug, Default)]
pub struct Exporter {
    counters: Arc<Counters>,
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write segments `from..=to` to `sink` in id order, then flush it.
    ///
    /// Fails with `RangeUnavailable` if any id in the range is not retained
    /// when the export starts, or is evicted before it is written.
    pub async fn export<W>(
        &self,
        store: &SegmentStore,
        from: SegmentId,
        to: SegmentId,
        sink: &mut W,
    ) -> RillResult<ExportReport>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let job = ExportJob::start(&self.counters);
        let snapshot = store.range(from, to)?;
        debug!(from = %from, to = %to, segments = snapshot.len(), "export snapshot taken");

        let mut bytes = 0u64;
        for segment in &snapshot {
            if !store.retains(segment.id()) {
                warn!(from = %from, to = %to, evicted = %segment.id(), "range evicted during export");
                return Err(RillError::RangeUnavailable { from, to });
            }
            sink.write_all(segment.payload()).await?;
            bytes += segment.len() as u64;
        }
        sink.flush().await?;

        job.complete(bytes);
        info!(from = %from, to = %to, segments = snapshot.len(), bytes, "export complete");

        Ok(ExportReport {
            from,
            to,
            segments: snapshot.len(),
            bytes,
        })
    }

    /// Export to a file at `path`.
    ///
    /// Data goes to a `.partial` sibling first and is renamed into place
    /// only once complete. The staging file is removed on every other exit,
    /// including cancellation of the returned future.
    pub async fn export_to_file(
        &self,
        store: &SegmentStore,
        from: SegmentId,
        to: SegmentId,
        path: &Path,
    ) -> RillResult<ExportReport> {
        let staging = StagingFile::new(partial_path(path));

        let mut file = File::create(staging.path()).await?;
        let report = self.export(store, from, to, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(staging.path(), path).await?;
        staging.keep();
        Ok(report)
    }

    pub fn stats(&self) -> ExportStats {
        let c = &self.counters;
        ExportStats {
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            active: c.active.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
