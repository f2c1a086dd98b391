use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Periodically deletes stale files under the managed roots.
///
/// Looks only at filesystem metadata, never at job state.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    roots: Vec<PathBuf>,
    ttl: Duration,
    interval: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub files_deleted: usize,
    pub dirs_pruned: usize,
    pub errors: usize,
}

impl RetentionSweeper {
    pub fn new(roots: Vec<PathBuf>, ttl: Duration, interval: Duration) -> Self {
        Self {
            roots,
            ttl,
            interval,
        }
    }

    /// Sweep every `interval` until `shutdown` fires. The first sweep runs immediately.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Retention sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let report = self.sweep_once().await;
                        tracing::info!(
                            files_deleted = report.files_deleted,
                            dirs_pruned = report.dirs_pruned,
                            errors = report.errors,
                            "Retention sweep finished"
                        );
                    }
                }
            }
        })
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let roots = self.roots.clone();
        let ttl = self.ttl;
        let result = tokio::task::spawn_blocking(move || {
            let now = SystemTime::now();
            let mut report = SweepReport::default();
            for root in &roots {
                sweep_root(root, ttl, now, &mut report, &|path| std::fs::remove_file(path));
            }
            report
        })
        .await;

        match result {
            Ok(report) => {
                metrics::counter!("face_sweep_deleted_total").increment(report.files_deleted as u64);
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "Retention sweep task failed");
                SweepReport {
                    errors: 1,
                    ..SweepReport::default()
                }
            }
        }
    }
}

fn sweep_root(
    root: &Path,
    ttl: Duration,
    now: SystemTime,
    report: &mut SweepReport,
    remove_file: &dyn Fn(&Path) -> io::Result<()>,
) {
    if !root.is_dir() {
        return;
    }

    // Children are visited before their parent so emptied folders can be pruned.
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read entry during sweep");
                report.errors += 1;
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            let is_empty = std::fs::read_dir(path)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if is_empty {
                match std::fs::remove_dir(path) {
                    Ok(()) => report.dirs_pruned += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to prune directory");
                        report.errors += 1;
                    }
                }
            }
            continue;
        }

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "No modification time");
                report.errors += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to stat artifact");
                report.errors += 1;
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or_default();
        if age <= ttl {
            continue;
        }

        match remove_file(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Deleted expired artifact");
                report.files_deleted += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete artifact");
                report.errors += 1;
            }
        }
    }
}
