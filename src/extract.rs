//! Writing container entries to a directory tree.
//!
//! Destinations are resolved and made unique before any worker starts, so
//! no two workers ever write the same path.

use crate::config::{ExtractFlags, ExtractOptions};
use crate::container::Container;
use crate::entry::Entry;
use crate::error::{PakError, Result};
use crate::progress::ProgressSink;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Outcome of an extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub root: PathBuf,
    /// Files written, in table order
    pub files: Vec<PathBuf>,
    pub directories: usize,
    pub bytes: u64,
    pub threads_used: usize,
    /// Echo of `OPEN_AFTER_EXTRACTION` for the host shell
    pub open_after: bool,
}

struct Job<'a> {
    entry: &'a Entry,
    destination: PathBuf,
}

/// Relative destination for an archive path, rejecting anything that could
/// escape the extraction root
fn relative_destination(path: &str, flatten: bool) -> Result<PathBuf> {
    let relative = Path::new(path);
    for component in relative.components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(PakError::PathError(format!(
                "refusing to extract outside the destination: {}",
                path
            )));
        }
    }
    if flatten {
        let name = relative
            .file_name()
            .ok_or_else(|| PakError::PathError(format!("no file name in {}", path)))?;
        return Ok(PathBuf::from(name));
    }
    Ok(relative.to_path_buf())
}

/// `name.ext` → `name (n).ext`
fn with_suffix(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

fn unique_key(path: &Path, ignore_case: bool) -> String {
    let key = path.to_string_lossy().replace('\\', "/");
    if ignore_case {
        key.to_lowercase()
    } else {
        key
    }
}

fn write_entry(job: &Job<'_>) -> Result<u64> {
    let data = job.entry.decompressed_data()?;
    if let Some(parent) = job.destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&job.destination, &data)?;
    Ok(data.len() as u64)
}

/// Publishes `done / total` without ever going backwards
struct Ticker<'a> {
    sink: &'a dyn ProgressSink,
    done: AtomicUsize,
    last: Mutex<u8>,
    total: usize,
}

impl Ticker<'_> {
    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        let percent = ((done * 100) / self.total.max(1)).min(100) as u8;
        if let Ok(mut last) = self.last.lock() {
            if percent > *last {
                *last = percent;
                self.sink.on_progress(percent);
            }
        }
    }
}

impl Container {
    /// Extract every live entry under `destination`.
    ///
    /// Runs sequentially under `SINGLE_THREADED` or for tables smaller than
    /// the configured threshold (unless `OVERRIDE_PERFORMANCE_HINT`),
    /// otherwise on a rayon pool of `worker_count()` threads. Cancellation is
    /// polled before each entry.
    pub fn extract<P: AsRef<Path>>(
        &self,
        destination: P,
        options: &ExtractOptions,
        progress: &dyn ProgressSink,
    ) -> Result<ExtractReport> {
        self.ensure_usable()?;
        let flags = options.flags;
        let flatten = flags.contains(ExtractFlags::EXTRACT_ALL_TO_ONE_FOLDER);
        let ignore_case = flags.contains(ExtractFlags::IGNORE_CASE);

        let root = if flags.contains(ExtractFlags::USE_APP_DATA_SCRATCH_PATH) {
            options.config.scratch_root().join(destination.as_ref())
        } else {
            destination.as_ref().to_path_buf()
        };
        std::fs::create_dir_all(&root)?;

        let mut taken = HashSet::new();
        let mut jobs = Vec::new();
        let mut directories = 0;
        for entry in self.entries() {
            let relative = relative_destination(&entry.path, flatten)?;
            if entry.is_directory() {
                if !flatten {
                    std::fs::create_dir_all(root.join(&relative))?;
                    directories += 1;
                }
                continue;
            }

            let mut candidate = relative.clone();
            let mut n = 1;
            while !taken.insert(unique_key(&candidate, ignore_case)) {
                candidate = with_suffix(&relative, n);
                n += 1;
            }
            jobs.push(Job {
                entry,
                destination: root.join(candidate),
            });
        }

        let threads = options.config.worker_count();
        let parallel = !flags.contains(ExtractFlags::SINGLE_THREADED)
            && threads > 1
            && (jobs.len() >= options.config.parallel_threshold
                || flags.contains(ExtractFlags::OVERRIDE_PERFORMANCE_HINT));

        let ticker = Ticker {
            sink: progress,
            done: AtomicUsize::new(0),
            last: Mutex::new(0),
            total: jobs.len(),
        };
        let bytes = AtomicUsize::new(0);
        let run = |job: &Job<'_>| -> Result<()> {
            if progress.is_cancelled() {
                return Err(PakError::Cancelled);
            }
            let written = write_entry(job)?;
            bytes.fetch_add(written as usize, Ordering::Relaxed);
            ticker.tick();
            Ok(())
        };

        progress.on_start();
        let result = if parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| PakError::Io(std::io::Error::other(e)))?;
            pool.install(|| jobs.par_iter().try_for_each(run))
        } else {
            jobs.iter().try_for_each(run)
        };
        progress.on_finish();
        result?;

        let report = ExtractReport {
            root,
            files: jobs.into_iter().map(|job| job.destination).collect(),
            directories,
            bytes: bytes.load(Ordering::Relaxed) as u64,
            threads_used: if parallel { threads } else { 1 },
            open_after: flags.contains(ExtractFlags::OPEN_AFTER_EXTRACTION),
        };
        tracing::info!(
            root = %report.root.display(),
            files = report.files.len(),
            bytes = report.bytes,
            threads = report.threads_used,
            "extracted container"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_rejected() {
        assert!(relative_destination("../etc/passwd", false).is_err());
        assert!(relative_destination("/abs/path", false).is_err());
        assert_eq!(
            relative_destination("a/b/c.txt", true).unwrap(),
            PathBuf::from("c.txt")
        );
    }

    #[test]
    fn test_collision_suffix() {
        assert_eq!(
            with_suffix(Path::new("dir/name.txt"), 2),
            PathBuf::from("dir/name (2).txt")
        );
        assert_eq!(with_suffix(Path::new("README"), 1), PathBuf::from("README (1)"));
    }
}
