//! Progress, cancellation and error-reporting collaborators.
//!
//! The engine polls these services; it never owns the UI behind them.

use crate::error::{PakError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Receives progress updates and answers cancellation polls
pub trait ProgressSink: Send + Sync {
    /// Called once before parsing or extraction begins
    fn on_start(&self) {}

    /// Called with a percentage in `0..=100`, never decreasing within one operation
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// Polled once per record or entry
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Called once when the operation ends, whatever the outcome
    fn on_finish(&self) {}
}

/// Receives unrecoverable load failures, exactly once per failed load
pub trait ErrorReporter: Send + Sync {
    fn report(&self, source: &Path, error: &PakError);
}

/// Progress sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Error reporter that forwards failures to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, source: &Path, error: &PakError) {
        tracing::error!(path = %source.display(), kind = ?error.kind(), "failed to load archive: {}", error);
    }
}

/// Cloneable cancellation flag
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ProgressSink for CancelToken {
    fn is_cancelled(&self) -> bool {
        CancelToken::is_cancelled(self)
    }
}

/// Progress state shared between a background worker and a polling caller
#[derive(Debug, Default)]
pub struct SharedProgress {
    percent: AtomicU8,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl SharedProgress {
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl ProgressSink for SharedProgress {
    fn on_start(&self) {
        self.percent.store(0, Ordering::Release);
    }

    fn on_progress(&self, percent: u8) {
        self.percent.fetch_max(percent.min(100), Ordering::AcqRel);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn on_finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Maps stream positions onto a percentage band and polls for cancellation.
///
/// Formats that unwrap into a scratch file first use `[0, 50]` for the
/// unwrap and `[50, 100]` for the table; single-pass formats use the
/// whole range.
pub struct ParseContext<'a> {
    sink: &'a dyn ProgressSink,
    band: (u8, u8),
    last: u8,
    records: u64,
}

impl<'a> ParseContext<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            band: (0, 100),
            last: 0,
            records: 0,
        }
    }

    /// Restrict subsequent checkpoints to `[start, end]`
    pub fn set_band(&mut self, start: u8, end: u8) {
        self.band = (start.min(100), end.clamp(start.min(100), 100));
    }

    /// Number of record checkpoints seen so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Poll for cancellation without publishing progress
    pub fn check_cancelled(&self) -> Result<()> {
        if self.sink.is_cancelled() {
            return Err(PakError::Cancelled);
        }
        Ok(())
    }

    /// Record-granularity checkpoint: poll cancellation, then publish progress
    pub fn checkpoint(&mut self, position: u64, length: u64) -> Result<()> {
        self.check_cancelled()?;
        self.records += 1;
        let (start, end) = self.band;
        let fraction = if length == 0 {
            1.0
        } else {
            (position.min(length) as f64) / (length as f64)
        };
        let percent = start + ((end - start) as f64 * fraction) as u8;
        self.publish(percent);
        Ok(())
    }

    /// Publish the upper bound of the current band
    pub fn finish_band(&mut self) {
        self.publish(self.band.1);
    }

    /// Publish an absolute percentage (clamped, never decreasing)
    pub fn publish(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.last {
            self.last = percent;
            self.sink.on_progress(percent);
        }
    }
}
