//! Progress reporting and cooperative cancellation.
//!
//! Long operations (reading a log, searching root paths) take a
//! [`ProgressSink`]. They report a fraction in `[0, 1]` at coarse steps and
//! check [`ProgressSink::is_cancelled`] at the same steps, never per event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait ProgressSink {
    fn report_progress(&self, message: &str, fraction: f64);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Ignores progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report_progress(&self, _message: &str, _fraction: f64) {}
}

/// A shareable cancellation flag, usable as a sink on its own.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl ProgressSink for CancelFlag {
    fn report_progress(&self, _message: &str, _fraction: f64) {}

    fn is_cancelled(&self) -> bool {
        self.is_set()
    }
}

/// Prints whole-percent progress to stderr, with an optional cancel flag.
#[derive(Debug, Default)]
pub struct StderrProgress {
    cancel: CancelFlag,
    last_percent: std::sync::atomic::AtomicU64,
}

impl StderrProgress {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            last_percent: std::sync::atomic::AtomicU64::new(u64::MAX),
        }
    }
}

impl ProgressSink for StderrProgress {
    fn report_progress(&self, message: &str, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u64;
        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            eprint!("\r{}: {:>3}%", message, percent);
            if percent == 100 {
                eprintln!();
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }
}
