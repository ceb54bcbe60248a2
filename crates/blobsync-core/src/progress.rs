//! Byte and file accounting for a push.
//!
//! Totals are established as pointers are first seen (`add`) and are only
//! ever corrected downward with `skip`, never recomputed.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressStats {
    pub total_bytes: u64,
    pub total_files: u64,
    pub transferred_bytes: u64,
    pub transferred_files: u64,
    pub skipped_bytes: u64,
    pub skipped_files: u64,
}

impl ProgressStats {
    /// Bytes of the original total that have been accounted for either way.
    pub fn accounted_bytes(&self) -> u64 {
        self.transferred_bytes + self.skipped_bytes
    }
}

#[derive(Default)]
struct Counters {
    total_bytes: AtomicU64,
    total_files: AtomicU64,
    transferred_bytes: AtomicU64,
    transferred_files: AtomicU64,
    skipped_bytes: AtomicU64,
    skipped_files: AtomicU64,
}

/// Shared progress handle. Clones report into the same counters.
#[derive(Clone)]
pub struct ProgressMeter {
    counters: Arc<Counters>,
    bar: Option<ProgressBar>,
}

impl ProgressMeter {
    /// Meter that renders a bar on stderr when attached to a terminal.
    /// Dry runs never render.
    pub fn new(dry_run: bool) -> Self {
        let bar = if dry_run || !std::io::stderr().is_terminal() {
            None
        } else {
            Some(build_bar())
        };
        Self {
            counters: Arc::new(Counters::default()),
            bar,
        }
    }

    pub fn hidden() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            bar: None,
        }
    }

    /// Count one more file of `size` bytes toward the total.
    pub fn add(&self, size: u64) {
        self.counters.total_bytes.fetch_add(size, Ordering::Relaxed);
        self.counters.total_files.fetch_add(1, Ordering::Relaxed);
        self.redraw();
    }

    /// Retroactively drop one file of `size` bytes from the total.
    pub fn skip(&self, size: u64) {
        self.counters.skipped_bytes.fetch_add(size, Ordering::Relaxed);
        self.counters.skipped_files.fetch_add(1, Ordering::Relaxed);
        self.redraw();
    }

    /// Record one completed transfer.
    pub fn transferred(&self, size: u64) {
        self.counters
            .transferred_bytes
            .fetch_add(size, Ordering::Relaxed);
        self.counters
            .transferred_files
            .fetch_add(1, Ordering::Relaxed);
        self.redraw();
    }

    pub fn snapshot(&self) -> ProgressStats {
        let c = &self.counters;
        ProgressStats {
            total_bytes: c.total_bytes.load(Ordering::Relaxed),
            total_files: c.total_files.load(Ordering::Relaxed),
            transferred_bytes: c.transferred_bytes.load(Ordering::Relaxed),
            transferred_files: c.transferred_files.load(Ordering::Relaxed),
            skipped_bytes: c.skipped_bytes.load(Ordering::Relaxed),
            skipped_files: c.skipped_files.load(Ordering::Relaxed),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            self.redraw();
            bar.finish_and_clear();
        }
    }

    fn redraw(&self) {
        let Some(bar) = &self.bar else { return };
        let stats = self.snapshot();
        let files = stats.total_files.saturating_sub(stats.skipped_files);
        bar.set_length(stats.total_bytes.saturating_sub(stats.skipped_bytes));
        bar.set_position(stats.transferred_bytes);
        bar.set_message(format!(
            "Uploading objects: {}/{} files",
            stats.transferred_files, files
        ));
    }
}

fn build_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} {bar:30.cyan/blue} {bytes}/{total_bytes} ({binary_bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}
