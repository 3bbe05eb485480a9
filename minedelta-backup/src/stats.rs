use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::change_set::{ChangeKind, RegionChange};

/// Counters filled by diff workers while they run.
#[derive(Debug, Default)]
pub struct DiffStats {
    pub regions_compared: AtomicUsize,
    pub regions_changed: AtomicUsize,
    pub chunks_created: AtomicUsize,
    pub chunks_deleted: AtomicUsize,
    pub chunks_modified: AtomicUsize,
    pub files_changed: AtomicUsize,
    pub bytes_read: AtomicU64,
    pub total_compare_time_us: AtomicU64,
    pub max_compare_time_us: AtomicU64,

    pub start_time: Option<Instant>,
}

impl DiffStats {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_region(
        &self,
        change: Option<&RegionChange>,
        bytes_read: u64,
        duration: Duration,
    ) {
        self.regions_compared.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
        let us = duration.as_micros() as u64;
        self.total_compare_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_compare_time_us.fetch_max(us, Ordering::Relaxed);

        let Some(change) = change else { return };
        self.regions_changed.fetch_add(1, Ordering::Relaxed);
        for chunk in &change.chunks {
            let counter = match chunk.kind() {
                ChangeKind::Created => &self.chunks_created,
                ChangeKind::Deleted => &self.chunks_deleted,
                ChangeKind::Modified => &self.chunks_modified,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_file(&self) {
        self.files_changed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        let elapsed = self.start_time.map(|t| t.elapsed()).unwrap_or_default();
        format!(
            concat!(
                "{} regions compared ({} changed): ",
                "{} chunks modified, {} created, {} deleted; ",
                "{} other files changed; {:.1} MiB read in {:.2?}"
            ),
            self.regions_compared.load(Ordering::Relaxed),
            self.regions_changed.load(Ordering::Relaxed),
            self.chunks_modified.load(Ordering::Relaxed),
            self.chunks_created.load(Ordering::Relaxed),
            self.chunks_deleted.load(Ordering::Relaxed),
            self.files_changed.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0),
            elapsed,
        )
    }

    pub fn log_report(&self) {
        let compared = self.regions_compared.load(Ordering::Relaxed) as u64;
        let avg_us = if compared > 0 {
            self.total_compare_time_us.load(Ordering::Relaxed) / compared
        } else {
            0
        };
        log::debug!(
            "region compare time: avg {}us, max {}us over {} regions",
            avg_us,
            self.max_compare_time_us.load(Ordering::Relaxed),
            compared
        );
    }
}
