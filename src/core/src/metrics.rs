//! Metrics sink shared by the agent and the orchestrator.
//!
//! A [`MetricsRegistry`] is constructed once at process start and handed down
//! as `Arc<dyn StatsReporter>`. Nothing in this crate keeps global state.

use crate::resources::Phase;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Upper bounds (milliseconds) of the job duration histogram buckets
pub const DURATION_BUCKETS_MS: &[f64] = &[
    1_000.0, 5_000.0, 15_000.0, 30_000.0, 60_000.0, 300_000.0, 900_000.0, 3_600_000.0,
];

/// Where components report what they did
pub trait StatsReporter: Send + Sync {
    /// Images actually removed from a node
    fn record_images_removed(&self, count: u64);

    /// Targets that were requested but could not be removed because a
    /// container still uses them
    fn record_non_compliant(&self, count: u64);

    fn record_pods_completed(&self, count: u64);

    fn record_pods_failed(&self, count: u64);

    /// A WorkItem reached a terminal phase after `duration`
    fn record_job(&self, phase: Phase, duration: std::time::Duration);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub images_removed: u64,
    pub non_compliant_images: u64,
    pub pods_completed: u64,
    pub pods_failed: u64,
    pub imagejob_completed: u64,
    pub imagejob_failed: u64,
    pub imagejob_duration_count: u64,
    pub imagejob_duration_sum_ms: f64,
}

#[derive(Debug, Default)]
struct Histogram {
    /// Cumulative count per bucket in [`DURATION_BUCKETS_MS`]
    buckets: Vec<u64>,
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        if self.buckets.is_empty() {
            self.buckets = vec![0; DURATION_BUCKETS_MS.len()];
        }
        for (i, bound) in DURATION_BUCKETS_MS.iter().enumerate() {
            if value <= *bound {
                self.buckets[i] += 1;
            }
        }
        self.count += 1;
        self.sum += value;
    }
}

/// In-process metrics registry with Prometheus text rendering
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    images_removed: AtomicU64,
    non_compliant_images: AtomicU64,
    pods_completed: AtomicU64,
    pods_failed: AtomicU64,
    imagejob_completed: AtomicU64,
    imagejob_failed: AtomicU64,
    duration: Mutex<Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (count, sum) = match self.duration.lock() {
            Ok(h) => (h.count, h.sum),
            Err(poisoned) => {
                let h = poisoned.into_inner();
                (h.count, h.sum)
            }
        };

        MetricsSnapshot {
            images_removed: self.images_removed.load(Ordering::Relaxed),
            non_compliant_images: self.non_compliant_images.load(Ordering::Relaxed),
            pods_completed: self.pods_completed.load(Ordering::Relaxed),
            pods_failed: self.pods_failed.load(Ordering::Relaxed),
            imagejob_completed: self.imagejob_completed.load(Ordering::Relaxed),
            imagejob_failed: self.imagejob_failed.load(Ordering::Relaxed),
            imagejob_duration_count: count,
            imagejob_duration_sum_ms: sum,
        }
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        counter(&mut out, "images_removed", "Images removed from nodes", snap.images_removed);
        counter(
            &mut out,
            "non_compliant_images",
            "Requested images left in place because they are in use",
            snap.non_compliant_images,
        );
        counter(&mut out, "pods_completed", "Agent pods that succeeded", snap.pods_completed);
        counter(&mut out, "pods_failed", "Agent pods that failed", snap.pods_failed);

        out.push_str("# HELP imagejob_total WorkItems that reached a terminal phase\n");
        out.push_str("# TYPE imagejob_total counter\n");
        out.push_str(&format!(
            "imagejob_total{{result=\"completed\"}} {}\n",
            snap.imagejob_completed
        ));
        out.push_str(&format!(
            "imagejob_total{{result=\"failed\"}} {}\n",
            snap.imagejob_failed
        ));

        out.push_str("# HELP imagejob_duration_ms Time from WorkItem creation to terminal phase\n");
        out.push_str("# TYPE imagejob_duration_ms histogram\n");
        let buckets = match self.duration.lock() {
            Ok(h) => h.buckets.clone(),
            Err(poisoned) => poisoned.into_inner().buckets.clone(),
        };
        for (i, bound) in DURATION_BUCKETS_MS.iter().enumerate() {
            let value = buckets.get(i).copied().unwrap_or(0);
            out.push_str(&format!(
                "imagejob_duration_ms_bucket{{le=\"{}\"}} {}\n",
                bound, value
            ));
        }
        out.push_str(&format!(
            "imagejob_duration_ms_bucket{{le=\"+Inf\"}} {}\n",
            snap.imagejob_duration_count
        ));
        out.push_str(&format!(
            "imagejob_duration_ms_sum {}\n",
            snap.imagejob_duration_sum_ms
        ));
        out.push_str(&format!(
            "imagejob_duration_ms_count {}\n",
            snap.imagejob_duration_count
        ));

        out
    }

    /// Emit the final values through the log. Called once at shutdown.
    pub fn flush(&self) {
        let snap = self.snapshot();
        tracing::info!(
            images_removed = snap.images_removed,
            non_compliant_images = snap.non_compliant_images,
            pods_completed = snap.pods_completed,
            pods_failed = snap.pods_failed,
            imagejob_completed = snap.imagejob_completed,
            imagejob_failed = snap.imagejob_failed,
            "[Metrics] Flushed"
        );
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
    out.push_str(&format!("{} {}\n", name, value));
}

impl StatsReporter for MetricsRegistry {
    fn record_images_removed(&self, count: u64) {
        self.images_removed.fetch_add(count, Ordering::Relaxed);
    }

    fn record_non_compliant(&self, count: u64) {
        self.non_compliant_images.fetch_add(count, Ordering::Relaxed);
    }

    fn record_pods_completed(&self, count: u64) {
        self.pods_completed.fetch_add(count, Ordering::Relaxed);
    }

    fn record_pods_failed(&self, count: u64) {
        self.pods_failed.fetch_add(count, Ordering::Relaxed);
    }

    fn record_job(&self, phase: Phase, duration: std::time::Duration) {
        match phase {
            Phase::Completed => self.imagejob_completed.fetch_add(1, Ordering::Relaxed),
            Phase::Failed => self.imagejob_failed.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };

        let ms = duration.as_secs_f64() * 1000.0;
        match self.duration.lock() {
            Ok(mut h) => h.observe(ms),
            Err(poisoned) => poisoned.into_inner().observe(ms),
        }
    }
}
