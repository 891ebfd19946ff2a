//! Per-resource progress aggregation.
//!
//! Every segment reports its own completion percentage; the aggregator keeps
//! the latest value per segment and forwards the average to the resource's
//! progress callback on each report.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Progress callback receiving a completion percentage in `0.0..=100.0`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Callback that discards every report.
#[must_use]
pub fn silent_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Running average over the segments of one resource.
pub struct ProgressAggregator {
    per_segment: Mutex<Vec<f64>>,
    report: ProgressFn,
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("average", &self.average())
            .finish_non_exhaustive()
    }
}

impl ProgressAggregator {
    /// Creates an aggregator for `segment_count` segments (at least one).
    #[must_use]
    pub fn new(segment_count: usize, report: ProgressFn) -> Self {
        Self {
            per_segment: Mutex::new(vec![0.0; segment_count.max(1)]),
            report,
        }
    }

    /// Records `percent` for segment `id` (1-based) and reports the new average.
    ///
    /// Ids outside the plan are ignored.
    pub fn update(&self, id: usize, percent: f64) {
        let average = {
            let mut slots = self
                .per_segment
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = id.checked_sub(1).and_then(|index| slots.get_mut(index)) else {
                return;
            };
            *slot = percent.clamp(0.0, 100.0);
            mean(&slots)
        };
        (self.report)(average);
    }

    /// Current average across all segments.
    #[must_use]
    pub fn average(&self) -> f64 {
        let slots = self
            .per_segment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        mean(&slots)
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Percentage of `done` over `total`; a zero total counts as complete.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}
