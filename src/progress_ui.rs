//! Per-URI progress output: indicatif bars on a terminal, log lines otherwise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use multidownloader_core::download::{DownloadError, ProgressFn, TransferOutcome};
use multidownloader_core::TransferObserver;
use tracing::info;

/// Bar length; positions are hundredths of a percent.
const BAR_SCALE: u64 = 10_000;

/// Picks the observer for this run.
pub(crate) fn build_observer(use_bars: bool) -> Arc<dyn TransferObserver> {
    if use_bars {
        Arc::new(BarObserver::default())
    } else {
        Arc::new(LogObserver)
    }
}

/// One bar per transfer under a shared [`MultiProgress`], keyed by the
/// transfer's position in the batch.
#[derive(Default)]
struct BarObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<usize, ProgressBar>>,
}

impl TransferObserver for BarObserver {
    fn started(&self, id: usize, url: &str) -> ProgressFn {
        let bar = self.multi.add(ProgressBar::new(BAR_SCALE));
        bar.set_style(
            ProgressStyle::with_template("{msg:40!} [{bar:30.cyan/blue}] {percent:>3}% {elapsed}")
                .map(|style| style.progress_chars("=> "))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(url.to_string());

        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, bar.clone());

        Arc::new(move |percent| bar.set_position(scaled(percent)))
    }

    fn finished(&self, id: usize, url: &str, result: &Result<TransferOutcome, DownloadError>) {
        let bar = self
            .bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(bar) = bar else { return };
        match result {
            Ok(_) => {
                bar.set_position(BAR_SCALE);
                bar.finish_with_message(format!("{url}: done"));
            }
            Err(e) => bar.abandon_with_message(format!("{url}: {}", e.failure_kind())),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled(percent: f64) -> u64 {
    (percent.clamp(0.0, 100.0) * 100.0).round() as u64
}

/// Logs `"<uri>: NN.NN% downloaded"` whenever the whole percentage changes.
struct LogObserver;

impl TransferObserver for LogObserver {
    fn started(&self, _id: usize, url: &str) -> ProgressFn {
        let url = url.to_string();
        let last_whole = AtomicI64::new(-1);
        Arc::new(move |percent| {
            #[allow(clippy::cast_possible_truncation)]
            let whole = percent.floor() as i64;
            if last_whole.swap(whole, Ordering::Relaxed) != whole {
                info!("{url}: {percent:.2}% downloaded");
            }
        })
    }

    fn finished(&self, _id: usize, _url: &str, _result: &Result<TransferOutcome, DownloadError>) {
    }
}
