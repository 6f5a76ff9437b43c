use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stress_core::prelude::DelegatedShutdownListener;
use indicatif::{ProgressBar, ProgressStyle};

/// Counts samples as workers produce them so that progress can be shown while the driver runs.
#[derive(Debug, Clone, Default)]
pub struct SampleProgress {
    completed: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
}

impl SampleProgress {
    pub fn inc(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Stop displaying progress, even if fewer samples than planned were produced.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Displays a progress bar while the driver is running to show the user how many samples are left.
pub(crate) fn start_progress(
    total: usize,
    progress: SampleProgress,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let pb = ProgressBar::new(total as u64);
            match ProgressStyle::with_template(
                "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} samples [{elapsed_precise}]",
            ) {
                Ok(style) => pb.set_style(style.progress_chars("#>-")),
                Err(e) => log::debug!("Using default progress style: {e:?}"),
            }

            loop {
                if shutdown_listener.should_shutdown() || progress.is_finished() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let completed = progress.completed();
                pb.set_position(completed.min(total) as u64);
                if completed >= total {
                    pb.finish_and_clear();
                    break;
                }

                std::thread::sleep(Duration::from_millis(200));
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start progress thread: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_count() {
        let progress = SampleProgress::default();
        let other = progress.clone();

        progress.inc();
        other.inc();

        assert_eq!(2, progress.completed());
        assert!(!other.is_finished());
        progress.finish();
        assert!(other.is_finished());
    }
}
