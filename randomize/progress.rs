//! Observers for reporting incremental progress while scoring candidates.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;

/// Observer for candidate scoring.
///
/// Scoring runs on a thread pool, so implementations must be `Sync` and
/// `on_partition_scored` may fire from worker threads in any order.
pub trait EvaluationObserver: Sync {
    fn on_start(&self, total_candidates: usize) {
        let _ = total_candidates;
    }
    fn on_partition_scored(&self, iteration: usize, mean_imbalance: f64) {
        let _ = (iteration, mean_imbalance);
    }
    fn on_finish(&self) {}
}

#[derive(Default)]
pub struct NoopObserver;

impl EvaluationObserver for NoopObserver {}

/// Renders scoring progress as a stderr bar, hidden when stderr is not a
/// terminal.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new(total_candidates: usize, message: &str) -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };

        let bar = ProgressBar::with_draw_target(Some(total_candidates as u64), draw_target);
        bar.set_style(
            ProgressStyle::with_template(
                "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_message(message.to_string());

        Self { bar }
    }
}

impl EvaluationObserver for ConsoleProgress {
    fn on_partition_scored(&self, _iteration: usize, _mean_imbalance: f64) {
        self.bar.inc(1);
    }

    fn on_finish(&self) {
        self.bar.finish_with_message("scoring complete");
    }
}
