//! Progress display for batch runs.

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::pipeline::BatchEvent;

/// Single summary bar driven by batch runner events.
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                .unwrap()
                .progress_chars("█▓░"),
        );
        bar.set_message("Processing");
        Self { bar }
    }

    /// Consume events until the channel closes.
    pub async fn drive(self, mut events: mpsc::Receiver<BatchEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BatchEvent::PageFetched { candidates, .. } => {
                    self.bar.inc_length(candidates as u64);
                }
                BatchEvent::DocumentStored { .. }
                | BatchEvent::DocumentSkipped { .. }
                | BatchEvent::DocumentFailed { .. } => {
                    self.bar.inc(1);
                }
                BatchEvent::SourceExhausted => {
                    self.bar.set_message("Draining");
                }
                BatchEvent::Cancelled => {
                    self.bar.set_message("Cancelled");
                }
            }
        }
        self.bar.finish_and_clear();
    }
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self::new()
    }
}
